//! Invoice issuance, payment application, cancellation, and reopening.
//!
//! Every mutation here writes the invoice row and its journal entry through
//! the same transaction, so the journal and the invoice totals never drift.

use crate::directory::OwnershipDirectory;
use crate::error::{BillingError, ConflictCode};
use crate::ledger::LedgerEntry;
use crate::sinks::{invoice_payload, NotificationKind, Outbox};
use crate::store::BillingTx;
use crate::types::{
    Charge, ChargeLine, ChargeStatus, Invoice, InvoiceStatus, PlotId, TenantId,
};
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

const INVOICE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93d0_4b57_8e21_c5a9_0d3f_7b64);

/// Stable invoice id for one (charge, plot) pair.
pub fn invoice_id(charge_id: Uuid, plot_id: PlotId) -> Uuid {
    Uuid::new_v5(
        &INVOICE_NAMESPACE,
        format!("{charge_id}:{plot_id}").as_bytes(),
    )
}

/// Human-facing invoice number, derivable from the same pair.
pub fn invoice_number(charge_id: Uuid, plot_id: PlotId) -> String {
    let simple = charge_id.simple().to_string();
    format!("INV-{}-{plot_id}", &simple[..8])
}

/// Status implied by the amounts. Cancellation is tracked separately.
pub fn derive_status(total_cents: i64, paid_cents: i64) -> InvoiceStatus {
    if paid_cents >= total_cents {
        InvoiceStatus::Paid
    } else if paid_cents > 0 {
        InvoiceStatus::Partial
    } else {
        InvoiceStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issued {
    Created(Invoice),
    Existing(Invoice),
}

impl Issued {
    pub fn invoice(&self) -> &Invoice {
        match self {
            Self::Created(invoice) | Self::Existing(invoice) => invoice,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

pub struct InvoiceLedger<'a> {
    directory: &'a dyn OwnershipDirectory,
}

impl<'a> InvoiceLedger<'a> {
    pub fn new(directory: &'a dyn OwnershipDirectory) -> Self {
        Self { directory }
    }

    /// Issue the invoice for `(charge, plot)` unless it already exists.
    pub async fn issue_invoice(
        &self,
        tx: &mut dyn BillingTx,
        outbox: &mut Outbox,
        charge: &Charge,
        plot_id: PlotId,
        amount_cents: i64,
    ) -> Result<Issued, BillingError> {
        let id = invoice_id(charge.id, plot_id);
        if let Some(existing) = tx.find_invoice(&charge.tenant_id, id).await? {
            debug!(invoice_id = %id, "invoice already issued");
            return Ok(Issued::Existing(existing));
        }

        let owner = self.directory.plot_owner(&charge.tenant_id, plot_id).await?;
        let now = Utc::now();
        let invoice = Invoice {
            id,
            tenant_id: charge.tenant_id.clone(),
            number: invoice_number(charge.id, plot_id),
            charge_id: charge.id,
            plot_id,
            user_id: owner.as_ref().map(|profile| profile.user_id),
            total_cents: amount_cents,
            paid_cents: 0,
            status: InvoiceStatus::Pending,
            due_date: charge.due_date,
            issued_at: now,
            closed_at: None,
            updated_at: now,
        };
        tx.insert_invoice(&invoice).await?;
        tx.append_ledger_entry(&LedgerEntry::accrual(
            &invoice,
            format!("{} ({})", charge.title, invoice.number),
        ))
        .await?;

        if let Some(owner) = owner.filter(|profile| profile.active) {
            outbox.notify(
                &charge.tenant_id,
                owner.user_id,
                NotificationKind::InvoiceIssued,
                format!("New invoice {}", invoice.number),
                format!(
                    "{}: {} due by {}",
                    charge.title,
                    format_cents(amount_cents),
                    charge.due_date
                ),
                invoice_payload(invoice.id, plot_id, amount_cents),
            );
        }
        Ok(Issued::Created(invoice))
    }

    /// Record money received against an invoice.
    ///
    /// A payment landing on a canceled invoice reinstates it first so the
    /// money always has an accrual to settle against. The plot rejoins the
    /// charge roster unless the charge is closed.
    ///
    /// Locks the charge row before the invoice row, the same order roster
    /// edits and cancellations use.
    pub async fn apply_payment(
        &self,
        tx: &mut dyn BillingTx,
        outbox: &mut Outbox,
        tenant: &TenantId,
        invoice_id: Uuid,
        amount_cents: i64,
        payment_id: Uuid,
    ) -> Result<Invoice, BillingError> {
        if amount_cents <= 0 {
            return Err(BillingError::validation("payment amount must be positive"));
        }
        let charge_id = tx
            .find_invoice(tenant, invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("invoice", invoice_id))?
            .charge_id;
        let charge = tx
            .lock_charge(tenant, charge_id)
            .await?
            .ok_or_else(|| BillingError::not_found("charge", charge_id))?;
        let mut invoice = tx
            .lock_invoice(tenant, invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("invoice", invoice_id))?;

        if invoice.is_canceled() {
            warn!(
                tenant = %tenant,
                invoice_id = %invoice.id,
                payment_id = %payment_id,
                "payment received for canceled invoice; reinstating"
            );
            tx.append_ledger_entry(&LedgerEntry::accrual(
                &invoice,
                format!("invoice {} reinstated by payment", invoice.number),
            ))
            .await?;
            if charge.status == ChargeStatus::Closed {
                debug!(
                    charge_id = %charge.id,
                    plot_id = invoice.plot_id,
                    "charge closed; roster left unchanged"
                );
            } else {
                let lines = tx.charge_lines(tenant, charge.id).await?;
                if !lines.iter().any(|line| line.plot_id == invoice.plot_id) {
                    tx.insert_charge_line(&ChargeLine {
                        tenant_id: tenant.clone(),
                        charge_id: charge.id,
                        plot_id: invoice.plot_id,
                        amount_cents: invoice.total_cents,
                    })
                    .await?;
                }
            }
            invoice.closed_at = None;
        }

        invoice.paid_cents = invoice
            .paid_cents
            .checked_add(amount_cents)
            .ok_or_else(|| {
                BillingError::validation(format!(
                    "payment of {} overflows invoice {}",
                    format_cents(amount_cents),
                    invoice.number
                ))
            })?;
        invoice.status = derive_status(invoice.total_cents, invoice.paid_cents);
        invoice.updated_at = Utc::now();
        tx.update_invoice(&invoice).await?;
        tx.append_ledger_entry(&LedgerEntry::payment(&invoice, payment_id, amount_cents))
            .await?;

        if let Some(user_id) = invoice.user_id {
            outbox.notify(
                tenant,
                user_id,
                NotificationKind::PaymentReceived,
                format!("Payment received for {}", invoice.number),
                format!(
                    "{} received, {} outstanding",
                    format_cents(amount_cents),
                    format_cents(invoice.outstanding_cents())
                ),
                invoice_payload(invoice.id, invoice.plot_id, amount_cents),
            );
        }
        Ok(invoice)
    }

    /// Cancel an invoice on which no money has been received.
    pub async fn cancel_invoice(
        &self,
        tx: &mut dyn BillingTx,
        outbox: &mut Outbox,
        tenant: &TenantId,
        invoice_id: Uuid,
    ) -> Result<Invoice, BillingError> {
        let invoice = tx
            .lock_invoice(tenant, invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("invoice", invoice_id))?;
        self.cancel_locked(tx, outbox, invoice).await
    }

    pub(crate) async fn cancel_locked(
        &self,
        tx: &mut dyn BillingTx,
        outbox: &mut Outbox,
        mut invoice: Invoice,
    ) -> Result<Invoice, BillingError> {
        if invoice.is_canceled() {
            return Err(BillingError::conflict(
                ConflictCode::InvoiceCanceled,
                format!("invoice {} is already canceled", invoice.number),
            ));
        }
        if invoice.paid_cents > 0 {
            return Err(BillingError::conflict(
                ConflictCode::InvoiceHasPayments,
                format!(
                    "invoice {} has received {} and cannot be canceled",
                    invoice.number,
                    format_cents(invoice.paid_cents)
                ),
            ));
        }

        let now = Utc::now();
        invoice.status = InvoiceStatus::Canceled;
        invoice.closed_at = Some(now);
        invoice.updated_at = now;
        tx.update_invoice(&invoice).await?;
        tx.append_ledger_entry(&LedgerEntry::cancellation(&invoice))
            .await?;

        if let Some(user_id) = invoice.user_id {
            outbox.notify(
                &invoice.tenant_id,
                user_id,
                NotificationKind::InvoiceCanceled,
                format!("Invoice {} canceled", invoice.number),
                "This invoice no longer needs to be paid.",
                invoice_payload(invoice.id, invoice.plot_id, invoice.total_cents),
            );
        }
        Ok(invoice)
    }

    /// Bring a canceled, unpaid invoice back with a fresh total.
    pub async fn reopen_invoice(
        &self,
        tx: &mut dyn BillingTx,
        outbox: &mut Outbox,
        charge: &Charge,
        mut invoice: Invoice,
        amount_cents: i64,
    ) -> Result<Invoice, BillingError> {
        if !invoice.is_canceled() {
            return Ok(invoice);
        }
        let owner = self
            .directory
            .plot_owner(&charge.tenant_id, invoice.plot_id)
            .await?;

        invoice.status = derive_status(amount_cents, invoice.paid_cents);
        invoice.total_cents = amount_cents;
        invoice.closed_at = None;
        invoice.updated_at = Utc::now();
        if let Some(profile) = &owner {
            invoice.user_id = Some(profile.user_id);
        }
        tx.update_invoice(&invoice).await?;
        tx.append_ledger_entry(&LedgerEntry::accrual(
            &invoice,
            format!("{} ({}) reissued", charge.title, invoice.number),
        ))
        .await?;

        if let Some(owner) = owner.filter(|profile| profile.active) {
            outbox.notify(
                &charge.tenant_id,
                owner.user_id,
                NotificationKind::InvoiceReissued,
                format!("Invoice {} reissued", invoice.number),
                format!(
                    "{}: {} due by {}",
                    charge.title,
                    format_cents(amount_cents),
                    invoice.due_date
                ),
                invoice_payload(invoice.id, invoice.plot_id, amount_cents),
            );
        }
        Ok(invoice)
    }
}

fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{journal_outstanding, LedgerEntryKind, LedgerFilter};
    use crate::memory::InMemoryBillingStore;
    use crate::store::BillingStore;
    use crate::testkit::{draft_charge, FixedDirectory};
    use crate::types::Role;
    use proptest::prelude::*;

    fn directory() -> FixedDirectory {
        FixedDirectory::default()
            .with_member(10, Role::Resident, true, &[1])
            .with_member(20, Role::Resident, false, &[2])
    }

    #[test]
    fn invoice_identity_is_stable() {
        let charge_id = Uuid::parse_str("0123abcd-0000-4000-8000-000000000000").unwrap();
        assert_eq!(invoice_id(charge_id, 5), invoice_id(charge_id, 5));
        assert_ne!(invoice_id(charge_id, 5), invoice_id(charge_id, 6));
        assert_eq!(invoice_number(charge_id, 5), "INV-0123abcd-5");
    }

    #[test]
    fn cents_are_formatted_with_two_decimals() {
        assert_eq!(format_cents(10_000), "100.00");
        assert_eq!(format_cents(405), "4.05");
        assert_eq!(format_cents(-7), "-0.07");
    }

    proptest! {
        #[test]
        fn derived_status_matches_amounts(total in 1i64..1_000_000, paid in 0i64..2_000_000) {
            let status = derive_status(total, paid);
            if paid >= total {
                prop_assert_eq!(status, InvoiceStatus::Paid);
            } else if paid > 0 {
                prop_assert_eq!(status, InvoiceStatus::Partial);
            } else {
                prop_assert_eq!(status, InvoiceStatus::Pending);
            }
        }
    }

    #[tokio::test]
    async fn issuing_twice_yields_one_invoice_and_one_accrual() {
        let store = InMemoryBillingStore::new();
        let directory = directory();
        let ledger = InvoiceLedger::new(&directory);
        let charge = draft_charge("t1", 10_000);
        let mut outbox = Outbox::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_charge(&charge).await.unwrap();
        let first = ledger
            .issue_invoice(tx.as_mut(), &mut outbox, &charge, 1, 10_000)
            .await
            .unwrap();
        let second = ledger
            .issue_invoice(tx.as_mut(), &mut outbox, &charge, 1, 10_000)
            .await
            .unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.invoice().id, second.invoice().id);
        assert_eq!(first.invoice().user_id, Some(10));

        let entries = tx
            .ledger_entries(&charge.tenant_id, &LedgerFilter::for_charge(charge.id))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, LedgerEntryKind::Accrual);
        assert_eq!(entries[0].amount_cents, 10_000);
        assert_eq!(outbox.notifications.len(), 1);
    }

    #[tokio::test]
    async fn inactive_owner_is_not_notified() {
        let store = InMemoryBillingStore::new();
        let directory = directory();
        let ledger = InvoiceLedger::new(&directory);
        let charge = draft_charge("t1", 500);
        let mut outbox = Outbox::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_charge(&charge).await.unwrap();
        let issued = ledger
            .issue_invoice(tx.as_mut(), &mut outbox, &charge, 2, 500)
            .await
            .unwrap();
        assert_eq!(issued.invoice().user_id, Some(20));
        assert!(outbox.notifications.is_empty());
    }

    #[tokio::test]
    async fn partial_payment_blocks_cancellation() {
        let store = InMemoryBillingStore::new();
        let directory = directory();
        let ledger = InvoiceLedger::new(&directory);
        let charge = draft_charge("t1", 10_000);
        let mut outbox = Outbox::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_charge(&charge).await.unwrap();
        let invoice = ledger
            .issue_invoice(tx.as_mut(), &mut outbox, &charge, 1, 10_000)
            .await
            .unwrap()
            .invoice()
            .clone();
        let paid = ledger
            .apply_payment(
                tx.as_mut(),
                &mut outbox,
                &charge.tenant_id,
                invoice.id,
                4_000,
                Uuid::new_v4(),
            )
            .await
            .unwrap();
        assert_eq!(paid.status, InvoiceStatus::Partial);
        assert_eq!(paid.outstanding_cents(), 6_000);

        let err = ledger
            .cancel_invoice(tx.as_mut(), &mut outbox, &charge.tenant_id, invoice.id)
            .await
            .unwrap_err();
        assert_eq!(err.conflict_code(), Some(ConflictCode::InvoiceHasPayments));
    }

    #[tokio::test]
    async fn cancel_then_reopen_keeps_journal_balanced() {
        let store = InMemoryBillingStore::new();
        let directory = directory();
        let ledger = InvoiceLedger::new(&directory);
        let charge = draft_charge("t1", 10_000);
        let mut outbox = Outbox::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_charge(&charge).await.unwrap();
        let invoice = ledger
            .issue_invoice(tx.as_mut(), &mut outbox, &charge, 1, 10_000)
            .await
            .unwrap()
            .invoice()
            .clone();
        let canceled = ledger
            .cancel_invoice(tx.as_mut(), &mut outbox, &charge.tenant_id, invoice.id)
            .await
            .unwrap();
        assert!(canceled.is_canceled());
        assert!(canceled.closed_at.is_some());

        let again = ledger
            .cancel_invoice(tx.as_mut(), &mut outbox, &charge.tenant_id, invoice.id)
            .await
            .unwrap_err();
        assert_eq!(again.conflict_code(), Some(ConflictCode::InvoiceCanceled));

        let reopened = ledger
            .reopen_invoice(tx.as_mut(), &mut outbox, &charge, canceled, 12_000)
            .await
            .unwrap();
        assert_eq!(reopened.status, InvoiceStatus::Pending);
        assert_eq!(reopened.total_cents, 12_000);
        assert!(reopened.closed_at.is_none());

        let entries = tx
            .ledger_entries(&charge.tenant_id, &LedgerFilter::for_invoice(invoice.id))
            .await
            .unwrap();
        let kinds: Vec<_> = entries.iter().map(|entry| entry.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LedgerEntryKind::Accrual,
                LedgerEntryKind::Adjustment,
                LedgerEntryKind::Accrual
            ]
        );
        assert_eq!(journal_outstanding(&entries), 12_000);
    }

    #[tokio::test]
    async fn payment_on_canceled_invoice_reinstates_it() {
        let store = InMemoryBillingStore::new();
        let directory = directory();
        let ledger = InvoiceLedger::new(&directory);
        let charge = draft_charge("t1", 10_000);
        let mut outbox = Outbox::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_charge(&charge).await.unwrap();
        let invoice = ledger
            .issue_invoice(tx.as_mut(), &mut outbox, &charge, 1, 10_000)
            .await
            .unwrap()
            .invoice()
            .clone();
        ledger
            .cancel_invoice(tx.as_mut(), &mut outbox, &charge.tenant_id, invoice.id)
            .await
            .unwrap();

        let paid = ledger
            .apply_payment(
                tx.as_mut(),
                &mut outbox,
                &charge.tenant_id,
                invoice.id,
                10_000,
                Uuid::new_v4(),
            )
            .await
            .unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert!(paid.closed_at.is_none());

        let lines = tx.charge_lines(&charge.tenant_id, charge.id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].plot_id, 1);

        let entries = tx
            .ledger_entries(&charge.tenant_id, &LedgerFilter::for_invoice(invoice.id))
            .await
            .unwrap();
        assert_eq!(journal_outstanding(&entries), 0);
    }

    #[tokio::test]
    async fn payment_on_closed_charge_leaves_roster_alone() {
        let store = InMemoryBillingStore::new();
        let directory = directory();
        let ledger = InvoiceLedger::new(&directory);
        let mut charge = draft_charge("t1", 10_000);
        let mut outbox = Outbox::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_charge(&charge).await.unwrap();
        let invoice = ledger
            .issue_invoice(tx.as_mut(), &mut outbox, &charge, 1, 10_000)
            .await
            .unwrap()
            .invoice()
            .clone();
        ledger
            .cancel_invoice(tx.as_mut(), &mut outbox, &charge.tenant_id, invoice.id)
            .await
            .unwrap();
        charge.status = ChargeStatus::Closed;
        charge.closed_at = Some(Utc::now());
        tx.update_charge(&charge).await.unwrap();

        let paid = ledger
            .apply_payment(
                tx.as_mut(),
                &mut outbox,
                &charge.tenant_id,
                invoice.id,
                10_000,
                Uuid::new_v4(),
            )
            .await
            .unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert!(tx
            .charge_lines(&charge.tenant_id, charge.id)
            .await
            .unwrap()
            .is_empty());

        let entries = tx
            .ledger_entries(&charge.tenant_id, &LedgerFilter::for_invoice(invoice.id))
            .await
            .unwrap();
        assert_eq!(journal_outstanding(&entries), 0);
    }

    #[tokio::test]
    async fn payment_that_would_overflow_is_rejected() {
        let store = InMemoryBillingStore::new();
        let directory = directory();
        let ledger = InvoiceLedger::new(&directory);
        let charge = draft_charge("t1", 10_000);
        let mut outbox = Outbox::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_charge(&charge).await.unwrap();
        let invoice = ledger
            .issue_invoice(tx.as_mut(), &mut outbox, &charge, 1, 10_000)
            .await
            .unwrap()
            .invoice()
            .clone();
        ledger
            .apply_payment(
                tx.as_mut(),
                &mut outbox,
                &charge.tenant_id,
                invoice.id,
                5_000,
                Uuid::new_v4(),
            )
            .await
            .unwrap();

        let err = ledger
            .apply_payment(
                tx.as_mut(),
                &mut outbox,
                &charge.tenant_id,
                invoice.id,
                i64::MAX,
                Uuid::new_v4(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }
}
