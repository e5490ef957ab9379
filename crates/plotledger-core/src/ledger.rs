use crate::types::{Invoice, PlotId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Journal entry types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryKind {
    Accrual,
    Payment,
    Adjustment,
}

impl LedgerEntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accrual => "ACCRUAL",
            Self::Payment => "PAYMENT",
            Self::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACCRUAL" => Some(Self::Accrual),
            "PAYMENT" => Some(Self::Payment),
            "ADJUSTMENT" => Some(Self::Adjustment),
            _ => None,
        }
    }
}

/// Append-only journal row.
///
/// Sign convention: ACCRUAL and PAYMENT amounts are positive; an ADJUSTMENT
/// produced by cancellation or removal is negative. Rows are never updated or
/// deleted; every correction is another row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub plot_id: PlotId,
    pub charge_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub kind: LedgerEntryKind,
    pub amount_cents: i64,
    pub memo: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn for_invoice(
        invoice: &Invoice,
        kind: LedgerEntryKind,
        amount_cents: i64,
        payment_id: Option<Uuid>,
        memo: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: invoice.tenant_id.clone(),
            plot_id: invoice.plot_id,
            charge_id: Some(invoice.charge_id),
            invoice_id: Some(invoice.id),
            payment_id,
            kind,
            amount_cents,
            memo,
            created_at: Utc::now(),
        }
    }

    pub fn accrual(invoice: &Invoice, memo: impl Into<String>) -> Self {
        Self::for_invoice(
            invoice,
            LedgerEntryKind::Accrual,
            invoice.total_cents,
            None,
            memo.into(),
        )
    }

    pub fn payment(invoice: &Invoice, payment_id: Uuid, amount_cents: i64) -> Self {
        Self::for_invoice(
            invoice,
            LedgerEntryKind::Payment,
            amount_cents,
            Some(payment_id),
            format!("payment received for {}", invoice.number),
        )
    }

    /// Negative adjustment reversing the full accrual of a canceled invoice.
    pub fn cancellation(invoice: &Invoice) -> Self {
        Self::for_invoice(
            invoice,
            LedgerEntryKind::Adjustment,
            -invoice.total_cents,
            None,
            format!("invoice {} canceled", invoice.number),
        )
    }
}

/// Read filter for journal queries. All fields are optional and combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerFilter {
    pub charge_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub plot_id: Option<PlotId>,
    pub kind: Option<LedgerEntryKind>,
}

impl LedgerFilter {
    pub fn for_charge(charge_id: Uuid) -> Self {
        Self {
            charge_id: Some(charge_id),
            ..Self::default()
        }
    }

    pub fn for_invoice(invoice_id: Uuid) -> Self {
        Self {
            invoice_id: Some(invoice_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.charge_id.map_or(true, |id| entry.charge_id == Some(id))
            && self
                .invoice_id
                .map_or(true, |id| entry.invoice_id == Some(id))
            && self.plot_id.map_or(true, |id| entry.plot_id == id)
            && self.kind.map_or(true, |kind| entry.kind == kind)
    }
}

/// Amount still owed according to the journal alone:
/// accruals plus adjustments minus payments.
pub fn journal_outstanding(entries: &[LedgerEntry]) -> i64 {
    entries
        .iter()
        .fold(0i64, |sum, entry| match entry.kind {
            LedgerEntryKind::Accrual | LedgerEntryKind::Adjustment => {
                sum.saturating_add(entry.amount_cents)
            }
            LedgerEntryKind::Payment => sum.saturating_sub(entry.amount_cents),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InvoiceStatus;
    use chrono::NaiveDate;

    fn invoice(total: i64) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: Uuid::new_v4(),
            tenant_id: TenantId::new("t1"),
            number: "INV-0001-7".to_string(),
            charge_id: Uuid::new_v4(),
            plot_id: 7,
            user_id: Some(70),
            total_cents: total,
            paid_cents: 0,
            status: InvoiceStatus::Pending,
            due_date: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
            issued_at: now,
            closed_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn cancellation_reverses_accrual() {
        let invoice = invoice(10_000);
        let entries = vec![
            LedgerEntry::accrual(&invoice, "dues"),
            LedgerEntry::cancellation(&invoice),
        ];

        assert_eq!(entries[1].amount_cents, -10_000);
        assert_eq!(entries[1].kind, LedgerEntryKind::Adjustment);
        assert_eq!(journal_outstanding(&entries), 0);
    }

    #[test]
    fn payments_reduce_journal_outstanding() {
        let invoice = invoice(10_000);
        let entries = vec![
            LedgerEntry::accrual(&invoice, "dues"),
            LedgerEntry::payment(&invoice, Uuid::new_v4(), 4_000),
        ];
        assert_eq!(journal_outstanding(&entries), 6_000);
    }

    #[test]
    fn filter_combines_fields() {
        let invoice = invoice(500);
        let entry = LedgerEntry::accrual(&invoice, "dues");

        assert!(LedgerFilter::for_charge(invoice.charge_id).matches(&entry));
        assert!(!LedgerFilter::for_charge(Uuid::new_v4()).matches(&entry));

        let filter = LedgerFilter {
            plot_id: Some(7),
            kind: Some(LedgerEntryKind::Payment),
            ..LedgerFilter::default()
        };
        assert!(!filter.matches(&entry));
    }

    #[test]
    fn kind_parse_accepts_lowercase() {
        assert_eq!(LedgerEntryKind::parse("accrual"), Some(LedgerEntryKind::Accrual));
        assert_eq!(LedgerEntryKind::parse("refund"), None);
    }
}
