//! In-memory reference implementation of the billing store.
//!
//! Transactions are fully serialized behind an owned async lock. Each table
//! is shared behind an `Arc` and copied only when a transaction first writes
//! to it; the journal is append-only, so a transaction buffers its new
//! entries and `commit` appends them. Rollback (or drop) discards both.

use crate::ledger::{LedgerEntry, LedgerFilter};
use crate::store::{BillingStore, BillingTx, StoreError, StoreResult};
use crate::types::{
    Charge, ChargeLine, Invoice, Payment, PaymentWebhookEvent, PlotId, TenantId, UserId,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Tables {
    charges: Arc<HashMap<(TenantId, Uuid), Charge>>,
    lines: Arc<BTreeMap<(TenantId, Uuid, PlotId), ChargeLine>>,
    invoices: Arc<HashMap<(TenantId, Uuid), Invoice>>,
    payments: Arc<HashMap<(TenantId, Uuid), Payment>>,
    payment_keys: Arc<HashMap<(TenantId, String), Uuid>>,
    webhook_events: Arc<HashMap<(TenantId, String, String), PaymentWebhookEvent>>,
}

#[derive(Debug, Default)]
struct BillingState {
    tables: Tables,
    ledger: Vec<LedgerEntry>,
    ledger_ids: HashSet<Uuid>,
}

/// In-memory billing store.
#[derive(Clone, Default)]
pub struct InMemoryBillingStore {
    state: Arc<Mutex<BillingState>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    fn backend_label(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> StoreResult<Box<dyn BillingTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.tables.clone();
        Ok(Box::new(InMemoryBillingTx {
            guard,
            working,
            pending_ledger: Vec::new(),
        }))
    }
}

struct InMemoryBillingTx {
    guard: OwnedMutexGuard<BillingState>,
    working: Tables,
    pending_ledger: Vec<LedgerEntry>,
}

fn key(tenant: &TenantId, id: Uuid) -> (TenantId, Uuid) {
    (tenant.clone(), id)
}

#[async_trait]
impl BillingTx for InMemoryBillingTx {
    async fn insert_charge(&mut self, charge: &Charge) -> StoreResult<()> {
        let k = key(&charge.tenant_id, charge.id);
        if self.working.charges.contains_key(&k) {
            return Err(StoreError::UniqueViolation(format!(
                "charge {} already exists",
                charge.id
            )));
        }
        Arc::make_mut(&mut self.working.charges).insert(k, charge.clone());
        Ok(())
    }

    async fn find_charge(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> StoreResult<Option<Charge>> {
        Ok(self.working.charges.get(&key(tenant, charge_id)).cloned())
    }

    async fn lock_charge(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> StoreResult<Option<Charge>> {
        self.find_charge(tenant, charge_id).await
    }

    async fn update_charge(&mut self, charge: &Charge) -> StoreResult<()> {
        let record = Arc::make_mut(&mut self.working.charges)
            .get_mut(&key(&charge.tenant_id, charge.id))
            .ok_or_else(|| StoreError::NotFound(format!("charge {} not found", charge.id)))?;
        *record = charge.clone();
        Ok(())
    }

    async fn charge_lines(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> StoreResult<Vec<ChargeLine>> {
        Ok(self
            .working
            .lines
            .values()
            .filter(|line| &line.tenant_id == tenant && line.charge_id == charge_id)
            .cloned()
            .collect())
    }

    async fn insert_charge_line(&mut self, line: &ChargeLine) -> StoreResult<()> {
        let k = (line.tenant_id.clone(), line.charge_id, line.plot_id);
        if self.working.lines.contains_key(&k) {
            return Err(StoreError::UniqueViolation(format!(
                "charge line ({}, {}) already exists",
                line.charge_id, line.plot_id
            )));
        }
        Arc::make_mut(&mut self.working.lines).insert(k, line.clone());
        Ok(())
    }

    async fn delete_charge_line(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
        plot_id: PlotId,
    ) -> StoreResult<()> {
        let k = (tenant.clone(), charge_id, plot_id);
        if self.working.lines.contains_key(&k) {
            Arc::make_mut(&mut self.working.lines).remove(&k);
        }
        Ok(())
    }

    async fn find_invoice(
        &mut self,
        tenant: &TenantId,
        invoice_id: Uuid,
    ) -> StoreResult<Option<Invoice>> {
        Ok(self.working.invoices.get(&key(tenant, invoice_id)).cloned())
    }

    async fn lock_invoice(
        &mut self,
        tenant: &TenantId,
        invoice_id: Uuid,
    ) -> StoreResult<Option<Invoice>> {
        self.find_invoice(tenant, invoice_id).await
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> StoreResult<()> {
        let k = key(&invoice.tenant_id, invoice.id);
        if self.working.invoices.contains_key(&k) {
            return Err(StoreError::UniqueViolation(format!(
                "invoice {} already exists",
                invoice.id
            )));
        }
        Arc::make_mut(&mut self.working.invoices).insert(k, invoice.clone());
        Ok(())
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> StoreResult<()> {
        let record = Arc::make_mut(&mut self.working.invoices)
            .get_mut(&key(&invoice.tenant_id, invoice.id))
            .ok_or_else(|| StoreError::NotFound(format!("invoice {} not found", invoice.id)))?;
        *record = invoice.clone();
        Ok(())
    }

    async fn invoices_for_charge(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> StoreResult<Vec<Invoice>> {
        let mut invoices = self
            .working
            .invoices
            .values()
            .filter(|invoice| &invoice.tenant_id == tenant && invoice.charge_id == charge_id)
            .cloned()
            .collect::<Vec<_>>();
        invoices.sort_by_key(|invoice| invoice.plot_id);
        Ok(invoices)
    }

    async fn invoices_for_user(
        &mut self,
        tenant: &TenantId,
        user_id: UserId,
    ) -> StoreResult<Vec<Invoice>> {
        let mut invoices = self
            .working
            .invoices
            .values()
            .filter(|invoice| &invoice.tenant_id == tenant && invoice.user_id == Some(user_id))
            .cloned()
            .collect::<Vec<_>>();
        invoices.sort_by(|a, b| {
            a.issued_at
                .cmp(&b.issued_at)
                .then_with(|| a.number.cmp(&b.number))
        });
        Ok(invoices)
    }

    async fn find_payment_by_key(
        &mut self,
        tenant: &TenantId,
        idempotency_key: &str,
    ) -> StoreResult<Option<Payment>> {
        let payment_id = self
            .working
            .payment_keys
            .get(&(tenant.clone(), idempotency_key.to_string()))
            .copied();
        Ok(payment_id.and_then(|id| self.working.payments.get(&key(tenant, id)).cloned()))
    }

    async fn lock_payment(
        &mut self,
        tenant: &TenantId,
        payment_id: Uuid,
    ) -> StoreResult<Option<Payment>> {
        Ok(self.working.payments.get(&key(tenant, payment_id)).cloned())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        let idem = (payment.tenant_id.clone(), payment.idempotency_key.clone());
        if self.working.payment_keys.contains_key(&idem) {
            return Err(StoreError::UniqueViolation(format!(
                "payment idempotency key '{}' already used",
                payment.idempotency_key
            )));
        }
        let k = key(&payment.tenant_id, payment.id);
        if self.working.payments.contains_key(&k) {
            return Err(StoreError::UniqueViolation(format!(
                "payment {} already exists",
                payment.id
            )));
        }
        Arc::make_mut(&mut self.working.payment_keys).insert(idem, payment.id);
        Arc::make_mut(&mut self.working.payments).insert(k, payment.clone());
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        let record = Arc::make_mut(&mut self.working.payments)
            .get_mut(&key(&payment.tenant_id, payment.id))
            .ok_or_else(|| StoreError::NotFound(format!("payment {} not found", payment.id)))?;
        *record = payment.clone();
        Ok(())
    }

    async fn payments_for_invoice(
        &mut self,
        tenant: &TenantId,
        invoice_id: Uuid,
    ) -> StoreResult<Vec<Payment>> {
        let mut payments = self
            .working
            .payments
            .values()
            .filter(|payment| &payment.tenant_id == tenant && payment.invoice_id == invoice_id)
            .cloned()
            .collect::<Vec<_>>();
        payments.sort_by_key(|payment| payment.created_at);
        Ok(payments)
    }

    async fn webhook_event_exists(
        &mut self,
        tenant: &TenantId,
        provider: &str,
        provider_event_id: &str,
    ) -> StoreResult<bool> {
        Ok(self.working.webhook_events.contains_key(&(
            tenant.clone(),
            provider.to_string(),
            provider_event_id.to_string(),
        )))
    }

    async fn insert_webhook_event(&mut self, event: &PaymentWebhookEvent) -> StoreResult<()> {
        let k = (
            event.tenant_id.clone(),
            event.provider.clone(),
            event.provider_event_id.clone(),
        );
        if self.working.webhook_events.contains_key(&k) {
            return Err(StoreError::UniqueViolation(format!(
                "webhook event {}/{} already recorded",
                event.provider, event.provider_event_id
            )));
        }
        Arc::make_mut(&mut self.working.webhook_events).insert(k, event.clone());
        Ok(())
    }

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> StoreResult<()> {
        if self.guard.ledger_ids.contains(&entry.id)
            || self.pending_ledger.iter().any(|pending| pending.id == entry.id)
        {
            return Err(StoreError::UniqueViolation(format!(
                "ledger entry {} already exists",
                entry.id
            )));
        }
        self.pending_ledger.push(entry.clone());
        Ok(())
    }

    async fn ledger_entries(
        &mut self,
        tenant: &TenantId,
        filter: &LedgerFilter,
    ) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self
            .guard
            .ledger
            .iter()
            .chain(self.pending_ledger.iter())
            .filter(|entry| &entry.tenant_id == tenant && filter.matches(entry))
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryBillingTx {
            mut guard,
            working,
            pending_ledger,
        } = *self;
        guard.tables = working;
        guard
            .ledger_ids
            .extend(pending_ledger.iter().map(|entry| entry.id));
        guard.ledger.extend(pending_ledger);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
