//! Shared fixtures for unit tests.

use crate::directory::{MemberProfile, OwnershipDirectory};
use crate::error::BillingError;
use crate::ledger::{LedgerEntry, LedgerFilter};
use crate::memory::InMemoryBillingStore;
use crate::provider::{verify_webhook_body, PaymentProvider};
use crate::sinks::{AuditRecord, AuditSink, Notification, NotificationSink};
use crate::store::{BillingStore, BillingTx, StoreResult};
use crate::types::{
    Actor, Charge, ChargeLine, ChargeStatus, ChargeType, Invoice, Payment, PaymentWebhookEvent,
    PlotId, Role, TenantId, UserId,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const CHAIRMAN_ID: UserId = 1;

pub fn chairman(tenant: &str) -> Actor {
    Actor::new(TenantId::new(tenant), CHAIRMAN_ID, Role::Chairman)
}

pub fn resident(tenant: &str, user_id: UserId) -> Actor {
    Actor::new(TenantId::new(tenant), user_id, Role::Resident)
}

pub fn draft_charge(tenant: &str, unit_amount_cents: i64) -> Charge {
    Charge {
        id: Uuid::new_v4(),
        tenant_id: TenantId::new(tenant),
        title: "Road repair".to_string(),
        charge_type: ChargeType::OneTime,
        unit_amount_cents,
        due_date: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
        status: ChargeStatus::Draft,
        created_by: CHAIRMAN_ID,
        created_at: Utc::now(),
        published_at: None,
        closed_at: None,
    }
}

/// Directory with the same members in every tenant.
#[derive(Debug, Default, Clone)]
pub struct FixedDirectory {
    members: BTreeMap<UserId, MemberProfile>,
}

impl FixedDirectory {
    pub fn with_member(
        mut self,
        user_id: UserId,
        role: Role,
        active: bool,
        plots: &[PlotId],
    ) -> Self {
        self.members.insert(
            user_id,
            MemberProfile {
                user_id,
                role,
                active,
                active_primary_plots: plots.to_vec(),
            },
        );
        self
    }
}

#[async_trait]
impl OwnershipDirectory for FixedDirectory {
    async fn member(
        &self,
        _tenant: &TenantId,
        user_id: UserId,
    ) -> Result<Option<MemberProfile>, BillingError> {
        Ok(self.members.get(&user_id).cloned())
    }

    async fn members(&self, _tenant: &TenantId) -> Result<Vec<MemberProfile>, BillingError> {
        Ok(self.members.values().cloned().collect())
    }

    async fn plot_owner(
        &self,
        _tenant: &TenantId,
        plot_id: PlotId,
    ) -> Result<Option<MemberProfile>, BillingError> {
        Ok(self
            .members
            .values()
            .find(|profile| profile.active_primary_plots.contains(&plot_id))
            .cloned())
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotificationSink {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .map(|record| record.action)
            .collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, record: &AuditRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Sink that always fails.
pub struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn notify(&self, _notification: &Notification) -> anyhow::Result<()> {
        anyhow::bail!("notification channel unavailable")
    }
}

#[async_trait]
impl AuditSink for FailingSink {
    async fn record(&self, _record: &AuditRecord) -> anyhow::Result<()> {
        anyhow::bail!("audit channel unavailable")
    }
}

#[derive(Debug, Clone)]
pub struct StaticProvider {
    pub name: String,
    pub secret: Option<String>,
}

impl Default for StaticProvider {
    fn default() -> Self {
        Self {
            name: "testpay".to_string(),
            secret: None,
        }
    }
}

impl PaymentProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn checkout_url(&self, payment: &Payment) -> String {
        format!("https://pay.test/checkout/{}", payment.id)
    }

    fn verify_signature(&self, body: &[u8], signature: Option<&str>) -> Result<(), BillingError> {
        match &self.secret {
            Some(secret) => verify_webhook_body(secret, body, signature),
            None => Ok(()),
        }
    }
}

/// Memory store that records the order in which rows get locked.
#[derive(Clone, Default)]
pub struct LockRecordingStore {
    inner: InMemoryBillingStore,
    locks: Arc<Mutex<Vec<&'static str>>>,
}

impl LockRecordingStore {
    /// Locks taken since the last call, oldest first.
    pub fn take_locks(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.locks.lock().unwrap())
    }
}

#[async_trait]
impl BillingStore for LockRecordingStore {
    fn backend_label(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> StoreResult<Box<dyn BillingTx>> {
        Ok(Box::new(LockRecordingTx {
            inner: self.inner.begin().await?,
            locks: self.locks.clone(),
        }))
    }
}

struct LockRecordingTx {
    inner: Box<dyn BillingTx>,
    locks: Arc<Mutex<Vec<&'static str>>>,
}

impl LockRecordingTx {
    fn record(&self, row: &'static str) {
        self.locks.lock().unwrap().push(row);
    }
}

#[async_trait]
impl BillingTx for LockRecordingTx {
    async fn insert_charge(&mut self, charge: &Charge) -> StoreResult<()> {
        self.inner.insert_charge(charge).await
    }

    async fn find_charge(&mut self, tenant: &TenantId, id: Uuid) -> StoreResult<Option<Charge>> {
        self.inner.find_charge(tenant, id).await
    }

    async fn lock_charge(&mut self, tenant: &TenantId, id: Uuid) -> StoreResult<Option<Charge>> {
        self.record("charge");
        self.inner.lock_charge(tenant, id).await
    }

    async fn update_charge(&mut self, charge: &Charge) -> StoreResult<()> {
        self.inner.update_charge(charge).await
    }

    async fn charge_lines(&mut self, tenant: &TenantId, id: Uuid) -> StoreResult<Vec<ChargeLine>> {
        self.inner.charge_lines(tenant, id).await
    }

    async fn insert_charge_line(&mut self, line: &ChargeLine) -> StoreResult<()> {
        self.inner.insert_charge_line(line).await
    }

    async fn delete_charge_line(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
        plot_id: PlotId,
    ) -> StoreResult<()> {
        self.inner.delete_charge_line(tenant, charge_id, plot_id).await
    }

    async fn find_invoice(&mut self, tenant: &TenantId, id: Uuid) -> StoreResult<Option<Invoice>> {
        self.inner.find_invoice(tenant, id).await
    }

    async fn lock_invoice(&mut self, tenant: &TenantId, id: Uuid) -> StoreResult<Option<Invoice>> {
        self.record("invoice");
        self.inner.lock_invoice(tenant, id).await
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> StoreResult<()> {
        self.inner.insert_invoice(invoice).await
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> StoreResult<()> {
        self.inner.update_invoice(invoice).await
    }

    async fn invoices_for_charge(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> StoreResult<Vec<Invoice>> {
        self.inner.invoices_for_charge(tenant, charge_id).await
    }

    async fn invoices_for_user(
        &mut self,
        tenant: &TenantId,
        user_id: UserId,
    ) -> StoreResult<Vec<Invoice>> {
        self.inner.invoices_for_user(tenant, user_id).await
    }

    async fn find_payment_by_key(
        &mut self,
        tenant: &TenantId,
        idempotency_key: &str,
    ) -> StoreResult<Option<Payment>> {
        self.inner.find_payment_by_key(tenant, idempotency_key).await
    }

    async fn lock_payment(&mut self, tenant: &TenantId, id: Uuid) -> StoreResult<Option<Payment>> {
        self.record("payment");
        self.inner.lock_payment(tenant, id).await
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        self.inner.insert_payment(payment).await
    }

    async fn update_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        self.inner.update_payment(payment).await
    }

    async fn payments_for_invoice(
        &mut self,
        tenant: &TenantId,
        invoice_id: Uuid,
    ) -> StoreResult<Vec<Payment>> {
        self.inner.payments_for_invoice(tenant, invoice_id).await
    }

    async fn webhook_event_exists(
        &mut self,
        tenant: &TenantId,
        provider: &str,
        provider_event_id: &str,
    ) -> StoreResult<bool> {
        self.inner
            .webhook_event_exists(tenant, provider, provider_event_id)
            .await
    }

    async fn insert_webhook_event(&mut self, event: &PaymentWebhookEvent) -> StoreResult<()> {
        self.inner.insert_webhook_event(event).await
    }

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> StoreResult<()> {
        self.inner.append_ledger_entry(entry).await
    }

    async fn ledger_entries(
        &mut self,
        tenant: &TenantId,
        filter: &LedgerFilter,
    ) -> StoreResult<Vec<LedgerEntry>> {
        self.inner.ledger_entries(tenant, filter).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let LockRecordingTx { inner, .. } = *self;
        inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let LockRecordingTx { inner, .. } = *self;
        inner.rollback().await
    }
}
