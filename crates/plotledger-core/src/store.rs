//! Transactional repository contract.
//!
//! Components never hold a store handle. They receive `&mut dyn BillingTx`
//! for the duration of one request and every read that feeds a decision is
//! made through it, so checks and writes share one isolation scope.

use crate::ledger::{LedgerEntry, LedgerFilter};
use crate::memory::InMemoryBillingStore;
use crate::postgres::PostgresBillingStore;
use crate::types::{
    Charge, ChargeLine, Invoice, Payment, PaymentWebhookEvent, PlotId, TenantId, UserId,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Entry point to the relational store: hands out transactions.
#[async_trait]
pub trait BillingStore: Send + Sync {
    fn backend_label(&self) -> &'static str;

    async fn begin(&self) -> StoreResult<Box<dyn BillingTx>>;
}

/// One atomic unit of work. Dropping without `commit` discards every write.
///
/// `lock_*` reads take a row lock that is held until commit or rollback;
/// `find_*` reads do not.
#[async_trait]
pub trait BillingTx: Send {
    async fn insert_charge(&mut self, charge: &Charge) -> StoreResult<()>;
    async fn find_charge(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> StoreResult<Option<Charge>>;
    async fn lock_charge(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> StoreResult<Option<Charge>>;
    async fn update_charge(&mut self, charge: &Charge) -> StoreResult<()>;

    async fn charge_lines(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> StoreResult<Vec<ChargeLine>>;
    async fn insert_charge_line(&mut self, line: &ChargeLine) -> StoreResult<()>;
    async fn delete_charge_line(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
        plot_id: PlotId,
    ) -> StoreResult<()>;

    async fn find_invoice(
        &mut self,
        tenant: &TenantId,
        invoice_id: Uuid,
    ) -> StoreResult<Option<Invoice>>;
    async fn lock_invoice(
        &mut self,
        tenant: &TenantId,
        invoice_id: Uuid,
    ) -> StoreResult<Option<Invoice>>;
    async fn insert_invoice(&mut self, invoice: &Invoice) -> StoreResult<()>;
    async fn update_invoice(&mut self, invoice: &Invoice) -> StoreResult<()>;
    async fn invoices_for_charge(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> StoreResult<Vec<Invoice>>;
    async fn invoices_for_user(
        &mut self,
        tenant: &TenantId,
        user_id: UserId,
    ) -> StoreResult<Vec<Invoice>>;

    async fn find_payment_by_key(
        &mut self,
        tenant: &TenantId,
        idempotency_key: &str,
    ) -> StoreResult<Option<Payment>>;
    async fn lock_payment(
        &mut self,
        tenant: &TenantId,
        payment_id: Uuid,
    ) -> StoreResult<Option<Payment>>;
    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()>;
    async fn update_payment(&mut self, payment: &Payment) -> StoreResult<()>;
    async fn payments_for_invoice(
        &mut self,
        tenant: &TenantId,
        invoice_id: Uuid,
    ) -> StoreResult<Vec<Payment>>;

    async fn webhook_event_exists(
        &mut self,
        tenant: &TenantId,
        provider: &str,
        provider_event_id: &str,
    ) -> StoreResult<bool>;
    async fn insert_webhook_event(&mut self, event: &PaymentWebhookEvent) -> StoreResult<()>;

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> StoreResult<()>;
    async fn ledger_entries(
        &mut self,
        tenant: &TenantId,
        filter: &LedgerFilter,
    ) -> StoreResult<Vec<LedgerEntry>>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Store backend configuration.
#[derive(Debug, Clone, Default)]
pub enum StoreConfig {
    /// Keep all billing state in process memory only.
    #[default]
    Memory,
    /// Persist in PostgreSQL; schema is created on startup.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }

    pub async fn open(&self) -> StoreResult<Arc<dyn BillingStore>> {
        match self {
            Self::Memory => Ok(Arc::new(InMemoryBillingStore::new())),
            Self::Postgres {
                database_url,
                max_connections,
            } => Ok(Arc::new(
                PostgresBillingStore::connect(database_url, *max_connections).await?,
            )),
        }
    }
}
