//! plotledger billing core.
//!
//! Turns a chairman's charge into per-plot invoices, tracks payment attempts
//! coming back from an external provider, and keeps an append-only journal of
//! accruals, payments, and adjustments. Every state change runs inside one
//! [`BillingTx`] so retries and concurrent requests converge instead of
//! double-applying.

#![deny(unsafe_code)]

pub mod audience;
pub mod balance;
pub mod charges;
pub mod directory;
pub mod engine;
pub mod error;
pub mod invoices;
pub mod ledger;
pub mod memory;
pub mod payments;
pub mod postgres;
pub mod provider;
pub mod reconcile;
pub mod sinks;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testkit;

pub use audience::{AudienceResolution, AudienceResolver, AudienceSpec, SkipReason, SkippedUser};
pub use balance::{ChargeProgress, UserBalance};
pub use charges::{ChargeDraft, ChargeLifecycle, CloseOutcome, CreatedCharge, PublishOutcome};
pub use directory::{MemberProfile, OwnershipDirectory};
pub use engine::{
    BillingEngine, BillingEngineConfig, ChargeCreated, ChargeView, Collaborators, CreateCharge,
};
pub use error::{BillingError, ConflictCode, ErrorKind};
pub use invoices::{derive_status, invoice_id, invoice_number, InvoiceLedger, Issued};
pub use ledger::{LedgerEntry, LedgerEntryKind, LedgerFilter};
pub use memory::InMemoryBillingStore;
pub use payments::{Initiated, PaymentGateway, WebhookDelivery, WebhookOutcome};
pub use postgres::PostgresBillingStore;
pub use provider::{sign_webhook_body, verify_webhook_body, PaymentProvider};
pub use reconcile::{ParticipantReconciler, ReconcileOutcome};
pub use sinks::{AuditRecord, AuditSink, Notification, NotificationKind, NotificationSink, Outbox};
pub use store::{BillingStore, BillingTx, StoreConfig, StoreError, StoreResult};
pub use types::{
    Actor, Charge, ChargeLine, ChargeStatus, ChargeType, Invoice, InvoiceStatus, Payment,
    PaymentStatus, PaymentWebhookEvent, PlotId, Role, TenantId, UserId,
};
