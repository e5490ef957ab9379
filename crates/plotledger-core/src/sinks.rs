//! Fire-and-forget side channels: resident notifications and audit records.
//!
//! Components queue side effects into an [`Outbox`] while a transaction is
//! open; the engine dispatches it only after a successful commit. A sink
//! failure is logged and never undoes the committed state.

use crate::types::{PlotId, TenantId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    InvoiceIssued,
    InvoiceReissued,
    InvoiceCanceled,
    PaymentReceived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub tenant_id: TenantId,
    pub actor_id: Option<UserId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub metadata: serde_json::Value,
}

impl AuditRecord {
    pub fn new(
        tenant_id: &TenantId,
        actor_id: Option<UserId>,
        action: &str,
        entity_type: &str,
        entity_id: impl ToString,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id: tenant_id.clone(),
            actor_id,
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            metadata,
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> anyhow::Result<()>;
}

/// Side effects collected during one transaction.
#[derive(Debug, Default)]
pub struct Outbox {
    pub notifications: Vec<Notification>,
    pub audits: Vec<AuditRecord>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(
        &mut self,
        tenant_id: &TenantId,
        user_id: UserId,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        payload: serde_json::Value,
    ) {
        self.notifications.push(Notification {
            tenant_id: tenant_id.clone(),
            user_id,
            kind,
            title: title.into(),
            body: body.into(),
            payload,
        });
    }

    pub fn audit(&mut self, record: AuditRecord) {
        self.audits.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty() && self.audits.is_empty()
    }

    /// Deliver everything queued. Failures are logged per item and skipped.
    pub async fn dispatch(self, notifier: &dyn NotificationSink, audit: &dyn AuditSink) {
        for notification in &self.notifications {
            if let Err(err) = notifier.notify(notification).await {
                warn!(
                    tenant = %notification.tenant_id,
                    user_id = notification.user_id,
                    kind = ?notification.kind,
                    error = %err,
                    "notification delivery failed"
                );
            }
        }
        for record in &self.audits {
            if let Err(err) = audit.record(record).await {
                warn!(
                    tenant = %record.tenant_id,
                    action = %record.action,
                    entity_id = %record.entity_id,
                    error = %err,
                    "audit record failed"
                );
            }
        }
    }
}

/// Payload attached to invoice notifications.
pub(crate) fn invoice_payload(
    invoice_id: Uuid,
    plot_id: PlotId,
    amount_cents: i64,
) -> serde_json::Value {
    serde_json::json!({
        "invoiceId": invoice_id,
        "plotId": plot_id,
        "amountCents": amount_cents,
    })
}
