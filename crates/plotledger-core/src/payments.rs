//! Payment initiation and provider webhook application.
//!
//! Both entry points converge under retries: initiation on the caller's
//! idempotency key, webhooks on the provider's event id.

use crate::error::{BillingError, ConflictCode};
use crate::invoices::InvoiceLedger;
use crate::provider::PaymentProvider;
use crate::sinks::Outbox;
use crate::store::{BillingTx, StoreError};
use crate::types::{Actor, Invoice, Payment, PaymentStatus, PaymentWebhookEvent, TenantId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Initiated {
    pub payment: Payment,
    pub checkout_url: String,
    pub reused: bool,
}

/// Provider callback body after signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    #[serde(rename = "eventId")]
    pub provider_event_id: String,
    pub payment_id: Uuid,
    pub tenant_id: TenantId,
    #[serde(rename = "status")]
    pub status_raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The event was seen before; nothing changed.
    Duplicate,
    /// The event was recorded. `invoice` is set when money was applied.
    Recorded {
        payment: Payment,
        previous: PaymentStatus,
        invoice: Option<Invoice>,
    },
}

impl WebhookOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

pub struct PaymentGateway<'a> {
    provider: &'a dyn PaymentProvider,
    ledger: InvoiceLedger<'a>,
}

impl<'a> PaymentGateway<'a> {
    pub fn new(provider: &'a dyn PaymentProvider, ledger: InvoiceLedger<'a>) -> Self {
        Self { provider, ledger }
    }

    /// Start (or resume) paying an invoice's outstanding amount.
    pub async fn initiate(
        &self,
        tx: &mut dyn BillingTx,
        actor: &Actor,
        invoice_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Initiated, BillingError> {
        let key = validate_key(idempotency_key)?;
        if let Some(reused) = self.find_reusable(tx, actor, invoice_id, key).await? {
            return Ok(reused);
        }

        let invoice = tx
            .lock_invoice(&actor.tenant_id, invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("invoice", invoice_id))?;
        if !actor.is_chairman() && invoice.user_id != Some(actor.user_id) {
            return Err(BillingError::Unauthorized(format!(
                "user {} may not pay invoice {}",
                actor.user_id, invoice.number
            )));
        }
        if invoice.is_canceled() {
            return Err(BillingError::conflict(
                ConflictCode::InvoiceCanceled,
                format!("invoice {} is canceled", invoice.number),
            ));
        }
        let outstanding = invoice.outstanding_cents();
        if outstanding <= 0 {
            return Err(BillingError::conflict(
                ConflictCode::InvoiceAlreadyPaid,
                format!("invoice {} is already paid", invoice.number),
            ));
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            tenant_id: actor.tenant_id.clone(),
            invoice_id,
            payer_id: actor.user_id,
            provider: self.provider.name().to_string(),
            idempotency_key: key.to_string(),
            amount_cents: outstanding,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        tx.insert_payment(&payment).await?;
        debug!(
            tenant = %actor.tenant_id,
            payment_id = %payment.id,
            invoice_id = %invoice_id,
            amount_cents = outstanding,
            "payment initiated"
        );

        Ok(Initiated {
            checkout_url: self.provider.checkout_url(&payment),
            payment,
            reused: false,
        })
    }

    /// Return the payment already recorded under `key`, if any.
    pub async fn find_reusable(
        &self,
        tx: &mut dyn BillingTx,
        actor: &Actor,
        invoice_id: Uuid,
        key: &str,
    ) -> Result<Option<Initiated>, BillingError> {
        let Some(payment) = tx.find_payment_by_key(&actor.tenant_id, key).await? else {
            return Ok(None);
        };
        if payment.invoice_id != invoice_id {
            return Err(BillingError::conflict(
                ConflictCode::IdempotencyKeyReused,
                "idempotency key was already used for a different invoice",
            ));
        }
        if !actor.is_chairman() && payment.payer_id != actor.user_id {
            return Err(BillingError::Unauthorized(format!(
                "user {} may not resume payment {}",
                actor.user_id, payment.id
            )));
        }
        debug!(payment_id = %payment.id, "reusing payment for idempotency key");
        Ok(Some(Initiated {
            checkout_url: self.provider.checkout_url(&payment),
            payment,
            reused: true,
        }))
    }

    /// Apply one provider callback. Replays of a recorded event are no-ops.
    pub async fn apply_webhook(
        &self,
        tx: &mut dyn BillingTx,
        outbox: &mut Outbox,
        delivery: &WebhookDelivery,
    ) -> Result<WebhookOutcome, BillingError> {
        let status = PaymentStatus::from_provider(&delivery.status_raw).ok_or_else(|| {
            BillingError::validation(format!(
                "unknown payment status '{}'",
                delivery.status_raw
            ))
        })?;
        let event_id = delivery.provider_event_id.trim();
        if event_id.is_empty() {
            return Err(BillingError::validation("eventId must not be empty"));
        }
        let tenant = &delivery.tenant_id;
        let provider = self.provider.name();

        if tx.webhook_event_exists(tenant, provider, event_id).await? {
            return Ok(WebhookOutcome::Duplicate);
        }

        let mut payment = tx
            .lock_payment(tenant, delivery.payment_id)
            .await?
            .ok_or_else(|| BillingError::not_found("payment", delivery.payment_id))?;

        let event = PaymentWebhookEvent {
            tenant_id: tenant.clone(),
            provider: provider.to_string(),
            provider_event_id: event_id.to_string(),
            payment_id: payment.id,
            status_raw: delivery.status_raw.clone(),
            received_at: Utc::now(),
        };
        match tx.insert_webhook_event(&event).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(_)) => return Ok(WebhookOutcome::Duplicate),
            Err(err) => return Err(err.into()),
        }

        let previous = payment.status;
        if previous.is_terminal() || status == PaymentStatus::Pending {
            debug!(
                payment_id = %payment.id,
                current = previous.as_str(),
                reported = status.as_str(),
                "webhook recorded without transition"
            );
            return Ok(WebhookOutcome::Recorded {
                payment,
                previous,
                invoice: None,
            });
        }

        payment.status = status;
        payment.updated_at = Utc::now();
        tx.update_payment(&payment).await?;

        let invoice = if status == PaymentStatus::Success {
            Some(
                self.ledger
                    .apply_payment(
                        tx,
                        outbox,
                        tenant,
                        payment.invoice_id,
                        payment.amount_cents,
                        payment.id,
                    )
                    .await?,
            )
        } else {
            None
        };

        debug!(
            tenant = %tenant,
            payment_id = %payment.id,
            status = status.as_str(),
            "payment status changed"
        );
        Ok(WebhookOutcome::Recorded {
            payment,
            previous,
            invoice,
        })
    }
}

fn validate_key(raw: &str) -> Result<&str, BillingError> {
    let key = raw.trim();
    if key.is_empty() {
        return Err(BillingError::validation("idempotencyKey must not be empty"));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(BillingError::validation(format!(
            "idempotencyKey must be at most {MAX_IDEMPOTENCY_KEY_LEN} bytes"
        )));
    }
    Ok(key)
}
