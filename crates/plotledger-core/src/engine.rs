use crate::audience::{AudienceResolution, AudienceResolver, AudienceSpec};
use crate::balance::{self, ChargeProgress, UserBalance};
use crate::charges::{ChargeDraft, ChargeLifecycle, CloseOutcome, PublishOutcome};
use crate::directory::OwnershipDirectory;
use crate::error::{BillingError, ErrorKind};
use crate::invoices::InvoiceLedger;
use crate::ledger::{LedgerEntry, LedgerFilter};
use crate::payments::{Initiated, PaymentGateway, WebhookDelivery, WebhookOutcome};
use crate::provider::PaymentProvider;
use crate::reconcile::{ParticipantReconciler, ReconcileOutcome};
use crate::sinks::{AuditRecord, AuditSink, NotificationSink, Outbox};
use crate::store::{BillingStore, BillingTx, StoreConfig, StoreError};
use crate::types::{Actor, Charge, ChargeLine, Invoice, TenantId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Billing engine configuration.
#[derive(Debug, Clone)]
pub struct BillingEngineConfig {
    pub store: StoreConfig,
    /// Upper bound on plots a single charge may bill.
    pub max_participants: usize,
}

impl Default for BillingEngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::Memory,
            max_participants: 5_000,
        }
    }
}

/// External collaborators the engine consults or notifies.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn OwnershipDirectory>,
    pub notifier: Arc<dyn NotificationSink>,
    pub audit: Arc<dyn AuditSink>,
    pub provider: Arc<dyn PaymentProvider>,
}

/// Chairman request to create a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCharge {
    pub draft: ChargeDraft,
    pub audience: AudienceSpec,
    pub publish_now: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeCreated {
    pub charge: Charge,
    pub participants: AudienceResolution,
    pub lines: Vec<ChargeLine>,
    pub published: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeView {
    pub charge: Charge,
    pub lines: Vec<ChargeLine>,
}

/// Billing engine: opens one transaction per request, runs the component
/// against it, commits, then dispatches side effects.
pub struct BillingEngine {
    store: Arc<dyn BillingStore>,
    directory: Arc<dyn OwnershipDirectory>,
    notifier: Arc<dyn NotificationSink>,
    audit: Arc<dyn AuditSink>,
    provider: Arc<dyn PaymentProvider>,
    config: BillingEngineConfig,
}

impl BillingEngine {
    pub fn new(
        store: Arc<dyn BillingStore>,
        collaborators: Collaborators,
        config: BillingEngineConfig,
    ) -> Self {
        Self {
            store,
            directory: collaborators.directory,
            notifier: collaborators.notifier,
            audit: collaborators.audit,
            provider: collaborators.provider,
            config,
        }
    }

    /// Open the configured store and build the engine around it.
    pub async fn bootstrap(
        config: BillingEngineConfig,
        collaborators: Collaborators,
    ) -> Result<Self, BillingError> {
        let store = config.store.open().await?;
        info!(backend = store.backend_label(), "billing store ready");
        Ok(Self::new(store, collaborators, config))
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend_label()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn create_charge(
        &self,
        actor: &Actor,
        request: CreateCharge,
    ) -> Result<ChargeCreated, BillingError> {
        require_chairman(actor, "create charges")?;
        request.draft.validate()?;

        let participants = AudienceResolver::new(self.directory.as_ref())
            .resolve(&actor.tenant_id, &request.audience)
            .await?;
        if participants.included_plots.len() > self.config.max_participants {
            return Err(BillingError::validation(format!(
                "audience resolves to {} plots; at most {} allowed",
                participants.included_plots.len(),
                self.config.max_participants
            )));
        }

        let mut outbox = Outbox::new();
        let mut tx = self.begin().await?;
        let result = ChargeLifecycle::new(self.directory.as_ref())
            .create(
                tx.as_mut(),
                &mut outbox,
                actor,
                &request.draft,
                &participants.included_plots,
                request.publish_now,
            )
            .await;
        let created = self.settle(tx, result, "create_charge").await?;

        let charge = created.charge;
        info!(
            tenant = %actor.tenant_id,
            charge_id = %charge.id,
            plots = created.lines.len(),
            published = created.published.is_some(),
            "charge created"
        );
        outbox.audit(AuditRecord::new(
            &actor.tenant_id,
            Some(actor.user_id),
            "charge.created",
            "charge",
            charge.id,
            json!({
                "title": charge.title,
                "unitAmountCents": charge.unit_amount_cents,
                "plots": participants.included_plots,
                "skippedUsers": participants.skipped_users.len(),
            }),
        ));
        if let Some(published) = &created.published {
            outbox.audit(publish_audit(actor, published));
        }
        self.dispatch(outbox).await;

        Ok(ChargeCreated {
            published: created.published.is_some(),
            charge,
            participants,
            lines: created.lines,
        })
    }

    pub async fn publish_charge(
        &self,
        actor: &Actor,
        charge_id: Uuid,
    ) -> Result<PublishOutcome, BillingError> {
        require_chairman(actor, "publish charges")?;
        let mut outbox = Outbox::new();
        let mut tx = self.begin().await?;
        let result = ChargeLifecycle::new(self.directory.as_ref())
            .publish(tx.as_mut(), &mut outbox, &actor.tenant_id, charge_id)
            .await;
        let outcome = self.settle(tx, result, "publish_charge").await?;

        info!(
            tenant = %actor.tenant_id,
            charge_id = %charge_id,
            issued = outcome.issued,
            "charge published"
        );
        outbox.audit(publish_audit(actor, &outcome));
        self.dispatch(outbox).await;
        Ok(outcome)
    }

    pub async fn close_charge(
        &self,
        actor: &Actor,
        charge_id: Uuid,
    ) -> Result<CloseOutcome, BillingError> {
        require_chairman(actor, "close charges")?;
        let mut tx = self.begin().await?;
        let result = ChargeLifecycle::new(self.directory.as_ref())
            .close(tx.as_mut(), &actor.tenant_id, charge_id)
            .await;
        let outcome = self.settle(tx, result, "close_charge").await?;

        if !outcome.already_closed {
            info!(tenant = %actor.tenant_id, charge_id = %charge_id, "charge closed");
            let mut outbox = Outbox::new();
            outbox.audit(AuditRecord::new(
                &actor.tenant_id,
                Some(actor.user_id),
                "charge.closed",
                "charge",
                charge_id,
                json!({}),
            ));
            self.dispatch(outbox).await;
        }
        Ok(outcome)
    }

    pub async fn replace_participants(
        &self,
        actor: &Actor,
        charge_id: Uuid,
        user_ids: &[UserId],
    ) -> Result<ReconcileOutcome, BillingError> {
        require_chairman(actor, "edit charge participants")?;
        let mut outbox = Outbox::new();
        let mut tx = self.begin().await?;
        let result = ParticipantReconciler::new(self.directory.as_ref())
            .replace_participants(tx.as_mut(), &mut outbox, &actor.tenant_id, charge_id, user_ids)
            .await;
        let outcome = self.settle(tx, result, "replace_participants").await?;

        info!(
            tenant = %actor.tenant_id,
            charge_id = %charge_id,
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            "charge participants replaced"
        );
        outbox.audit(AuditRecord::new(
            &actor.tenant_id,
            Some(actor.user_id),
            "charge.participants_replaced",
            "charge",
            charge_id,
            json!({ "added": outcome.added, "removed": outcome.removed }),
        ));
        self.dispatch(outbox).await;
        Ok(outcome)
    }

    /// Cancel an unpaid invoice and drop its plot from the charge.
    pub async fn cancel_invoice(
        &self,
        actor: &Actor,
        invoice_id: Uuid,
    ) -> Result<Invoice, BillingError> {
        require_chairman(actor, "cancel invoices")?;
        let mut outbox = Outbox::new();
        let mut tx = self.begin().await?;
        let result = cancel_and_detach(
            &InvoiceLedger::new(self.directory.as_ref()),
            tx.as_mut(),
            &mut outbox,
            &actor.tenant_id,
            invoice_id,
        )
        .await;
        let invoice = self.settle(tx, result, "cancel_invoice").await?;

        info!(tenant = %actor.tenant_id, invoice_id = %invoice_id, "invoice canceled");
        outbox.audit(AuditRecord::new(
            &actor.tenant_id,
            Some(actor.user_id),
            "invoice.canceled",
            "invoice",
            invoice_id,
            json!({ "number": invoice.number, "totalCents": invoice.total_cents }),
        ));
        self.dispatch(outbox).await;
        Ok(invoice)
    }

    pub async fn initiate_payment(
        &self,
        actor: &Actor,
        invoice_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Initiated, BillingError> {
        let gateway = self.gateway();
        let mut tx = self.begin().await?;
        let result = gateway
            .initiate(tx.as_mut(), actor, invoice_id, idempotency_key)
            .await;

        let initiated = match result {
            Err(BillingError::Store(StoreError::UniqueViolation(detail))) => {
                // A concurrent request won the insert; converge on its row.
                info!(
                    tenant = %actor.tenant_id,
                    invoice_id = %invoice_id,
                    detail = %detail,
                    "idempotency key raced; re-reading payment"
                );
                self.discard(tx).await;
                let mut tx = self.begin().await?;
                let reread = gateway
                    .find_reusable(tx.as_mut(), actor, invoice_id, idempotency_key.trim())
                    .await
                    .and_then(|found| {
                        found.ok_or_else(|| {
                            BillingError::Store(StoreError::NotFound(format!(
                                "payment for idempotency key '{}' disappeared",
                                idempotency_key.trim()
                            )))
                        })
                    });
                self.settle(tx, reread, "initiate_payment").await?
            }
            other => self.settle(tx, other, "initiate_payment").await?,
        };

        if !initiated.reused {
            let mut outbox = Outbox::new();
            outbox.audit(AuditRecord::new(
                &actor.tenant_id,
                Some(actor.user_id),
                "payment.initiated",
                "payment",
                initiated.payment.id,
                json!({
                    "invoiceId": invoice_id,
                    "amountCents": initiated.payment.amount_cents,
                    "provider": initiated.payment.provider,
                }),
            ));
            self.dispatch(outbox).await;
        }
        Ok(initiated)
    }

    /// Check the provider signature on a raw webhook body.
    pub fn verify_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<(), BillingError> {
        self.provider.verify_signature(body, signature)
    }

    pub async fn apply_webhook(
        &self,
        delivery: &WebhookDelivery,
    ) -> Result<WebhookOutcome, BillingError> {
        let mut outbox = Outbox::new();
        let mut tx = self.begin().await?;
        let result = self
            .gateway()
            .apply_webhook(tx.as_mut(), &mut outbox, delivery)
            .await;

        if matches!(result, Ok(WebhookOutcome::Duplicate)) {
            self.discard(tx).await;
            info!(
                tenant = %delivery.tenant_id,
                event_id = %delivery.provider_event_id,
                "duplicate webhook delivery ignored"
            );
            return Ok(WebhookOutcome::Duplicate);
        }
        let outcome = self.settle(tx, result, "apply_webhook").await?;

        if let WebhookOutcome::Recorded {
            payment, previous, ..
        } = &outcome
        {
            if payment.status != *previous {
                info!(
                    tenant = %delivery.tenant_id,
                    payment_id = %payment.id,
                    status = payment.status.as_str(),
                    "payment status changed"
                );
                outbox.audit(AuditRecord::new(
                    &delivery.tenant_id,
                    None,
                    "payment.status_changed",
                    "payment",
                    payment.id,
                    json!({
                        "from": previous.as_str(),
                        "to": payment.status.as_str(),
                        "eventId": delivery.provider_event_id,
                    }),
                ));
            }
        }
        self.dispatch(outbox).await;
        Ok(outcome)
    }

    pub async fn charge(&self, actor: &Actor, charge_id: Uuid) -> Result<ChargeView, BillingError> {
        require_chairman(actor, "view charge details")?;
        let mut tx = self.begin().await?;
        let result = load_charge_view(tx.as_mut(), &actor.tenant_id, charge_id).await;
        self.settle(tx, result, "charge").await
    }

    /// Collection progress for a charge; visible to every tenant member.
    pub async fn charge_progress(
        &self,
        actor: &Actor,
        charge_id: Uuid,
    ) -> Result<ChargeProgress, BillingError> {
        let mut tx = self.begin().await?;
        let result = match tx.find_charge(&actor.tenant_id, charge_id).await {
            Ok(Some(_)) => tx
                .invoices_for_charge(&actor.tenant_id, charge_id)
                .await
                .map(|invoices| balance::charge_progress(charge_id, &invoices))
                .map_err(BillingError::from),
            Ok(None) => Err(BillingError::not_found("charge", charge_id)),
            Err(err) => Err(err.into()),
        };
        self.settle(tx, result, "charge_progress").await
    }

    pub async fn charge_invoices(
        &self,
        actor: &Actor,
        charge_id: Uuid,
    ) -> Result<Vec<Invoice>, BillingError> {
        require_chairman(actor, "list charge invoices")?;
        let mut tx = self.begin().await?;
        let result = match tx.find_charge(&actor.tenant_id, charge_id).await {
            Ok(Some(_)) => tx
                .invoices_for_charge(&actor.tenant_id, charge_id)
                .await
                .map_err(BillingError::from),
            Ok(None) => Err(BillingError::not_found("charge", charge_id)),
            Err(err) => Err(err.into()),
        };
        self.settle(tx, result, "charge_invoices").await
    }

    pub async fn user_balance(
        &self,
        actor: &Actor,
        user_id: UserId,
    ) -> Result<UserBalance, BillingError> {
        let invoices = self.user_invoices(actor, user_id).await?;
        Ok(balance::user_balance(user_id, &invoices))
    }

    pub async fn user_invoices(
        &self,
        actor: &Actor,
        user_id: UserId,
    ) -> Result<Vec<Invoice>, BillingError> {
        require_self_or_chairman(actor, user_id)?;
        let mut tx = self.begin().await?;
        let result = tx
            .invoices_for_user(&actor.tenant_id, user_id)
            .await
            .map_err(BillingError::from);
        self.settle(tx, result, "user_invoices").await
    }

    pub async fn ledger_entries(
        &self,
        actor: &Actor,
        filter: &LedgerFilter,
    ) -> Result<Vec<LedgerEntry>, BillingError> {
        require_chairman(actor, "read the ledger")?;
        let mut tx = self.begin().await?;
        let result = tx
            .ledger_entries(&actor.tenant_id, filter)
            .await
            .map_err(BillingError::from);
        self.settle(tx, result, "ledger_entries").await
    }

    fn gateway(&self) -> PaymentGateway<'_> {
        PaymentGateway::new(
            self.provider.as_ref(),
            InvoiceLedger::new(self.directory.as_ref()),
        )
    }

    async fn begin(&self) -> Result<Box<dyn BillingTx>, BillingError> {
        self.store.begin().await.map_err(|err| {
            error!(error = %err, "failed to open billing transaction");
            BillingError::from(err)
        })
    }

    /// Commit on success, roll back on failure.
    async fn settle<T>(
        &self,
        tx: Box<dyn BillingTx>,
        result: Result<T, BillingError>,
        operation: &'static str,
    ) -> Result<T, BillingError> {
        match result {
            Ok(value) => {
                tx.commit().await.map_err(|err| {
                    error!(operation, error = %err, "billing commit failed");
                    BillingError::from(err)
                })?;
                Ok(value)
            }
            Err(err) => {
                self.discard(tx).await;
                if err.kind() == ErrorKind::Internal {
                    error!(operation, error = %err, "billing operation failed");
                }
                Err(err)
            }
        }
    }

    async fn discard(&self, tx: Box<dyn BillingTx>) {
        if let Err(err) = tx.rollback().await {
            warn!(error = %err, "billing rollback failed");
        }
    }

    async fn dispatch(&self, outbox: Outbox) {
        outbox
            .dispatch(self.notifier.as_ref(), self.audit.as_ref())
            .await;
    }
}

fn require_chairman(actor: &Actor, action: &str) -> Result<(), BillingError> {
    if actor.is_chairman() {
        Ok(())
    } else {
        Err(BillingError::Unauthorized(format!(
            "only the chairman may {action}"
        )))
    }
}

fn require_self_or_chairman(actor: &Actor, user_id: UserId) -> Result<(), BillingError> {
    if actor.is_chairman() || actor.user_id == user_id {
        Ok(())
    } else {
        Err(BillingError::Unauthorized(format!(
            "user {} may not view billing for user {user_id}",
            actor.user_id
        )))
    }
}

fn publish_audit(actor: &Actor, outcome: &PublishOutcome) -> AuditRecord {
    AuditRecord::new(
        &actor.tenant_id,
        Some(actor.user_id),
        "charge.published",
        "charge",
        outcome.charge.id,
        json!({ "issued": outcome.issued, "existing": outcome.existing }),
    )
}

/// Cancel an invoice and drop its charge line. The charge row is locked
/// first so this serializes with roster edits and payments.
async fn cancel_and_detach(
    ledger: &InvoiceLedger<'_>,
    tx: &mut dyn BillingTx,
    outbox: &mut Outbox,
    tenant: &TenantId,
    invoice_id: Uuid,
) -> Result<Invoice, BillingError> {
    let charge_id = tx
        .find_invoice(tenant, invoice_id)
        .await?
        .ok_or_else(|| BillingError::not_found("invoice", invoice_id))?
        .charge_id;
    tx.lock_charge(tenant, charge_id)
        .await?
        .ok_or_else(|| BillingError::not_found("charge", charge_id))?;
    let invoice = ledger.cancel_invoice(tx, outbox, tenant, invoice_id).await?;
    tx.delete_charge_line(tenant, charge_id, invoice.plot_id)
        .await?;
    Ok(invoice)
}

async fn load_charge_view(
    tx: &mut dyn BillingTx,
    tenant: &TenantId,
    charge_id: Uuid,
) -> Result<ChargeView, BillingError> {
    let charge = tx
        .find_charge(tenant, charge_id)
        .await?
        .ok_or_else(|| BillingError::not_found("charge", charge_id))?;
    let lines = tx.charge_lines(tenant, charge_id).await?;
    Ok(ChargeView { charge, lines })
}
