//! Charge lifecycle: DRAFT -> PUBLISHED -> CLOSED.

use crate::directory::OwnershipDirectory;
use crate::error::{BillingError, ConflictCode};
use crate::invoices::InvoiceLedger;
use crate::sinks::Outbox;
use crate::store::BillingTx;
use crate::types::{Actor, Charge, ChargeLine, ChargeStatus, ChargeType, PlotId, TenantId};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

const MAX_TITLE_LEN: usize = 200;

/// Largest amount a single plot can be billed: ten billion in major units.
/// Keeps per-charge and per-user sums well inside `i64`.
pub const MAX_UNIT_AMOUNT_CENTS: i64 = 1_000_000_000_000;

/// Chairman input for a new charge. Every included plot owes `unit_amount_cents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeDraft {
    pub title: String,
    pub charge_type: ChargeType,
    pub unit_amount_cents: i64,
    pub due_date: NaiveDate,
}

impl ChargeDraft {
    pub fn validate(&self) -> Result<(), BillingError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(BillingError::validation("title must not be empty"));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(BillingError::validation(format!(
                "title must be at most {MAX_TITLE_LEN} characters"
            )));
        }
        if self.unit_amount_cents <= 0 {
            return Err(BillingError::validation(
                "unitAmountCents must be a positive integer",
            ));
        }
        if self.unit_amount_cents > MAX_UNIT_AMOUNT_CENTS {
            return Err(BillingError::validation(format!(
                "unitAmountCents must be at most {MAX_UNIT_AMOUNT_CENTS}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub charge: Charge,
    pub issued: usize,
    pub existing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCharge {
    pub charge: Charge,
    pub lines: Vec<ChargeLine>,
    pub published: Option<PublishOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub charge: Charge,
    pub already_closed: bool,
}

pub struct ChargeLifecycle<'a> {
    ledger: InvoiceLedger<'a>,
}

impl<'a> ChargeLifecycle<'a> {
    pub fn new(directory: &'a dyn OwnershipDirectory) -> Self {
        Self {
            ledger: InvoiceLedger::new(directory),
        }
    }

    /// Persist a DRAFT charge with one line per plot, optionally publishing
    /// it within the same transaction.
    pub async fn create(
        &self,
        tx: &mut dyn BillingTx,
        outbox: &mut Outbox,
        actor: &Actor,
        draft: &ChargeDraft,
        plots: &[PlotId],
        publish_now: bool,
    ) -> Result<CreatedCharge, BillingError> {
        draft.validate()?;

        let charge = Charge {
            id: Uuid::new_v4(),
            tenant_id: actor.tenant_id.clone(),
            title: draft.title.trim().to_string(),
            charge_type: draft.charge_type,
            unit_amount_cents: draft.unit_amount_cents,
            due_date: draft.due_date,
            status: ChargeStatus::Draft,
            created_by: actor.user_id,
            created_at: Utc::now(),
            published_at: None,
            closed_at: None,
        };
        tx.insert_charge(&charge).await?;

        let mut lines = Vec::with_capacity(plots.len());
        for plot_id in plots {
            let line = ChargeLine {
                tenant_id: charge.tenant_id.clone(),
                charge_id: charge.id,
                plot_id: *plot_id,
                amount_cents: charge.unit_amount_cents,
            };
            tx.insert_charge_line(&line).await?;
            lines.push(line);
        }

        let published = if publish_now {
            Some(self.publish(tx, outbox, &charge.tenant_id, charge.id).await?)
        } else {
            None
        };
        let charge = match &published {
            Some(outcome) => outcome.charge.clone(),
            None => charge,
        };

        Ok(CreatedCharge {
            charge,
            lines,
            published,
        })
    }

    /// Move a DRAFT charge to PUBLISHED and issue one invoice per line.
    pub async fn publish(
        &self,
        tx: &mut dyn BillingTx,
        outbox: &mut Outbox,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> Result<PublishOutcome, BillingError> {
        let mut charge = tx
            .lock_charge(tenant, charge_id)
            .await?
            .ok_or_else(|| BillingError::not_found("charge", charge_id))?;

        match charge.status {
            ChargeStatus::Draft => {}
            ChargeStatus::Published => {
                return Err(BillingError::conflict(
                    ConflictCode::ChargeAlreadyPublished,
                    format!("charge {charge_id} is already published"),
                ))
            }
            ChargeStatus::Closed => {
                return Err(BillingError::conflict(
                    ConflictCode::ChargeClosed,
                    format!("charge {charge_id} is closed"),
                ))
            }
        }

        charge.status = ChargeStatus::Published;
        charge.published_at = Some(Utc::now());
        tx.update_charge(&charge).await?;

        let mut issued = 0;
        let mut existing = 0;
        for line in tx.charge_lines(tenant, charge_id).await? {
            let result = self
                .ledger
                .issue_invoice(tx, outbox, &charge, line.plot_id, line.amount_cents)
                .await?;
            if result.is_new() {
                issued += 1;
            } else {
                existing += 1;
            }
        }

        debug!(
            tenant = %tenant,
            charge_id = %charge_id,
            issued,
            existing,
            "charge published"
        );
        Ok(PublishOutcome {
            charge,
            issued,
            existing,
        })
    }

    /// Close a charge. Closing a closed charge succeeds without changes.
    pub async fn close(
        &self,
        tx: &mut dyn BillingTx,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> Result<CloseOutcome, BillingError> {
        let mut charge = tx
            .lock_charge(tenant, charge_id)
            .await?
            .ok_or_else(|| BillingError::not_found("charge", charge_id))?;

        if charge.status == ChargeStatus::Closed {
            return Ok(CloseOutcome {
                charge,
                already_closed: true,
            });
        }

        charge.status = ChargeStatus::Closed;
        charge.closed_at = Some(Utc::now());
        tx.update_charge(&charge).await?;
        debug!(tenant = %tenant, charge_id = %charge_id, "charge closed");
        Ok(CloseOutcome {
            charge,
            already_closed: false,
        })
    }
}
