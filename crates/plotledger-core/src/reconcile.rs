//! Participant roster edits on an existing charge.
//!
//! The whole edit happens inside the caller's transaction with the charge
//! row locked: the paid-invoice check, cancellations, and new issuance are
//! either all written or none are.

use crate::audience::{AudienceResolver, AudienceSpec, SkippedUser};
use crate::directory::OwnershipDirectory;
use crate::error::{BillingError, ConflictCode};
use crate::invoices::{invoice_id, InvoiceLedger};
use crate::sinks::Outbox;
use crate::store::BillingTx;
use crate::types::{ChargeLine, ChargeStatus, PlotId, TenantId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub added: Vec<PlotId>,
    pub removed: Vec<PlotId>,
    pub skipped_users: Vec<SkippedUser>,
}

pub struct ParticipantReconciler<'a> {
    directory: &'a dyn OwnershipDirectory,
    ledger: InvoiceLedger<'a>,
}

impl<'a> ParticipantReconciler<'a> {
    pub fn new(directory: &'a dyn OwnershipDirectory) -> Self {
        Self {
            directory,
            ledger: InvoiceLedger::new(directory),
        }
    }

    /// Replace the charge's participants with the primary plots of `user_ids`.
    pub async fn replace_participants(
        &self,
        tx: &mut dyn BillingTx,
        outbox: &mut Outbox,
        tenant: &TenantId,
        charge_id: Uuid,
        user_ids: &[UserId],
    ) -> Result<ReconcileOutcome, BillingError> {
        let charge = tx
            .lock_charge(tenant, charge_id)
            .await?
            .ok_or_else(|| BillingError::not_found("charge", charge_id))?;
        if charge.status == ChargeStatus::Closed {
            return Err(BillingError::conflict(
                ConflictCode::ChargeClosed,
                format!("charge {charge_id} is closed"),
            ));
        }

        let resolution = AudienceResolver::new(self.directory)
            .resolve(
                tenant,
                &AudienceSpec::Users {
                    user_ids: user_ids.to_vec(),
                },
            )
            .await?;

        let desired: BTreeSet<PlotId> = resolution.included_plots.iter().copied().collect();
        let current: BTreeSet<PlotId> = tx
            .charge_lines(tenant, charge_id)
            .await?
            .into_iter()
            .map(|line| line.plot_id)
            .collect();
        let to_remove: Vec<PlotId> = current.difference(&desired).copied().collect();
        let to_add: Vec<PlotId> = resolution
            .included_plots
            .iter()
            .copied()
            .filter(|plot| !current.contains(plot))
            .collect();

        let published = charge.status == ChargeStatus::Published;

        // Lock and check every removal before the first write.
        let mut removals = Vec::with_capacity(to_remove.len());
        for plot_id in &to_remove {
            let invoice = if published {
                tx.lock_invoice(tenant, invoice_id(charge_id, *plot_id))
                    .await?
            } else {
                None
            };
            if let Some(invoice) = &invoice {
                if invoice.paid_cents > 0 {
                    return Err(BillingError::conflict(
                        ConflictCode::CannotRemovePaidParticipant,
                        format!(
                            "plot {plot_id} has already paid toward invoice {}",
                            invoice.number
                        ),
                    ));
                }
            }
            removals.push((*plot_id, invoice));
        }

        for (plot_id, invoice) in removals {
            if let Some(invoice) = invoice.filter(|invoice| !invoice.is_canceled()) {
                self.ledger.cancel_locked(tx, outbox, invoice).await?;
            }
            tx.delete_charge_line(tenant, charge_id, plot_id).await?;
        }

        for plot_id in &to_add {
            tx.insert_charge_line(&ChargeLine {
                tenant_id: tenant.clone(),
                charge_id,
                plot_id: *plot_id,
                amount_cents: charge.unit_amount_cents,
            })
            .await?;
            if !published {
                continue;
            }
            match tx
                .lock_invoice(tenant, invoice_id(charge_id, *plot_id))
                .await?
            {
                Some(existing) if existing.is_canceled() => {
                    self.ledger
                        .reopen_invoice(tx, outbox, &charge, existing, charge.unit_amount_cents)
                        .await?;
                }
                Some(_) => {}
                None => {
                    self.ledger
                        .issue_invoice(tx, outbox, &charge, *plot_id, charge.unit_amount_cents)
                        .await?;
                }
            }
        }

        debug!(
            tenant = %tenant,
            charge_id = %charge_id,
            added = to_add.len(),
            removed = to_remove.len(),
            skipped = resolution.skipped_users.len(),
            "charge participants replaced"
        );
        Ok(ReconcileOutcome {
            added: to_add,
            removed: to_remove,
            skipped_users: resolution.skipped_users,
        })
    }
}
