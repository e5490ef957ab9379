//! Read-side aggregates. Computed from invoices on every request, never stored.

use crate::types::{Invoice, InvoiceStatus, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBalance {
    pub user_id: UserId,
    pub total_cents: i64,
    pub paid_cents: i64,
    pub outstanding_cents: i64,
    pub open_invoices: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeProgress {
    pub charge_id: Uuid,
    pub participants_count: usize,
    pub paid_count: usize,
    pub total_cents: i64,
    pub paid_cents: i64,
    pub progress_percent: u8,
}

pub fn user_balance(user_id: UserId, invoices: &[Invoice]) -> UserBalance {
    invoices
        .iter()
        .filter(|invoice| !invoice.is_canceled())
        .fold(
            UserBalance {
                user_id,
                ..UserBalance::default()
            },
            |mut acc, invoice| {
                acc.total_cents = acc.total_cents.saturating_add(invoice.total_cents);
                acc.paid_cents = acc.paid_cents.saturating_add(invoice.paid_cents);
                acc.outstanding_cents = acc
                    .outstanding_cents
                    .saturating_add(invoice.outstanding_cents());
                if invoice.outstanding_cents() > 0 {
                    acc.open_invoices += 1;
                }
                acc
            },
        )
}

pub fn charge_progress(charge_id: Uuid, invoices: &[Invoice]) -> ChargeProgress {
    let live: Vec<&Invoice> = invoices
        .iter()
        .filter(|invoice| !invoice.is_canceled())
        .collect();
    let total_cents = live
        .iter()
        .fold(0i64, |sum, invoice| sum.saturating_add(invoice.total_cents));
    let paid_cents = live
        .iter()
        .fold(0i64, |sum, invoice| sum.saturating_add(invoice.paid_cents));
    ChargeProgress {
        charge_id,
        participants_count: live.len(),
        paid_count: live
            .iter()
            .filter(|invoice| invoice.status == InvoiceStatus::Paid)
            .count(),
        total_cents,
        paid_cents,
        progress_percent: percent(paid_cents, total_cents),
    }
}

fn percent(paid: i64, total: i64) -> u8 {
    if total <= 0 || paid <= 0 {
        return 0;
    }
    // Half-up rounding in integer arithmetic.
    let rounded = (paid as i128 * 200 + total as i128) / (total as i128 * 2);
    rounded.min(100) as u8
}
