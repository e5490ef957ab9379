//! Read-only view of membership and plot ownership.
//!
//! The billing core never writes through this seam; ownership records are
//! managed elsewhere and consulted at decision time.

use crate::error::BillingError;
use crate::types::{PlotId, Role, TenantId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Membership facts the audience rules need about one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
    pub user_id: UserId,
    pub role: Role,
    pub active: bool,
    /// Plots for which the user currently holds an active primary ownership.
    pub active_primary_plots: Vec<PlotId>,
}

impl MemberProfile {
    /// The plot billed on behalf of this user, when it is unambiguous.
    pub fn primary_plot(&self) -> Option<PlotId> {
        match self.active_primary_plots.as_slice() {
            [plot] => Some(*plot),
            _ => None,
        }
    }
}

#[async_trait]
pub trait OwnershipDirectory: Send + Sync {
    /// Look up one user. `None` when the user is unknown in the tenant.
    async fn member(
        &self,
        tenant: &TenantId,
        user_id: UserId,
    ) -> Result<Option<MemberProfile>, BillingError>;

    /// Every member of the tenant, active or not, ordered by user id.
    async fn members(&self, tenant: &TenantId) -> Result<Vec<MemberProfile>, BillingError>;

    /// Current owner of a plot, if the plot has an active primary owner.
    async fn plot_owner(
        &self,
        tenant: &TenantId,
        plot_id: PlotId,
    ) -> Result<Option<MemberProfile>, BillingError>;

    async fn current_primary_plot(
        &self,
        tenant: &TenantId,
        user_id: UserId,
    ) -> Result<Option<PlotId>, BillingError> {
        Ok(self
            .member(tenant, user_id)
            .await?
            .and_then(|profile| profile.primary_plot()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_plot_requires_exactly_one() {
        let mut profile = MemberProfile {
            user_id: 1,
            role: Role::Resident,
            active: true,
            active_primary_plots: vec![],
        };
        assert_eq!(profile.primary_plot(), None);

        profile.active_primary_plots = vec![12];
        assert_eq!(profile.primary_plot(), Some(12));

        profile.active_primary_plots = vec![12, 13];
        assert_eq!(profile.primary_plot(), None);
    }
}
