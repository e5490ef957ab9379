//! Audience resolution: who a charge bills, expressed as a set of plots.

use crate::directory::{MemberProfile, OwnershipDirectory};
use crate::error::BillingError;
use crate::types::{PlotId, Role, TenantId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudienceSpec {
    /// Bill exactly these plots.
    Plots { plot_ids: Vec<PlotId> },
    /// Bill the primary plot of each listed user.
    Users { user_ids: Vec<UserId> },
    /// Bill the primary plot of every active resident.
    AllActiveResidents { include_chairman: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    Inactive,
    NoPrimaryPlot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedUser {
    pub user_id: UserId,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudienceResolution {
    pub included_users: Vec<UserId>,
    pub included_plots: Vec<PlotId>,
    pub skipped_users: Vec<SkippedUser>,
}

impl AudienceResolution {
    fn include(&mut self, seen: &mut HashSet<PlotId>, user_id: Option<UserId>, plot: PlotId) {
        if let Some(user_id) = user_id {
            self.included_users.push(user_id);
        }
        if seen.insert(plot) {
            self.included_plots.push(plot);
        }
    }

    fn skip(&mut self, user_id: UserId, reason: SkipReason) {
        self.skipped_users.push(SkippedUser { user_id, reason });
    }
}

pub struct AudienceResolver<'a> {
    directory: &'a dyn OwnershipDirectory,
}

impl<'a> AudienceResolver<'a> {
    pub fn new(directory: &'a dyn OwnershipDirectory) -> Self {
        Self { directory }
    }

    pub async fn resolve(
        &self,
        tenant: &TenantId,
        spec: &AudienceSpec,
    ) -> Result<AudienceResolution, BillingError> {
        let mut resolution = AudienceResolution::default();
        let mut seen = HashSet::new();

        match spec {
            AudienceSpec::Plots { plot_ids } => {
                for plot in plot_ids {
                    resolution.include(&mut seen, None, *plot);
                }
            }
            AudienceSpec::Users { user_ids } => {
                let mut visited = HashSet::new();
                for user_id in user_ids {
                    if !visited.insert(*user_id) {
                        continue;
                    }
                    match self.directory.member(tenant, *user_id).await? {
                        Some(profile) => consider(&mut resolution, &mut seen, &profile),
                        None => resolution.skip(*user_id, SkipReason::Inactive),
                    }
                }
            }
            AudienceSpec::AllActiveResidents { include_chairman } => {
                let members = self.directory.members(tenant).await?;
                for profile in members.iter().filter(|profile| profile.active) {
                    if profile.role == Role::Chairman && !include_chairman {
                        continue;
                    }
                    consider(&mut resolution, &mut seen, profile);
                }
            }
        }

        Ok(resolution)
    }
}

fn consider(
    resolution: &mut AudienceResolution,
    seen: &mut HashSet<PlotId>,
    profile: &MemberProfile,
) {
    if !profile.active {
        resolution.skip(profile.user_id, SkipReason::Inactive);
        return;
    }
    match profile.primary_plot() {
        Some(plot) => resolution.include(seen, Some(profile.user_id), plot),
        None => resolution.skip(profile.user_id, SkipReason::NoPrimaryPlot),
    }
}
