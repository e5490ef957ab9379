//! Collaborator adapters for plotledger.

#![deny(unsafe_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use plotledger_core::{
    verify_webhook_body, AuditRecord, AuditSink, BillingError, MemberProfile, Notification,
    NotificationSink, OwnershipDirectory, Payment, PaymentProvider, PlotId, Role, TenantId, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read directory seed {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed directory seed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid directory seed: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub user_id: UserId,
    pub role: Role,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// One membership of a user on a plot. `to_date = None` means still active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotOwnership {
    pub plot_id: PlotId,
    pub user_id: UserId,
    #[serde(default)]
    pub is_primary: bool,
    pub from_date: NaiveDate,
    #[serde(default)]
    pub to_date: Option<NaiveDate>,
}

impl PlotOwnership {
    pub fn is_active_primary(&self) -> bool {
        self.is_primary && self.to_date.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantDirectory {
    #[serde(default)]
    pub users: Vec<DirectoryUser>,
    #[serde(default)]
    pub ownerships: Vec<PlotOwnership>,
}

/// JSON seed layout: `{"tenants": {"<tenant>": {"users": [...], "ownerships": [...]}}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub tenants: BTreeMap<String, TenantDirectory>,
}

/// Ownership directory held entirely in memory, typically loaded from a seed file.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOwnershipDirectory {
    tenants: BTreeMap<TenantId, TenantDirectory>,
}

impl InMemoryOwnershipDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: DirectorySeed) -> Result<Self, SeedError> {
        let mut directory = Self::new();
        for (tenant, records) in seed.tenants {
            directory = directory.with_tenant(TenantId::new(tenant), records)?;
        }
        Ok(directory)
    }

    pub fn from_json(raw: &str) -> Result<Self, SeedError> {
        Self::from_seed(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let directory = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            tenants = directory.tenants.len(),
            "ownership directory loaded"
        );
        Ok(directory)
    }

    /// Add or replace one tenant's records after checking plot ownership rules.
    pub fn with_tenant(
        mut self,
        tenant: TenantId,
        records: TenantDirectory,
    ) -> Result<Self, SeedError> {
        let mut seen_users = BTreeSet::new();
        for user in &records.users {
            if !seen_users.insert(user.user_id) {
                return Err(SeedError::Invalid(format!(
                    "tenant {tenant}: user {} listed twice",
                    user.user_id
                )));
            }
        }

        let mut primary_plots = BTreeSet::new();
        let mut active_pairs = BTreeSet::new();
        for ownership in &records.ownerships {
            if let Some(to_date) = ownership.to_date {
                if to_date < ownership.from_date {
                    return Err(SeedError::Invalid(format!(
                        "tenant {tenant}: ownership of plot {} ends before it starts",
                        ownership.plot_id
                    )));
                }
                continue;
            }
            if !active_pairs.insert((ownership.plot_id, ownership.user_id)) {
                return Err(SeedError::Invalid(format!(
                    "tenant {tenant}: user {} has two active memberships on plot {}",
                    ownership.user_id, ownership.plot_id
                )));
            }
            if ownership.is_primary && !primary_plots.insert(ownership.plot_id) {
                return Err(SeedError::Invalid(format!(
                    "tenant {tenant}: plot {} has more than one active primary owner",
                    ownership.plot_id
                )));
            }
        }

        self.tenants.insert(tenant, records);
        Ok(self)
    }

    fn profile(records: &TenantDirectory, user: &DirectoryUser) -> MemberProfile {
        MemberProfile {
            user_id: user.user_id,
            role: user.role,
            active: user.active,
            active_primary_plots: records
                .ownerships
                .iter()
                .filter(|ownership| {
                    ownership.user_id == user.user_id && ownership.is_active_primary()
                })
                .map(|ownership| ownership.plot_id)
                .collect(),
        }
    }
}

#[async_trait]
impl OwnershipDirectory for InMemoryOwnershipDirectory {
    async fn member(
        &self,
        tenant: &TenantId,
        user_id: UserId,
    ) -> Result<Option<MemberProfile>, BillingError> {
        Ok(self.tenants.get(tenant).and_then(|records| {
            records
                .users
                .iter()
                .find(|user| user.user_id == user_id)
                .map(|user| Self::profile(records, user))
        }))
    }

    async fn members(&self, tenant: &TenantId) -> Result<Vec<MemberProfile>, BillingError> {
        let Some(records) = self.tenants.get(tenant) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<MemberProfile> = records
            .users
            .iter()
            .map(|user| Self::profile(records, user))
            .collect();
        members.sort_by_key(|profile| profile.user_id);
        Ok(members)
    }

    async fn plot_owner(
        &self,
        tenant: &TenantId,
        plot_id: PlotId,
    ) -> Result<Option<MemberProfile>, BillingError> {
        let Some(records) = self.tenants.get(tenant) else {
            return Ok(None);
        };
        let owner = records
            .ownerships
            .iter()
            .find(|ownership| ownership.plot_id == plot_id && ownership.is_active_primary());
        Ok(owner.and_then(|ownership| {
            records
                .users
                .iter()
                .find(|user| user.user_id == ownership.user_id)
                .map(|user| Self::profile(records, user))
        }))
    }
}

/// Notification sink that only writes a structured log line.
#[derive(Debug, Clone, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            target: "plotledger::notify",
            tenant = %notification.tenant_id,
            user_id = notification.user_id,
            kind = ?notification.kind,
            title = %notification.title,
            "notification queued"
        );
        Ok(())
    }
}

/// Audit sink that writes each record as a structured log line.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: &AuditRecord) -> anyhow::Result<()> {
        info!(
            target: "plotledger::audit",
            tenant = %record.tenant_id,
            actor_id = ?record.actor_id,
            action = %record.action,
            entity_type = %record.entity_type,
            entity_id = %record.entity_id,
            metadata = %record.metadata,
            "audit"
        );
        Ok(())
    }
}

/// Hosted-checkout stand-in: hands out deterministic checkout URLs and
/// checks keyed BLAKE3 webhook signatures when a secret is configured.
#[derive(Debug, Clone)]
pub struct MockCheckoutProvider {
    name: String,
    base_url: String,
    webhook_secret: Option<String>,
}

impl MockCheckoutProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        webhook_secret: Option<String>,
    ) -> Self {
        let webhook_secret = webhook_secret.filter(|secret| !secret.is_empty());
        if webhook_secret.is_none() {
            warn!("payment webhook signatures will not be verified");
        }
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            webhook_secret,
        }
    }

    pub fn verifies_signatures(&self) -> bool {
        self.webhook_secret.is_some()
    }
}

impl Default for MockCheckoutProvider {
    fn default() -> Self {
        Self::new("mockpay", "http://localhost:8080", None)
    }
}

impl PaymentProvider for MockCheckoutProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn checkout_url(&self, payment: &Payment) -> String {
        format!(
            "{}/checkout/{}?amount={}",
            self.base_url, payment.id, payment.amount_cents
        )
    }

    fn verify_signature(&self, body: &[u8], signature: Option<&str>) -> Result<(), BillingError> {
        match &self.webhook_secret {
            Some(secret) => verify_webhook_body(secret, body, signature),
            None => Ok(()),
        }
    }
}
