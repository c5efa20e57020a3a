//! Tenant quotas
//!
//! The installer never hardcodes per-tenant limits; it asks a [`Quotas`]
//! implementation before creating classes, schedules and sockets.

use crate::config::QuotaConfig;

pub trait Quotas: Send + Sync {
    fn classes_limit(&self, tenant: &str) -> usize;
    fn schedules_limit(&self, tenant: &str) -> usize;
    fn sockets_limit(&self, tenant: &str) -> usize;
    /// Trusted tenants may set async and mcpu budgets.
    fn is_trusted(&self, tenant: &str) -> bool;
}

/// Same limits for every tenant, read from `[quotas]`.
#[derive(Debug, Clone, Default)]
pub struct StaticQuotas {
    config: QuotaConfig,
}

impl StaticQuotas {
    pub fn new(config: QuotaConfig) -> Self {
        Self { config }
    }
}

impl Quotas for StaticQuotas {
    fn classes_limit(&self, _tenant: &str) -> usize {
        self.config.classes
    }

    fn schedules_limit(&self, _tenant: &str) -> usize {
        self.config.schedules
    }

    fn sockets_limit(&self, _tenant: &str) -> usize {
        self.config.sockets
    }

    fn is_trusted(&self, tenant: &str) -> bool {
        self.config.trusted_tenants.iter().any(|t| t == tenant)
    }
}
