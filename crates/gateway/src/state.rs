//! Shared gateway runtime state, built once at startup.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use veil_billing::{ChargeLedger, UsageArchiver};
use veil_blob::ObjectStore;
use veil_skills::{SkillFabric, SkillRegistry};
use veil_store::{CacheTier, DurableStore};
use veil_tasks::{TaskQueue, UserEventBus};
use veil_vault::TransitVault;

use crate::connections::ConnectionManager;

/// A validated session, as the identity layer hands it to us.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub user_id: String,
    pub user_id_hash: String,
    pub vault_key_id: String,
}

/// Process-wide gateway state. Credentials and external handles are
/// loaded once and held immutable; rotation requires restart.
pub struct GatewayState {
    pub connections: ConnectionManager,
    pub cache: Arc<CacheTier>,
    pub durable: Arc<dyn DurableStore>,
    pub vault: Arc<TransitVault>,
    pub skills: Arc<SkillRegistry>,
    pub fabric: Arc<SkillFabric>,
    pub queue: TaskQueue,
    pub events: UserEventBus,
    pub ledger: Arc<ChargeLedger>,
    pub archiver: Arc<UsageArchiver>,
    pub blob: Arc<dyn ObjectStore>,
    /// Bucket holding encrypted upload variants and generated files.
    pub chatfiles_bucket: String,
    /// Shared secret expected in `X-Internal-Service-Token`.
    pub internal_token: String,
    /// Refresh-token → identity map fed by the auth layer. Consulted by
    /// `/internal/validate-token` on behalf of the upload service.
    sessions: RwLock<HashMap<String, SessionIdentity>>,
}

impl GatewayState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connections: ConnectionManager,
        cache: Arc<CacheTier>,
        durable: Arc<dyn DurableStore>,
        vault: Arc<TransitVault>,
        skills: Arc<SkillRegistry>,
        fabric: Arc<SkillFabric>,
        queue: TaskQueue,
        events: UserEventBus,
        ledger: Arc<ChargeLedger>,
        archiver: Arc<UsageArchiver>,
        blob: Arc<dyn ObjectStore>,
        chatfiles_bucket: impl Into<String>,
        internal_token: impl Into<String>,
    ) -> Self {
        Self {
            connections,
            cache,
            durable,
            vault,
            skills,
            fabric,
            queue,
            events,
            ledger,
            archiver,
            blob,
            chatfiles_bucket: chatfiles_bucket.into(),
            internal_token: internal_token.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_session(&self, refresh_token: &str, identity: SessionIdentity) {
        self.sessions
            .write()
            .await
            .insert(refresh_token.to_string(), identity);
    }

    pub async fn validate_session(&self, refresh_token: &str) -> Option<SessionIdentity> {
        self.sessions.read().await.get(refresh_token).cloned()
    }
}
