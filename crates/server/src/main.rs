//! veil-server: builds the process graph leaves-first and serves the
//! gateway and upload apps. Configuration is env-only.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    async_trait::async_trait,
    tracing::{info, warn},
    tracing_subscriber::EnvFilter,
};

use veil_billing::{ChargeLedger, ChargeRequest, UsageArchiver};
use veil_blob::{FsObjectStore, ObjectStore};
use veil_common::now_unix_secs;
use veil_config::Config;
use veil_gateway::{ConnectionManager, GatewayState, fanout};
use veil_providers::ProviderRegistry;
use veil_routing::{LeaderboardSnapshot, ModelSelector};
use veil_skills::{CancelProbe, ChargeHook, HttpSkillHandler, SkillFabric, SkillRegistry};
use veil_store::{CacheTier, DurableStore, SqliteStore};
use veil_tasks::{AskRunner, RunnerDeps, TaskQueue, UserEventBus, queue::QUEUE_APP_AI};
use veil_upload::{ClamdScanner, HttpCoreApi, NoopDetector, UploadService};
use veil_vault::TransitVault;

/// Adapts the cache tier's per-skill cancel flags to the fabric.
struct CacheCancelProbe {
    cache: Arc<CacheTier>,
}

#[async_trait]
impl CancelProbe for CacheCancelProbe {
    async fn is_cancelled(&self, skill_task_id: &str) -> bool {
        self.cache.is_skill_cancelled(skill_task_id).await
    }
}

/// Routes the fabric's billing hook into the ledger.
struct LedgerChargeHook {
    ledger: Arc<ChargeLedger>,
}

#[async_trait]
impl ChargeHook for LedgerChargeHook {
    async fn charge(&self, user_id: &str, app_id: &str, skill_id: &str, credits: i64) {
        let request = ChargeRequest {
            user_id_hash: veil_common::sha256_hex(user_id),
            app_id: app_id.to_string(),
            skill_id: skill_id.to_string(),
            credits,
            idempotency_key: Some(format!(
                "{}{}{}{}",
                user_id,
                app_id,
                skill_id,
                uuid::Uuid::new_v4()
            )),
            chat_id: None,
            message_id: None,
        };
        if let Err(e) = self.ledger.charge(&request).await {
            warn!(app_id, skill_id, error = %e, "skill charge failed");
        }
    }
}

fn load_skill_registry(production: bool) -> SkillRegistry {
    let mut registry = SkillRegistry::new(production);
    let apps_dir = std::env::var("APPS_DIR").unwrap_or_else(|_| "apps".into());
    let Ok(entries) = std::fs::read_dir(&apps_dir) else {
        info!(apps_dir, "no apps directory, starting without skills");
        return registry;
    };
    for entry in entries.flatten() {
        let manifest_path = entry.path().join("app.yml");
        if !manifest_path.is_file() {
            continue;
        }
        match std::fs::read_to_string(&manifest_path) {
            Ok(yaml) => {
                if let Err(e) = registry.register_app_yaml(&yaml) {
                    warn!(path = %manifest_path.display(), error = %e, "skipping bad app manifest");
                }
            },
            Err(e) => warn!(path = %manifest_path.display(), error = %e, "unreadable app manifest"),
        }
    }
    registry
}

fn load_leaderboard() -> LeaderboardSnapshot {
    let Ok(path) = std::env::var("LEADERBOARD_PATH") else {
        return LeaderboardSnapshot::default();
    };
    match std::fs::read_to_string(&path)
        .map_err(anyhow::Error::from)
        .and_then(|raw| serde_json::from_str(&raw).map_err(Into::into))
    {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(path, error = %e, "failed to load leaderboard snapshot, using empty");
            LeaderboardSnapshot::default()
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().context("loading configuration")?;
    info!(environment = ?config.environment, "starting veil");

    // Leaves first: stores, vault, blob.
    let cache = Arc::new(CacheTier::new());
    let durable: Arc<dyn DurableStore> = Arc::new(
        SqliteStore::new(&config.database_url)
            .await
            .context("opening durable store")?,
    );
    let vault = Arc::new(TransitVault::new());
    let blob_dir = std::env::var("BLOB_DIR").unwrap_or_else(|_| "blob-data".into());
    let blob: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&blob_dir));

    // Billing.
    let ledger = Arc::new(ChargeLedger::new(config.payments_enabled));
    let archiver = Arc::new(UsageArchiver::new(
        Arc::clone(&durable),
        Arc::clone(&blob),
        Arc::clone(&vault),
        config.usage_archives_bucket(),
    ));

    // Skills.
    let skills = Arc::new(load_skill_registry(config.environment.is_production()));
    let mut fabric = SkillFabric::new(
        Arc::clone(&skills),
        Arc::new(CacheCancelProbe {
            cache: Arc::clone(&cache),
        }),
    )
    .with_charge_hook(Arc::new(LedgerChargeHook {
        ledger: Arc::clone(&ledger),
    }));
    for key in skills.keys() {
        if let Ok((_, spec)) = skills.get(&key)
            && let Some(endpoint) = spec
                .api_config
                .as_ref()
                .and_then(|c| c["endpoint"].as_str())
        {
            fabric.register_handler(key.clone(), Arc::new(HttpSkillHandler::new(endpoint)));
        }
    }
    let fabric = Arc::new(fabric);

    // Providers & routing.
    let mut providers = ProviderRegistry::new();
    providers.register_from_env(&["anthropic", "openai", "mistral", "google"]);
    let providers = Arc::new(providers);
    let selector = Arc::new(ModelSelector::new(load_leaderboard()));

    // Task plumbing.
    let (events, events_receiver) = UserEventBus::channel();
    let queue = TaskQueue::new();
    let ask_receiver = queue.create(QUEUE_APP_AI).await;
    let runner = Arc::new(AskRunner::new(RunnerDeps {
        cache: Arc::clone(&cache),
        durable: Arc::clone(&durable),
        vault: Arc::clone(&vault),
        providers: Arc::clone(&providers),
        selector,
        skills: Arc::clone(&skills),
        fabric: Arc::clone(&fabric),
        ledger: Arc::clone(&ledger),
        events: events.clone(),
        queue: queue.clone(),
    }));
    AskRunner::spawn_worker(runner, ask_receiver);

    // Gateway.
    let connections = ConnectionManager::new();
    fanout::spawn_fanout(connections.clone(), events_receiver);
    let state = Arc::new(GatewayState::new(
        connections,
        Arc::clone(&cache),
        Arc::clone(&durable),
        Arc::clone(&vault),
        Arc::clone(&skills),
        Arc::clone(&fabric),
        queue.clone(),
        events,
        Arc::clone(&ledger),
        Arc::clone(&archiver),
        Arc::clone(&blob),
        config.chatfiles_bucket(),
        config.internal_api_shared_token.clone(),
    ));

    // Upload service peer: only the internal API and its own stores.
    let upload = Arc::new(UploadService::new(
        Arc::new(HttpCoreApi::new(
            config.core_internal_url.clone(),
            config.internal_api_shared_token.clone(),
        )),
        Arc::new(ClamdScanner::new(config.malware_scanner_addr.clone())),
        Arc::new(NoopDetector),
        Arc::clone(&blob),
        config.chatfiles_bucket(),
    ));

    // Daily archival sweep; months with nothing to move are no-ops.
    {
        let archiver = Arc::clone(&archiver);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
            loop {
                interval.tick().await;
                match archiver.run_monthly(now_unix_secs() as i64).await {
                    Ok(archived) if archived > 0 => info!(archived, "usage archival sweep done"),
                    Ok(_) => {},
                    Err(e) => warn!(error = %e, "usage archival sweep failed"),
                }
            }
        });
    }

    let gateway_bind = config.gateway_bind.clone();
    let upload_bind = config.upload_bind.clone();
    tokio::try_join!(
        veil_gateway::server::serve(state, &gateway_bind),
        veil_upload::routes::serve(upload, &upload_bind),
    )
    .context("server terminated")?;

    Ok(())
}
