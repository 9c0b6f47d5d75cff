use crate::auth::jwt::TokenKeys;
use crate::config::{AppConfig, StoreBackend};
use crate::events::EventLog;
use crate::store::{MemoryStore, PgStore, Store};
use anyhow::Context;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub tokens: Arc<TokenKeys>,
    pub events: EventLog,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store = match config.store_backend {
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL must be set when STORE_BACKEND=postgres")?;
                Arc::new(PgStore::connect(url, config.database_max_connections).await?) as Arc<dyn Store>
            }
            StoreBackend::Memory => {
                tracing::warn!("using in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new()) as Arc<dyn Store>
            }
        };

        Ok(Self::from_parts(store, config))
    }

    pub fn from_parts(store: Arc<dyn Store>, config: Arc<AppConfig>) -> Self {
        Self {
            tokens: Arc::new(TokenKeys::new(&config.jwt)),
            events: EventLog::new(config.event_log_path.clone()),
            store,
            config,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        let events_dir = std::env::temp_dir().join(format!("vrdash-test-{}", uuid::Uuid::new_v4()));
        let config = Arc::new(AppConfig {
            app_host: "127.0.0.1".into(),
            app_port: 0,
            store_backend: StoreBackend::Memory,
            database_url: None,
            database_max_connections: 1,
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                handshake_ttl_secs: 60,
                session_ttl_secs: 86_400,
                remember_me_ttl_secs: 2_592_000,
            },
            production: false,
            event_log_path: events_dir.join("app.log"),
            admin_setup_token: Some("setup-secret".into()),
            admin_assets_dir: None,
        });
        Self::from_parts(Arc::new(MemoryStore::new()), config)
    }
}
