use std::sync::Arc;

use tracing::info;

use gasflow_infra::{AppConfig, InMemoryStore, PostgresStore, StoreError, TransferService, TransferStore};

/// Services shared by every handler.
#[derive(Debug, Clone)]
pub struct AppServices {
    pub transfers: TransferService,
}

impl AppServices {
    pub fn new(transfers: TransferService) -> Self {
        Self { transfers }
    }
}

/// Wire the transfer service to Postgres when `DATABASE_URL` is configured,
/// otherwise to a process-local in-memory store.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, StoreError> {
    let store: Arc<dyn TransferStore> = match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresStore::connect(url, config.db_max_connections).await?;
            store.migrate().await?;
            info!(max_connections = config.db_max_connections, "using postgres store");
            Arc::new(store)
        }
        None => {
            info!("DATABASE_URL not set; using in-memory store");
            InMemoryStore::arc()
        }
    };

    Ok(AppServices::new(TransferService::new(store, config.engine.clone())))
}
