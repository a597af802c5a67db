use std::sync::Arc;

use tracing::warn;

use crate::config::AppConfig;
use crate::users::{
    jwt::TokenIssuer,
    memory::InMemoryUserStore,
    repo::{PgUserStore, UserStore},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub tokens: TokenIssuer,
}

impl AppState {
    pub async fn init(config: &AppConfig) -> anyhow::Result<Self> {
        let store = match &config.database_url {
            Some(url) => Arc::new(PgUserStore::connect(url).await?) as Arc<dyn UserStore>,
            None => {
                warn!("DATABASE_URL not set; users are kept in memory only");
                Arc::new(InMemoryUserStore::new()) as Arc<dyn UserStore>
            }
        };

        Self::from_parts(store, config)
    }

    pub fn from_parts(store: Arc<dyn UserStore>, config: &AppConfig) -> anyhow::Result<Self> {
        let tokens = TokenIssuer::new(&config.jwt)?;
        Ok(Self { store, tokens })
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        let config = AppConfig {
            database_url: None,
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
            },
            bind_addr: ([127, 0, 0, 1], 0).into(),
        };
        let store = Arc::new(InMemoryUserStore::new()) as Arc<dyn UserStore>;
        Self::from_parts(store, &config).expect("fake state")
    }
}
