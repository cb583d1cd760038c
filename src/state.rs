use std::time::Duration;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db;
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db_pool: Option<PgPool>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = db::build_pool(&config);
        if db_pool.is_none() {
            tracing::warn!("No DATABASE_URL configured — index linkage will be unavailable");
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            config,
            db_pool,
            http_client,
        })
    }

    pub fn db_pool(&self) -> AppResult<&PgPool> {
        self.db_pool.as_ref().ok_or_else(|| {
            AppError::ServiceUnavailable("Database is not configured.".to_string())
        })
    }
}
