use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::email::Mailer;

/// Process-wide resources, built once in `main` and cloned into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: PgPool,
    pub mailer: Mailer,
}

impl AppState {
    pub fn new(config: Config, db: PgPool, mailer: Mailer) -> Self {
        Self {
            config: Arc::new(config),
            db,
            mailer,
        }
    }
}
