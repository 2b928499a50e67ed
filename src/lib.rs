use std::sync::Arc;

use config::Config;
use sqlx::PgPool;

use cache::UserResolver;

pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod utils;

pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub resolver: Arc<UserResolver>,
}
