pub mod broadcast;
pub mod config;
pub mod consumer;
pub mod directory;
pub mod error;
pub mod frame;
pub mod registry;
pub mod session;
pub mod store;
pub mod types;

use std::sync::Arc;

use axum::{
    extract::FromRef,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sqlx::SqlitePool;

use crate::broadcast::BroadcastEngine;
use crate::config::Config;
use crate::directory::RoomDirectory;
use crate::registry::ConnectionRegistry;
use crate::store::MessageStore;

/// Process-wide state, constructed once at startup and handed explicitly to
/// every consumer. The registry and directory are the only singletons; they
/// live for the whole process and are torn down with it.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub directory: Arc<RoomDirectory>,
    pub store: Arc<MessageStore>,
    pub engine: Arc<BroadcastEngine>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let directory = Arc::new(RoomDirectory::new());
        let store = Arc::new(MessageStore::new(db_pool.clone(), config.max_body_len));
        let engine = Arc::new(BroadcastEngine::new(
            Arc::clone(&registry),
            Arc::clone(&directory),
            Arc::clone(&store),
        ));

        Self {
            db_pool,
            config: Arc::new(config),
            registry,
            directory,
            store,
            engine,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{}\n\n{}", self.0, self.0.backtrace()),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_renders_as_internal_server_error() {
        let err: AppError = anyhow::anyhow!("session backend down").into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn app_error_converts_from_collaborator_errors() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(err.0.to_string().contains("no rows returned"));
    }
}
