//! JSON-over-HTTP front end for the speaker classifiers.
//!
//! [`ClassifierService`] holds the store, the model registry and the trainer
//! and implements every operation; [`routes::router`] maps the fixed HTTP
//! routes onto it. Errors are returned as `{"detail": "..."}` bodies.

pub mod config;
mod error;
pub mod routes;
mod service;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;

pub use config::{parse_addr, ServerConfig, StoreKind, WriteThrough};
pub use error::ApiError;
pub use routes::router;
pub use service::{Accuracies, ClassifierService, RetrainPolicy};

/// Serves the routes on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, service: Arc<ClassifierService>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("server stopped");
    Ok(())
}
