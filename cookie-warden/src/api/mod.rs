//! Read-only HTTP view over archived content.
//!
//! - `GET /api/items/{id}`: every stored version of an item
//! - `GET /api/items/{id}/children`: ids of items replying to or reposting it
//! - `GET /api/files`: JSON files written by the directory archive
//! - `/archive/...`: the directory archive itself

pub mod error;
pub mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::database::SqlxContentRepository;
use crate::{Error, Result};

/// Shared state for the browse handlers.
#[derive(Clone)]
pub struct BrowseState {
    /// Present when items are archived in the database.
    pub content: Option<Arc<SqlxContentRepository>>,
    /// Root of the directory archive.
    pub archive_dir: PathBuf,
}

pub fn router(state: BrowseState) -> Router {
    let files = ServeDir::new(&state.archive_dir);
    Router::new()
        .nest("/api", routes::router())
        .nest_service("/archive", files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `cancel` fires.
pub async fn serve(listen: &str, state: BrowseState, cancel: CancellationToken) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| Error::config(format!("invalid browse.listen '{listen}': {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    info!("Archive browser listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!("Archive browser shutting down");
        })
        .await?;
    Ok(())
}
