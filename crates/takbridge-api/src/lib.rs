//! Query surface for the takbridge producer role.
//!
//! Serves the events held in the [`CotStore`] over HTTP:
//!
//! - `GET /cots` every live event
//! - `GET /cots/{uid}` one event
//! - `GET /cots/{uid}/file` the base64 file-share artifact of an event
//! - `DELETE /cots/{uid}` returns `{"deleted": bool}`
//! - `GET /health` unauthenticated liveness probe
//!
//! Every `/cots` route requires a bearer JWT verified against the configured
//! JWKS unless the bridge runs in dev mode. Rejections are HTTP 401 with an
//! [`ErrorResponse`] whose `code` names the failure.
//!
//! # Example
//!
//! ```no_run
//! use takbridge_api::{serve, ApiState, Authenticator};
//! use takbridge_store::{CotStore, StoreOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = CotStore::open(StoreOptions::new("./db/producer", "./downloads"))?;
//!     let state = ApiState { store, auth: Authenticator::Disabled };
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:4000").await?;
//!     serve(listener, state, async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod error;
pub mod routes;

pub use auth::{
    Authenticator, CatalystClaims, HttpJwks, JwksVerifier, KeySource, VerificationKey,
    DEFAULT_REFETCH_COOLDOWN,
};
pub use error::{ApiError, ErrorResponse};
pub use routes::{create_router, ApiState, Caller};

use axum::Router;
use std::future::Future;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Router with request tracing and permissive CORS.
pub fn app(state: ApiState) -> Router {
    create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}

/// Serves the API on `listener` until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, state: ApiState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Query API listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Query API stopped");
    Ok(())
}
