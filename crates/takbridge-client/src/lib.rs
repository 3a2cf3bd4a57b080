//! # takbridge-client
//!
//! Managed TLS sessions to a TAK server.
//!
//! - **Transport**: TCP + rustls with a PEM client certificate, behind the
//!   [`TakConnector`] seam so tests can run over in-memory streams
//! - **Framing**: inbound frames split on `</event>`, outbound events written
//!   one per line ([`CotCodec`])
//! - **Lifecycle**: reconnect with exponential backoff, keep-alive pings,
//!   read timeout, named repeating timers, and an idempotent `stop()`
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use takbridge_client::{TakConnection, TakConnectionConfig, TakHandler};
//! use takbridge_cot::Event;
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl TakHandler for Printer {
//!     async fn on_cot(&self, event: Event) {
//!         println!("{} {}", event.uid, event.event_type);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TakConnectionConfig::local("takbridge");
//!     let connection = TakConnection::tls(config)?;
//!     let _subscription = connection.subscribe(Arc::new(Printer));
//!     connection.connect().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     connection.stop();
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod codec;
pub mod connection;
pub mod state;
pub mod tls;

pub use backoff::{calculate_backoff, ExponentialBackoff};
pub use codec::CotCodec;
pub use connection::{SessionWriter, Subscription, TakConnection, TakHandler};
pub use state::{ConnectionMetrics, ConnectionState, ConnectionStatus, MetricsSnapshot};
pub use tls::{BoxedStream, SessionStream, TakConnectionConfig, TakConnector, TlsTakConnector};
