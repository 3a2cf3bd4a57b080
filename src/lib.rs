//! takbridge: a two-way bridge between a TAK server and the Catalyst GraphQL
//! platform.
//!
//! The producer role stores every CoT event received from TAK and serves it
//! over the query API. The consumer role polls Catalyst, turns the response
//! into CoT events and chat messages and publishes them, either on the
//! primary connection or on per-contact connections.

pub mod bridge;
pub mod consumer;
pub mod handlers;
pub mod heartbeat;
pub mod logging;

pub use bridge::Bridge;
pub use consumer::{empty_response, spawn_consumer, Batch, Consumer, GraphqlClient, Publisher};
pub use heartbeat::{bridge_heartbeat, HeartbeatHandler};
pub use logging::init_tracing;
