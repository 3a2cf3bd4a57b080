//! Contact multiplexer for the takbridge CoT/GraphQL bridge.
//!
//! Every externally tracked entity that should show up as its own TAK
//! participant gets a dedicated [`TakConnection`](takbridge_client::TakConnection),
//! held in a [`ContactBook`] keyed by callsign. Connections are created once
//! per callsign even under concurrent requests and retired when the contact
//! goes stale.

pub mod contacts;

pub use contacts::{
    Contact, ContactBook, ContactConnectionFactory, TlsContactFactory, DEFAULT_SWEEP_INTERVAL,
};
