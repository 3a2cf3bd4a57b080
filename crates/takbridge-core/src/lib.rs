//! # takbridge Core
//!
//! Error taxonomy, configuration, and shared rule types for the takbridge
//! CoT/GraphQL bridge.
//!
//! - **Errors**: one `thiserror` enum per failure family (connection, transform,
//!   store, auth, file transfer, configuration) plus the [`BridgeError`] umbrella.
//! - **Configuration**: [`AppConfig`] loaded through the `config` crate from a
//!   TOML (or YAML) file with `TAKBRIDGE__*` environment overrides.
//! - **Types**: the declarative transform and chat rules consumed by the
//!   transform pipeline.
//!
//! ## Example
//!
//! ```
//! use takbridge_core::config::AppConfig;
//!
//! let config = AppConfig::from_toml_str(r#"
//!     [tak]
//!     endpoint = "ssl://tak.example.com:8089"
//!     key_file = "certs/client.key"
//!     cert_file = "certs/client.pem"
//!
//!     [consumer]
//!     catalyst_token = "token"
//! "#).unwrap();
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.tak.endpoint_addr().unwrap().1, 8089);
//! ```

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{
    AuthError, BridgeError, ConfigError, ConnectionError, FileTransferError, Result, StoreError,
    TransformError,
};
pub use types::{ChatRule, ChatRuleSet, CotOverwrite, CotTransform, ParserRule, RuleSet};
