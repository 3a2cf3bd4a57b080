//! Record-to-CoT transforms for the takbridge CoT/GraphQL bridge.
//!
//! GraphQL responses arrive as `{"data": {...}}`. Each configured rule names a
//! key under `data` and describes, by field path, how every record under that
//! key becomes a CoT event ([`records_to_events`]) or a GeoChat message
//! ([`ChatPipeline`]).
//!
//! ```
//! use serde_json::json;
//! use takbridge_core::{CotTransform, ParserRule, RuleSet};
//! use takbridge_transform::records_to_events;
//!
//! let mut rules = RuleSet::new();
//! let mut transform = CotTransform::new("lat", "lon");
//! transform.uid = Some("id".to_string());
//! rules.insert("planes".to_string(), ParserRule::new(transform));
//!
//! let payload = json!({"data": {"planes": [{"id": "N123", "lat": 10, "lon": 20}]}});
//! let events = records_to_events(&payload, &rules, std::time::Duration::from_secs(10));
//!
//! assert_eq!(events.len(), 1);
//! assert_eq!(events[0].event.uid, "N123");
//! ```

pub mod chat;
pub mod path;
pub mod pipeline;

pub use chat::{render_template, ChatMessage, ChatPipeline};
pub use path::{resolve, resolve_string};
pub use pipeline::{
    extract, fill_defaults, overwrite, records_to_events, CotFields, CotValues, TransformedEvent,
};
