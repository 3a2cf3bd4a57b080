//! CoT (Cursor on Target) model, parser and serializer for the takbridge
//! CoT/GraphQL bridge.
//!
//! The detail section is a tagged union over the elements the bridge reads
//! and writes (`contact`, `__group`, `takv`, `link`, `__chat`, `fileshare`,
//! `remarks`, `__video`). Anything else is kept as an opaque element tree and
//! written back out unchanged.
//!
//! # Example
//!
//! ```rust
//! use takbridge_cot::{parse_cot, serialize_event};
//!
//! let cot_xml = r#"<event version="2.0" uid="test-1" type="a-f-G"
//!        time="2024-01-15T10:30:00Z"
//!        start="2024-01-15T10:30:00Z"
//!        stale="2024-01-15T10:35:00Z" how="h-e">
//!     <point lat="37.7749" lon="-122.4194" hae="100.0" ce="10.0" le="5.0"/>
//!     <detail><contact callsign="Alpha-1"/></detail>
//! </event>"#;
//!
//! let event = parse_cot(cot_xml).expect("Failed to parse CoT");
//! assert_eq!(event.callsign(), Some("Alpha-1"));
//!
//! let xml = serialize_event(&event);
//! assert_eq!(parse_cot(&xml).unwrap(), event);
//! ```

pub mod builders;
pub mod event;
pub mod parser;
pub mod serializer;

pub use builders::{chat_event, heartbeat_event, ping_event, ChatSpec, HeartbeatSpec, VideoFeed};
pub use event::{Detail, DetailItem, Element, Event, FileShare, Node, Point};
pub use parser::{parse_cot, parse_cot_bytes, ParseError};
pub use serializer::serialize_event;
