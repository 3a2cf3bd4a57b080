//! Declarative rule types shared by the configuration and the transform
//! pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named parser rules, keyed by the top-level field of the GraphQL `data`
/// object they apply to.
pub type RuleSet = BTreeMap<String, ParserRule>;

/// Named chat rules, keyed by the top-level field of the GraphQL `data`
/// object they apply to.
pub type ChatRuleSet = BTreeMap<String, ChatRule>;

/// Dotted field paths into a source record, one per CoT field.
///
/// `lat` and `lon` are required; every other field falls back to a default
/// when its path is absent or does not resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CotTransform {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default, rename = "type")]
    pub cot_type: Option<String>,
    pub lat: String,
    pub lon: String,
    #[serde(default)]
    pub hae: Option<String>,
    #[serde(default)]
    pub how: Option<String>,
    #[serde(default)]
    pub callsign: Option<String>,
    #[serde(default)]
    pub remarks: Option<String>,
}

impl CotTransform {
    /// Creates a transform with only the required coordinate paths.
    pub fn new(lat: impl Into<String>, lon: impl Into<String>) -> Self {
        Self {
            lat: lat.into(),
            lon: lon.into(),
            ..Default::default()
        }
    }
}

/// Literal values written over extracted fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CotOverwrite {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default, rename = "type")]
    pub cot_type: Option<String>,
    #[serde(default)]
    pub lat: Option<String>,
    #[serde(default)]
    pub lon: Option<String>,
    #[serde(default)]
    pub hae: Option<String>,
    #[serde(default)]
    pub how: Option<String>,
    #[serde(default)]
    pub callsign: Option<String>,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// One parser rule: extraction paths plus optional literal overwrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserRule {
    pub transform: CotTransform,

    #[serde(default)]
    pub overwrite: Option<CotOverwrite>,

    /// Publish each event as its own TAK contact instead of on the primary
    /// connection.
    #[serde(default)]
    pub contact: bool,
}

impl ParserRule {
    pub fn new(transform: CotTransform) -> Self {
        Self {
            transform,
            overwrite: None,
            contact: false,
        }
    }

    pub fn with_overwrite(mut self, overwrite: CotOverwrite) -> Self {
        self.overwrite = Some(overwrite);
        self
    }
}

/// One chat rule: how to build a GeoChat message from a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRule {
    /// Chatroom the message is addressed to
    #[serde(default = "default_recipient")]
    pub recipient: String,

    /// Path to the value that identifies the message for dedup
    pub message_id: String,

    /// Template variable name to record path
    #[serde(default)]
    pub message_vars: BTreeMap<String, String>,

    /// Message text with `{name}` placeholders
    pub message_template: String,

    /// Optional path to a contact callsign; when it resolves, the message is
    /// sent from that contact's connection
    #[serde(default)]
    pub contact: Option<String>,
}

pub const DEFAULT_CHAT_RECIPIENT: &str = "All Chat Rooms";

fn default_recipient() -> String {
    DEFAULT_CHAT_RECIPIENT.to_string()
}
