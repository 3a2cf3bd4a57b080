//! GeoChat messages from JSON records.

use crate::path::resolve_string;
use crate::pipeline::{data_object, records};
use serde_json::Value;
use std::collections::BTreeMap;
use takbridge_core::{ChatRule, ChatRuleSet, TransformError};
use takbridge_cot::{chat_event, ChatSpec, Event};
use takbridge_store::DedupLedger;
use tracing::{debug, error};

/// A rendered chat, with the contact callsign to send it as (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub rule: String,
    pub contact: Option<String>,
    pub event: Event,
}

/// Replaces every `{key}` in `template` with its value.
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> String {
    vars.iter().fold(template.to_string(), |message, (key, value)| {
        message.replace(&format!("{{{key}}}"), value)
    })
}

/// Builds chat events, suppressing any message whose text has not changed
/// since it was last sent under the same message id.
#[derive(Clone)]
pub struct ChatPipeline {
    ledger: DedupLedger,
    sender: String,
    lat: f64,
    lon: f64,
}

impl ChatPipeline {
    /// `sender` is the bridge callsign; `lat`/`lon` place every chat event.
    pub fn new(ledger: DedupLedger, sender: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            ledger,
            sender: sender.into(),
            lat,
            lon,
        }
    }

    pub async fn records_to_chat(&self, json: &Value, rules: &ChatRuleSet) -> Vec<ChatMessage> {
        let Some(data) = data_object(json) else {
            return Vec::new();
        };

        let mut messages = Vec::new();
        for (name, rule) in rules {
            let Some(records) = records(data, name) else {
                continue;
            };

            for record in records {
                match self.record_to_chat(name, rule, record).await {
                    Ok(Some(message)) => messages.push(message),
                    Ok(None) => {}
                    Err(e) => error!(rule = %name, error = %e, "Skipping chat record"),
                }
            }
        }
        messages
    }

    async fn record_to_chat(
        &self,
        name: &str,
        rule: &ChatRule,
        record: &Value,
    ) -> Result<Option<ChatMessage>, TransformError> {
        let message_id =
            resolve_string(record, &rule.message_id).ok_or_else(|| TransformError::missing_field("message_id"))?;

        let mut vars = BTreeMap::new();
        for (key, path) in &rule.message_vars {
            match resolve_string(record, path) {
                Some(value) => {
                    vars.insert(key.clone(), value);
                }
                None => error!(rule = %name, var = %key, path = %path, "Value not found for message variable"),
            }
        }
        let message = render_template(&rule.message_template, &vars);

        match self.ledger.record_if_changed(&message_id, &message).await {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => {
                error!(message_id = %message_id, error = %e, "Dedup ledger unavailable, not sending");
                return Ok(None);
            }
        }

        let contact = rule.contact.as_deref().and_then(|path| resolve_string(record, path));
        let sender = contact.clone().unwrap_or_else(|| self.sender.clone());

        debug!(rule = %name, message_id = %message_id, sender = %sender, "Chat rendered");
        let event = chat_event(&ChatSpec {
            sender,
            recipient: rule.recipient.clone(),
            message_id,
            message,
            lat: self.lat,
            lon: self.lon,
        });

        Ok(Some(ChatMessage {
            rule: name.to_string(),
            contact,
            event,
        }))
    }
}
