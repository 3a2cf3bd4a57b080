//! Record extraction and CoT event building.
//!
//! Each record goes through extract, overwrite and fill-defaults before it
//! becomes an event. A record whose `lat` or `lon` does not resolve is
//! skipped; every other field has a fallback.

use crate::path::resolve_string;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use takbridge_core::{CotOverwrite, CotTransform, RuleSet, TransformError};
use takbridge_cot::event::{Contact, Remarks, UNKNOWN_VALUE};
use takbridge_cot::{DetailItem, Event, Point};
use tracing::{debug, error, warn};

pub const DEFAULT_TYPE: &str = "a-f-G";
pub const DEFAULT_HOW: &str = "h-g-i-g-o";
pub const DEFAULT_HAE: &str = "999999.0";

/// Field values pulled from one record, before defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CotValues {
    pub uid: Option<String>,
    pub cot_type: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub hae: Option<String>,
    pub how: Option<String>,
    pub callsign: Option<String>,
    pub remarks: Option<String>,
}

/// Field values with every fallback applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CotFields {
    pub uid: String,
    pub cot_type: String,
    pub lat: String,
    pub lon: String,
    pub hae: String,
    pub how: String,
    pub callsign: String,
    pub remarks: String,
}

/// An event built from a record, tagged with the rule that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedEvent {
    pub rule: String,
    /// Publish through the contact book rather than the primary connection
    pub contact: bool,
    pub event: Event,
}

/// Resolves each configured path against `record`.
pub fn extract(record: &Value, transform: &CotTransform) -> Result<CotValues, TransformError> {
    let optional = |path: &Option<String>| path.as_deref().and_then(|p| resolve_string(record, p));

    let lat = resolve_string(record, &transform.lat).ok_or_else(|| TransformError::missing_field("lat"))?;
    let lon = resolve_string(record, &transform.lon).ok_or_else(|| TransformError::missing_field("lon"))?;

    Ok(CotValues {
        uid: optional(&transform.uid),
        cot_type: optional(&transform.cot_type),
        lat: Some(lat),
        lon: Some(lon),
        hae: optional(&transform.hae),
        how: optional(&transform.how),
        callsign: optional(&transform.callsign),
        remarks: optional(&transform.remarks),
    })
}

/// Replaces every field the overwrite rule sets.
pub fn overwrite(mut values: CotValues, rule: &CotOverwrite) -> CotValues {
    let apply = |field: &mut Option<String>, literal: &Option<String>| {
        if let Some(literal) = literal.as_ref().filter(|l| !l.is_empty()) {
            *field = Some(literal.clone());
        }
    };

    apply(&mut values.uid, &rule.uid);
    apply(&mut values.cot_type, &rule.cot_type);
    apply(&mut values.lat, &rule.lat);
    apply(&mut values.lon, &rule.lon);
    apply(&mut values.hae, &rule.hae);
    apply(&mut values.how, &rule.how);
    apply(&mut values.callsign, &rule.callsign);
    apply(&mut values.remarks, &rule.remarks);
    values
}

/// Supplies the fallback for every field still unset. `lat` and `lon` have
/// none.
pub fn fill_defaults(values: CotValues) -> Result<CotFields, TransformError> {
    Ok(CotFields {
        uid: values.uid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        cot_type: values.cot_type.unwrap_or_else(|| DEFAULT_TYPE.to_string()),
        lat: values.lat.ok_or_else(|| TransformError::missing_field("lat"))?,
        lon: values.lon.ok_or_else(|| TransformError::missing_field("lon"))?,
        hae: values.hae.unwrap_or_else(|| DEFAULT_HAE.to_string()),
        how: values.how.unwrap_or_else(|| DEFAULT_HOW.to_string()),
        callsign: values.callsign.unwrap_or_default(),
        remarks: values.remarks.unwrap_or_default(),
    })
}

impl CotFields {
    /// Builds the event, stale `stale_after` from now.
    pub fn to_event(&self, stale_after: Duration) -> Result<Event, TransformError> {
        let lat = parse_number("lat", &self.lat)?;
        let lon = parse_number("lon", &self.lon)?;
        let hae = parse_number("hae", &self.hae)?;

        let stale = Utc::now()
            + chrono::Duration::from_std(stale_after).map_err(|e| TransformError::InvalidPayload {
                reason: e.to_string(),
            })?;
        let point = Point {
            lat,
            lon,
            hae,
            ce: UNKNOWN_VALUE,
            le: UNKNOWN_VALUE,
        };

        let mut event = Event::new(&self.uid, &self.cot_type, &self.how, point, stale);
        if !self.callsign.is_empty() {
            event = event.with_detail(DetailItem::Contact(Contact {
                callsign: self.callsign.clone(),
                endpoint: None,
            }));
        }
        if !self.remarks.is_empty() {
            event = event.with_detail(DetailItem::Remarks(Remarks::new(&self.remarks)));
        }
        Ok(event)
    }
}

fn parse_number(field: &str, value: &str) -> Result<f64, TransformError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| TransformError::invalid_number(field, value))
}

/// Records under `data.{name}` for one rule; a single object counts as one
/// record.
pub(crate) fn records<'a>(data: &'a Value, name: &str) -> Option<Vec<&'a Value>> {
    match data.get(name) {
        None => {
            let available: Vec<&str> = data
                .as_object()
                .map(|m| m.keys().map(String::as_str).collect())
                .unwrap_or_default();
            warn!(key = %name, ?available, "Key not found in data");
            None
        }
        Some(Value::Null) => {
            warn!(key = %name, "Key exists but has no value");
            None
        }
        Some(Value::Array(items)) => Some(items.iter().collect()),
        Some(single) => Some(vec![single]),
    }
}

/// The `data` object of a GraphQL response.
pub(crate) fn data_object(json: &Value) -> Option<&Value> {
    match json.get("data") {
        Some(data @ Value::Object(_)) => Some(data),
        Some(other) => {
            error!(data = %other, "Expected 'data' to be an object");
            None
        }
        None => {
            warn!("Response has no 'data'");
            None
        }
    }
}

/// Converts every record matched by `rules` into an event.
///
/// Records that fail to transform are logged and skipped.
pub fn records_to_events(json: &Value, rules: &RuleSet, stale_after: Duration) -> Vec<TransformedEvent> {
    let Some(data) = data_object(json) else {
        return Vec::new();
    };

    let mut events = Vec::new();
    for (name, rule) in rules {
        let Some(records) = records(data, name) else {
            continue;
        };

        for record in records {
            let built = extract(record, &rule.transform)
                .map(|values| match &rule.overwrite {
                    Some(rule) => overwrite(values, rule),
                    None => values,
                })
                .and_then(fill_defaults)
                .and_then(|fields| fields.to_event(stale_after));

            match built {
                Ok(event) => {
                    debug!(rule = %name, uid = %event.uid, "Record transformed");
                    events.push(TransformedEvent {
                        rule: name.clone(),
                        contact: rule.contact,
                        event,
                    });
                }
                Err(e) => error!(rule = %name, error = %e, "Error extracting values, skipping record"),
            }
        }
    }
    events
}
