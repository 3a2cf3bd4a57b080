//! XML serialization for CoT messages

use crate::event::{Element, Event, Node};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::escape;

/// Serialize an Event to an XML string without the XML declaration
pub fn serialize_event(event: &Event) -> String {
    let mut xml = String::with_capacity(512);

    xml.push_str("<event");
    push_attr(&mut xml, "version", &event.version);
    push_attr(&mut xml, "uid", &event.uid);
    push_attr(&mut xml, "type", &event.event_type);
    push_attr(&mut xml, "time", &timestamp(&event.time));
    push_attr(&mut xml, "start", &timestamp(&event.start));
    push_attr(&mut xml, "stale", &timestamp(&event.stale));
    push_attr(&mut xml, "how", &event.how);
    xml.push('>');

    xml.push_str("<point");
    push_attr(&mut xml, "lat", &event.point.lat.to_string());
    push_attr(&mut xml, "lon", &event.point.lon.to_string());
    push_attr(&mut xml, "hae", &event.point.hae.to_string());
    push_attr(&mut xml, "ce", &event.point.ce.to_string());
    push_attr(&mut xml, "le", &event.point.le.to_string());
    xml.push_str("/>");

    if !event.detail.is_empty() {
        xml.push_str("<detail>");
        for item in &event.detail.items {
            serialize_element(&mut xml, &item.to_element());
        }
        xml.push_str("</detail>");
    }

    xml.push_str("</event>");
    xml
}

/// Serialize a generic element and its subtree
pub fn serialize_element(xml: &mut String, element: &Element) {
    xml.push('<');
    xml.push_str(&element.name);
    for (key, value) in &element.attributes {
        push_attr(xml, key, value);
    }

    if element.children.is_empty() {
        xml.push_str("/>");
        return;
    }

    xml.push('>');
    for child in &element.children {
        match child {
            Node::Element(e) => serialize_element(xml, e),
            Node::Text(t) => xml.push_str(&escape(t.as_str())),
        }
    }
    xml.push_str("</");
    xml.push_str(&element.name);
    xml.push('>');
}

fn push_attr(xml: &mut String, key: &str, value: &str) {
    xml.push(' ');
    xml.push_str(key);
    xml.push_str("=\"");
    xml.push_str(&escape(value));
    xml.push('"');
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
