//! XML parser for CoT messages

use crate::event::{Detail, DetailItem, Element, Event, Node, Point};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid datetime format: {0}")]
    InvalidDateTime(String),

    #[error("Invalid number format: {0}")]
    InvalidNumber(String),

    #[error("Invalid event structure: {0}")]
    InvalidStructure(String),
}

/// Parse a CoT message from an XML string
pub fn parse_cot(xml: &str) -> Result<Event, ParseError> {
    parse_cot_bytes(xml.as_bytes())
}

/// Parse a CoT message from XML bytes
pub fn parse_cot_bytes(xml: &[u8]) -> Result<Event, ParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut header: Option<Element> = None;
    let mut point = None;
    let mut detail = Detail::default();

    loop {
        match reader.read_event()? {
            XmlEvent::Start(e) | XmlEvent::Empty(e) => match e.name().as_ref() {
                b"event" => header = Some(attributes_of(&e)?),
                b"point" => point = Some(parse_point(&attributes_of(&e)?)?),
                b"detail" => {
                    if header.is_none() {
                        return Err(ParseError::InvalidStructure(
                            "detail outside of event".into(),
                        ));
                    }
                    detail = parse_detail(&mut reader, &e)?;
                }
                _ => {}
            },
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    let header = header.ok_or_else(|| ParseError::InvalidStructure("no event element".into()))?;
    let required = |name: &str| {
        header
            .attr(name)
            .map(str::to_string)
            .ok_or_else(|| ParseError::MissingField(name.to_string()))
    };

    Ok(Event {
        version: header.attr("version").unwrap_or("2.0").to_string(),
        uid: required("uid")?,
        event_type: required("type")?,
        time: parse_datetime(&required("time")?)?,
        start: parse_datetime(&required("start")?)?,
        stale: parse_datetime(&required("stale")?)?,
        how: required("how")?,
        point: point.ok_or_else(|| ParseError::MissingField("point".into()))?,
        detail,
    })
}

fn parse_point(attrs: &Element) -> Result<Point, ParseError> {
    let number = |name: &str, default: Option<f64>| match attrs.attr(name) {
        Some(value) => parse_f64(value),
        None => default.ok_or_else(|| ParseError::MissingField(name.to_string())),
    };

    Ok(Point {
        lat: number("lat", None)?,
        lon: number("lon", None)?,
        hae: number("hae", Some(crate::event::UNKNOWN_VALUE))?,
        ce: number("ce", Some(crate::event::UNKNOWN_VALUE))?,
        le: number("le", Some(crate::event::UNKNOWN_VALUE))?,
    })
}

/// Reads the children of an open `<detail>` and classifies each one.
fn parse_detail(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Detail, ParseError> {
    let detail = read_element(reader, start, false)?;
    let items = detail
        .children
        .into_iter()
        .filter_map(|node| match node {
            Node::Element(e) => Some(DetailItem::from_element(e)),
            Node::Text(_) => None,
        })
        .collect();
    Ok(Detail { items })
}

fn read_element(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
    empty: bool,
) -> Result<Element, ParseError> {
    let mut element = attributes_of(start)?;
    if empty {
        return Ok(element);
    }

    loop {
        match reader.read_event()? {
            XmlEvent::Start(e) => {
                let child = read_element(reader, &e, false)?;
                element.children.push(Node::Element(child));
            }
            XmlEvent::Empty(e) => {
                let child = read_element(reader, &e, true)?;
                element.children.push(Node::Element(child));
            }
            XmlEvent::Text(t) => {
                let text = t.unescape()?;
                if !text.is_empty() {
                    element.children.push(Node::Text(text.into_owned()));
                }
            }
            XmlEvent::CData(c) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                element.children.push(Node::Text(text));
            }
            XmlEvent::End(_) => return Ok(element),
            XmlEvent::Eof => {
                return Err(ParseError::InvalidStructure(format!(
                    "unterminated element <{}>",
                    element.name
                )))
            }
            _ => {}
        }
    }
}

fn attributes_of(start: &BytesStart) -> Result<Element, ParseError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ParseError::Xml(quick_xml::Error::InvalidAttr(e)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, ParseError> {
    s.parse::<DateTime<Utc>>()
        .map_err(|_| ParseError::InvalidDateTime(s.to_string()))
}

fn parse_f64(s: &str) -> Result<f64, ParseError> {
    s.parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber(s.to_string()))
}
