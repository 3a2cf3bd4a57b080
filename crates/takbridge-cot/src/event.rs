//! CoT Event structures and the typed detail model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder used by TAK for unknown height and error estimates
pub const UNKNOWN_VALUE: f64 = 999_999.0;

/// CoT type prefix of keep-alive pings
pub const PING_TYPE_PREFIX: &str = "t-x-c-t";

/// CoT type of GeoChat messages
pub const CHAT_TYPE: &str = "b-t-f";

/// CoT Event represents a Cursor on Target message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// CoT version (typically "2.0")
    pub version: String,
    /// Unique identifier for this event
    pub uid: String,
    /// CoT type (e.g., "a-f-G" for atom-friendly-ground)
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event timestamp
    pub time: DateTime<Utc>,
    /// Event start time
    pub start: DateTime<Utc>,
    /// Event stale time (when the event becomes invalid)
    pub stale: DateTime<Utc>,
    /// How the event was generated (e.g., "h-e" for human-entered)
    pub how: String,
    /// Geographic location and accuracy
    pub point: Point,
    /// Detail section
    #[serde(default, skip_serializing_if = "Detail::is_empty")]
    pub detail: Detail,
}

impl Event {
    /// Creates an event stamped `time = start = now`.
    pub fn new(
        uid: impl Into<String>,
        event_type: impl Into<String>,
        how: impl Into<String>,
        point: Point,
        stale: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            version: "2.0".to_string(),
            uid: uid.into(),
            event_type: event_type.into(),
            time: now,
            start: now,
            stale,
            how: how.into(),
            point,
            detail: Detail::default(),
        }
    }

    pub fn with_detail(mut self, item: DetailItem) -> Self {
        self.detail.push(item);
        self
    }

    /// Keep-alive ping from the server or a peer.
    pub fn is_ping(&self) -> bool {
        self.event_type.starts_with(PING_TYPE_PREFIX)
    }

    /// GeoChat message.
    pub fn is_chat(&self) -> bool {
        self.event_type == CHAT_TYPE
    }

    /// True once `stale` has passed at `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.stale < now
    }

    pub fn callsign(&self) -> Option<&str> {
        self.detail.contact().map(|c| c.callsign.as_str())
    }

    pub fn fileshare(&self) -> Option<&FileShare> {
        self.detail.fileshare()
    }
}

/// Geographic point with accuracy metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Latitude in decimal degrees (-90 to 90)
    pub lat: f64,
    /// Longitude in decimal degrees (-180 to 180)
    pub lon: f64,
    /// Height above ellipsoid in meters
    pub hae: f64,
    /// Circular error in meters
    pub ce: f64,
    /// Linear error in meters
    pub le: f64,
}

impl Point {
    /// Point with unknown height and error estimates.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            hae: UNKNOWN_VALUE,
            ce: UNKNOWN_VALUE,
            le: UNKNOWN_VALUE,
        }
    }

    pub fn with_hae(mut self, hae: f64) -> Self {
        self.hae = hae;
        self
    }
}

/// Ordered list of detail sub-elements.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Detail {
    pub items: Vec<DetailItem>,
}

impl Detail {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: DetailItem) {
        self.items.push(item);
    }

    pub fn contact(&self) -> Option<&Contact> {
        self.items.iter().find_map(|item| match item {
            DetailItem::Contact(c) => Some(c),
            _ => None,
        })
    }

    pub fn group(&self) -> Option<&Group> {
        self.items.iter().find_map(|item| match item {
            DetailItem::Group(g) => Some(g),
            _ => None,
        })
    }

    pub fn chat(&self) -> Option<&Chat> {
        self.items.iter().find_map(|item| match item {
            DetailItem::Chat(c) => Some(c),
            _ => None,
        })
    }

    pub fn fileshare(&self) -> Option<&FileShare> {
        self.items.iter().find_map(|item| match item {
            DetailItem::FileShare(f) => Some(f),
            _ => None,
        })
    }

    pub fn remarks(&self) -> Option<&Remarks> {
        self.items.iter().find_map(|item| match item {
            DetailItem::Remarks(r) => Some(r),
            _ => None,
        })
    }

    pub fn video(&self) -> Option<&Video> {
        self.items.iter().find_map(|item| match item {
            DetailItem::Video(v) => Some(v),
            _ => None,
        })
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.items.iter().filter_map(|item| match item {
            DetailItem::Link(l) => Some(l),
            _ => None,
        })
    }

    /// Detail elements this crate has no typed model for.
    pub fn unknown(&self) -> impl Iterator<Item = &Element> {
        self.items.iter().filter_map(|item| match item {
            DetailItem::Unknown(e) => Some(e),
            _ => None,
        })
    }
}

/// One `<detail>` child element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetailItem {
    Contact(Contact),
    Group(Group),
    Takv(Takv),
    Link(Link),
    Chat(Chat),
    FileShare(FileShare),
    Remarks(Remarks),
    Video(Video),
    /// Preserved verbatim for round-trips
    Unknown(Element),
}

impl DetailItem {
    /// Classifies a detail child, falling back to `Unknown` when the element
    /// is not recognized or lacks a required attribute.
    pub fn from_element(element: Element) -> Self {
        let typed = match element.name.as_str() {
            "contact" => Contact::from_element(&element).map(DetailItem::Contact),
            "__group" => Group::from_element(&element).map(DetailItem::Group),
            "takv" => Some(DetailItem::Takv(Takv::from_element(&element))),
            "link" => Link::from_element(&element).map(DetailItem::Link),
            "__chat" => Chat::from_element(&element).map(DetailItem::Chat),
            "fileshare" => FileShare::from_element(&element).map(DetailItem::FileShare),
            "remarks" => Some(DetailItem::Remarks(Remarks::from_element(&element))),
            "__video" => Video::from_element(&element).map(DetailItem::Video),
            _ => None,
        };
        typed.unwrap_or(DetailItem::Unknown(element))
    }

    pub fn to_element(&self) -> Element {
        match self {
            DetailItem::Contact(c) => c.to_element(),
            DetailItem::Group(g) => g.to_element(),
            DetailItem::Takv(t) => t.to_element(),
            DetailItem::Link(l) => l.to_element(),
            DetailItem::Chat(c) => c.to_element(),
            DetailItem::FileShare(f) => f.to_element(),
            DetailItem::Remarks(r) => r.to_element(),
            DetailItem::Video(v) => v.to_element(),
            DetailItem::Unknown(e) => e.clone(),
        }
    }
}

/// Contact information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Callsign for display
    pub callsign: String,
    /// Optional endpoint for communication
    pub endpoint: Option<String>,
}

impl Contact {
    fn from_element(e: &Element) -> Option<Self> {
        Some(Self {
            callsign: e.attr("callsign")?.to_string(),
            endpoint: e.attr("endpoint").map(str::to_string),
        })
    }

    fn to_element(&self) -> Element {
        Element::new("contact")
            .with_attr("callsign", &self.callsign)
            .with_opt_attr("endpoint", self.endpoint.as_deref())
    }
}

/// Group information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group name (team color)
    pub name: String,
    /// Group role
    pub role: String,
}

impl Group {
    fn from_element(e: &Element) -> Option<Self> {
        Some(Self {
            name: e.attr("name")?.to_string(),
            role: e.attr("role").unwrap_or_default().to_string(),
        })
    }

    fn to_element(&self) -> Element {
        Element::new("__group")
            .with_attr("name", &self.name)
            .with_attr("role", &self.role)
    }
}

/// TAK version and device information
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Takv {
    pub device: String,
    pub platform: String,
    pub os: String,
    pub version: String,
}

impl Takv {
    fn from_element(e: &Element) -> Self {
        let get = |name| e.attr(name).unwrap_or_default().to_string();
        Self {
            device: get("device"),
            platform: get("platform"),
            os: get("os"),
            version: get("version"),
        }
    }

    fn to_element(&self) -> Element {
        Element::new("takv")
            .with_attr("device", &self.device)
            .with_attr("platform", &self.platform)
            .with_attr("os", &self.os)
            .with_attr("version", &self.version)
    }
}

/// Link between CoT events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// UID of the linked event
    pub uid: String,
    /// Type of the linked event
    #[serde(rename = "type")]
    pub link_type: Option<String>,
    /// Relationship type (e.g., "p-p" for parent-producer)
    pub relation: String,
}

impl Link {
    fn from_element(e: &Element) -> Option<Self> {
        Some(Self {
            uid: e.attr("uid")?.to_string(),
            link_type: e.attr("type").map(str::to_string),
            relation: e.attr("relation").unwrap_or_default().to_string(),
        })
    }

    fn to_element(&self) -> Element {
        Element::new("link")
            .with_attr("relation", &self.relation)
            .with_opt_attr("type", self.link_type.as_deref())
            .with_attr("uid", &self.uid)
    }
}

/// GeoChat envelope (`__chat`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub sender_callsign: String,
    pub chatroom: String,
    pub id: String,
    pub message_id: String,
    pub parent: Option<String>,
    pub group_owner: Option<String>,
    pub chatgrp: Option<ChatGroup>,
}

/// Participants of a chat (`chatgrp`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatGroup {
    pub id: String,
    pub uid0: String,
    pub uid1: String,
}

impl Chat {
    fn from_element(e: &Element) -> Option<Self> {
        let chatgrp = e.child("chatgrp").map(|g| ChatGroup {
            id: g.attr("id").unwrap_or_default().to_string(),
            uid0: g.attr("uid0").unwrap_or_default().to_string(),
            uid1: g.attr("uid1").unwrap_or_default().to_string(),
        });
        Some(Self {
            sender_callsign: e.attr("senderCallsign")?.to_string(),
            chatroom: e.attr("chatroom").unwrap_or_default().to_string(),
            id: e.attr("id").unwrap_or_default().to_string(),
            message_id: e.attr("messageId").unwrap_or_default().to_string(),
            parent: e.attr("parent").map(str::to_string),
            group_owner: e.attr("groupOwner").map(str::to_string),
            chatgrp,
        })
    }

    fn to_element(&self) -> Element {
        let mut element = Element::new("__chat")
            .with_opt_attr("parent", self.parent.as_deref())
            .with_opt_attr("groupOwner", self.group_owner.as_deref())
            .with_attr("messageId", &self.message_id)
            .with_attr("chatroom", &self.chatroom)
            .with_attr("id", &self.id)
            .with_attr("senderCallsign", &self.sender_callsign);
        if let Some(grp) = &self.chatgrp {
            element = element.with_child(
                Element::new("chatgrp")
                    .with_attr("uid0", &grp.uid0)
                    .with_attr("uid1", &grp.uid1)
                    .with_attr("id", &grp.id),
            );
        }
        element
    }
}

/// File-share descriptor announcing a downloadable artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileShare {
    pub filename: String,
    pub name: Option<String>,
    pub sender_url: String,
    pub size_in_bytes: Option<u64>,
    pub sha256: Option<String>,
    pub sender_uid: Option<String>,
    pub sender_callsign: Option<String>,
}

impl FileShare {
    fn from_element(e: &Element) -> Option<Self> {
        Some(Self {
            filename: e.attr("filename")?.to_string(),
            name: e.attr("name").map(str::to_string),
            sender_url: e.attr("senderUrl")?.to_string(),
            size_in_bytes: e.attr("sizeInBytes").and_then(|s| s.parse().ok()),
            sha256: e.attr("sha256").map(str::to_string),
            sender_uid: e.attr("senderUid").map(str::to_string),
            sender_callsign: e.attr("senderCallsign").map(str::to_string),
        })
    }

    fn to_element(&self) -> Element {
        let size = self.size_in_bytes.map(|s| s.to_string());
        Element::new("fileshare")
            .with_attr("filename", &self.filename)
            .with_opt_attr("name", self.name.as_deref())
            .with_attr("senderUrl", &self.sender_url)
            .with_opt_attr("sizeInBytes", size.as_deref())
            .with_opt_attr("sha256", self.sha256.as_deref())
            .with_opt_attr("senderUid", self.sender_uid.as_deref())
            .with_opt_attr("senderCallsign", self.sender_callsign.as_deref())
    }
}

/// Free-text remarks
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Remarks {
    pub text: String,
    pub source: Option<String>,
    pub to: Option<String>,
    pub time: Option<String>,
}

impl Remarks {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    fn from_element(e: &Element) -> Self {
        Self {
            text: e.text(),
            source: e.attr("source").map(str::to_string),
            to: e.attr("to").map(str::to_string),
            time: e.attr("time").map(str::to_string),
        }
    }

    fn to_element(&self) -> Element {
        let mut element = Element::new("remarks")
            .with_opt_attr("source", self.source.as_deref())
            .with_opt_attr("to", self.to.as_deref())
            .with_opt_attr("time", self.time.as_deref());
        if !self.text.is_empty() {
            element.children.push(Node::Text(self.text.clone()));
        }
        element
    }
}

/// Video feed descriptor (`__video`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub uid: Option<String>,
    pub url: String,
    pub connection: Option<ConnectionEntry>,
}

/// Connection parameters of a video feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub uid: String,
    pub address: String,
    pub port: u16,
    pub path: String,
    pub protocol: String,
    pub alias: String,
    pub network_timeout: u32,
}

impl Video {
    fn from_element(e: &Element) -> Option<Self> {
        let connection = match e.child("ConnectionEntry") {
            Some(c) => Some(ConnectionEntry {
                uid: c.attr("uid").unwrap_or_default().to_string(),
                address: c.attr("address")?.to_string(),
                port: c.attr("port")?.parse().ok()?,
                path: c.attr("path").unwrap_or_default().to_string(),
                protocol: c.attr("protocol").unwrap_or("rtsp").to_string(),
                alias: c.attr("alias").unwrap_or_default().to_string(),
                network_timeout: c
                    .attr("networkTimeout")
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(5000),
            }),
            None => None,
        };
        Some(Self {
            uid: e.attr("uid").map(str::to_string),
            url: e.attr("url")?.to_string(),
            connection,
        })
    }

    fn to_element(&self) -> Element {
        let mut element = Element::new("__video")
            .with_opt_attr("uid", self.uid.as_deref())
            .with_attr("url", &self.url);
        if let Some(c) = &self.connection {
            element = element.with_child(
                Element::new("ConnectionEntry")
                    .with_attr("networkTimeout", &c.network_timeout.to_string())
                    .with_attr("uid", &c.uid)
                    .with_attr("path", &c.path)
                    .with_attr("protocol", &c.protocol)
                    .with_attr("bufferTime", "-1")
                    .with_attr("address", &c.address)
                    .with_attr("port", &c.port.to_string())
                    .with_attr("roverPort", "-1")
                    .with_attr("rtspReliable", "1")
                    .with_attr("ignoreEmbeddedKLV", "false")
                    .with_attr("alias", &c.alias),
            );
        }
        element
    }
}

/// Generic XML element kept for detail children without a typed model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

/// Content of an [`Element`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_opt_attr(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.with_attr(key, v),
            None => self,
        }
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find_map(|node| match node {
            Node::Element(e) if e.name == name => Some(e),
            _ => None,
        })
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }
}
