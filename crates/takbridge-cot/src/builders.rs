//! Builders for the events the bridge originates: contact heartbeats,
//! GeoChat messages and keep-alive pings.

use crate::event::{
    Chat, ChatGroup, ConnectionEntry, Contact, DetailItem, Event, Group, Link, Point, Remarks,
    Takv, Video, CHAT_TYPE, PING_TYPE_PREFIX,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};

pub const DEFAULT_CALLSIGN: &str = "CATALYST-TAK-ADAPTER";
pub const DEFAULT_CONTACT_TYPE: &str = "a-f-G-U-C-I";
pub const DEFAULT_CONTACT_HOW: &str = "m-g";
pub const DEFAULT_GROUP: &str = "Cyan";
pub const DEFAULT_ROLE: &str = "Team Member";
pub const MACHINE_HOW: &str = "h-g-i-g-o";
pub const DEFAULT_CHATROOM: &str = "All Chat Rooms";

/// Chat messages stay visible for a week.
const CHAT_STALE_DAYS: i64 = 7;
const PING_STALE_SECS: i64 = 20;

/// Presence announcement for the adapter or one of its contacts.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatSpec {
    pub callsign: String,
    pub cot_type: String,
    pub how: String,
    pub lat: f64,
    pub lon: f64,
    pub group: String,
    pub role: String,
    pub stale: DateTime<Utc>,
    pub video: Option<VideoFeed>,
}

impl HeartbeatSpec {
    pub fn new(lat: f64, lon: f64, stale: DateTime<Utc>) -> Self {
        Self {
            callsign: DEFAULT_CALLSIGN.to_string(),
            cot_type: DEFAULT_CONTACT_TYPE.to_string(),
            how: DEFAULT_CONTACT_HOW.to_string(),
            lat,
            lon,
            group: DEFAULT_GROUP.to_string(),
            role: DEFAULT_ROLE.to_string(),
            stale,
            video: None,
        }
    }

    pub fn callsign(mut self, callsign: impl Into<String>) -> Self {
        self.callsign = callsign.into();
        self
    }

    pub fn cot_type(mut self, cot_type: impl Into<String>) -> Self {
        self.cot_type = cot_type.into();
        self
    }

    pub fn how(mut self, how: impl Into<String>) -> Self {
        self.how = how.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>, role: impl Into<String>) -> Self {
        self.group = group.into();
        self.role = role.into();
        self
    }

    pub fn video(mut self, video: VideoFeed) -> Self {
        self.video = Some(video);
        self
    }
}

/// RTSP feed advertised in a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFeed {
    pub server: String,
    pub port: u16,
    pub path: String,
}

impl VideoFeed {
    pub fn url(&self) -> String {
        format!("rtsp://{}:{}{}", self.server, self.port, self.path)
    }
}

/// Builds a heartbeat whose uid is the callsign.
pub fn heartbeat_event(spec: &HeartbeatSpec) -> Event {
    let point = Point::new(spec.lat, spec.lon);
    let mut event = Event::new(&spec.callsign, &spec.cot_type, &spec.how, point, spec.stale);

    if let Some(video) = &spec.video {
        event.detail.push(DetailItem::Video(Video {
            uid: Some(spec.callsign.clone()),
            url: video.url(),
            connection: Some(ConnectionEntry {
                uid: spec.callsign.clone(),
                address: video.server.clone(),
                port: video.port,
                path: video.path.clone(),
                protocol: "rtsp".to_string(),
                alias: format!("live/{}", spec.callsign),
                network_timeout: 5000,
            }),
        }));
    }

    event
        .with_detail(DetailItem::Contact(Contact {
            callsign: spec.callsign.clone(),
            endpoint: Some("*:-1:stcp".to_string()),
        }))
        .with_detail(DetailItem::Group(Group {
            name: spec.group.clone(),
            role: spec.role.clone(),
        }))
        .with_detail(DetailItem::Takv(Takv {
            device: "Tak Adapter".to_string(),
            platform: "Catalyst".to_string(),
            os: "linux".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
        .with_detail(DetailItem::Link(Link {
            uid: spec.callsign.clone(),
            link_type: Some(spec.cot_type.clone()),
            relation: "p-p".to_string(),
        }))
}

/// A GeoChat message from `sender` to a chatroom.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSpec {
    pub sender: String,
    pub recipient: String,
    pub message_id: String,
    pub message: String,
    pub lat: f64,
    pub lon: f64,
}

pub fn chat_event(spec: &ChatSpec) -> Event {
    let now = Utc::now();
    let uid = format!(
        "GeoChat.{}.{}.{}",
        spec.sender, spec.recipient, spec.message_id
    );
    let stale = now + Duration::days(CHAT_STALE_DAYS);

    Event::new(uid, CHAT_TYPE, MACHINE_HOW, Point::new(spec.lat, spec.lon), stale)
        .with_detail(DetailItem::Chat(Chat {
            sender_callsign: spec.sender.clone(),
            chatroom: spec.recipient.clone(),
            id: spec.recipient.clone(),
            message_id: spec.message_id.clone(),
            parent: Some("RootContactGroup".to_string()),
            group_owner: Some("false".to_string()),
            chatgrp: Some(ChatGroup {
                id: spec.recipient.clone(),
                uid0: spec.sender.clone(),
                uid1: spec.recipient.clone(),
            }),
        }))
        .with_detail(DetailItem::Remarks(Remarks {
            text: spec.message.clone(),
            source: Some(spec.sender.clone()),
            to: Some(spec.recipient.clone()),
            time: Some(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }))
        .with_detail(DetailItem::Link(Link {
            uid: spec.sender.clone(),
            link_type: Some(DEFAULT_CONTACT_TYPE.to_string()),
            relation: "p-p".to_string(),
        }))
}

/// Keep-alive ping; the session setup ping carries the connection id as uid.
pub fn ping_event(uid: impl Into<String>) -> Event {
    let stale = Utc::now() + Duration::seconds(PING_STALE_SECS);
    let point = Point {
        lat: 0.0,
        lon: 0.0,
        hae: 0.0,
        ce: 9_999_999.0,
        le: 9_999_999.0,
    };
    Event::new(uid, PING_TYPE_PREFIX, MACHINE_HOW, point, stale)
}
