//! Presence of the bridge itself on the primary connection.

use async_trait::async_trait;
use chrono::Utc;
use takbridge_client::{SessionWriter, TakConnection, TakHandler};
use takbridge_core::config::TakConfig;
use takbridge_cot::{heartbeat_event, Event, HeartbeatSpec, VideoFeed};
use tracing::{debug, warn};

pub const HEARTBEAT_TIMER: &str = "heartbeat";

/// Heartbeat announcing the bridge callsign at the configured position.
pub fn bridge_heartbeat(tak: &TakConfig) -> Event {
    let stale_after = chrono::Duration::from_std(tak.heartbeat_stale()).unwrap_or(chrono::Duration::minutes(5));
    let mut spec = HeartbeatSpec::new(tak.catalyst_lat, tak.catalyst_lon, Utc::now() + stale_after)
        .callsign(&tak.callsign)
        .group(&tak.group, &tak.role);

    if let Some(rtsp) = tak.video.rtsp() {
        spec = spec.video(VideoFeed {
            server: rtsp.rtsp_server.clone(),
            port: rtsp.rtsp_port,
            path: rtsp.rtsp_path.clone(),
        });
    }
    heartbeat_event(&spec)
}

/// Re-registers the heartbeat timer on every new session, since timers are
/// bound to the session current at registration.
pub struct HeartbeatHandler {
    connection: TakConnection,
    tak: TakConfig,
}

impl HeartbeatHandler {
    pub fn new(connection: TakConnection, tak: TakConfig) -> Self {
        Self { connection, tak }
    }
}

#[async_trait]
impl TakHandler for HeartbeatHandler {
    async fn on_cot(&self, _event: Event) {}

    async fn on_connected(&self, session: SessionWriter) {
        session.write([bridge_heartbeat(&self.tak)]);

        let tak = self.tak.clone();
        let scheduled = self
            .connection
            .schedule_repeating(HEARTBEAT_TIMER, self.tak.heartbeat_interval(), move |writer| {
                let event = bridge_heartbeat(&tak);
                async move {
                    debug!(uid = %event.uid, "Sending heartbeat");
                    writer.write([event]);
                }
            });
        if !scheduled {
            warn!(connection_id = %self.connection.connection_id(), "Heartbeat timer not scheduled");
        }
    }
}
