use takbridge_cot::event::DetailItem;
use takbridge_cot::{parse_cot, serialize_event};

const FILESHARE_COT: &str = r#"<event version="2.0" uid="fs-1" type="b-f-t-r" time="2024-03-01T12:00:00.000Z" start="2024-03-01T12:00:00.000Z" stale="2024-03-01T12:05:00.000Z" how="h-e">
  <point lat="38.1" lon="-77.2" hae="9999999.0" ce="9999999.0" le="9999999.0"/>
  <detail>
    <fileshare filename="map.zip" name="Map Package" senderUrl="https://tak.example.com:8443/Marti/sync/content?hash=abc" sizeInBytes="2048" sha256="abc" senderUid="ANDROID-1" senderCallsign="VIPER"/>
    <ackrequest uid="ack-1" ackrequested="true" tag="map"/>
  </detail>
</event>"#;

const CHAT_COT: &str = r#"<event version="2.0" uid="GeoChat.ANDROID-1.All Chat Rooms.m-42" type="b-t-f" time="2024-03-01T12:00:00.000Z" start="2024-03-01T12:00:00.000Z" stale="2024-03-02T12:00:00.000Z" how="h-g-i-g-o">
  <point lat="0" lon="0" hae="9999999.0" ce="9999999.0" le="9999999.0"/>
  <detail>
    <__chat parent="RootContactGroup" groupOwner="false" messageId="m-42" chatroom="All Chat Rooms" id="All Chat Rooms" senderCallsign="VIPER">
      <chatgrp uid0="ANDROID-1" uid1="All Chat Rooms" id="All Chat Rooms"/>
    </__chat>
    <link uid="ANDROID-1" type="a-f-G-U-C" relation="p-p"/>
    <remarks source="BAO.F.ATAK.ANDROID-1" to="All Chat Rooms" time="2024-03-01T12:00:00.000Z">Moving to &lt;grid&gt; 12</remarks>
    <__serverdestination destinations="10.0.0.2:4242:tcp:ANDROID-1"/>
  </detail>
</event>"#;

const VIDEO_COT: &str = r#"<event version="2.0" uid="cam-1" type="b-i-v" time="2024-03-01T12:00:00Z" start="2024-03-01T12:00:00Z" stale="2024-03-01T13:00:00Z" how="m-g">
  <point lat="1.5" lon="2.5"/>
  <detail>
    <__video uid="cam-1" url="rtsp://10.0.0.9:554/live">
      <ConnectionEntry networkTimeout="3000" uid="cam-1" path="/live" protocol="rtsp" bufferTime="-1" address="10.0.0.9" port="554" roverPort="-1" rtspReliable="1" ignoreEmbeddedKLV="false" alias="live/cam-1"/>
    </__video>
  </detail>
</event>"#;

#[test]
fn fileshare_descriptor_is_typed() {
    let event = parse_cot(FILESHARE_COT).unwrap();
    let fileshare = event.fileshare().unwrap();

    assert_eq!(fileshare.filename, "map.zip");
    assert_eq!(fileshare.name.as_deref(), Some("Map Package"));
    assert_eq!(fileshare.size_in_bytes, Some(2048));
    assert_eq!(fileshare.sender_callsign.as_deref(), Some("VIPER"));
    assert!(fileshare.sender_url.starts_with("https://tak.example.com:8443/"));

    let unknown: Vec<_> = event.detail.unknown().map(|e| e.name.as_str()).collect();
    assert_eq!(unknown, vec!["ackrequest"]);
}

#[test]
fn chat_envelope_is_typed() {
    let event = parse_cot(CHAT_COT).unwrap();
    assert!(event.is_chat());

    let chat = event.detail.chat().unwrap();
    assert_eq!(chat.sender_callsign, "VIPER");
    assert_eq!(chat.message_id, "m-42");
    assert_eq!(chat.chatgrp.as_ref().unwrap().uid1, "All Chat Rooms");

    let remarks = event.detail.remarks().unwrap();
    assert_eq!(remarks.text, "Moving to <grid> 12");
    assert_eq!(remarks.to.as_deref(), Some("All Chat Rooms"));

    assert_eq!(event.detail.links().count(), 1);
}

#[test]
fn video_descriptor_is_typed() {
    let event = parse_cot(VIDEO_COT).unwrap();
    let video = event.detail.video().unwrap();

    assert_eq!(video.url, "rtsp://10.0.0.9:554/live");
    let entry = video.connection.as_ref().unwrap();
    assert_eq!(entry.port, 554);
    assert_eq!(entry.network_timeout, 3000);
    assert_eq!(event.point.hae, 999_999.0);
}

#[test]
fn detail_order_and_unknown_elements_survive_reserialization() {
    for xml in [FILESHARE_COT, CHAT_COT, VIDEO_COT] {
        let event = parse_cot(xml).unwrap();
        let reparsed = parse_cot(&serialize_event(&event)).unwrap();
        assert_eq!(reparsed, event);
    }
}

#[test]
fn json_storage_form_keeps_detail_kinds() {
    let event = parse_cot(CHAT_COT).unwrap();
    let json = serde_json::to_string(&event).unwrap();
    let back: takbridge_cot::Event = serde_json::from_str(&json).unwrap();

    assert_eq!(back, event);
    assert!(matches!(back.detail.items[0], DetailItem::Chat(_)));
    assert!(matches!(back.detail.items.last(), Some(DetailItem::Unknown(_))));
}
