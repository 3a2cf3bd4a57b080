//! Stream framing for CoT over TCP/TLS.
//!
//! Inbound messages are delimited by the `</event>` token: the frame ends
//! immediately after it. Outbound events are written one per line.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use takbridge_cot::{serialize_event, Event};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

const XML_END_TOKEN: &[u8] = b"</event>";

/// Maximum frame size (10MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CotCodec {
    max_frame_size: usize,
    /// Bytes already searched for the end token
    scanned: usize,
}

impl CotCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            scanned: 0,
        }
    }
}

impl Default for CotCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CotCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, buffer: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        loop {
            let from = self.scanned.saturating_sub(XML_END_TOKEN.len() - 1);
            let found = buffer[from..]
                .windows(XML_END_TOKEN.len())
                .position(|window| window == XML_END_TOKEN);

            let Some(pos) = found else {
                if buffer.len() > self.max_frame_size {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("CoT frame exceeds {} bytes", self.max_frame_size),
                    ));
                }
                self.scanned = buffer.len();
                return Ok(None);
            };

            let frame = buffer.split_to(from + pos + XML_END_TOKEN.len()).freeze();
            self.scanned = 0;

            let start = frame
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .unwrap_or(frame.len());
            let frame = frame.slice(start..);

            if frame.first() != Some(&b'<') {
                warn!(len = frame.len(), "Received data not starting with '<', skipping invalid frame");
                continue;
            }
            return Ok(Some(frame));
        }
    }

    fn decode_eof(&mut self, buffer: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        match self.decode(buffer)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !buffer.iter().all(u8::is_ascii_whitespace) {
                    warn!(len = buffer.len(), "Connection closed with incomplete CoT frame");
                }
                buffer.clear();
                self.scanned = 0;
                Ok(None)
            }
        }
    }
}

/// Writes an already serialized event as one line.
impl Encoder<String> for CotCodec {
    type Error = io::Error;

    fn encode(&mut self, xml: String, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(xml.len() + 1);
        dst.put_slice(xml.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

impl Encoder<Event> for CotCodec {
    type Error = io::Error;

    fn encode(&mut self, event: Event, dst: &mut BytesMut) -> Result<(), io::Error> {
        Encoder::<String>::encode(self, serialize_event(&event), dst)
    }
}
