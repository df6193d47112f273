//! Binary frame codec for the bidirectional synthesis protocol.
//!
//! Layout of an event frame:
//!
//! ```text
//! | header (4) | event (i32 BE) | [id len (u32 BE) | id] | payload len (u32 BE) | payload |
//! ```
//!
//! The id field is only present for session-scoped events on frames we send.
//! Server responses always carry it (connection id for connection events,
//! session id otherwise). Error frames use a different body: a big-endian
//! error code followed by a UTF-8 message.

use thiserror::Error;

/// Protocol event codes.
pub mod event {
    pub const START_CONNECTION: i32 = 1;
    pub const FINISH_CONNECTION: i32 = 2;
    pub const CONNECTION_STARTED: i32 = 50;
    pub const CONNECTION_FAILED: i32 = 51;
    pub const CONNECTION_FINISHED: i32 = 52;
    pub const START_SESSION: i32 = 100;
    pub const FINISH_SESSION: i32 = 102;
    pub const SESSION_STARTED: i32 = 150;
    pub const SESSION_FINISHED: i32 = 152;
    pub const SESSION_FAILED: i32 = 153;
    pub const TASK_REQUEST: i32 = 200;
    /// Audio-bearing response; the payload is raw PCM.
    pub const AUDIO_RESPONSE: i32 = 352;
}

/// Header for every frame this client sends: protocol v1, 4-byte header,
/// full client request carrying an event number, JSON, uncompressed.
pub const CLIENT_HEADER: [u8; 4] = [0x11, 0x14, 0x10, 0x00];

/// First header byte: protocol version 1, header size 1 (x4 bytes).
const PROTOCOL_MARKER: u8 = 0x11;

const HEADER_LEN: usize = 4;
const EVENT_LEN: usize = 4;
const LEN_FIELD: usize = 4;

/// Errors produced while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame truncated: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("frame has {extra} trailing bytes beyond its declared lengths")]
    TrailingBytes { extra: usize },

    #[error("unsupported protocol marker {0:#04x}")]
    UnsupportedHeader(u8),

    #[error("session id is not valid UTF-8")]
    InvalidSessionId,
}

/// Message type carried in the high nibble of the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    FullClientRequest,
    AudioOnlyRequest,
    FullServerResponse,
    AudioOnlyResponse,
    Error,
    Unknown(u8),
}

impl MessageType {
    pub fn from_header(header: &[u8]) -> Self {
        match header.get(1).map(|b| (b & 0xF0) >> 4) {
            Some(0x1) => MessageType::FullClientRequest,
            Some(0x2) => MessageType::AudioOnlyRequest,
            Some(0x9) => MessageType::FullServerResponse,
            Some(0xB) => MessageType::AudioOnlyResponse,
            Some(0xF) => MessageType::Error,
            Some(other) => MessageType::Unknown(other),
            None => MessageType::Unknown(0),
        }
    }

    pub fn nibble(self) -> u8 {
        match self {
            MessageType::FullClientRequest => 0x1,
            MessageType::AudioOnlyRequest => 0x2,
            MessageType::FullServerResponse => 0x9,
            MessageType::AudioOnlyResponse => 0xB,
            MessageType::Error => 0xF,
            MessageType::Unknown(n) => n & 0x0F,
        }
    }

    /// Whether frames of this type always carry the id field.
    fn always_has_id(self) -> bool {
        matches!(
            self,
            MessageType::AudioOnlyRequest
                | MessageType::FullServerResponse
                | MessageType::AudioOnlyResponse
        )
    }
}

/// Session-scoped events carry a session id on the wire.
pub fn is_session_scoped(event: i32) -> bool {
    event >= event::START_SESSION
}

/// One event frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: [u8; 4],
    pub event: i32,
    pub session_id: Option<String>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build an outbound frame. The session id is attached only when the
    /// event is session-scoped.
    pub fn client(event: i32, session_id: Option<&str>, payload: Vec<u8>) -> Self {
        let session_id = if is_session_scoped(event) {
            session_id.map(str::to_string)
        } else {
            None
        };
        Self {
            header: CLIENT_HEADER,
            event,
            session_id,
            payload,
        }
    }

    pub fn start_connection() -> Self {
        Self::client(event::START_CONNECTION, None, b"{}".to_vec())
    }

    pub fn finish_connection() -> Self {
        Self::client(event::FINISH_CONNECTION, None, b"{}".to_vec())
    }

    pub fn start_session(session_id: &str, payload: Vec<u8>) -> Self {
        Self::client(event::START_SESSION, Some(session_id), payload)
    }

    pub fn task_request(session_id: &str, payload: Vec<u8>) -> Self {
        Self::client(event::TASK_REQUEST, Some(session_id), payload)
    }

    pub fn finish_session(session_id: &str) -> Self {
        Self::client(event::FINISH_SESSION, Some(session_id), b"{}".to_vec())
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_header(&self.header)
    }

    /// Total encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN
            + EVENT_LEN
            + self
                .session_id
                .as_ref()
                .map_or(0, |id| LEN_FIELD + id.len())
            + LEN_FIELD
            + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.encoded_len());
        data.extend_from_slice(&self.header);
        data.extend_from_slice(&self.event.to_be_bytes());
        if let Some(id) = &self.session_id {
            data.extend_from_slice(&(id.len() as u32).to_be_bytes());
            data.extend_from_slice(id.as_bytes());
        }
        data.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        data.extend_from_slice(&self.payload);
        data
    }

    /// Decode an event frame. The byte length must match the declared
    /// lengths exactly.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut reader = Reader::new(data);
        let header_bytes = reader.take(HEADER_LEN)?;
        if header_bytes[0] != PROTOCOL_MARKER {
            return Err(FrameError::UnsupportedHeader(header_bytes[0]));
        }
        let mut header = [0u8; 4];
        header.copy_from_slice(header_bytes);
        let message_type = MessageType::from_header(&header);

        let event = reader.read_u32()? as i32;

        let session_id = if message_type.always_has_id() || is_session_scoped(event) {
            let len = reader.read_u32()? as usize;
            let bytes = reader.take(len)?;
            let id = std::str::from_utf8(bytes).map_err(|_| FrameError::InvalidSessionId)?;
            Some(id.to_string())
        } else {
            None
        };

        let payload_len = reader.read_u32()? as usize;
        let payload = reader.take(payload_len)?.to_vec();
        reader.finish()?;

        Ok(Self {
            header,
            event,
            session_id,
            payload,
        })
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// PCM audio for the current session.
    Audio(Vec<u8>),
    /// Handshake/status event with a UTF-8 payload.
    Event { code: i32, payload: String },
    /// Terminal error frame.
    Error { code: u32, message: String },
}

impl ServerMessage {
    /// Classify raw inbound bytes.
    ///
    /// Returns `Ok(None)` for well-formed frames the client has no use for
    /// (non-audio binary events, unknown message types).
    pub fn classify(data: &[u8]) -> Result<Option<Self>, FrameError> {
        if data.len() < HEADER_LEN + EVENT_LEN {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN + EVENT_LEN,
                available: data.len(),
            });
        }

        match MessageType::from_header(data) {
            MessageType::AudioOnlyRequest | MessageType::AudioOnlyResponse => {
                let frame = Frame::decode(data)?;
                if frame.event == event::AUDIO_RESPONSE {
                    Ok(Some(ServerMessage::Audio(frame.payload)))
                } else {
                    Ok(None)
                }
            }
            MessageType::FullServerResponse => {
                let frame = Frame::decode(data)?;
                Ok(Some(ServerMessage::Event {
                    code: frame.event,
                    payload: String::from_utf8_lossy(&frame.payload).into_owned(),
                }))
            }
            MessageType::Error => Ok(Some(decode_error(data))),
            _ => Ok(None),
        }
    }
}

fn decode_error(data: &[u8]) -> ServerMessage {
    let code = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let rest = &data[HEADER_LEN + EVENT_LEN..];
    // Some servers length-prefix the message; accept both shapes.
    let message = match rest.get(..LEN_FIELD) {
        Some(len) if u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize
            == rest.len() - LEN_FIELD =>
        {
            &rest[LEN_FIELD..]
        }
        _ => rest,
    };
    ServerMessage::Error {
        code,
        message: String::from_utf8_lossy(message).into_owned(),
    }
}

/// Bounds-checked cursor over a frame.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        let end = self.pos.checked_add(len).ok_or(FrameError::Truncated {
            needed: usize::MAX,
            available: self.data.len(),
        })?;
        if end > self.data.len() {
            return Err(FrameError::Truncated {
                needed: end,
                available: self.data.len(),
            });
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32, FrameError> {
        let b = self.take(LEN_FIELD)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn finish(self) -> Result<(), FrameError> {
        match self.data.len() - self.pos {
            0 => Ok(()),
            extra => Err(FrameError::TrailingBytes { extra }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_frame(kind: u8, event: i32, id: &str, payload: &[u8]) -> Vec<u8> {
        Frame {
            header: [0x11, kind << 4 | 0x4, 0x10, 0x00],
            event,
            session_id: Some(id.to_string()),
            payload: payload.to_vec(),
        }
        .encode()
    }

    #[test]
    fn start_session_survives_encode_decode() {
        let frame = Frame::start_session("abc", b"{}".to_vec());
        let decoded = Frame::decode(&frame.encode()).expect("should decode");

        assert_eq!(decoded.event, 100);
        assert_eq!(decoded.session_id.as_deref(), Some("abc"));
        assert_eq!(decoded.payload, b"{}");
    }

    #[test]
    fn start_connection_layout_has_no_session_id() {
        let bytes = Frame::start_connection().encode();
        assert_eq!(
            bytes,
            vec![
                0x11, 0x14, 0x10, 0x00, // header
                0, 0, 0, 1, // event
                0, 0, 0, 2, // payload len
                b'{', b'}',
            ]
        );
    }

    #[test]
    fn session_scoped_frame_layout() {
        let bytes = Frame::finish_session("ab").encode();
        assert_eq!(&bytes[4..8], &102i32.to_be_bytes());
        assert_eq!(&bytes[8..12], &2u32.to_be_bytes());
        assert_eq!(&bytes[12..14], b"ab");
        assert_eq!(&bytes[14..18], &2u32.to_be_bytes());
        assert_eq!(bytes.len(), Frame::finish_session("ab").encoded_len());
    }

    #[test]
    fn connection_events_drop_session_id() {
        let frame = Frame::client(event::FINISH_CONNECTION, Some("ignored"), Vec::new());
        assert!(frame.session_id.is_none());
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = Frame::start_connection().encode();
        bytes.push(0);
        assert_eq!(
            Frame::decode(&bytes),
            Err(FrameError::TrailingBytes { extra: 1 })
        );
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let mut bytes = Frame::start_session("abc", b"{\"a\":1}".to_vec()).encode();
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            Frame::decode(&bytes),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn decode_rejects_oversized_session_length() {
        let mut bytes = Frame::start_session("abc", Vec::new()).encode();
        bytes[8..12].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            Frame::decode(&bytes),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn decode_rejects_unknown_protocol_marker() {
        let mut bytes = Frame::start_connection().encode();
        bytes[0] = 0x21;
        assert_eq!(
            Frame::decode(&bytes),
            Err(FrameError::UnsupportedHeader(0x21))
        );
    }

    #[test]
    fn classify_audio_response() {
        let bytes = server_frame(0xB, event::AUDIO_RESPONSE, "sid", &[1, 2, 3, 4]);
        assert_eq!(
            ServerMessage::classify(&bytes),
            Ok(Some(ServerMessage::Audio(vec![1, 2, 3, 4])))
        );
    }

    #[test]
    fn classify_discards_non_audio_binary_event() {
        let bytes = server_frame(0x2, 999, "sid", b"whatever");
        assert_eq!(ServerMessage::classify(&bytes), Ok(None));
    }

    #[test]
    fn classify_event_with_string_payload() {
        let bytes = server_frame(0x9, event::SESSION_FAILED, "sid", "音色不存在".as_bytes());
        assert_eq!(
            ServerMessage::classify(&bytes),
            Ok(Some(ServerMessage::Event {
                code: 153,
                payload: "音色不存在".to_string()
            }))
        );
    }

    #[test]
    fn classify_connection_event_reads_connection_id() {
        let bytes = server_frame(0x9, event::CONNECTION_STARTED, "conn-1", b"");
        assert_eq!(
            ServerMessage::classify(&bytes),
            Ok(Some(ServerMessage::Event {
                code: 50,
                payload: String::new()
            }))
        );
    }

    #[test]
    fn classify_error_frame_with_length_prefix() {
        let mut bytes = vec![0x11, 0xF0, 0x10, 0x00];
        bytes.extend_from_slice(&45000001u32.to_be_bytes());
        bytes.extend_from_slice(&(4u32).to_be_bytes());
        bytes.extend_from_slice(b"oops");
        assert_eq!(
            ServerMessage::classify(&bytes),
            Ok(Some(ServerMessage::Error {
                code: 45000001,
                message: "oops".to_string()
            }))
        );
    }

    #[test]
    fn classify_error_frame_with_raw_message() {
        let mut bytes = vec![0x11, 0xF0, 0x10, 0x00];
        bytes.extend_from_slice(&7u32.to_be_bytes());
        bytes.extend_from_slice(b"bad request");
        assert_eq!(
            ServerMessage::classify(&bytes),
            Ok(Some(ServerMessage::Error {
                code: 7,
                message: "bad request".to_string()
            }))
        );
    }

    #[test]
    fn classify_unknown_type_is_discarded() {
        let bytes = vec![0x11, 0x50, 0x10, 0x00, 0, 0, 0, 1];
        assert_eq!(ServerMessage::classify(&bytes), Ok(None));
    }

    #[test]
    fn classify_rejects_undersized_frame() {
        assert!(matches!(
            ServerMessage::classify(&[0x11, 0x94, 0x10]),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn classify_rejects_malformed_event_frame() {
        let mut bytes = server_frame(0x9, event::SESSION_STARTED, "sid", b"{}");
        bytes.pop();
        assert!(ServerMessage::classify(&bytes).is_err());
    }

    #[test]
    fn message_type_nibbles() {
        assert_eq!(MessageType::from_header(&CLIENT_HEADER), MessageType::FullClientRequest);
        assert_eq!(MessageType::from_header(&[0x11, 0xB4]).nibble(), 0xB);
        assert_eq!(MessageType::from_header(&[0x11]), MessageType::Unknown(0));
    }
}
