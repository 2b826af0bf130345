//! Frame types and encoding/decoding for the DZRP envelope.

/// Bytes needed before a request header can be parsed: length, seq, cmd
pub const HEADER_LEN: usize = 6;

/// Size of the little-endian length prefix
const LEN_PREFIX: usize = 4;

/// Default upper bound on a frame's `len` field.
///
/// Large enough for a 64K `WRITE_MEM` plus its header fields.
pub const DEFAULT_MAX_FRAME_LEN: usize = 0x1_0010;

/// Protocol error types
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// I/O error during read/write
    #[error("I/O error: {0}")]
    Io(std::io::Error),
    /// Command byte outside the DZRP command table
    #[error("unknown command: 0x{0:02x}")]
    UnknownCommand(u8),
    /// A handler read past the end of its payload
    #[error("payload underrun: wanted {wanted} bytes, {remaining} remaining")]
    Underrun { wanted: usize, remaining: usize },
    /// Frame length above the configured maximum
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    /// Malformed header or payload
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// A new request header arrived before the previous request was answered
    #[error("request received while the response to seq {0} is still owed")]
    ResponseOwed(u8),
    /// Connection closed
    #[error("connection closed")]
    ConnectionClosed,
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(e)
        }
    }
}

fn read_len(data: &[u8]) -> usize {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize
}

fn frame(seq_num: u8, head: Option<u8>, payload: &[u8]) -> Vec<u8> {
    let body_len = 1 + head.map_or(0, |_| 1) + payload.len();
    let mut out = Vec::with_capacity(LEN_PREFIX + body_len);
    out.extend_from_slice(&(body_len as u32).to_le_bytes());
    out.push(seq_num);
    if let Some(b) = head {
        out.push(b);
    }
    out.extend_from_slice(payload);
    out
}

/// A DZRP request received from the debugger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub seq_num: u8,
    pub cmd_id: u8,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(seq_num: u8, cmd_id: impl Into<u8>, payload: Vec<u8>) -> Self {
        Request {
            seq_num,
            cmd_id: cmd_id.into(),
            payload,
        }
    }

    /// Parse the `(len, seq, cmd)` header without consuming anything.
    ///
    /// Returns `None` until [`HEADER_LEN`] bytes are available.
    pub fn peek_header(data: &[u8]) -> Option<(usize, u8, u8)> {
        if data.len() < HEADER_LEN {
            return None;
        }
        Some((read_len(data), data[4], data[5]))
    }

    /// Decode one request from the front of `data`.
    ///
    /// Returns `Ok(None)` while the frame is still incomplete, otherwise the
    /// request and the number of bytes it occupied.
    pub fn decode(data: &[u8], max_len: usize) -> Result<Option<(Request, usize)>, ProtocolError> {
        let Some((len, seq_num, cmd_id)) = Self::peek_header(data) else {
            return Ok(None);
        };
        if len < 2 {
            return Err(ProtocolError::InvalidFormat(format!(
                "request length {} shorter than its header",
                len
            )));
        }
        if len > max_len {
            return Err(ProtocolError::FrameTooLarge(len));
        }

        let total_len = LEN_PREFIX + len;
        if data.len() < total_len {
            return Ok(None);
        }

        let request = Request {
            seq_num,
            cmd_id,
            payload: data[HEADER_LEN..total_len].to_vec(),
        };
        Ok(Some((request, total_len)))
    }

    /// Encode to wire format (client side)
    pub fn encode(&self) -> Vec<u8> {
        frame(self.seq_num, Some(self.cmd_id), &self.payload)
    }

    /// Build the response answering this request
    pub fn response(&self, payload: Vec<u8>) -> Response {
        Response {
            seq_num: self.seq_num,
            payload,
        }
    }
}

/// A reply, or a notification when `seq_num` is 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub seq_num: u8,
    pub payload: Vec<u8>,
}

impl Response {
    /// Encode to wire format
    pub fn encode(&self) -> Vec<u8> {
        frame(self.seq_num, None, &self.payload)
    }

    /// Decode one response or notification from the front of `data` (client side)
    pub fn decode(data: &[u8]) -> Result<Option<(Response, usize)>, ProtocolError> {
        if data.len() < LEN_PREFIX + 1 {
            return Ok(None);
        }
        let len = read_len(data);
        if len == 0 {
            return Err(ProtocolError::InvalidFormat(
                "zero-length response".to_string(),
            ));
        }
        let total_len = LEN_PREFIX + len;
        if data.len() < total_len {
            return Ok(None);
        }
        let response = Response {
            seq_num: data[LEN_PREFIX],
            payload: data[LEN_PREFIX + 1..total_len].to_vec(),
        };
        Ok(Some((response, total_len)))
    }

    /// True for unsolicited messages
    pub fn is_notification(&self) -> bool {
        self.seq_num == 0
    }
}

/// An unsolicited message from the emulator side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub ntf_id: u8,
    pub payload: Vec<u8>,
}

impl Notification {
    pub fn new(ntf_id: u8, payload: Vec<u8>) -> Self {
        Notification { ntf_id, payload }
    }

    /// Encode to wire format; sequence number is always 0
    pub fn encode(&self) -> Vec<u8> {
        frame(0, Some(self.ntf_id), &self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Command;

    #[test]
    fn test_request_round_trip() {
        let req = Request::new(7, Command::ReadMem, vec![0, 0x00, 0x80, 0x10, 0x00]);
        let bytes = req.encode();
        assert_eq!(&bytes[..6], &[7, 0, 0, 0, 7, 8]);

        let (decoded, consumed) = Request::decode(&bytes, DEFAULT_MAX_FRAME_LEN)
            .unwrap()
            .unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_request_empty_payload() {
        let bytes = [0x02, 0x00, 0x00, 0x00, 0x09, 0x07];
        let (req, consumed) = Request::decode(&bytes, DEFAULT_MAX_FRAME_LEN)
            .unwrap()
            .unwrap();
        assert_eq!(consumed, 6);
        assert_eq!(req.seq_num, 9);
        assert_eq!(req.cmd_id, Command::Pause as u8);
        assert!(req.payload.is_empty());
    }

    #[test]
    fn test_request_incomplete() {
        let bytes = Request::new(1, Command::WriteMem, vec![1, 2, 3, 4]).encode();
        for cut in 0..bytes.len() {
            assert!(Request::decode(&bytes[..cut], DEFAULT_MAX_FRAME_LEN)
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn test_request_two_frames_in_buffer() {
        let mut bytes = Request::new(1, Command::Init, vec![2, 0, 0, 0]).encode();
        bytes.extend(Request::new(2, Command::Close, vec![]).encode());

        let (first, used) = Request::decode(&bytes, DEFAULT_MAX_FRAME_LEN)
            .unwrap()
            .unwrap();
        assert_eq!(first.seq_num, 1);
        let (second, _) = Request::decode(&bytes[used..], DEFAULT_MAX_FRAME_LEN)
            .unwrap()
            .unwrap();
        assert_eq!(second.seq_num, 2);
        assert_eq!(second.cmd_id, Command::Close as u8);
    }

    #[test]
    fn test_request_too_large() {
        let bytes = [0x00, 0x00, 0x10, 0x00, 0x01, 0x09];
        assert!(matches!(
            Request::decode(&bytes, 0x1000),
            Err(ProtocolError::FrameTooLarge(0x10_0000))
        ));
    }

    #[test]
    fn test_request_short_length() {
        let bytes = [0x01, 0x00, 0x00, 0x00, 0x01, 0x09];
        assert!(matches!(
            Request::decode(&bytes, DEFAULT_MAX_FRAME_LEN),
            Err(ProtocolError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_response() {
        let req = Request::new(5, Command::Init, vec![]);
        let response = req.response(vec![0x01, 0x02]).encode();
        // Length=3 (seq + 2 bytes payload), seq=5, payload
        assert_eq!(response, vec![0x03, 0x00, 0x00, 0x00, 0x05, 0x01, 0x02]);

        let (decoded, used) = Response::decode(&response).unwrap().unwrap();
        assert_eq!(used, response.len());
        assert_eq!(decoded.seq_num, 5);
        assert!(!decoded.is_notification());
    }

    #[test]
    fn test_notification() {
        let ntf = Notification::new(crate::NTF_PAUSE, vec![2, 0x34, 0x12, 0x00, 0]);
        let bytes = ntf.encode();
        assert_eq!(&bytes[..6], &[7, 0, 0, 0, 0, 1]);

        let (decoded, _) = Response::decode(&bytes).unwrap().unwrap();
        assert!(decoded.is_notification());
        assert_eq!(decoded.payload[0], crate::NTF_PAUSE);
        assert_eq!(&decoded.payload[1..], &ntf.payload[..]);
    }

    #[test]
    fn test_eof_maps_to_closed() {
        let err: ProtocolError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }
}
