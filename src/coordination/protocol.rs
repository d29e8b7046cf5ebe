//! ZooKeeper Wire Protocol Implementation
//!
//! Handles encoding and decoding of ZooKeeper (jute) protocol records.
//! Every frame on the wire is a 4-byte big-endian length prefix followed by
//! the record body; the framing itself is handled by the transport layer,
//! this module only deals with record bodies.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Request opcodes
pub mod op {
    pub const CREATE: i32 = 1;
    pub const DELETE: i32 = 2;
    pub const EXISTS: i32 = 3;
    pub const GET_CHILDREN: i32 = 8;
    pub const PING: i32 = 11;
    pub const CLOSE_SESSION: i32 = -11;
}

/// Reserved transaction ids used by the server
pub mod xid {
    /// Watch notification pushed by the server
    pub const NOTIFICATION: i32 = -1;
    /// Keepalive ping
    pub const PING: i32 = -2;
}

/// Server error codes carried in reply headers
pub mod error_code {
    pub const OK: i32 = 0;
    pub const CONNECTION_LOSS: i32 = -4;
    pub const NO_NODE: i32 = -101;
    pub const NOT_EMPTY: i32 = -111;
    pub const NODE_EXISTS: i32 = -110;
    pub const SESSION_EXPIRED: i32 = -112;
}

/// Node creation flags
pub mod create_flags {
    pub const EPHEMERAL: i32 = 1;
    pub const SEQUENTIAL: i32 = 2;
    pub const EPHEMERAL_SEQUENTIAL: i32 = EPHEMERAL | SEQUENTIAL;
}

// ============ Primitive codecs ============

fn need(buf: &impl Buf, n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::Protocol(format!(
            "truncated record: need {} bytes for {}",
            n, what
        )));
    }
    Ok(())
}

pub fn get_i32(buf: &mut impl Buf, what: &str) -> Result<i32> {
    need(buf, 4, what)?;
    Ok(buf.get_i32())
}

pub fn get_i64(buf: &mut impl Buf, what: &str) -> Result<i64> {
    need(buf, 8, what)?;
    Ok(buf.get_i64())
}

/// Read a length-prefixed UTF-8 string; a negative length means null and
/// decodes to an empty string
pub fn get_string(buf: &mut impl Buf, what: &str) -> Result<String> {
    let len = get_i32(buf, what)?;
    if len < 0 {
        return Ok(String::new());
    }
    let len = len as usize;
    need(buf, len, what)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|e| Error::Protocol(format!("invalid utf-8 in {}: {}", what, e)))
}

/// Read a length-prefixed byte buffer; a negative length means null
pub fn get_buffer(buf: &mut impl Buf, what: &str) -> Result<Vec<u8>> {
    let len = get_i32(buf, what)?;
    if len < 0 {
        return Ok(Vec::new());
    }
    let len = len as usize;
    need(buf, len, what)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

pub fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

pub fn put_buffer(buf: &mut BytesMut, b: &[u8]) {
    buf.put_i32(b.len() as i32);
    buf.put_slice(b);
}

// ============ Session handshake ============

/// Session establishment request, sent as the first frame with no header
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub protocol_version: i32,
    pub last_zxid_seen: i64,
    pub timeout_ms: i32,
    pub session_id: i64,
    pub passwd: Vec<u8>,
}

impl ConnectRequest {
    /// Build a fresh-session request with the given requested timeout
    pub fn new(timeout_ms: i32) -> Self {
        Self {
            protocol_version: 0,
            last_zxid_seen: 0,
            timeout_ms,
            session_id: 0,
            passwd: vec![0u8; 16],
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(44);
        buf.put_i32(self.protocol_version);
        buf.put_i64(self.last_zxid_seen);
        buf.put_i32(self.timeout_ms);
        buf.put_i64(self.session_id);
        put_buffer(&mut buf, &self.passwd);
        buf.freeze()
    }
}

/// Session establishment response
#[derive(Debug, Clone)]
pub struct ConnectResponse {
    pub protocol_version: i32,
    pub timeout_ms: i32,
    pub session_id: i64,
    pub passwd: Vec<u8>,
}

impl ConnectResponse {
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self {
            protocol_version: get_i32(buf, "connect protocol_version")?,
            timeout_ms: get_i32(buf, "connect timeout")?,
            session_id: get_i64(buf, "connect session_id")?,
            passwd: get_buffer(buf, "connect passwd")?,
        })
    }

    /// A non-positive negotiated timeout means the server rejected the
    /// session
    pub fn is_valid(&self) -> bool {
        self.timeout_ms > 0
    }
}

// ============ Request/reply headers ============

#[derive(Debug, Clone, Copy)]
pub struct RequestHeader {
    pub xid: i32,
    pub op: i32,
}

impl RequestHeader {
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_i32(self.xid);
        buf.put_i32(self.op);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReplyHeader {
    pub xid: i32,
    pub zxid: i64,
    pub err: i32,
}

impl ReplyHeader {
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self {
            xid: get_i32(buf, "reply xid")?,
            zxid: get_i64(buf, "reply zxid")?,
            err: get_i32(buf, "reply err")?,
        })
    }
}

// ============ Operations ============

/// Encode a create request body (header not included).
///
/// The ACL is fixed to world:anyone with all permissions; the election
/// parent and candidate nodes carry no data worth protecting.
pub fn encode_create(buf: &mut BytesMut, path: &str, data: &[u8], flags: i32) {
    const PERMS_ALL: i32 = 0x1f;
    put_string(buf, path);
    put_buffer(buf, data);
    buf.put_i32(1); // one ACL entry
    buf.put_i32(PERMS_ALL);
    put_string(buf, "world");
    put_string(buf, "anyone");
    buf.put_i32(flags);
}

/// Decode a create response: the server-assigned path
pub fn decode_create_response(buf: &mut impl Buf) -> Result<String> {
    get_string(buf, "create path")
}

/// Encode a delete request body; version -1 matches any node version
pub fn encode_delete(buf: &mut BytesMut, path: &str) {
    put_string(buf, path);
    buf.put_i32(-1);
}

/// Encode an exists request body
pub fn encode_exists(buf: &mut BytesMut, path: &str, watch: bool) {
    put_string(buf, path);
    buf.put_u8(watch as u8);
}

/// Encode a get-children request body
pub fn encode_get_children(buf: &mut BytesMut, path: &str, watch: bool) {
    put_string(buf, path);
    buf.put_u8(watch as u8);
}

/// Decode a get-children response: the child name vector
pub fn decode_children(buf: &mut impl Buf) -> Result<Vec<String>> {
    let count = get_i32(buf, "children count")?;
    if count < 0 {
        return Ok(Vec::new());
    }
    let mut children = Vec::with_capacity(count as usize);
    for _ in 0..count {
        children.push(get_string(buf, "child name")?);
    }
    Ok(children)
}

// ============ Watch events ============

/// Watch notification kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Session state change (connected, expired, ...)
    SessionState,
    NodeCreated,
    NodeDeleted,
    DataChanged,
    ChildrenChanged,
    Other(i32),
}

impl From<i32> for EventKind {
    fn from(event_type: i32) -> Self {
        match event_type {
            -1 => EventKind::SessionState,
            1 => EventKind::NodeCreated,
            2 => EventKind::NodeDeleted,
            3 => EventKind::DataChanged,
            4 => EventKind::ChildrenChanged,
            other => EventKind::Other(other),
        }
    }
}

/// Session states carried by SessionState events
pub mod keeper_state {
    pub const DISCONNECTED: i32 = 0;
    pub const SYNC_CONNECTED: i32 = 3;
    pub const EXPIRED: i32 = -112;
}

/// A decoded watch notification, delivered with xid -1
#[derive(Debug, Clone)]
pub struct WatchedEvent {
    pub kind: EventKind,
    pub state: i32,
    pub path: String,
}

impl WatchedEvent {
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        let event_type = get_i32(buf, "event type")?;
        Ok(Self {
            kind: EventKind::from(event_type),
            state: get_i32(buf, "event state")?,
            path: get_string(buf, "event path")?,
        })
    }
}

/// Map a non-zero reply header error to a crate error
pub fn server_error(err: i32) -> Error {
    match err {
        error_code::SESSION_EXPIRED => Error::SessionExpired,
        error_code::CONNECTION_LOSS => Error::Coordination("connection loss".to_string()),
        other => Error::ServerError(other),
    }
}
