//! Envelope codec for the daemon's local socket.
//!
//! Both directions carry a stream of length-prefixed binary frames: a `u32` big-endian payload
//! length followed by the payload. Payloads are tagged unions encoded field by field: a tag byte,
//! strings as `u32` big-endian byte length + UTF-8, sequences as `u32` big-endian count +
//! elements, client ids as `u64` big-endian, timestamps as RFC 3339 text. Tag and field order are
//! part of the protocol and must not change.

use chrono::DateTime;
use libhirc_common::{ChanData, ChanId, ChanMsg, ClientId, MsgBody};

use std::fmt;

/// Frames larger than this are rejected at decode time. A peer that claims a larger frame is
/// broken or hostile; either way the session is torn down.
pub const MAX_FRAME_LEN: usize = 1 << 24;

/// Daemon to client messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMsg {
    /// First message of every session: the client's id and the channels the daemon knows about.
    Hello {
        client_id: ClientId,
        chans: Vec<ChanId>,
    },
    /// Reply to `Subscribe`: a snapshot per requested channel.
    Subscriptions { chans: Vec<(ChanId, ChanData)> },
    /// A chat message arrived on (or was locally echoed to) a subscribed channel.
    NewMessage { target: ChanId, msg: ChanMsg },
    /// The topic of a subscribed channel changed.
    NewTopic { target: ChanId, msg: ChanMsg },
    /// The topic a channel already had when the server told us about it.
    InitialTopic { target: ChanId, topic: String },
}

/// Client to daemon commands, the payload of a `DaemonRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonMsg {
    Subscribe { chans: Vec<ChanId> },
    SendMessage { target: ChanId, text: String },
    Goodbye,
}

/// Client to daemon envelope. `source` is what the client believes its id to be; the daemon
/// trusts the session it read the frame from, not this field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonRequest {
    pub source: ClientId,
    pub msg: DaemonMsg,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload ended before the advertised fields did.
    UnexpectedEof,
    /// An unknown union tag.
    BadTag(u8),
    /// A string field was not UTF-8.
    BadUtf8,
    /// A timestamp field was not RFC 3339.
    BadTimestamp,
    /// The frame header advertised more than `MAX_FRAME_LEN` bytes.
    Oversize(usize),
    /// The payload had bytes left over after the last field.
    TrailingBytes(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "payload ended mid-field"),
            DecodeError::BadTag(tag) => write!(f, "unknown envelope tag {}", tag),
            DecodeError::BadUtf8 => write!(f, "string field is not UTF-8"),
            DecodeError::BadTimestamp => write!(f, "timestamp field is not RFC 3339"),
            DecodeError::Oversize(len) => write!(f, "frame of {} bytes exceeds limit", len),
            DecodeError::TrailingBytes(n) => write!(f, "{} trailing bytes after payload", n),
        }
    }
}

//
// Encoding
//

// ClientMsg tags, in wire order.
const TAG_HELLO: u8 = 0;
const TAG_SUBSCRIPTIONS: u8 = 1;
const TAG_NEW_MESSAGE: u8 = 2;
const TAG_NEW_TOPIC: u8 = 3;
const TAG_INITIAL_TOPIC: u8 = 4;

// DaemonMsg tags, in wire order.
const TAG_SUBSCRIBE: u8 = 0;
const TAG_SEND_MESSAGE: u8 = 1;
const TAG_GOODBYE: u8 = 2;

// ChanMsg tags.
const TAG_CHAT: u8 = 0;
const TAG_TOPIC: u8 = 1;

/// Encode a daemon-to-client message as one complete frame, length prefix included.
pub fn encode_client_msg(msg: &ClientMsg) -> Vec<u8> {
    let mut buf = vec![0; 4];
    match msg {
        ClientMsg::Hello { client_id, chans } => {
            buf.push(TAG_HELLO);
            put_u64(&mut buf, client_id.0);
            put_u32(&mut buf, chans.len() as u32);
            for chan in chans {
                put_chan_id(&mut buf, chan);
            }
        }
        ClientMsg::Subscriptions { chans } => {
            buf.push(TAG_SUBSCRIPTIONS);
            put_u32(&mut buf, chans.len() as u32);
            for (chan, data) in chans {
                put_chan_id(&mut buf, chan);
                put_chan_data(&mut buf, data);
            }
        }
        ClientMsg::NewMessage { target, msg } => {
            buf.push(TAG_NEW_MESSAGE);
            put_chan_id(&mut buf, target);
            put_chan_msg(&mut buf, msg);
        }
        ClientMsg::NewTopic { target, msg } => {
            buf.push(TAG_NEW_TOPIC);
            put_chan_id(&mut buf, target);
            put_chan_msg(&mut buf, msg);
        }
        ClientMsg::InitialTopic { target, topic } => {
            buf.push(TAG_INITIAL_TOPIC);
            put_chan_id(&mut buf, target);
            put_str(&mut buf, topic);
        }
    }
    finish_frame(buf)
}

/// Encode a client-to-daemon request as one complete frame, length prefix included.
pub fn encode_daemon_request(req: &DaemonRequest) -> Vec<u8> {
    let mut buf = vec![0; 4];
    put_u64(&mut buf, req.source.0);
    match &req.msg {
        DaemonMsg::Subscribe { chans } => {
            buf.push(TAG_SUBSCRIBE);
            put_u32(&mut buf, chans.len() as u32);
            for chan in chans {
                put_chan_id(&mut buf, chan);
            }
        }
        DaemonMsg::SendMessage { target, text } => {
            buf.push(TAG_SEND_MESSAGE);
            put_chan_id(&mut buf, target);
            put_str(&mut buf, text);
        }
        DaemonMsg::Goodbye => {
            buf.push(TAG_GOODBYE);
        }
    }
    finish_frame(buf)
}

fn finish_frame(mut buf: Vec<u8>) -> Vec<u8> {
    let payload_len = (buf.len() - 4) as u32;
    buf[0..4].copy_from_slice(&payload_len.to_be_bytes());
    buf
}

fn put_u32(buf: &mut Vec<u8>, n: u32) {
    buf.extend_from_slice(&n.to_be_bytes());
}

fn put_u64(buf: &mut Vec<u8>, n: u64) {
    buf.extend_from_slice(&n.to_be_bytes());
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn put_chan_id(buf: &mut Vec<u8>, chan: &ChanId) {
    put_str(buf, &chan.serv);
    put_str(buf, chan.chan.display());
}

fn put_msg_body(buf: &mut Vec<u8>, body: &MsgBody) {
    put_str(buf, &body.text);
    put_str(buf, &body.author);
    put_str(buf, &body.ts.to_rfc3339());
}

fn put_chan_msg(buf: &mut Vec<u8>, msg: &ChanMsg) {
    match msg {
        ChanMsg::Chat(body) => {
            buf.push(TAG_CHAT);
            put_msg_body(buf, body);
        }
        ChanMsg::Topic(body) => {
            buf.push(TAG_TOPIC);
            put_msg_body(buf, body);
        }
    }
}

fn put_chan_data(buf: &mut Vec<u8>, data: &ChanData) {
    put_u32(buf, data.nicks.len() as u32);
    for nick in &data.nicks {
        put_str(buf, nick);
    }
    put_u32(buf, data.msgs.len() as u32);
    for msg in &data.msgs {
        put_chan_msg(buf, msg);
    }
    put_str(buf, &data.topic);
}

//
// Decoding
//

/// Try to read a daemon-to-client message off a read buffer. Returns `None` when the buffer does
/// not yet hold a complete frame; the frame is drained from the buffer otherwise, whether or not
/// its payload decoded.
pub fn parse_client_msg(buf: &mut Vec<u8>) -> Option<Result<ClientMsg, DecodeError>> {
    let payload = match take_frame(buf) {
        None => return None,
        Some(Err(err)) => return Some(Err(err)),
        Some(Ok(payload)) => payload,
    };
    Some(decode_client_msg(&payload))
}

/// `parse_client_msg` for the other direction.
pub fn parse_daemon_request(buf: &mut Vec<u8>) -> Option<Result<DaemonRequest, DecodeError>> {
    let payload = match take_frame(buf) {
        None => return None,
        Some(Err(err)) => return Some(Err(err)),
        Some(Ok(payload)) => payload,
    };
    Some(decode_daemon_request(&payload))
}

fn take_frame(buf: &mut Vec<u8>) -> Option<Result<Vec<u8>, DecodeError>> {
    if buf.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Some(Err(DecodeError::Oversize(len)));
    }
    if buf.len() < 4 + len {
        return None;
    }
    let payload = buf[4..4 + len].to_vec();
    buf.drain(0..4 + len);
    Some(Ok(payload))
}

fn decode_client_msg(payload: &[u8]) -> Result<ClientMsg, DecodeError> {
    let mut rd = Reader::new(payload);
    let msg = match rd.take_u8()? {
        TAG_HELLO => {
            let client_id = ClientId(rd.take_u64()?);
            let count = rd.take_u32()?;
            // Counts come off the wire; don't pre-allocate what a broken peer claims.
            let mut chans = Vec::new();
            for _ in 0..count {
                chans.push(rd.take_chan_id()?);
            }
            ClientMsg::Hello { client_id, chans }
        }
        TAG_SUBSCRIPTIONS => {
            let count = rd.take_u32()?;
            let mut chans = Vec::new();
            for _ in 0..count {
                let chan = rd.take_chan_id()?;
                let data = rd.take_chan_data()?;
                chans.push((chan, data));
            }
            ClientMsg::Subscriptions { chans }
        }
        TAG_NEW_MESSAGE => ClientMsg::NewMessage {
            target: rd.take_chan_id()?,
            msg: rd.take_chan_msg()?,
        },
        TAG_NEW_TOPIC => ClientMsg::NewTopic {
            target: rd.take_chan_id()?,
            msg: rd.take_chan_msg()?,
        },
        TAG_INITIAL_TOPIC => ClientMsg::InitialTopic {
            target: rd.take_chan_id()?,
            topic: rd.take_str()?,
        },
        tag => return Err(DecodeError::BadTag(tag)),
    };
    rd.finish()?;
    Ok(msg)
}

fn decode_daemon_request(payload: &[u8]) -> Result<DaemonRequest, DecodeError> {
    let mut rd = Reader::new(payload);
    let source = ClientId(rd.take_u64()?);
    let msg = match rd.take_u8()? {
        TAG_SUBSCRIBE => {
            let count = rd.take_u32()?;
            let mut chans = Vec::new();
            for _ in 0..count {
                chans.push(rd.take_chan_id()?);
            }
            DaemonMsg::Subscribe { chans }
        }
        TAG_SEND_MESSAGE => DaemonMsg::SendMessage {
            target: rd.take_chan_id()?,
            text: rd.take_str()?,
        },
        TAG_GOODBYE => DaemonMsg::Goodbye,
        tag => return Err(DecodeError::BadTag(tag)),
    };
    rd.finish()?;
    Ok(DaemonRequest { source, msg })
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() - self.pos < n {
            return Err(DecodeError::UnexpectedEof);
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.take(8)?;
        let mut arr = [0; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }

    fn take_str(&mut self) -> Result<String, DecodeError> {
        let len = self.take_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::BadUtf8)
    }

    fn take_chan_id(&mut self) -> Result<ChanId, DecodeError> {
        let serv = self.take_str()?;
        let chan = self.take_str()?;
        Ok(ChanId {
            serv,
            chan: libhirc_common::ChanName::new(chan),
        })
    }

    fn take_msg_body(&mut self) -> Result<MsgBody, DecodeError> {
        let text = self.take_str()?;
        let author = self.take_str()?;
        let ts = self.take_str()?;
        let ts = DateTime::parse_from_rfc3339(&ts).map_err(|_| DecodeError::BadTimestamp)?;
        Ok(MsgBody { text, author, ts })
    }

    fn take_chan_msg(&mut self) -> Result<ChanMsg, DecodeError> {
        match self.take_u8()? {
            TAG_CHAT => Ok(ChanMsg::Chat(self.take_msg_body()?)),
            TAG_TOPIC => Ok(ChanMsg::Topic(self.take_msg_body()?)),
            tag => Err(DecodeError::BadTag(tag)),
        }
    }

    fn take_chan_data(&mut self) -> Result<ChanData, DecodeError> {
        let nick_count = self.take_u32()?;
        let mut nicks = Vec::new();
        for _ in 0..nick_count {
            nicks.push(self.take_str()?);
        }
        let msg_count = self.take_u32()?;
        let mut msgs = Vec::new();
        for _ in 0..msg_count {
            msgs.push(self.take_chan_msg()?);
        }
        let topic = self.take_str()?;
        Ok(ChanData { nicks, msgs, topic })
    }

    fn finish(self) -> Result<(), DecodeError> {
        let rest = self.buf.len() - self.pos;
        if rest != 0 {
            return Err(DecodeError::TrailingBytes(rest));
        }
        Ok(())
    }
}
