//! VICI wire format.
//!
//! A packet is a type byte, an optional name (commands and events carry
//! one), and a message body. Message bodies are a flat element stream:
//!
//! ```text
//! SECTION_START (1)  name8
//! SECTION_END   (2)
//! KEY_VALUE     (3)  name8 value16
//! LIST_START    (4)  name8
//! LIST_ITEM     (5)  value16
//! LIST_END      (6)
//! ```
//!
//! where `name8` is a 1-byte length-prefixed string and `value16` a
//! 2-byte big-endian length-prefixed blob. Values are decoded as UTF-8
//! strings (lossily) since the consumer is a structured log stream.

use serde_json::{Map, Value};

use crate::ViciError;

/// Hard cap on packet length, matching the daemon's own limit.
pub const MAX_PACKET_LEN: usize = 512 * 1024;

const EL_SECTION_START: u8 = 1;
const EL_SECTION_END: u8 = 2;
const EL_KEY_VALUE: u8 = 3;
const EL_LIST_START: u8 = 4;
const EL_LIST_ITEM: u8 = 5;
const EL_LIST_END: u8 = 6;

/// Packet types used by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    CmdRequest = 0,
    CmdResponse = 1,
    CmdUnknown = 2,
    EventRegister = 3,
    EventUnregister = 4,
    EventConfirm = 5,
    EventUnknown = 6,
    Event = 7,
}

impl PacketType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::CmdRequest),
            1 => Some(Self::CmdResponse),
            2 => Some(Self::CmdUnknown),
            3 => Some(Self::EventRegister),
            4 => Some(Self::EventUnregister),
            5 => Some(Self::EventConfirm),
            6 => Some(Self::EventUnknown),
            7 => Some(Self::Event),
            _ => None,
        }
    }

    /// Whether packets of this type carry a name after the type byte.
    fn is_named(self) -> bool {
        matches!(
            self,
            Self::CmdRequest | Self::EventRegister | Self::EventUnregister | Self::Event
        )
    }
}

/// A decoded packet.
#[derive(Debug)]
pub struct Packet {
    pub ptype: PacketType,
    /// Command or event name for named packet types.
    pub name: Option<String>,
    /// Decoded message body; an empty object for empty bodies.
    pub message: Value,
}

/// Encode a packet body (without the outer length prefix).
pub fn encode_packet(ptype: PacketType, name: Option<&str>) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + name.map_or(0, str::len));
    out.push(ptype as u8);
    if let Some(name) = name {
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
    }
    out
}

/// Decode a packet body (without the outer length prefix).
pub fn parse_packet(data: &[u8]) -> Result<Packet, ViciError> {
    let (&type_byte, rest) = data
        .split_first()
        .ok_or(ViciError::Malformed("empty packet"))?;
    let ptype =
        PacketType::from_byte(type_byte).ok_or(ViciError::Malformed("unknown packet type"))?;

    let (name, body) = if ptype.is_named() {
        let (name, body) = take_name8(rest)?;
        (Some(name), body)
    } else {
        (None, rest)
    };

    Ok(Packet {
        ptype,
        name,
        message: parse_message(body)?,
    })
}

/// Decode a message body into a JSON tree.
pub fn parse_message(data: &[u8]) -> Result<Value, ViciError> {
    let mut cursor = data;
    let root = parse_section(&mut cursor, true)?;
    if !cursor.is_empty() {
        return Err(ViciError::Malformed("trailing bytes after message"));
    }
    Ok(root)
}

fn parse_section(cursor: &mut &[u8], root: bool) -> Result<Value, ViciError> {
    let mut object = Map::new();

    while let Some((&element, rest)) = cursor.split_first() {
        match element {
            EL_SECTION_END if !root => {
                *cursor = rest;
                return Ok(Value::Object(object));
            }
            EL_SECTION_START => {
                let (name, rest) = take_name8(rest)?;
                *cursor = rest;
                let nested = parse_section(cursor, false)?;
                object.insert(name, nested);
            }
            EL_KEY_VALUE => {
                let (name, rest) = take_name8(rest)?;
                let (value, rest) = take_value16(rest)?;
                *cursor = rest;
                object.insert(name, Value::String(value));
            }
            EL_LIST_START => {
                let (name, mut rest) = take_name8(rest)?;
                let mut items = Vec::new();
                loop {
                    let (&element, after) = rest
                        .split_first()
                        .ok_or(ViciError::Malformed("unterminated list"))?;
                    match element {
                        EL_LIST_ITEM => {
                            let (value, after) = take_value16(after)?;
                            items.push(Value::String(value));
                            rest = after;
                        }
                        EL_LIST_END => {
                            rest = after;
                            break;
                        }
                        _ => return Err(ViciError::Malformed("unexpected element in list")),
                    }
                }
                *cursor = rest;
                object.insert(name, Value::Array(items));
            }
            _ => return Err(ViciError::Malformed("unexpected element")),
        }
    }

    if root {
        Ok(Value::Object(object))
    } else {
        Err(ViciError::Malformed("unterminated section"))
    }
}

fn take_name8(data: &[u8]) -> Result<(String, &[u8]), ViciError> {
    let (&len, rest) = data
        .split_first()
        .ok_or(ViciError::Malformed("truncated name length"))?;
    let len = len as usize;
    if rest.len() < len {
        return Err(ViciError::Malformed("truncated name"));
    }
    let (name, rest) = rest.split_at(len);
    Ok((String::from_utf8_lossy(name).into_owned(), rest))
}

fn take_value16(data: &[u8]) -> Result<(String, &[u8]), ViciError> {
    if data.len() < 2 {
        return Err(ViciError::Malformed("truncated value length"));
    }
    let len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let rest = &data[2..];
    if rest.len() < len {
        return Err(ViciError::Malformed("truncated value"));
    }
    let (value, rest) = rest.split_at(len);
    Ok((String::from_utf8_lossy(value).into_owned(), rest))
}
