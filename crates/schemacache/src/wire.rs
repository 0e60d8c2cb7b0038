//! Wire-format header decoding.
//!
//! ```text
//! +-------+---------------------+-------------------
//! | 0x00  | schema id (u32, BE) | payload ...
//! +-------+---------------------+-------------------
//!   byte 0     bytes 1..=4          ignored here
//! ```

use crate::types::SchemaId;

/// Leading byte of every framed message.
pub const MAGIC_BYTE: u8 = 0;

/// Magic byte plus the 4-byte schema id.
pub const HEADER_LEN: usize = 5;

/// Extract the schema id from a framed message.
///
/// Returns `None` when the message is shorter than the header, does not
/// start with [`MAGIC_BYTE`], or carries a non-positive id.
pub fn decode_schema_id(message: &[u8]) -> Option<SchemaId> {
    let header: &[u8; HEADER_LEN] = message.get(..HEADER_LEN)?.try_into().ok()?;
    if header[0] != MAGIC_BYTE {
        return None;
    }
    let id = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    SchemaId::try_from(id).ok().filter(|id| *id > 0)
}

/// Prefix `payload` with the wire header for `id`.
pub fn encode_header(id: SchemaId, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(HEADER_LEN + payload.len());
    framed.push(MAGIC_BYTE);
    framed.extend_from_slice(&id.to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}
