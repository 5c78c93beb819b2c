//! Item framing
//!
//! Every item in a queue buffer starts with an 8-byte little-endian header
//! followed by the payload padded to a 4-byte boundary:
//!
//! ```text
//! offset 0  u8   free    (0 = live, 1 = released)
//! offset 1  u8   remote  (task id of the other party)
//! offset 2  u16  fn      (function selector)
//! offset 4  u32  size    (payload length in bytes)
//! offset 8  ..   payload
//! ```

use core_types::TaskId;
use serde::{Deserialize, Serialize};

/// Size of the item header in bytes
pub const ITEM_HEADER_SIZE: usize = 8;

/// Buffer space taken by an item carrying `payload_len` bytes
pub const fn item_size(payload_len: usize) -> usize {
    ITEM_HEADER_SIZE + ((payload_len + 3) & !3)
}

/// Decoded item header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHeader {
    pub free: bool,
    /// Raw remote id; validated when the item is received
    pub remote: u8,
    pub fn_id: u16,
    pub size: u32,
}

impl ItemHeader {
    /// Header of a freshly written item
    pub fn live(remote: TaskId, fn_id: u16, size: u32) -> Self {
        Self {
            free: false,
            remote: remote.as_u8(),
            fn_id,
            size,
        }
    }

    pub fn encode(&self) -> [u8; ITEM_HEADER_SIZE] {
        let mut out = [0u8; ITEM_HEADER_SIZE];
        out[0] = self.free as u8;
        out[1] = self.remote;
        out[2..4].copy_from_slice(&self.fn_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; ITEM_HEADER_SIZE]) -> Self {
        Self {
            free: bytes[0] != 0,
            remote: bytes[1],
            fn_id: u16::from_le_bytes([bytes[2], bytes[3]]),
            size: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

/// A received message
///
/// `offset` locates the item inside its queue and is what
/// [`IpcQueue::free`](crate::IpcQueue::free) uses to release it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcMessage {
    pub remote: TaskId,
    pub fn_id: u16,
    pub offset: usize,
    pub data: Vec<u8>,
}
