//! Single-pass IPC queue
//!
//! Items are appended at the write cursor and consumed at the read cursor.
//! The queue does not wrap around: space is reclaimed only when released
//! items form a prefix of the buffer, or when trailing items are released
//! after everything has been read. Once every written item is released all
//! cursors return to zero.
//!
//! ```text
//! 0        fptr         rptr             wptr          capacity
//! |released| read, live  | unread         | free space  |
//! ```

use crate::message::{item_size, IpcMessage, ItemHeader, ITEM_HEADER_SIZE};
use crate::IpcError;
use core_types::TaskId;
use log::{debug, warn};

/// Receive buffer for one `(target, origin)` pair
#[derive(Debug, Clone)]
pub struct IpcQueue {
    buffer: Vec<u8>,
    /// End of the released prefix
    fptr: usize,
    /// Next unread item
    rptr: usize,
    /// End of written data
    wptr: usize,
}

impl IpcQueue {
    /// Creates an empty queue; capacity is rounded down to a multiple of 4
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity & !3],
            fptr: 0,
            rptr: 0,
            wptr: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes still available for new items
    pub fn free_space(&self) -> usize {
        self.capacity() - self.wptr
    }

    /// Returns true if an unread item is queued
    pub fn has_unread(&self) -> bool {
        self.rptr < self.wptr
    }

    /// Returns true if no item, read or unread, occupies the buffer
    pub fn is_idle(&self) -> bool {
        self.wptr == 0
    }

    /// Appends a message
    ///
    /// # Errors
    /// `QueueFull` if header plus aligned payload exceed the free space.
    /// An item that fills the queue exactly is accepted.
    pub fn push(&mut self, remote: TaskId, fn_id: u16, data: &[u8]) -> Result<(), IpcError> {
        let needed = item_size(data.len());
        let free = self.free_space();
        if needed > free {
            warn!(
                "IPC queue full: fn {:#06x} needs {} bytes, {} free",
                fn_id, needed, free
            );
            return Err(IpcError::QueueFull { needed, free });
        }

        let start = self.wptr;
        let header = ItemHeader::live(remote, fn_id, data.len() as u32);
        self.buffer[start..start + ITEM_HEADER_SIZE].copy_from_slice(&header.encode());
        let payload = start + ITEM_HEADER_SIZE;
        self.buffer[payload..payload + data.len()].copy_from_slice(data);
        self.buffer[payload + data.len()..start + needed].fill(0);
        self.wptr = start + needed;

        debug!("IPC push fn={} size={} at {}", fn_id, data.len(), start);
        Ok(())
    }

    /// Takes the next unread item without blocking
    ///
    /// # Errors
    /// `Empty` if nothing is queued, `Corrupted` if the stored header does
    /// not describe an item that fits between the read and write cursors.
    pub fn try_pop(&mut self) -> Result<IpcMessage, IpcError> {
        if !self.has_unread() {
            return Err(IpcError::Empty);
        }

        let offset = self.rptr;
        let corrupted = IpcError::Corrupted { offset };
        let header = self.header_at(offset).ok_or(corrupted.clone())?;
        let size = header.size as usize;
        let total = size
            .checked_add(ITEM_HEADER_SIZE + 3)
            .map(|padded| padded & !3)
            .filter(|total| *total <= self.wptr - offset)
            .ok_or(corrupted.clone())?;
        if header.free {
            return Err(corrupted);
        }
        let remote = TaskId::new(header.remote).ok_or(corrupted)?;

        let payload = offset + ITEM_HEADER_SIZE;
        let data = self.buffer[payload..payload + size].to_vec();
        self.rptr = offset + total;

        Ok(IpcMessage {
            remote,
            fn_id: header.fn_id,
            offset,
            data,
        })
    }

    /// Releases a received message and reclaims space where possible
    ///
    /// # Errors
    /// `UnknownMessage` if `message` is not a live, already-read item.
    pub fn free(&mut self, message: &IpcMessage) -> Result<(), IpcError> {
        let mut offset = self.fptr;
        while offset < self.rptr {
            let header = self
                .header_at(offset)
                .ok_or(IpcError::Corrupted { offset })?;
            if offset == message.offset {
                if header.free {
                    return Err(IpcError::UnknownMessage);
                }
                self.buffer[offset] = 1;
                self.compact();
                return Ok(());
            }
            offset += item_size(header.size as usize);
        }
        Err(IpcError::UnknownMessage)
    }

    /// Drops every item and rewinds all cursors
    pub fn reset(&mut self) {
        self.fptr = 0;
        self.rptr = 0;
        self.wptr = 0;
    }

    /// Overwrites the declared size of the next unread item
    ///
    /// Fault injection hook; returns false if nothing is queued.
    pub fn corrupt_next_size(&mut self, size: u32) -> bool {
        if !self.has_unread() {
            return false;
        }
        let at = self.rptr + 4;
        self.buffer[at..at + 4].copy_from_slice(&size.to_le_bytes());
        true
    }

    fn header_at(&self, offset: usize) -> Option<ItemHeader> {
        let bytes = self.buffer.get(offset..offset + ITEM_HEADER_SIZE)?;
        let bytes: &[u8; ITEM_HEADER_SIZE] = bytes.try_into().ok()?;
        Some(ItemHeader::decode(bytes))
    }

    fn compact(&mut self) {
        while self.fptr < self.rptr {
            match self.header_at(self.fptr) {
                Some(header) if header.free => self.fptr += item_size(header.size as usize),
                _ => break,
            }
        }

        if self.fptr >= self.wptr {
            self.reset();
            return;
        }

        if self.rptr == self.wptr {
            // Everything is read; released items at the tail can be rewritten
            let mut offset = self.fptr;
            let mut live_end = self.fptr;
            while offset < self.rptr {
                let Some(header) = self.header_at(offset) else {
                    break;
                };
                offset += item_size(header.size as usize);
                if !header.free {
                    live_end = offset;
                }
            }
            self.rptr = live_end;
            self.wptr = live_end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn task(n: u8) -> TaskId {
        TaskId::new(n).unwrap()
    }

    #[test]
    fn test_push_pop_free() {
        let mut queue = IpcQueue::new(64);
        queue.push(task(2), 42, b"hi").unwrap();
        assert!(queue.has_unread());

        let msg = queue.try_pop().unwrap();
        assert_eq!(msg.remote, task(2));
        assert_eq!(msg.fn_id, 42);
        assert_eq!(msg.data, b"hi");
        assert_eq!(queue.try_pop(), Err(IpcError::Empty));

        queue.free(&msg).unwrap();
        assert!(queue.is_idle());
        assert_eq!(queue.free_space(), 64);
    }

    #[test]
    fn test_item_exactly_filling_queue_is_accepted() {
        let mut queue = IpcQueue::new(32);
        queue.push(task(1), 1, &[0xAB; 24]).unwrap();
        assert_eq!(queue.free_space(), 0);
        assert_eq!(
            queue.push(task(1), 1, &[]),
            Err(IpcError::QueueFull { needed: 8, free: 0 })
        );
    }

    #[test]
    fn test_item_one_byte_too_large_is_rejected() {
        let mut queue = IpcQueue::new(32);
        assert_eq!(
            queue.push(task(1), 1, &[0; 25]),
            Err(IpcError::QueueFull { needed: 36, free: 32 })
        );
        assert!(queue.is_idle());
    }

    #[test]
    fn test_receive_without_free_keeps_space() {
        let mut queue = IpcQueue::new(32);
        queue.push(task(1), 1, &[0; 8]).unwrap();
        let _ = queue.try_pop().unwrap();
        assert_eq!(queue.free_space(), 16);
    }

    #[test]
    fn test_free_out_of_order() {
        let mut queue = IpcQueue::new(64);
        queue.push(task(1), 1, b"a").unwrap();
        queue.push(task(1), 2, b"b").unwrap();
        let first = queue.try_pop().unwrap();
        let second = queue.try_pop().unwrap();

        queue.free(&second).unwrap();
        // Trailing released item is reclaimed even though the first is live
        assert_eq!(queue.free_space(), 64 - 12);

        queue.free(&first).unwrap();
        assert!(queue.is_idle());
    }

    #[test]
    fn test_free_keeps_unread_items() {
        let mut queue = IpcQueue::new(64);
        queue.push(task(1), 1, b"a").unwrap();
        queue.push(task(1), 2, b"b").unwrap();
        let first = queue.try_pop().unwrap();
        queue.free(&first).unwrap();

        assert!(queue.has_unread());
        let second = queue.try_pop().unwrap();
        assert_eq!(second.fn_id, 2);
        queue.free(&second).unwrap();
        assert!(queue.is_idle());
    }

    #[test]
    fn test_double_free_rejected() {
        let mut queue = IpcQueue::new(64);
        queue.push(task(1), 1, b"a").unwrap();
        queue.push(task(1), 2, b"b").unwrap();
        let first = queue.try_pop().unwrap();
        let _second = queue.try_pop().unwrap();
        queue.free(&first).unwrap();
        assert_eq!(queue.free(&first), Err(IpcError::UnknownMessage));
    }

    #[test]
    fn test_free_of_unread_item_rejected() {
        let mut queue = IpcQueue::new(64);
        queue.push(task(1), 1, b"a").unwrap();
        let fake = IpcMessage {
            remote: task(1),
            fn_id: 1,
            offset: 0,
            data: b"a".to_vec(),
        };
        assert_eq!(queue.free(&fake), Err(IpcError::UnknownMessage));
    }

    #[test]
    fn test_corrupted_size_detected() {
        let mut queue = IpcQueue::new(64);
        queue.push(task(1), 1, b"abcd").unwrap();
        assert!(queue.corrupt_next_size(1000));
        assert_eq!(queue.try_pop(), Err(IpcError::Corrupted { offset: 0 }));
    }

    #[test]
    fn test_huge_size_does_not_overflow() {
        let mut queue = IpcQueue::new(64);
        queue.push(task(1), 1, b"abcd").unwrap();
        queue.corrupt_next_size(u32::MAX);
        assert_eq!(queue.try_pop(), Err(IpcError::Corrupted { offset: 0 }));
    }

    #[test]
    fn test_reset_discards_items() {
        let mut queue = IpcQueue::new(64);
        queue.push(task(1), 1, b"abcd").unwrap();
        queue.reset();
        assert_eq!(queue.try_pop(), Err(IpcError::Empty));
        assert_eq!(queue.free_space(), 64);
    }

    proptest! {
        #[test]
        fn prop_round_trip_any_fitting_payload(
            fn_id in any::<u16>(),
            payload in proptest::collection::vec(any::<u8>(), 0..=120),
        ) {
            let mut queue = IpcQueue::new(128);
            queue.push(task(3), fn_id, &payload).unwrap();
            let msg = queue.try_pop().unwrap();
            prop_assert_eq!(msg.fn_id, fn_id);
            prop_assert_eq!(&msg.data, &payload);
            queue.free(&msg).unwrap();
            prop_assert!(queue.is_idle());
        }
    }
}
