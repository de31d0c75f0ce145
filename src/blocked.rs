//! Blocked-stream bookkeeping.
//!
//! Streams whose header block needs insertions the table has not seen yet
//! wait in a min-heap keyed by their Required Insert Count, so each batch of
//! insertions wakes exactly the streams that became decodable.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::{Error, Result};

pub(crate) struct BlockedStreams {
    heap: BinaryHeap<Reverse<(u64, u64)>>,
    limit: usize,
}

impl BlockedStreams {
    pub fn new(limit: usize) -> Self {
        Self { heap: BinaryHeap::new(), limit }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Registers `stream` as waiting for `required` insertions.
    pub fn insert(&mut self, required: u64, stream: u64) -> Result<()> {
        if self.heap.len() >= self.limit {
            return Err(Error::BlockedStreamLimitExceeded);
        }
        self.heap.push(Reverse((required, stream)));
        Ok(())
    }

    /// Pops one stream whose requirement is within `ins_count`, if any.
    pub fn pop_ready(&mut self, ins_count: u64) -> Option<u64> {
        match self.heap.peek() {
            Some(&Reverse((required, _))) if required <= ins_count => {
                let Reverse((_, stream)) = self.heap.pop().expect("peeked");
                Some(stream)
            }
            _ => None,
        }
    }

    /// Drops a cancelled stream from the wait set.
    pub fn remove(&mut self, stream: u64) {
        self.heap.retain(|&Reverse((_, s))| s != stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wakes_in_requirement_order() {
        let mut b = BlockedStreams::new(8);
        b.insert(5, 40).unwrap();
        b.insert(2, 44).unwrap();
        b.insert(9, 48).unwrap();

        assert_eq!(b.pop_ready(1), None);
        assert_eq!(b.pop_ready(5), Some(44));
        assert_eq!(b.pop_ready(5), Some(40));
        assert_eq!(b.pop_ready(5), None);
        assert_eq!(b.pop_ready(9), Some(48));
        assert_eq!(b.len(), 0);
    }

    #[test]
    fn test_limit() {
        let mut b = BlockedStreams::new(1);
        b.insert(1, 0).unwrap();
        assert_eq!(b.insert(2, 4), Err(Error::BlockedStreamLimitExceeded));
    }

    #[test]
    fn test_remove() {
        let mut b = BlockedStreams::new(8);
        b.insert(3, 12).unwrap();
        b.insert(4, 16).unwrap();
        b.remove(12);
        assert_eq!(b.pop_ready(10), Some(16));
        assert_eq!(b.pop_ready(10), None);
    }
}
