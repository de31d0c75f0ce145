//! Encoder-side dynamic table.
//!
//! Entries live in one FIFO arena addressable by absolute ID
//! (`abs − del_count − 1`), with two hash indices over the same IDs: one
//! keyed by name, one by name+value. Eviction is strictly FIFO and
//! unconditional on overflow; reference counts only gate the *decision* to
//! index (see [`EncTable::evictable_for`]), not eviction itself.
//!
//! Hashes are keyed SipHash-1-3 with a per-table seed, so a peer feeding
//! chosen header names cannot precompute bucket collisions.

use std::collections::VecDeque;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use hashbrown::HashMap;
use siphasher::sip::SipHasher13;
use smallvec::SmallVec;
use tracing::trace;

use crate::field::entry_cost;

static TABLE_SEED: AtomicU64 = AtomicU64::new(0x243f_6a88_85a3_08d3);

pub(crate) struct EncEntry {
    pub name: Bytes,
    pub value: Bytes,
    name_hash: u64,
    nameval_hash: u64,
    pub ref_count: u32,
}

impl EncEntry {
    pub fn size(&self) -> usize {
        entry_cost(self.name.len(), self.value.len())
    }
}

/// Outcome of a table search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TableMatch {
    pub abs_id: u64,
    pub value_matched: bool,
}

/// Whether a new entry of a given size can be accommodated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Evictable {
    /// Not even after evicting everything unreferenced.
    No,
    /// Fits in the free space as-is.
    Fits,
    /// Fits once every entry up to and including this ID is evicted;
    /// the ID becomes the block's search cutoff.
    AfterEvicting(u64),
}

fn eligible(id: u64, may_risk: bool, max_acked_id: u64, cutoff: u64) -> bool {
    (may_risk || id <= max_acked_id) && (cutoff == 0 || id > cutoff)
}

pub(crate) struct EncTable {
    entries: VecDeque<EncEntry>,
    ins_count: u64,
    del_count: u64,
    size: usize,
    capacity: usize,
    by_name: HashMap<u64, SmallVec<[u64; 2]>>,
    by_nameval: HashMap<u64, SmallVec<[u64; 2]>>,
    key: (u64, u64),
}

impl EncTable {
    pub fn new(capacity: usize) -> Self {
        let n = TABLE_SEED.fetch_add(0x9e37_79b9_7f4a_7c15, Ordering::Relaxed);
        let k0 = (n ^ (n >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        let k1 = (k0 ^ (k0 >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        Self {
            entries: VecDeque::new(),
            ins_count: 0,
            del_count: 0,
            size: 0,
            capacity,
            by_name: HashMap::new(),
            by_nameval: HashMap::new(),
            key: (k0, k1),
        }
    }

    pub fn ins_count(&self) -> u64 {
        self.ins_count
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn hash_name(&self, name: &[u8]) -> u64 {
        let mut h = SipHasher13::new_with_keys(self.key.0, self.key.1);
        h.write_usize(name.len());
        h.write(name);
        h.finish()
    }

    fn hash_nameval(&self, name: &[u8], value: &[u8]) -> u64 {
        let mut h = SipHasher13::new_with_keys(self.key.0, self.key.1);
        h.write_usize(name.len());
        h.write(name);
        h.write_usize(value.len());
        h.write(value);
        h.finish()
    }

    pub fn get(&self, abs_id: u64) -> Option<&EncEntry> {
        if abs_id > self.del_count && abs_id <= self.ins_count {
            self.entries.get((abs_id - self.del_count - 1) as usize)
        } else {
            None
        }
    }

    fn get_mut(&mut self, abs_id: u64) -> Option<&mut EncEntry> {
        if abs_id > self.del_count && abs_id <= self.ins_count {
            self.entries.get_mut((abs_id - self.del_count - 1) as usize)
        } else {
            None
        }
    }

    pub fn inc_ref(&mut self, abs_id: u64) {
        if let Some(e) = self.get_mut(abs_id) {
            e.ref_count += 1;
        }
    }

    pub fn dec_ref(&mut self, abs_id: u64) {
        if let Some(e) = self.get_mut(abs_id) {
            debug_assert!(e.ref_count > 0);
            e.ref_count = e.ref_count.saturating_sub(1);
        }
    }

    /// Appends a new entry and evicts overflow. Returns its absolute ID.
    pub fn push(&mut self, name: &[u8], value: &[u8]) -> u64 {
        let name_hash = self.hash_name(name);
        let nameval_hash = self.hash_nameval(name, value);
        self.ins_count += 1;
        let abs_id = self.ins_count;

        self.entries.push_back(EncEntry {
            name: Bytes::copy_from_slice(name),
            value: Bytes::copy_from_slice(value),
            name_hash,
            nameval_hash,
            ref_count: 0,
        });
        self.size += entry_cost(name.len(), value.len());
        self.by_name.entry(name_hash).or_default().push(abs_id);
        self.by_nameval.entry(nameval_hash).or_default().push(abs_id);
        trace!(abs_id, size = self.size, "dynamic table insert");

        self.remove_overflow();
        abs_id
    }

    fn evict_oldest(&mut self) {
        let entry = self.entries.pop_front().expect("evict from empty table");
        self.del_count += 1;
        self.size -= entry.size();
        let id = self.del_count;
        for (map, hash) in [
            (&mut self.by_name, entry.name_hash),
            (&mut self.by_nameval, entry.nameval_hash),
        ] {
            if let Some(ids) = map.get_mut(&hash) {
                if let Some(pos) = ids.iter().position(|&x| x == id) {
                    ids.remove(pos);
                }
                if ids.is_empty() {
                    map.remove(&hash);
                }
            }
        }
        trace!(abs_id = id, size = self.size, "dynamic table evict");
    }

    fn remove_overflow(&mut self) {
        while self.size > self.capacity {
            self.evict_oldest();
        }
    }

    /// Changes the capacity, evicting as needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.remove_overflow();
    }

    /// Exact name+value lookup.
    ///
    /// With `may_risk` unset, entries above `max_acked_id` are invisible.
    /// Entries at or below `cutoff` (`0` = none) are always invisible: the
    /// current block has planned their eviction.
    pub fn search_nameval(
        &self,
        name: &[u8],
        value: &[u8],
        may_risk: bool,
        max_acked_id: u64,
        cutoff: u64,
    ) -> Option<u64> {
        let ids = self.by_nameval.get(&self.hash_nameval(name, value))?;
        for &id in ids.iter() {
            if !eligible(id, may_risk, max_acked_id, cutoff) {
                continue;
            }
            let e = self.get(id).expect("indexed id is live");
            if e.name == name && e.value == value {
                return Some(id);
            }
        }
        None
    }

    /// Name-only lookup, same visibility rules as [`Self::search_nameval`].
    pub fn search_name(
        &self,
        name: &[u8],
        may_risk: bool,
        max_acked_id: u64,
        cutoff: u64,
    ) -> Option<u64> {
        let ids = self.by_name.get(&self.hash_name(name))?;
        for &id in ids.iter() {
            if !eligible(id, may_risk, max_acked_id, cutoff) {
                continue;
            }
            let e = self.get(id).expect("indexed id is live");
            if e.name == name {
                return Some(id);
            }
        }
        None
    }

    /// Combined lookup; a name+value match wins over a name-only match.
    pub fn search(
        &self,
        name: &[u8],
        value: &[u8],
        may_risk: bool,
        max_acked_id: u64,
        cutoff: u64,
    ) -> Option<TableMatch> {
        if let Some(id) = self.search_nameval(name, value, may_risk, max_acked_id, cutoff) {
            return Some(TableMatch { abs_id: id, value_matched: true });
        }
        self.search_name(name, may_risk, max_acked_id, cutoff)
            .map(|id| TableMatch { abs_id: id, value_matched: false })
    }

    /// Can an entry of `size` bytes fit, counting only free space plus
    /// entries older than `min_referenced` with no outstanding references?
    pub fn evictable_for(&self, size: usize, min_referenced: u64) -> Evictable {
        let mut avail = self.capacity.saturating_sub(self.size);
        if avail >= size {
            return Evictable::Fits;
        }
        for (i, entry) in self.entries.iter().enumerate() {
            let id = self.del_count + i as u64 + 1;
            if id >= min_referenced || entry.ref_count != 0 {
                return Evictable::No;
            }
            avail += entry.size();
            if avail >= size {
                return Evictable::AfterEvicting(id);
            }
        }
        Evictable::No
    }
}
