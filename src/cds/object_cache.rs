/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use crate::{heap::cell::HEAP_WORD_SIZE, runtime::value::ObjectRef};
use std::collections::HashMap;
use tracing::info;

/// Number of power-of-two size classes in the allocation histogram; larger
/// objects are counted as huge.
pub const ALLOC_STAT_SLOTS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachedObjectInfo {
    /// Object being walked when this one was first archived.
    pub referrer: Option<ObjectRef>,
}

/// Objects committed to the archive during the whole dump, in archive order.
/// Keys are live addresses, so the cache is only valid under a
/// no-relocation scope.
#[derive(Default)]
pub struct ArchivedObjectCache {
    map: HashMap<ObjectRef, CachedObjectInfo>,
    order: Vec<ObjectRef>,
}

impl ArchivedObjectCache {
    pub fn contains(&self, object: ObjectRef) -> bool {
        self.map.contains_key(&object)
    }

    /// Returns false if `object` was already present.
    pub fn insert(&mut self, object: ObjectRef, referrer: Option<ObjectRef>) -> bool {
        if self.map.contains_key(&object) {
            return false;
        }
        self.map.insert(object, CachedObjectInfo { referrer });
        self.order.push(object);
        true
    }

    pub fn get(&self, object: ObjectRef) -> Option<&CachedObjectInfo> {
        self.map.get(&object)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn objects(&self) -> &[ObjectRef] {
        &self.order
    }
}

#[derive(Default, Debug, Clone)]
pub struct AllocationStats {
    counts: [usize; ALLOC_STAT_SLOTS],
    bytes: [usize; ALLOC_STAT_SLOTS],
    huge_count: usize,
    huge_bytes: usize,
    total_count: usize,
    total_bytes: usize,
}

impl AllocationStats {
    /// Size class of an object of `size` bytes: the smallest `i` with
    /// `words <= 1 << i`.
    pub fn size_class(size: usize) -> usize {
        let words = (size + HEAP_WORD_SIZE - 1) / HEAP_WORD_SIZE;
        words.max(1).next_power_of_two().trailing_zeros() as usize
    }

    pub fn count_allocation(&mut self, size: usize) {
        let slot = Self::size_class(size);
        if slot < ALLOC_STAT_SLOTS {
            self.counts[slot] += 1;
            self.bytes[slot] += size;
        } else {
            self.huge_count += 1;
            self.huge_bytes += size;
        }
        self.total_count += 1;
        self.total_bytes += size;
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn count_in_slot(&self, slot: usize) -> usize {
        self.counts.get(slot).copied().unwrap_or(self.huge_count)
    }

    pub fn print_stats(&self) {
        let mut accumulated_count = 0;
        let mut accumulated_bytes = 0;
        for slot in 0..ALLOC_STAT_SLOTS {
            accumulated_count += self.counts[slot];
            accumulated_bytes += self.bytes[slot];
            info!(
                target: "cds::heap",
                "{:8} objects are <= {:-6} bytes (total {:8} bytes, avg {:8.1} bytes)",
                accumulated_count,
                (1usize << slot) * HEAP_WORD_SIZE,
                accumulated_bytes,
                average(accumulated_bytes, accumulated_count)
            );
        }
        info!(
            target: "cds::heap",
            "{:8} huge objects               (total {:8} bytes, avg {:8.1} bytes)",
            self.huge_count,
            self.huge_bytes,
            average(self.huge_bytes, self.huge_count)
        );
        info!(
            target: "cds::heap",
            "{:8} total objects              (total {:8} bytes, avg {:8.1} bytes)",
            self.total_count,
            self.total_bytes,
            average(self.total_bytes, self.total_count)
        );
    }
}

fn average(bytes: usize, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        bytes as f64 / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_classes() {
        assert_eq!(AllocationStats::size_class(8), 0);
        assert_eq!(AllocationStats::size_class(16), 1);
        assert_eq!(AllocationStats::size_class(17), 2);
        assert_eq!(AllocationStats::size_class(32), 2);
        assert_eq!(AllocationStats::size_class(33), 3);
    }

    #[test]
    fn huge_objects_are_counted_separately() {
        let mut stats = AllocationStats::default();
        stats.count_allocation(24);
        stats.count_allocation(HEAP_WORD_SIZE << ALLOC_STAT_SLOTS);
        assert_eq!(stats.count_in_slot(2), 1);
        assert_eq!(stats.count_in_slot(ALLOC_STAT_SLOTS), 1);
        assert_eq!(stats.total_count(), 2);
    }
}
