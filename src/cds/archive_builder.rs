/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use crate::{
    heap::{address::Address, cell::HEAP_WORD_SIZE},
    runtime::{klass::Klass, ref_ptr::Ref, vm::Runtime},
};
use std::collections::HashMap;

/// Base of the buffered address range handed out for class descriptors.
pub const SHARED_BASE_ADDRESS: usize = 0x8_0000_0000;
/// Space reserved per buffered descriptor.
pub const BUFFERED_KLASS_SIZE: usize = 0x200;

/// Places class descriptors and read-only data into the archive buffer.
pub trait ArchiveBuilder {
    /// Buffered address of a live descriptor. Panics if `klass` is not part
    /// of the archive.
    fn get_buffered_klass(&self, klass: Ref<Klass>) -> Address;
    fn get_source_klass(&self, buffered: Address) -> Option<Ref<Klass>>;
    fn is_archived_klass(&self, klass: Ref<Klass>) -> bool;
    /// Archived descriptors in buffer order.
    fn klasses(&self) -> &[Ref<Klass>];
    /// Copies `bytes` into the read-only region and returns their offset.
    fn ro_region_alloc(&mut self, bytes: &[u8]) -> u32;
    fn ro_region(&self) -> &[u8];

    fn hash_for_shared_dictionary(&self, buffered: Address) -> u32 {
        hash_for_shared_dictionary(buffered)
    }
}

/// Hash of a buffered descriptor address. Depends only on the offset from
/// the shared base, so dump and restore agree on it.
pub fn hash_for_shared_dictionary(buffered: Address) -> u32 {
    let delta = buffered.to_usize().wrapping_sub(SHARED_BASE_ADDRESS) as u64;
    let x = delta >> 3;
    (x ^ (x >> 32)).wrapping_mul(0x9E37_79B9) as u32
}

/// Gives every loaded class a sequential buffered address in load order.
pub struct BufferedArchiveBuilder {
    klasses: Vec<Ref<Klass>>,
    buffered: HashMap<Ref<Klass>, Address>,
    source: HashMap<Address, Ref<Klass>>,
    ro_region: Vec<u8>,
}

impl BufferedArchiveBuilder {
    pub fn new(rt: &Runtime) -> Self {
        let mut this = Self {
            klasses: Vec::new(),
            buffered: HashMap::new(),
            source: HashMap::new(),
            ro_region: Vec::new(),
        };
        for klass in rt.loaded_klasses().iter().copied() {
            this.gather_klass(klass);
        }
        this
    }

    fn gather_klass(&mut self, klass: Ref<Klass>) {
        if self.buffered.contains_key(&klass) {
            return;
        }
        let address = Address::from(SHARED_BASE_ADDRESS + self.klasses.len() * BUFFERED_KLASS_SIZE);
        self.klasses.push(klass);
        self.buffered.insert(klass, address);
        self.source.insert(address, klass);
    }
}

impl ArchiveBuilder for BufferedArchiveBuilder {
    fn get_buffered_klass(&self, klass: Ref<Klass>) -> Address {
        match self.buffered.get(&klass) {
            Some(address) => *address,
            None => panic!("{} is not in the archive", klass.name()),
        }
    }

    fn get_source_klass(&self, buffered: Address) -> Option<Ref<Klass>> {
        self.source.get(&buffered).copied()
    }

    fn is_archived_klass(&self, klass: Ref<Klass>) -> bool {
        self.buffered.contains_key(&klass)
    }

    fn klasses(&self) -> &[Ref<Klass>] {
        &self.klasses
    }

    fn ro_region_alloc(&mut self, bytes: &[u8]) -> u32 {
        let aligned = (self.ro_region.len() + HEAP_WORD_SIZE - 1) / HEAP_WORD_SIZE * HEAP_WORD_SIZE;
        self.ro_region.resize(aligned, 0);
        let offset = self.ro_region.len() as u32;
        self.ro_region.extend_from_slice(bytes);
        offset
    }

    fn ro_region(&self) -> &[u8] {
        &self.ro_region
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::options::Options;

    #[test]
    fn addresses_are_sequential_and_invertible() {
        let rt = Runtime::new(Options::default());
        let builder = BufferedArchiveBuilder::new(&rt);
        assert_eq!(builder.klasses().len(), rt.loaded_klasses().len());
        for (i, klass) in builder.klasses().iter().enumerate() {
            let buffered = builder.get_buffered_klass(*klass);
            assert_eq!(buffered.to_usize(), SHARED_BASE_ADDRESS + i * BUFFERED_KLASS_SIZE);
            assert_eq!(builder.get_source_klass(buffered), Some(*klass));
        }
    }

    #[test]
    fn ro_region_allocations_are_word_aligned() {
        let rt = Runtime::new(Options::default());
        let mut builder = BufferedArchiveBuilder::new(&rt);
        assert_eq!(builder.ro_region_alloc(&[1, 2, 3]), 0);
        assert_eq!(builder.ro_region_alloc(&[4]), 8);
        assert_eq!(&builder.ro_region()[8..], &[4]);
    }

    #[test]
    fn dictionary_hash_depends_only_on_offset() {
        let a = Address::from(SHARED_BASE_ADDRESS + BUFFERED_KLASS_SIZE);
        let b = Address::from(SHARED_BASE_ADDRESS + 2 * BUFFERED_KLASS_SIZE);
        assert_eq!(hash_for_shared_dictionary(a), hash_for_shared_dictionary(a));
        assert_ne!(hash_for_shared_dictionary(a), hash_for_shared_dictionary(b));
    }
}
