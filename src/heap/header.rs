/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use super::address::Address;
use crate::runtime::{klass::Klass, ref_ptr::Ref};
use std::cell::Cell;
use wtf_rs::tagged_pointer::TaggedPointer;

const SCRATCH_MIRROR_BIT: usize = 0;
const ARCHIVED_BIT: usize = 1;

/// # Object header.
/// Every heap cell starts with a header holding:
/// - class pointer, with flag bits in its alignment padding
///   (bit 0: scratch mirror, bit 1: materialized from an archive)
/// - identity hash, `0` until one is assigned
///
/// `Header` must be first field in the cell hence cells use `#[repr(C)]`.
pub struct Header {
    klass: TaggedPointer<Klass>,
    hash: Cell<u32>,
}

impl Header {
    pub(crate) fn new(klass: Ref<Klass>) -> Self {
        Self {
            klass: TaggedPointer::new(klass.as_ptr()),
            hash: Cell::new(0),
        }
    }

    pub fn klass(&self) -> Ref<Klass> {
        Ref::new(self.klass.untagged())
    }

    pub fn object_start(&self) -> Address {
        Address::from_ptr(self)
    }

    /// Identity hash if one was assigned already.
    pub fn identity_hash(&self) -> Option<u32> {
        match self.hash.get() {
            0 => None,
            hash => Some(hash),
        }
    }

    pub(crate) fn set_identity_hash(&self, hash: u32) {
        debug_assert_ne!(hash, 0, "zero means no hash");
        self.hash.set(hash);
    }

    pub fn is_scratch_mirror(&self) -> bool {
        self.klass.bit_is_set(SCRATCH_MIRROR_BIT)
    }

    pub(crate) fn set_scratch_mirror(&mut self) {
        self.klass.set_bit(SCRATCH_MIRROR_BIT);
    }

    /// True for cells materialized from a loaded archive.
    pub fn is_archived_copy(&self) -> bool {
        self.klass.bit_is_set(ARCHIVED_BIT)
    }

    pub(crate) fn set_archived_copy(&mut self) {
        self.klass.set_bit(ARCHIVED_BIT);
    }
}
