/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use crate::heap::address::Address;

/// Little-endian writer for records placed in the read-only region.
#[derive(Default)]
pub struct ArchiveSerializer {
    pub(crate) output: Vec<u8>,
}

impl ArchiveSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.output.len()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.output.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.output.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.output.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_address(&mut self, address: Address) {
        self.write_u64(address.to_usize() as u64);
    }

    /// Writes a placeholder to be filled in later with [`patch_at`](Self::patch_at).
    pub fn reserve_u32(&mut self) -> usize {
        let at = self.position();
        self.write_u32(0);
        at
    }

    pub fn patch_at(&mut self, at: usize, value: u32) {
        self.output[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.output
    }
}

pub trait Serializable {
    fn serialize(&self, serializer: &mut ArchiveSerializer);
}

impl Serializable for u32 {
    fn serialize(&self, serializer: &mut ArchiveSerializer) {
        serializer.write_u32(*self);
    }
}

impl Serializable for Address {
    fn serialize(&self, serializer: &mut ArchiveSerializer) {
        serializer.write_address(*self);
    }
}

impl<A: Serializable, B: Serializable> Serializable for (A, B) {
    fn serialize(&self, serializer: &mut ArchiveSerializer) {
        self.0.serialize(serializer);
        self.1.serialize(serializer);
    }
}

impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, serializer: &mut ArchiveSerializer) {
        serializer.write_u32(self.len() as u32);
        for item in self.iter() {
            item.serialize(serializer);
        }
    }
}
