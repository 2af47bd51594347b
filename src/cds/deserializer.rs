/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use super::error::ArchiveError;
use crate::heap::address::Address;

/// Bounds-checked reader over the read-only region.
pub struct ArchiveDeserializer<'a> {
    reader: &'a [u8],
    pc: usize,
}

impl<'a> ArchiveDeserializer<'a> {
    pub fn new(reader: &'a [u8], pc: usize) -> Self {
        Self { reader, pc }
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ArchiveError> {
        let bytes = self
            .reader
            .get(self.pc..self.pc + N)
            .ok_or_else(|| ArchiveError::Malformed(format!("read of {} bytes past end at {}", N, self.pc)))?;
        let mut buf = [0; N];
        buf.copy_from_slice(bytes);
        self.pc += N;
        Ok(buf)
    }

    pub fn get_u8(&mut self) -> Result<u8, ArchiveError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn get_bool(&mut self) -> Result<bool, ArchiveError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ArchiveError::Malformed(format!("invalid bool {}", other))),
        }
    }

    pub fn get_u32(&mut self) -> Result<u32, ArchiveError> {
        Ok(u32::from_le_bytes(self.take::<4>()?))
    }

    pub fn get_u64(&mut self) -> Result<u64, ArchiveError> {
        Ok(u64::from_le_bytes(self.take::<8>()?))
    }

    pub fn get_address(&mut self) -> Result<Address, ArchiveError> {
        Ok(Address::from(self.get_u64()? as usize))
    }
}

pub trait Deserializable: Sized {
    fn deserialize(deserializer: &mut ArchiveDeserializer<'_>) -> Result<Self, ArchiveError>;
}

impl Deserializable for u32 {
    fn deserialize(deserializer: &mut ArchiveDeserializer<'_>) -> Result<Self, ArchiveError> {
        deserializer.get_u32()
    }
}

impl Deserializable for Address {
    fn deserialize(deserializer: &mut ArchiveDeserializer<'_>) -> Result<Self, ArchiveError> {
        deserializer.get_address()
    }
}

impl<A: Deserializable, B: Deserializable> Deserializable for (A, B) {
    fn deserialize(deserializer: &mut ArchiveDeserializer<'_>) -> Result<Self, ArchiveError> {
        let a = A::deserialize(deserializer)?;
        let b = B::deserialize(deserializer)?;
        Ok((a, b))
    }
}

impl<T: Deserializable> Deserializable for Vec<T> {
    fn deserialize(deserializer: &mut ArchiveDeserializer<'_>) -> Result<Self, ArchiveError> {
        let len = deserializer.get_u32()? as usize;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(T::deserialize(deserializer)?);
        }
        Ok(items)
    }
}
