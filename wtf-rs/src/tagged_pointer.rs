/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use core::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
};

/// Number of low bits available for tags. Pointees must be at least 8-byte aligned.
pub const TAG_BITS: usize = 3;

const TAG_MASK: usize = (1 << TAG_BITS) - 1;

/// A raw pointer that stores up to three flag bits in its alignment padding.
pub struct TaggedPointer<T> {
    raw: usize,
    _marker: PhantomData<*mut T>,
}

impl<T> TaggedPointer<T> {
    pub fn new(pointer: *mut T) -> Self {
        debug_assert_eq!(
            pointer as usize & TAG_MASK,
            0,
            "pointer is not aligned enough to carry tags"
        );
        Self {
            raw: pointer as usize,
            _marker: PhantomData,
        }
    }

    pub const fn null() -> Self {
        Self {
            raw: 0,
            _marker: PhantomData,
        }
    }

    /// Returns the pointer with all tag bits stripped.
    pub fn untagged(self) -> *mut T {
        (self.raw & !TAG_MASK) as *mut T
    }

    pub fn is_null(self) -> bool {
        self.untagged().is_null()
    }

    pub fn tags(self) -> usize {
        self.raw & TAG_MASK
    }

    pub fn bit_is_set(self, bit: usize) -> bool {
        debug_assert!(bit < TAG_BITS);
        self.raw & (1 << bit) != 0
    }

    pub fn set_bit(&mut self, bit: usize) {
        debug_assert!(bit < TAG_BITS);
        self.raw |= 1 << bit;
    }

    pub fn clear_bit(&mut self, bit: usize) {
        debug_assert!(bit < TAG_BITS);
        self.raw &= !(1 << bit);
    }

    pub fn set_bit_x(&mut self, x: bool, bit: usize) {
        if x {
            self.set_bit(bit);
        } else {
            self.clear_bit(bit);
        }
    }

    /// Replaces the pointer while keeping the current tags.
    pub fn set_pointer(&mut self, pointer: *mut T) {
        let tags = self.tags();
        *self = Self::new(pointer);
        self.raw |= tags;
    }
}

impl<T> Clone for TaggedPointer<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TaggedPointer<T> {}

impl<T> PartialEq for TaggedPointer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for TaggedPointer<T> {}

impl<T> Hash for TaggedPointer<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for TaggedPointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaggedPointer({:p}, tags={:03b})", self.untagged(), self.tags())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_do_not_disturb_pointer() {
        let mut value = 42u64;
        let mut ptr = TaggedPointer::new(&mut value as *mut u64);
        ptr.set_bit(0);
        ptr.set_bit(2);
        assert!(ptr.bit_is_set(0));
        assert!(!ptr.bit_is_set(1));
        assert!(ptr.bit_is_set(2));
        assert_eq!(ptr.untagged(), &mut value as *mut u64);
        ptr.clear_bit(0);
        assert_eq!(ptr.tags(), 0b100);
    }

    #[test]
    fn set_pointer_keeps_tags() {
        let mut a = 1u64;
        let mut b = 2u64;
        let mut ptr = TaggedPointer::new(&mut a as *mut u64);
        ptr.set_bit_x(true, 1);
        ptr.set_pointer(&mut b as *mut u64);
        assert!(ptr.bit_is_set(1));
        assert_eq!(ptr.untagged(), &mut b as *mut u64);
    }
}
