/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use crate::heap::address::Address;
use std::{
    fmt,
    hash::{Hash, Hasher},
    ops::{Deref, DerefMut},
};

/// Unmanaged pointer to runtime data (heap cells, class descriptors) whose
/// owner outlives every `Ref` handed out. Equality and hashing are by
/// address.
#[repr(C)]
pub struct Ref<T> {
    pointer: *mut T,
}

impl<T> Ref<T> {
    pub fn new(ptr: *const T) -> Self {
        Self {
            pointer: ptr as *mut T,
        }
    }

    pub fn is_null(self) -> bool {
        self.pointer.is_null()
    }

    pub fn is_not_null(self) -> bool {
        !self.pointer.is_null()
    }

    pub fn as_ptr(self) -> *mut T {
        self.pointer
    }

    pub fn address(self) -> Address {
        Address::from_ptr(self.pointer)
    }
}

impl<T> Copy for Ref<T> {}
impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        self.pointer == other.pointer
    }
}

impl<T> Eq for Ref<T> {}

impl<T> Hash for Ref<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pointer.hash(state);
    }
}

impl<T> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({:p})", self.pointer)
    }
}

impl<T> Deref for Ref<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*(self.pointer) }
    }
}

impl<T> DerefMut for Ref<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *(self.pointer) }
    }
}

pub trait AsRefPtr<T> {
    fn as_ref_ptr(&self) -> Ref<T>;
}

impl<T> AsRefPtr<T> for &T {
    fn as_ref_ptr(&self) -> Ref<T> {
        Ref::new(*self)
    }
}

impl<T> AsRefPtr<T> for Ref<T> {
    fn as_ref_ptr(&self) -> Ref<T> {
        *self
    }
}
