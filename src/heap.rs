/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use crate::runtime::{klass::Klass, ref_ptr::Ref, value::ObjectRef, value::Value};
use cell::{CellKind, HeapCell};
use std::cell::{Cell, RefCell};
use wtf_rs::weak_random::WeakRandom;

pub mod address;
pub mod cell;
pub mod header;
pub mod trace;

/// Managed object heap.
///
/// Cells are boxed individually so their addresses never change while the
/// heap is alive. Code that keys tables by object address must still hold a
/// [`NoRelocationScope`]: no allocation may happen while one is active.
pub struct Heap {
    cells: Vec<Box<HeapCell>>,
    allocated: usize,
    hash_generator: RefCell<WeakRandom>,
    no_relocation_depth: Cell<usize>,
}

impl Heap {
    pub fn new(hash_seed: u32) -> Self {
        Self {
            cells: Vec::new(),
            allocated: 0,
            hash_generator: RefCell::new(WeakRandom::new(hash_seed)),
            no_relocation_depth: Cell::new(0),
        }
    }

    pub fn allocate(&mut self, klass: Ref<Klass>, kind: CellKind, fields: Vec<Value>) -> ObjectRef {
        assert!(
            !self.is_relocation_forbidden(),
            "allocation of {} inside a no-relocation scope",
            klass.name()
        );
        let mut cell = Box::new(HeapCell::new(klass, kind, fields));
        let object = Ref::new(&mut *cell as *mut HeapCell);
        self.allocated += cell.size();
        self.cells.push(cell);
        object
    }

    /// Returns the identity hash of `object`, assigning one on first request.
    pub fn identity_hash(&self, object: ObjectRef) -> u32 {
        if let Some(hash) = object.identity_hash() {
            return hash;
        }
        let hash = self.hash_generator.borrow_mut().get_nonzero_u31();
        object.header().set_identity_hash(hash);
        hash
    }

    /// Acquires the non-movable-heap capability. Object addresses observed
    /// while the returned guard is alive are stable.
    pub fn no_relocation(&self) -> NoRelocationScope<'_> {
        self.no_relocation_depth.set(self.no_relocation_depth.get() + 1);
        NoRelocationScope { heap: self }
    }

    pub fn is_relocation_forbidden(&self) -> bool {
        self.no_relocation_depth.get() != 0
    }

    pub fn contains(&self, object: ObjectRef) -> bool {
        self.cells
            .iter()
            .any(|cell| core::ptr::eq(&**cell, object.as_ptr()))
    }

    pub fn object_count(&self) -> usize {
        self.cells.len()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    pub fn objects(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.cells
            .iter()
            .map(|cell| Ref::new(&**cell as *const HeapCell))
    }
}

/// Scoped token proving the heap cannot move or free objects.
pub struct NoRelocationScope<'a> {
    heap: &'a Heap,
}

impl NoRelocationScope<'_> {
    pub fn heap(&self) -> &Heap {
        self.heap
    }
}

impl Drop for NoRelocationScope<'_> {
    fn drop(&mut self) {
        let depth = self.heap.no_relocation_depth.get();
        debug_assert!(depth > 0);
        self.heap.no_relocation_depth.set(depth - 1);
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{options::Options, value::Value, vm::Runtime};

    #[test]
    fn identity_hash_is_stable_and_seeded() {
        let mut rt = Runtime::new(Options::default());
        let object = rt.object_klass();
        let a = rt.allocate_instance(object);
        let b = rt.allocate_instance(object);
        let hash_a = rt.heap().identity_hash(a);
        assert_eq!(hash_a, rt.heap().identity_hash(a));
        assert_ne!(hash_a, 0);

        let mut other = Runtime::new(Options::default());
        let object = other.object_klass();
        let c = other.allocate_instance(object);
        let _ = other.allocate_instance(object);
        // same seed and same request order give the same hash
        assert_eq!(hash_a, other.heap().identity_hash(c));
        let _ = b;
    }

    #[test]
    #[should_panic(expected = "no-relocation scope")]
    fn allocation_is_rejected_while_pinned() {
        let mut rt = Runtime::new(Options::default());
        let object = rt.object_klass();
        let heap: *mut crate::heap::Heap = rt.heap_mut();
        let _guard = unsafe { (*heap).no_relocation() };
        unsafe { (*heap).allocate(object, super::cell::CellKind::Instance, vec![Value::Null]) };
    }

    #[test]
    fn scope_nesting_is_counted() {
        let rt = Runtime::new(Options::default());
        {
            let _outer = rt.heap().no_relocation();
            {
                let _inner = rt.heap().no_relocation();
                assert!(rt.heap().is_relocation_forbidden());
            }
            assert!(rt.heap().is_relocation_forbidden());
        }
        assert!(!rt.heap().is_relocation_forbidden());
    }
}
