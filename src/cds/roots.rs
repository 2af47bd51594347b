/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use crate::{heap::address::Address, runtime::value::ObjectRef};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Flat, index-addressable table of independently restorable objects.
///
/// Indices are handed out append-only while dumping and never change. After
/// restoration a slot is usually consumed with `get_root(index, true)`, which
/// leaves the static field it was stored into as the only owner.
#[derive(Default)]
pub struct RootTable {
    slots: Mutex<Vec<Option<ObjectRef>>>,
}

impl RootTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: Vec<Option<ObjectRef>>) -> Self {
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Appends `object` (null included) and returns its index.
    pub fn append_root(&self, object: Option<ObjectRef>) -> u32 {
        let mut slots = self.slots.lock();
        slots.push(object);
        (slots.len() - 1) as u32
    }

    /// Returns the slot content; with `clear` the slot is nulled in the same
    /// critical section.
    pub fn get_root(&self, index: u32, clear: bool) -> Option<ObjectRef> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(index as usize)?;
        if clear {
            slot.take()
        } else {
            *slot
        }
    }

    pub fn clear_root(&self, index: u32) {
        if let Some(slot) = self.slots.lock().get_mut(index as usize) {
            if slot.take().is_some() {
                debug!(target: "cds::heap", "cleared root {}", index);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<Option<ObjectRef>> {
        self.slots.lock().clone()
    }
}

/// Maps archived objects to stable small integers and back.
///
/// The tail of the root table, starting at `first_segment_root`, holds
/// `Object[]` segments of `1 << shift` elements each; the permanent index of
/// an object is `(segment << shift) | offset_in_segment`.
pub struct PermanentIndexTable {
    first_segment_root: u32,
    segment_count: u32,
    shift: u32,
    table: OnceCell<HashMap<Address, u32>>,
}

impl PermanentIndexTable {
    pub fn new(first_segment_root: u32, segment_count: u32, shift: u32) -> Self {
        Self {
            first_segment_root,
            segment_count,
            shift,
            table: OnceCell::new(),
        }
    }

    pub fn segment_count(&self) -> u32 {
        self.segment_count
    }

    fn segment(&self, roots: &RootTable, segment: u32) -> Option<ObjectRef> {
        if segment >= self.segment_count {
            return None;
        }
        roots.get_root(self.first_segment_root + segment, false)
    }

    fn table(&self, roots: &RootTable) -> &HashMap<Address, u32> {
        self.table.get_or_init(|| {
            let mut table = HashMap::new();
            for segment in 0..self.segment_count {
                let objects = match self.segment(roots, segment) {
                    Some(objects) => objects,
                    None => continue,
                };
                for (offset, element) in objects.fields().iter().enumerate() {
                    if let Some(object) = element.as_object() {
                        table.insert(object.address(), (segment << self.shift) | offset as u32);
                    }
                }
            }
            debug!(target: "cds::heap", "built permanent index table with {} objects", table.len());
            table
        })
    }

    pub fn get_archived_object_permanent_index(&self, roots: &RootTable, object: ObjectRef) -> Option<u32> {
        self.table(roots).get(&object.address()).copied()
    }

    pub fn get_archived_object(&self, roots: &RootTable, index: u32) -> Option<ObjectRef> {
        let segment = index >> self.shift;
        let offset = index & ((1 << self.shift) - 1);
        self.segment(roots, segment)?
            .field(offset as usize)
            .as_object()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{options::Options, value::Value, vm::Runtime};

    #[test]
    fn get_root_with_clear_empties_the_slot() {
        let mut rt = Runtime::new(Options::default());
        let object_klass = rt.object_klass();
        let object = rt.allocate_instance(object_klass);
        let roots = RootTable::new();
        let null_index = roots.append_root(None);
        let index = roots.append_root(Some(object));
        assert_eq!(null_index, 0);
        assert_eq!(index, 1);
        assert_eq!(roots.get_root(index, false), Some(object));
        assert_eq!(roots.get_root(index, true), Some(object));
        assert_eq!(roots.get_root(index, false), None);
        assert_eq!(roots.get_root(7, false), None);
    }

    #[test]
    fn clear_root_is_idempotent() {
        let mut rt = Runtime::new(Options::default());
        let object_klass = rt.object_klass();
        let object = rt.allocate_instance(object_klass);
        let roots = RootTable::new();
        let index = roots.append_root(Some(object));
        roots.clear_root(index);
        roots.clear_root(index);
        assert_eq!(roots.get_root(index, false), None);
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn permanent_index_round_trips_through_segments() {
        let mut rt = Runtime::new(Options::default());
        let object_klass = rt.object_klass();
        let objects: Vec<_> = (0..5).map(|_| rt.allocate_instance(object_klass)).collect();
        // two objects per segment
        let shift = 1;
        let roots = RootTable::new();
        roots.append_root(None);
        let first_segment_root = roots.len() as u32;
        for chunk in objects.chunks(2) {
            let values = chunk.iter().copied().map(Value::Object).collect();
            let segment = rt.allocate_object_array(object_klass, values).unwrap();
            roots.append_root(Some(segment));
        }
        let table = PermanentIndexTable::new(first_segment_root, 3, shift);
        for (i, object) in objects.iter().enumerate() {
            let index = table.get_archived_object_permanent_index(&roots, *object).unwrap();
            assert_eq!(index, ((i as u32 / 2) << shift) | (i as u32 % 2));
            assert_eq!(table.get_archived_object(&roots, index), Some(*object));
        }
        let stranger = rt.allocate_instance(object_klass);
        assert_eq!(table.get_archived_object_permanent_index(&roots, stranger), None);
        assert_eq!(table.get_archived_object(&roots, 3 << shift), None);
    }
}
