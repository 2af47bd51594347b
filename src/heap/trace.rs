/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use crate::runtime::value::ObjectRef;

/// One non-null outgoing reference of a cell: field or element index and the
/// referenced object.
#[derive(Clone, Copy, Debug)]
pub struct Slot {
    pub(crate) index: usize,
    pub(crate) target: ObjectRef,
}

impl Slot {
    pub fn new(index: usize, target: ObjectRef) -> Self {
        Self { index, target }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn value(&self) -> ObjectRef {
        self.target
    }
}

pub trait Tracer {
    fn trace(&mut self, slot: Slot);
}

pub struct SimpleVisitor<'a> {
    closure: &'a mut dyn FnMut(Slot),
}

impl<'a> SimpleVisitor<'a> {
    pub fn new(closure: &'a mut dyn FnMut(Slot)) -> Self {
        Self { closure }
    }
}

impl<'a> Tracer for SimpleVisitor<'a> {
    fn trace(&mut self, slot: Slot) {
        (self.closure)(slot);
    }
}

/// Collects every outgoing reference into a vector.
#[derive(Default)]
pub struct SlotCollector {
    pub slots: Vec<Slot>,
}

impl Tracer for SlotCollector {
    fn trace(&mut self, slot: Slot) {
        self.slots.push(slot);
    }
}
