/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use super::{
    address::Address,
    header::Header,
    trace::{Slot, Tracer},
};
use crate::runtime::{
    klass::{BasicType, Klass},
    ref_ptr::Ref,
    value::Value,
};

pub const HEAP_WORD_SIZE: usize = 8;
pub const HEADER_SIZE: usize = 2 * HEAP_WORD_SIZE;

/// What a mirror object stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MirrorOf {
    Klass(Ref<Klass>),
    Primitive(BasicType),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellKind {
    Instance,
    ObjArray,
    TypeArray(BasicType),
    /// Instance of `base/lang/Class`. Its fields are the static slots of the
    /// class it stands for.
    Mirror(MirrorOf),
}

/// A managed heap object: header followed by a flat list of word-sized
/// fields (instance fields, array elements or static slots).
#[repr(C)]
pub struct HeapCell {
    header: Header,
    kind: CellKind,
    fields: Vec<Value>,
}

impl HeapCell {
    pub(crate) fn new(klass: Ref<Klass>, kind: CellKind, fields: Vec<Value>) -> Self {
        Self {
            header: Header::new(klass),
            kind,
            fields,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn address(&self) -> Address {
        self.header.object_start()
    }

    pub fn klass(&self) -> Ref<Klass> {
        self.header.klass()
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Value {
        self.fields.get(index).copied().unwrap_or(Value::Null)
    }

    pub fn set_field(&mut self, index: usize, value: Value) {
        assert!(
            index < self.fields.len(),
            "field index {} out of bounds for {} ({} fields)",
            index,
            self.klass().name(),
            self.fields.len()
        );
        self.fields[index] = value;
    }

    /// Size in bytes, including the header.
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.fields.len() * HEAP_WORD_SIZE
    }

    pub fn identity_hash(&self) -> Option<u32> {
        self.header.identity_hash()
    }

    pub fn is_mirror(&self) -> bool {
        matches!(self.kind, CellKind::Mirror(_))
    }

    pub fn mirror_of(&self) -> Option<MirrorOf> {
        match self.kind {
            CellKind::Mirror(of) => Some(of),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, CellKind::ObjArray | CellKind::TypeArray(_))
    }

    /// Visits every non-null reference held by this cell.
    pub fn trace(&self, tracer: &mut dyn Tracer) {
        for (index, value) in self.fields.iter().enumerate() {
            if let Value::Object(target) = value {
                tracer.trace(Slot::new(index, *target));
            }
        }
    }
}
