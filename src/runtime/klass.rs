/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use super::{ref_ptr::Ref, value::ObjectRef, value::Value};
use crate::heap::address::Address;
use lasso::Spur;
use serde::{Deserialize, Serialize};
use std::{cell::Cell, fmt};

/// Name of the foundational module every archivable class must live in.
pub const BASE_MODULE_NAME: &str = "base";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BasicType {
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
    Void,
}

impl BasicType {
    pub const ALL: [BasicType; 9] = [
        BasicType::Boolean,
        BasicType::Char,
        BasicType::Float,
        BasicType::Double,
        BasicType::Byte,
        BasicType::Short,
        BasicType::Int,
        BasicType::Long,
        BasicType::Void,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn type_char(self) -> char {
        match self {
            BasicType::Boolean => 'Z',
            BasicType::Char => 'C',
            BasicType::Float => 'F',
            BasicType::Double => 'D',
            BasicType::Byte => 'B',
            BasicType::Short => 'S',
            BasicType::Int => 'I',
            BasicType::Long => 'J',
            BasicType::Void => 'V',
        }
    }

    pub fn from_type_char(c: char) -> Option<BasicType> {
        BasicType::ALL.iter().copied().find(|bt| bt.type_char() == c)
    }

    pub fn name(self) -> &'static str {
        match self {
            BasicType::Boolean => "boolean",
            BasicType::Char => "char",
            BasicType::Float => "float",
            BasicType::Double => "double",
            BasicType::Byte => "byte",
            BasicType::Short => "short",
            BasicType::Int => "int",
            BasicType::Long => "long",
            BasicType::Void => "void",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoaderKind {
    Boot,
    Platform,
    App,
    Unregistered,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassState {
    /// Descriptor exists (e.g. mapped from an archive) but was not loaded.
    Allocated,
    Loaded,
    Linked,
    BeingInitialized,
    Initialized,
    InitializationError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Reference,
    Primitive(BasicType),
}

impl FieldType {
    pub fn default_value(self) -> Value {
        match self {
            FieldType::Reference => Value::Null,
            FieldType::Primitive(_) => Value::Int(0),
        }
    }
}

/// A static field; `offset` is the slot index in the class mirror.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: Spur,
    pub offset: u32,
    pub ty: FieldType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KlassKind {
    Instance,
    ObjArray { element: Ref<Klass> },
    TypeArray(BasicType),
}

/// Runtime class descriptor.
#[repr(C, align(8))]
pub struct Klass {
    name: Box<str>,
    symbol: Spur,
    kind: KlassKind,
    module: Option<Box<str>>,
    package: Option<Box<str>>,
    loader: LoaderKind,
    static_fields: Vec<FieldInfo>,
    instance_field_count: usize,
    has_synthetic_constant_table: bool,
    archivable: bool,
    state: Cell<ClassState>,
    mirror: Cell<Option<ObjectRef>>,
    early: Cell<bool>,
    shared_address: Cell<Option<Address>>,
    archived_mirror_index: Cell<Option<u32>>,
}

/// Everything needed to build a [`Klass`]; shared by class definitions and
/// archived class images.
pub struct KlassShape {
    pub name: String,
    pub symbol: Spur,
    pub kind: KlassKind,
    pub module: Option<String>,
    pub package: Option<String>,
    pub loader: LoaderKind,
    pub static_fields: Vec<FieldInfo>,
    pub instance_field_count: usize,
    pub has_synthetic_constant_table: bool,
    pub archivable: bool,
}

impl Klass {
    pub fn new(shape: KlassShape) -> Self {
        Self {
            name: shape.name.into_boxed_str(),
            symbol: shape.symbol,
            kind: shape.kind,
            module: shape.module.map(String::into_boxed_str),
            package: shape.package.map(String::into_boxed_str),
            loader: shape.loader,
            static_fields: shape.static_fields,
            instance_field_count: shape.instance_field_count,
            has_synthetic_constant_table: shape.has_synthetic_constant_table,
            archivable: shape.archivable,
            state: Cell::new(ClassState::Allocated),
            mirror: Cell::new(None),
            early: Cell::new(false),
            shared_address: Cell::new(None),
            archived_mirror_index: Cell::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> Spur {
        self.symbol
    }

    pub fn kind(&self) -> KlassKind {
        self.kind
    }

    pub fn is_instance_klass(&self) -> bool {
        self.kind == KlassKind::Instance
    }

    pub fn is_obj_array_klass(&self) -> bool {
        matches!(self.kind, KlassKind::ObjArray { .. })
    }

    pub fn is_type_array_klass(&self) -> bool {
        matches!(self.kind, KlassKind::TypeArray(_))
    }

    /// Innermost element class of an object array, the class itself otherwise.
    pub fn bottom_klass(&self) -> Ref<Klass> {
        match self.kind {
            KlassKind::ObjArray { element } => element.bottom_klass(),
            _ => Ref::new(self),
        }
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    pub fn is_in_base_module(&self) -> bool {
        self.module() == Some(BASE_MODULE_NAME)
    }

    pub fn is_in_unnamed_module(&self) -> bool {
        self.module.is_none()
    }

    pub fn loader(&self) -> LoaderKind {
        self.loader
    }

    pub fn static_fields(&self) -> &[FieldInfo] {
        &self.static_fields
    }

    pub fn find_static_field(&self, name: Spur) -> Option<FieldInfo> {
        self.static_fields.iter().copied().find(|f| f.name == name)
    }

    /// Initial content of the mirror's static slots.
    pub fn default_static_values(&self) -> Vec<Value> {
        self.static_fields
            .iter()
            .map(|f| f.ty.default_value())
            .collect()
    }

    pub fn instance_field_count(&self) -> usize {
        self.instance_field_count
    }

    /// Enum-like class whose statics hold its singleton constants.
    pub fn has_synthetic_constant_table(&self) -> bool {
        self.has_synthetic_constant_table
    }

    /// False for classes whose instances carry state that cannot be archived.
    pub fn is_archivable(&self) -> bool {
        self.archivable
    }

    pub fn state(&self) -> ClassState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: ClassState) {
        self.state.set(state);
    }

    pub fn is_loaded(&self) -> bool {
        self.state() != ClassState::Allocated
    }

    pub fn is_linked(&self) -> bool {
        matches!(
            self.state(),
            ClassState::Linked | ClassState::BeingInitialized | ClassState::Initialized
        )
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == ClassState::Initialized
    }

    pub fn mirror(&self) -> Option<ObjectRef> {
        self.mirror.get()
    }

    pub(crate) fn set_mirror(&self, mirror: ObjectRef) {
        self.mirror.set(Some(mirror));
    }

    /// Loaded before the runtime finished its early bootstrap phase.
    pub fn is_early(&self) -> bool {
        self.early.get()
    }

    pub(crate) fn set_early(&self, early: bool) {
        self.early.set(early);
    }

    /// Buffered address of this descriptor in the archive it was mapped from.
    pub fn shared_address(&self) -> Option<Address> {
        self.shared_address.get()
    }

    pub fn is_shared(&self) -> bool {
        self.shared_address.get().is_some()
    }

    pub(crate) fn set_shared_address(&self, address: Address) {
        self.shared_address.set(Some(address));
    }

    pub fn archived_mirror_index(&self) -> Option<u32> {
        self.archived_mirror_index.get()
    }

    pub(crate) fn set_archived_mirror_index(&self, index: Option<u32>) {
        self.archived_mirror_index.set(index);
    }
}

impl fmt::Debug for Klass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Klass")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("shared", &self.shared_address())
            .finish()
    }
}

impl fmt::Display for Klass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Name of the array class whose elements are `element`.
pub fn array_class_name(element: &str) -> String {
    if element.starts_with('[') {
        format!("[{}", element)
    } else {
        format!("[L{};", element)
    }
}

pub fn type_array_class_name(bt: BasicType) -> String {
    format!("[{}", bt.type_char())
}

/// Package part of a class name: everything before the last `/`.
pub fn package_of(class_name: &str) -> Option<&str> {
    class_name.rfind('/').map(|i| &class_name[..i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_names() {
        assert_eq!(array_class_name("base/lang/Object"), "[Lbase/lang/Object;");
        assert_eq!(array_class_name("[I"), "[[I");
        assert_eq!(type_array_class_name(BasicType::Long), "[J");
        assert_eq!(BasicType::from_type_char('C'), Some(BasicType::Char));
        assert_eq!(BasicType::from_type_char('L'), None);
    }

    #[test]
    fn packages() {
        assert_eq!(package_of("base/lang/Integer"), Some("base/lang"));
        assert_eq!(package_of("TopLevel"), None);
    }
}
