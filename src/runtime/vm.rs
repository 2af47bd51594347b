/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use super::{
    class_loader::{ClassDefinition, ClassLoadError, ClassLoader},
    klass::{
        array_class_name, type_array_class_name, BasicType, ClassState, FieldInfo, Klass,
        KlassKind, KlassShape, LoaderKind, BASE_MODULE_NAME,
    },
    options::Options,
    ref_ptr::Ref,
    value::{ObjectRef, Value},
    vm_classes,
};
use crate::{
    cds::{
        error::ArchiveError,
        heap_loader::LoadedArchive,
        restore::{self, RestoreState},
        HeapArchive,
    },
    heap::{
        address::Address,
        cell::{CellKind, MirrorOf},
        Heap,
    },
};
use lasso::{Rodeo, Spur};
use std::{collections::HashMap, rc::Rc};
use tracing::debug;
use vec_map::VecMap;

/// The managed runtime: heap, class dictionary and class loading.
pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) interner: Rodeo<Spur>,
    pub(crate) options: Options,
    definitions: HashMap<Spur, ClassDefinition>,
    dictionary: HashMap<Spur, Ref<Klass>>,
    /// Owns every descriptor, including archived ones that were never loaded.
    klasses: Vec<Box<Klass>>,
    loaded: Vec<Ref<Klass>>,
    shared_klasses: HashMap<Spur, Ref<Klass>>,
    primitive_mirrors: VecMap<ObjectRef>,
    pending_mirrors: Vec<Ref<Klass>>,
    class_klass: Option<Ref<Klass>>,
    early_phase: bool,
    archive: Option<Rc<LoadedArchive>>,
}

impl Runtime {
    pub fn new(options: Options) -> Self {
        let mut rt = Self::uninitialized(options);
        rt.bootstrap();
        rt
    }

    /// Maps `archive` before bootstrapping, so that bootstrap classes adopt
    /// their archived descriptors and mirrors.
    pub fn with_archive(options: Options, archive: &HeapArchive) -> Result<Self, ArchiveError> {
        let mut rt = Self::uninitialized(options);
        let loaded = LoadedArchive::map(&mut rt, archive)?;
        rt.archive = Some(Rc::new(loaded));
        rt.bootstrap();
        // Archived subgraphs may refer to box class mirrors.
        rt.initialize_box_classes()?;
        Ok(rt)
    }

    fn uninitialized(options: Options) -> Self {
        let mut rt = Self {
            heap: Heap::new(options.hash_seed),
            interner: Rodeo::new(),
            options,
            definitions: HashMap::new(),
            dictionary: HashMap::new(),
            klasses: Vec::new(),
            loaded: Vec::new(),
            shared_klasses: HashMap::new(),
            primitive_mirrors: VecMap::new(),
            pending_mirrors: Vec::new(),
            class_klass: None,
            early_phase: true,
            archive: None,
        };
        for definition in vm_classes::bootstrap_definitions() {
            rt.define_class(definition);
        }
        rt
    }

    fn bootstrap(&mut self) {
        for name in vm_classes::bootstrap_classes() {
            if let Err(error) = self.resolve_class(name) {
                panic!("failed to bootstrap {}: {}", name, error);
            }
        }
        self.create_primitive_mirrors();
    }

    fn create_primitive_mirrors(&mut self) {
        let class_klass = self.class_klass();
        for bt in BasicType::ALL.iter().copied() {
            let archived = self.archive.as_ref().and_then(|archive| {
                let index = archive.basic_type_mirror_index(bt)?;
                archive.roots().get_root(index, true)
            });
            let mirror = match archived {
                Some(mirror) => mirror,
                None => self.heap.allocate(
                    class_klass,
                    CellKind::Mirror(MirrorOf::Primitive(bt)),
                    Vec::new(),
                ),
            };
            self.primitive_mirrors.insert(bt.index(), mirror);
        }
    }

    fn initialize_box_classes(&mut self) -> Result<(), ClassLoadError> {
        for bt in BasicType::ALL.iter().copied() {
            let klass = self.resolve_class(vm_classes::box_class_name(bt))?;
            self.initialize_class(klass)?;
        }
        Ok(())
    }

    pub fn define_class(&mut self, definition: ClassDefinition) {
        let symbol = self.interner.get_or_intern(&definition.name);
        self.definitions.insert(symbol, definition);
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    /// Turns class-rewriting instrumentation on or off.
    pub fn set_class_file_load_hook(&mut self, enabled: bool) {
        self.options.class_file_load_hook = enabled;
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn intern(&mut self, name: &str) -> Spur {
        self.interner.get_or_intern(name)
    }

    pub fn resolve_symbol(&self, symbol: Spur) -> &str {
        self.interner.resolve(&symbol)
    }

    pub fn archive(&self) -> Option<Rc<LoadedArchive>> {
        self.archive.clone()
    }

    pub fn is_early_phase(&self) -> bool {
        self.early_phase
    }

    /// Classes loaded from now on are not guaranteed to be loadable before
    /// instrumentation agents get a chance to rewrite them.
    pub fn end_early_phase(&mut self) {
        debug!(target: "class_load", "early bootstrap phase ended");
        self.early_phase = false;
    }

    /// Loaded classes in load order.
    pub fn loaded_klasses(&self) -> &[Ref<Klass>] {
        &self.loaded
    }

    pub fn find_loaded_class(&self, name: &str) -> Option<Ref<Klass>> {
        let symbol = self.interner.get(name)?;
        self.dictionary.get(&symbol).copied()
    }

    /// Archived descriptor for `name`, whether or not it has been loaded.
    pub fn shared_klass(&self, name: &str) -> Option<Ref<Klass>> {
        let symbol = self.interner.get(name)?;
        self.shared_klasses.get(&symbol).copied()
    }

    fn well_known(&self, name: &str) -> Ref<Klass> {
        self.find_loaded_class(name)
            .unwrap_or_else(|| panic!("{} is not bootstrapped", name))
    }

    pub fn object_klass(&self) -> Ref<Klass> {
        self.well_known(vm_classes::OBJECT)
    }

    pub fn class_klass(&self) -> Ref<Klass> {
        self.class_klass
            .unwrap_or_else(|| panic!("{} is not bootstrapped", vm_classes::CLASS))
    }

    pub fn string_klass(&self) -> Ref<Klass> {
        self.well_known(vm_classes::STRING)
    }

    pub fn object_array_klass(&self) -> Ref<Klass> {
        self.well_known(vm_classes::OBJECT_ARRAY)
    }

    pub fn primitive_mirror(&self, bt: BasicType) -> Option<ObjectRef> {
        self.primitive_mirrors.get(bt.index()).copied()
    }

    pub(crate) fn register_klass(&mut self, klass: Klass) -> Ref<Klass> {
        let boxed = Box::new(klass);
        let klass = Ref::new(&*boxed);
        self.klasses.push(boxed);
        klass
    }

    pub(crate) fn register_shared_klass(&mut self, klass: Klass, address: Address) -> Ref<Klass> {
        let klass = self.register_klass(klass);
        klass.set_shared_address(address);
        self.shared_klasses.insert(klass.symbol(), klass);
        klass
    }

    fn new_instance_klass(&mut self, definition: &ClassDefinition) -> Ref<Klass> {
        let symbol = self.interner.get_or_intern(&definition.name);
        let mut static_fields = Vec::with_capacity(definition.static_fields.len());
        for (offset, (name, ty)) in definition.static_fields.iter().enumerate() {
            static_fields.push(FieldInfo {
                name: self.interner.get_or_intern(name),
                offset: offset as u32,
                ty: *ty,
            });
        }
        self.register_klass(Klass::new(KlassShape {
            name: definition.name.clone(),
            symbol,
            kind: KlassKind::Instance,
            module: definition.module.clone(),
            package: definition.package.clone(),
            loader: definition.loader,
            static_fields,
            instance_field_count: definition.instance_fields,
            has_synthetic_constant_table: definition.has_synthetic_constant_table,
            archivable: definition.archivable,
        }))
    }

    /// An archived descriptor can stand in for `definition` only if nothing
    /// about its shape changed since the dump.
    fn shared_klass_matches(&self, shared: Ref<Klass>, definition: &ClassDefinition) -> bool {
        shared.is_instance_klass()
            && shared.loader() == definition.loader
            && shared.module() == definition.module.as_deref()
            && shared.instance_field_count() == definition.instance_fields
            && shared.has_synthetic_constant_table() == definition.has_synthetic_constant_table
            && shared.is_archivable() == definition.archivable
            && shared.static_fields().len() == definition.static_fields.len()
            && shared
                .static_fields()
                .iter()
                .zip(definition.static_fields.iter())
                .all(|(field, (name, ty))| {
                    self.interner.resolve(&field.name) == name.as_str() && field.ty == *ty
                })
    }

    fn load_instance_class(&mut self, symbol: Spur, name: &str) -> Result<Ref<Klass>, ClassLoadError> {
        let definition = self
            .definitions
            .get(&symbol)
            .cloned()
            .ok_or_else(|| ClassLoadError::ClassNotFound(name.to_owned()))?;
        let klass = match self.shared_klasses.get(&symbol).copied() {
            Some(shared) if self.shared_klass_matches(shared, &definition) => shared,
            Some(_) => {
                debug!(
                    target: "class_load",
                    "archived {} does not match its definition, loading it from scratch", name
                );
                self.new_instance_klass(&definition)
            }
            None => self.new_instance_klass(&definition),
        };
        Ok(self.finish_loading(klass))
    }

    fn load_array_class(&mut self, symbol: Spur, name: &str) -> Result<Ref<Klass>, ClassLoadError> {
        let component = &name[1..];
        let mut chars = component.chars();
        let kind = match (chars.next(), chars.next()) {
            (Some(c), None) => BasicType::from_type_char(c)
                .filter(|bt| *bt != BasicType::Void)
                .map(KlassKind::TypeArray)
                .ok_or_else(|| ClassLoadError::ClassNotFound(name.to_owned()))?,
            (Some('['), _) => KlassKind::ObjArray {
                element: self.resolve_class(component)?,
            },
            (Some('L'), _) if component.ends_with(';') => KlassKind::ObjArray {
                element: self.resolve_class(&component[1..component.len() - 1])?,
            },
            _ => return Err(ClassLoadError::ClassNotFound(name.to_owned())),
        };
        let (module, package, loader) = match kind {
            KlassKind::ObjArray { element } => {
                let bottom = element.bottom_klass();
                (
                    bottom.module().map(str::to_owned),
                    bottom.package().map(str::to_owned),
                    bottom.loader(),
                )
            }
            _ => (Some(BASE_MODULE_NAME.to_owned()), None, LoaderKind::Boot),
        };
        let shared = self
            .shared_klasses
            .get(&symbol)
            .copied()
            .filter(|shared| shared.kind() == kind);
        let klass = match shared {
            Some(shared) => shared,
            None => self.register_klass(Klass::new(KlassShape {
                name: name.to_owned(),
                symbol,
                kind,
                module,
                package,
                loader,
                static_fields: Vec::new(),
                instance_field_count: 0,
                has_synthetic_constant_table: false,
                archivable: true,
            })),
        };
        Ok(self.finish_loading(klass))
    }

    fn finish_loading(&mut self, klass: Ref<Klass>) -> Ref<Klass> {
        klass.set_state(ClassState::Loaded);
        klass.set_early(self.early_phase);
        self.dictionary.insert(klass.symbol(), klass);
        self.loaded.push(klass);
        debug!(
            target: "class_load",
            "loaded {}{}",
            klass.name(),
            if klass.is_shared() { " (shared)" } else { "" }
        );
        if klass.name() == vm_classes::CLASS {
            self.class_klass = Some(klass);
            for pending in std::mem::take(&mut self.pending_mirrors) {
                self.install_mirror(pending);
            }
        }
        self.install_mirror(klass);
        klass
    }

    fn install_mirror(&mut self, klass: Ref<Klass>) {
        let class_klass = match self.class_klass {
            Some(class_klass) => class_klass,
            None => {
                self.pending_mirrors.push(klass);
                return;
            }
        };
        if let Some(mirror) = self.archived_mirror_of(klass) {
            klass.set_mirror(mirror);
            return;
        }
        let mirror = self.heap.allocate(
            class_klass,
            CellKind::Mirror(MirrorOf::Klass(klass)),
            klass.default_static_values(),
        );
        klass.set_mirror(mirror);
    }

    fn archived_mirror_of(&self, klass: Ref<Klass>) -> Option<ObjectRef> {
        if !klass.is_shared() {
            return None;
        }
        let index = klass.archived_mirror_index()?;
        self.archive.as_ref()?.roots().get_root(index, true)
    }

    pub fn allocate_instance(&mut self, klass: Ref<Klass>) -> ObjectRef {
        assert!(klass.is_instance_klass(), "{} is not an instance class", klass.name());
        let fields = vec![Value::Null; klass.instance_field_count()];
        self.heap.allocate(klass, CellKind::Instance, fields)
    }

    pub fn allocate_object_array(
        &mut self,
        element: Ref<Klass>,
        values: Vec<Value>,
    ) -> Result<ObjectRef, ClassLoadError> {
        let array_klass = self.resolve_class(&array_class_name(element.name()))?;
        Ok(self.heap.allocate(array_klass, CellKind::ObjArray, values))
    }

    pub fn allocate_type_array(&mut self, bt: BasicType, values: &[i64]) -> Result<ObjectRef, ClassLoadError> {
        let array_klass = self.resolve_class(&type_array_class_name(bt))?;
        let values = values.iter().copied().map(Value::Int).collect();
        Ok(self.heap.allocate(array_klass, CellKind::TypeArray(bt), values))
    }

    pub fn new_string(&mut self, s: &str) -> Result<ObjectRef, ClassLoadError> {
        let chars: Vec<i64> = s.chars().map(|c| c as i64).collect();
        let value = self.allocate_type_array(BasicType::Char, &chars)?;
        let string_klass = self.string_klass();
        let mut string = self.allocate_instance(string_klass);
        string.set_field(0, Value::Object(value));
        Ok(string)
    }

    pub fn string_value(&self, string: ObjectRef) -> Option<String> {
        if Some(string.klass()) != self.find_loaded_class(vm_classes::STRING) {
            return None;
        }
        let chars = string.field(0).as_object()?;
        chars
            .fields()
            .iter()
            .map(|v| v.as_int().and_then(|c| char::from_u32(c as u32)))
            .collect()
    }

    pub fn static_field_info(&mut self, klass: Ref<Klass>, name: &str) -> Result<FieldInfo, ClassLoadError> {
        let symbol = self.interner.get_or_intern(name);
        klass
            .find_static_field(symbol)
            .ok_or_else(|| ClassLoadError::NoSuchField {
                class: klass.name().to_owned(),
                field: name.to_owned(),
            })
    }

    pub fn static_field(&mut self, klass: Ref<Klass>, name: &str) -> Result<Value, ClassLoadError> {
        let field = self.static_field_info(klass, name)?;
        Ok(self.static_field_at(klass, field.offset))
    }

    pub fn set_static_field(&mut self, klass: Ref<Klass>, name: &str, value: Value) -> Result<(), ClassLoadError> {
        let field = self.static_field_info(klass, name)?;
        self.set_static_field_at(klass, field.offset, value);
        Ok(())
    }

    pub fn static_field_at(&self, klass: Ref<Klass>, offset: u32) -> Value {
        klass
            .mirror()
            .map_or(Value::Null, |mirror| mirror.field(offset as usize))
    }

    pub fn set_static_field_at(&mut self, klass: Ref<Klass>, offset: u32, value: Value) {
        let mut mirror = klass
            .mirror()
            .unwrap_or_else(|| panic!("{} has no mirror", klass.name()));
        mirror.set_field(offset as usize, value);
    }

    /// Restores the archived static fields of `klass`, see
    /// [`restore::initialize_from_archived_subgraph`].
    pub fn initialize_from_archived_subgraph(&mut self, klass: Ref<Klass>) -> Option<RestoreState> {
        restore::initialize_from_archived_subgraph(self, klass)
    }

    /// One-line description used in logs and diagnostics.
    pub fn describe(&self, object: ObjectRef) -> String {
        let mut out = format!(
            "{} {} (size {}",
            object.address(),
            object.klass().name(),
            object.size()
        );
        if let Some(hash) = object.identity_hash() {
            out.push_str(&format!(", hash 0x{:x}", hash));
        }
        out.push(')');
        match object.mirror_of() {
            Some(MirrorOf::Klass(klass)) => out.push_str(&format!(" mirror of {}", klass.name())),
            Some(MirrorOf::Primitive(bt)) => out.push_str(&format!(" mirror of {}", bt.name())),
            None => {}
        }
        if let Some(s) = self.string_value(object) {
            out.push_str(&format!(" \"{}\"", s));
        }
        out
    }
}

impl ClassLoader for Runtime {
    fn resolve_class(&mut self, name: &str) -> Result<Ref<Klass>, ClassLoadError> {
        let symbol = self.interner.get_or_intern(name);
        if let Some(klass) = self.dictionary.get(&symbol) {
            return Ok(*klass);
        }
        if name.starts_with('[') {
            self.load_array_class(symbol, name)
        } else {
            self.load_instance_class(symbol, name)
        }
    }

    fn link_class(&mut self, klass: Ref<Klass>) -> Result<(), ClassLoadError> {
        match klass.state() {
            ClassState::Allocated => Err(ClassLoadError::IncompatibleClassChange(format!(
                "{} is not loaded",
                klass.name()
            ))),
            ClassState::InitializationError => Err(ClassLoadError::Erroneous(klass.name().to_owned())),
            ClassState::Loaded => {
                if let KlassKind::ObjArray { element } = klass.kind() {
                    self.link_class(element)?;
                }
                klass.set_state(ClassState::Linked);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn initialize_class(&mut self, klass: Ref<Klass>) -> Result<(), ClassLoadError> {
        match klass.state() {
            ClassState::Initialized | ClassState::BeingInitialized => return Ok(()),
            ClassState::InitializationError => {
                return Err(ClassLoadError::Erroneous(klass.name().to_owned()))
            }
            ClassState::Allocated => {
                let loaded = self.resolve_class(klass.name())?;
                if loaded != klass {
                    return Err(ClassLoadError::IncompatibleClassChange(format!(
                        "{} was loaded from a different definition",
                        klass.name()
                    )));
                }
            }
            _ => {}
        }
        self.link_class(klass)?;
        klass.set_state(ClassState::BeingInitialized);
        let initializer = self
            .definitions
            .get(&klass.symbol())
            .and_then(|definition| definition.initializer.clone());
        let result = match initializer {
            Some(initializer) => initializer(self, klass),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                klass.set_state(ClassState::Initialized);
                debug!(target: "class_init", "initialized {}", klass.name());
                Ok(())
            }
            Err(error) => {
                klass.set_state(ClassState::InitializationError);
                debug!(target: "class_init", "initialization of {} failed: {}", klass.name(), error);
                Err(ClassLoadError::InitializationFailed {
                    class: klass.name().to_owned(),
                    reason: error.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::klass::FieldType;

    #[test]
    fn bootstrap_loads_well_known_classes() {
        let rt = Runtime::new(Options::default());
        assert_eq!(rt.object_klass().name(), vm_classes::OBJECT);
        assert_eq!(rt.class_klass().name(), vm_classes::CLASS);
        for klass in rt.loaded_klasses() {
            let mirror = klass.mirror().expect("every loaded class has a mirror");
            assert_eq!(mirror.klass(), rt.class_klass());
            assert_eq!(mirror.mirror_of(), Some(MirrorOf::Klass(*klass)));
            assert!(klass.is_early());
        }
        for bt in BasicType::ALL.iter() {
            assert!(rt.primitive_mirror(*bt).is_some());
        }
    }

    #[test]
    fn array_classes_follow_their_element() {
        let mut rt = Runtime::new(Options::default());
        rt.define_class(ClassDefinition::new("app/Thing").unnamed_module().loader(LoaderKind::App));
        let nested = rt.resolve_class("[[Lapp/Thing;").unwrap();
        assert!(nested.is_obj_array_klass());
        assert_eq!(nested.bottom_klass().name(), "app/Thing");
        assert_eq!(nested.loader(), LoaderKind::App);
        assert!(nested.is_in_unnamed_module());
        assert!(rt.resolve_class("[V").is_err());
        assert!(rt.resolve_class("[Lmissing/Class;").is_err());
    }

    #[test]
    fn initializer_runs_once_and_reentry_is_allowed() {
        let mut rt = Runtime::new(Options::default());
        rt.define_class(
            ClassDefinition::new("base/test/Counter")
                .static_field("count", FieldType::Primitive(BasicType::Int))
                .initializer(|rt, klass| {
                    // re-entrant request from the initializer itself
                    rt.initialize_class(klass)?;
                    let count = rt.static_field(klass, "count")?.as_int().unwrap_or(0);
                    rt.set_static_field(klass, "count", Value::Int(count + 1))
                }),
        );
        let klass = rt.resolve_class("base/test/Counter").unwrap();
        rt.initialize_class(klass).unwrap();
        rt.initialize_class(klass).unwrap();
        assert_eq!(rt.static_field(klass, "count").unwrap(), Value::Int(1));
        assert!(klass.is_initialized());
    }

    #[test]
    fn failed_initializer_leaves_class_erroneous() {
        let mut rt = Runtime::new(Options::default());
        rt.define_class(ClassDefinition::new("base/test/Broken").initializer(|_, klass| {
            Err(ClassLoadError::InitializationFailed {
                class: klass.name().to_owned(),
                reason: "boom".to_owned(),
            })
        }));
        let klass = rt.resolve_class("base/test/Broken").unwrap();
        assert!(rt.initialize_class(klass).is_err());
        assert_eq!(klass.state(), ClassState::InitializationError);
        assert_eq!(
            rt.initialize_class(klass),
            Err(ClassLoadError::Erroneous("base/test/Broken".to_owned()))
        );
    }

    #[test]
    fn strings_round_trip_through_char_arrays() {
        let mut rt = Runtime::new(Options::default());
        let s = rt.new_string("héllo").unwrap();
        assert_eq!(rt.string_value(s).as_deref(), Some("héllo"));
        assert!(rt.describe(s).contains("\"héllo\""));
    }

    #[test]
    fn box_classes_get_primitive_mirrors() {
        let mut rt = Runtime::new(Options::default());
        let integer = rt.resolve_class("base/lang/Integer").unwrap();
        rt.initialize_class(integer).unwrap();
        assert_eq!(
            rt.static_field(integer, "TYPE").unwrap(),
            Value::from(rt.primitive_mirror(BasicType::Int))
        );
        assert_eq!(rt.static_field(integer, "BYTES").unwrap(), Value::Int(4));
    }
}
