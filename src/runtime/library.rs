/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Definitions of the base-module classes that hold archived subgraphs.
//!
//! Every holder initializer first asks for its archived subgraph and only
//! computes a field that is still null afterwards, so the same definitions
//! work with and without an archive.

use super::{
    class_loader::{ClassDefinition, ClassLoadError, ClassLoader},
    klass::{BasicType, Klass},
    ref_ptr::Ref,
    value::{ObjectRef, Value},
    vm::Runtime,
    vm_classes,
};

pub const INTEGER_CACHE: &str = "base/lang/Integer$IntegerCache";
pub const LONG_CACHE: &str = "base/lang/Long$LongCache";
pub const BYTE_CACHE: &str = "base/lang/Byte$ByteCache";
pub const SHORT_CACHE: &str = "base/lang/Short$ShortCache";
pub const CHARACTER_CACHE: &str = "base/lang/Character$CharacterCache";
pub const IMMUTABLE_COLLECTIONS: &str = "base/util/ImmutableCollections";
pub const LIST_N: &str = "base/util/ImmutableCollections$ListN";
pub const SET_N: &str = "base/util/ImmutableCollections$SetN";
pub const MODULE_LAYER: &str = "base/lang/ModuleLayer";
pub const METHOD_TYPE_FORM: &str = "base/invoke/MethodTypeForm";
pub const ARCHIVED_CLASS_LOADERS: &str = "base/internal/loader/ArchivedClassLoaders";
pub const BUILTIN_CLASS_LOADER: &str = "base/internal/loader/BuiltinClassLoader";
pub const ARCHIVED_BOOT_LAYER: &str = "base/internal/module/ArchivedBootLayer";
pub const MODULE_ARCHIVED_DATA: &str = "base/lang/Module$ArchivedData";

/// Method types created by `MethodType`'s initializer: return type and
/// parameter types.
const METHOD_TYPES: &[(BasicType, &[BasicType])] = &[
    (BasicType::Void, &[]),
    (BasicType::Int, &[BasicType::Int, BasicType::Int]),
    (BasicType::Boolean, &[BasicType::Long]),
    (BasicType::Double, &[BasicType::Float, BasicType::Double]),
];

/// Restores `klass`'s archived subgraph, then computes `field` if the
/// archive did not provide it.
fn restore_or_compute<F>(rt: &mut Runtime, klass: Ref<Klass>, field: &str, compute: F) -> Result<(), ClassLoadError>
where
    F: FnOnce(&mut Runtime) -> Result<Value, ClassLoadError>,
{
    rt.initialize_from_archived_subgraph(klass);
    if rt.static_field(klass, field)?.is_null() {
        let value = compute(rt)?;
        rt.set_static_field(klass, field, value)?;
    }
    Ok(())
}

fn new_box(rt: &mut Runtime, bt: BasicType, value: i64) -> Result<ObjectRef, ClassLoadError> {
    let klass = rt.resolve_class(vm_classes::box_class_name(bt))?;
    let mut object = rt.allocate_instance(klass);
    object.set_field(0, Value::Int(value));
    Ok(object)
}

fn new_object_array(rt: &mut Runtime, values: Vec<Value>) -> Result<ObjectRef, ClassLoadError> {
    let object = rt.object_klass();
    rt.allocate_object_array(object, values)
}

fn new_instance(rt: &mut Runtime, name: &str, fields: Vec<Value>) -> Result<ObjectRef, ClassLoadError> {
    let klass = rt.resolve_class(name)?;
    rt.initialize_class(klass)?;
    let mut object = rt.allocate_instance(klass);
    for (index, value) in fields.into_iter().enumerate() {
        object.set_field(index, value);
    }
    Ok(object)
}

fn box_cache(holder: &'static str, bt: BasicType, low: i64, high: i64) -> ClassDefinition {
    ClassDefinition::new(holder)
        .reference_static("archivedCache")
        .initializer(move |rt, klass| {
            restore_or_compute(rt, klass, "archivedCache", |rt| {
                let mut values = Vec::with_capacity((high - low + 1) as usize);
                for i in low..=high {
                    values.push(Value::from(new_box(rt, bt, i)?));
                }
                let element = rt.resolve_class(vm_classes::box_class_name(bt))?;
                Ok(Value::from(rt.allocate_object_array(element, values)?))
            })
        })
}

fn immutable_collections() -> Vec<ClassDefinition> {
    vec![
        ClassDefinition::new(LIST_N).instance_fields(1),
        ClassDefinition::new(SET_N).instance_fields(1),
        ClassDefinition::new(IMMUTABLE_COLLECTIONS)
            .reference_static("archivedObjects")
            .reference_static("EMPTY_LIST")
            .reference_static("EMPTY_SET")
            .initializer(|rt, klass| {
                restore_or_compute(rt, klass, "archivedObjects", |rt| {
                    let elements = new_object_array(rt, Vec::new())?;
                    let list = new_instance(rt, LIST_N, vec![Value::from(elements)])?;
                    let set = new_instance(rt, SET_N, vec![Value::from(elements)])?;
                    Ok(Value::from(new_object_array(rt, vec![Value::from(list), Value::from(set)])?))
                })?;
                let archived = rt.static_field(klass, "archivedObjects")?.as_object();
                if let Some(archived) = archived {
                    rt.set_static_field(klass, "EMPTY_LIST", archived.field(0))?;
                    rt.set_static_field(klass, "EMPTY_SET", archived.field(1))?;
                }
                Ok(())
            }),
    ]
}

fn module_layer() -> ClassDefinition {
    // parents, modules
    ClassDefinition::new(MODULE_LAYER)
        .instance_fields(2)
        .reference_static("EMPTY_LAYER")
        .initializer(|rt, klass| {
            restore_or_compute(rt, klass, "EMPTY_LAYER", |rt| {
                let parents = new_object_array(rt, Vec::new())?;
                let modules = new_object_array(rt, Vec::new())?;
                let mut layer = rt.allocate_instance(klass);
                layer.set_field(0, Value::from(parents));
                layer.set_field(1, Value::from(modules));
                Ok(Value::from(layer))
            })
        })
}

fn method_types() -> Vec<ClassDefinition> {
    vec![
        // Forms are looked up in the method type table while it is being
        // built, so the table must exist before this class is initialized.
        ClassDefinition::new(METHOD_TYPE_FORM)
            .instance_fields(1)
            .initializer(|rt, _| {
                let method_type = rt.resolve_class(vm_classes::METHOD_TYPE)?;
                rt.initialize_class(method_type)?;
                if rt.static_field(method_type, "archivedMethodTypes")?.is_null() {
                    return Err(ClassLoadError::InitializationFailed {
                        class: METHOD_TYPE_FORM.to_owned(),
                        reason: "method type table is not initialized".to_owned(),
                    });
                }
                Ok(())
            }),
        // rtype, ptypes, form
        ClassDefinition::new(vm_classes::METHOD_TYPE)
            .instance_fields(3)
            .reference_static("archivedObjects")
            .reference_static("archivedMethodTypes")
            .reference_static("objectOnlyTypes")
            .initializer(|rt, klass| {
                restore_or_compute(rt, klass, "archivedObjects", |rt| {
                    let table = new_object_array(rt, vec![Value::Null; METHOD_TYPES.len()])?;
                    let object_only = new_object_array(rt, vec![Value::Null; 2])?;
                    rt.set_static_field(klass, "archivedMethodTypes", Value::from(table))?;
                    rt.set_static_field(klass, "objectOnlyTypes", Value::from(object_only))?;

                    let mut table = table;
                    let class_klass = rt.class_klass();
                    for (i, (rtype, ptypes)) in METHOD_TYPES.iter().enumerate() {
                        let ptypes: Vec<Value> = ptypes.iter().map(|bt| Value::from(rt.primitive_mirror(*bt))).collect();
                        let ptypes = rt.allocate_object_array(class_klass, ptypes)?;
                        let form = new_instance(rt, METHOD_TYPE_FORM, vec![Value::Int(i as i64)])?;
                        let mut method_type = rt.allocate_instance(klass);
                        method_type.set_field(0, Value::from(rt.primitive_mirror(*rtype)));
                        method_type.set_field(1, Value::from(ptypes));
                        method_type.set_field(2, Value::from(form));
                        table.set_field(i, Value::from(method_type));
                    }
                    Ok(Value::from(new_object_array(
                        rt,
                        vec![Value::from(table), Value::from(object_only)],
                    )?))
                })?;
                let archived = rt.static_field(klass, "archivedObjects")?.as_object();
                if let Some(archived) = archived {
                    rt.set_static_field(klass, "archivedMethodTypes", archived.field(0))?;
                    rt.set_static_field(klass, "objectOnlyTypes", archived.field(1))?;
                }
                Ok(())
            }),
    ]
}

fn full_module_graph() -> Vec<ClassDefinition> {
    vec![
        // name
        ClassDefinition::new(BUILTIN_CLASS_LOADER).instance_fields(1),
        ClassDefinition::new(ARCHIVED_CLASS_LOADERS)
            .reference_static("archivedClassLoaders")
            .initializer(|rt, klass| {
                restore_or_compute(rt, klass, "archivedClassLoaders", |rt| {
                    let mut loaders = Vec::new();
                    for name in ["boot", "platform", "app"].iter() {
                        let name = rt.new_string(name)?;
                        loaders.push(Value::from(new_instance(rt, BUILTIN_CLASS_LOADER, vec![Value::from(name)])?));
                    }
                    Ok(Value::from(new_object_array(rt, loaders)?))
                })
            }),
        ClassDefinition::new(ARCHIVED_BOOT_LAYER)
            .reference_static("archivedBootLayer")
            .initializer(|rt, klass| {
                restore_or_compute(rt, klass, "archivedBootLayer", |rt| {
                    let base = rt.new_string("base")?;
                    let modules = new_object_array(rt, vec![Value::from(base)])?;
                    let empty = rt.resolve_class(MODULE_LAYER)?;
                    rt.initialize_class(empty)?;
                    let parent = rt.static_field(empty, "EMPTY_LAYER")?;
                    let parents = new_object_array(rt, vec![parent])?;
                    new_instance(rt, MODULE_LAYER, vec![Value::from(parents), Value::from(modules)]).map(Value::from)
                })
            }),
        ClassDefinition::new(MODULE_ARCHIVED_DATA)
            .reference_static("archivedData")
            .initializer(|rt, klass| {
                restore_or_compute(rt, klass, "archivedData", |rt| {
                    let base = rt.new_string("base")?;
                    Ok(Value::from(new_object_array(rt, vec![Value::from(base)])?))
                })
            }),
    ]
}

/// Defines every class named by the built-in entry tables.
pub fn define_base_library(rt: &mut Runtime) {
    rt.define_class(box_cache(INTEGER_CACHE, BasicType::Int, -128, 127));
    rt.define_class(box_cache(LONG_CACHE, BasicType::Long, -128, 127));
    rt.define_class(box_cache(BYTE_CACHE, BasicType::Byte, -128, 127));
    rt.define_class(box_cache(SHORT_CACHE, BasicType::Short, -128, 127));
    rt.define_class(box_cache(CHARACTER_CACHE, BasicType::Char, 0, 127));
    rt.define_class(module_layer());
    for definition in immutable_collections()
        .into_iter()
        .chain(method_types())
        .chain(full_module_graph())
    {
        rt.define_class(definition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cds::{entry_fields::EntryFieldConfig, restore::RestoreState, HeapArchive},
        runtime::options::Options,
    };

    #[test]
    fn library_initializes_without_an_archive() {
        let mut rt = Runtime::new(Options::default());
        define_base_library(&mut rt);
        let cache = rt.resolve_class(INTEGER_CACHE).unwrap();
        rt.initialize_class(cache).unwrap();
        let array = rt.static_field(cache, "archivedCache").unwrap().as_object().unwrap();
        assert_eq!(array.len(), 256);
        assert_eq!(array.field(128).as_object().unwrap().field(0), Value::Int(0));

        let method_type = rt.resolve_class(vm_classes::METHOD_TYPE).unwrap();
        rt.initialize_class(method_type).unwrap();
        let table = rt.static_field(method_type, "archivedMethodTypes").unwrap().as_object().unwrap();
        assert!(table.fields().iter().all(|value| !value.is_null()));
    }

    #[test]
    fn method_type_table_is_pre_seeded() {
        let mut rt = Runtime::new(Options::default());
        define_base_library(&mut rt);
        let config = EntryFieldConfig::empty().with_entry_field(vm_classes::METHOD_TYPE, "archivedObjects");
        let archive = HeapArchive::dump(&mut rt, &config).unwrap();

        let mut rt = Runtime::with_archive(Options::default(), &archive).unwrap();
        define_base_library(&mut rt);
        let method_type = rt.resolve_class(vm_classes::METHOD_TYPE).unwrap();
        rt.initialize_class(method_type).unwrap();
        assert_eq!(
            rt.archive().unwrap().state_of(method_type.shared_address().unwrap()),
            RestoreState::Initialized
        );
        let archived = rt.static_field(method_type, "archivedObjects").unwrap().as_object().unwrap();
        assert!(archived.header().is_archived_copy());
        assert_eq!(rt.static_field(method_type, "archivedMethodTypes").unwrap(), archived.field(0));
    }
}
