/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Enum-like classes.
//!
//! An archived instance of a class with a synthetic constant table must stay
//! identical to the constant its class exposes after restore. The class's
//! static reference fields are therefore archived as a subgraph of the class
//! itself, which its initializer restores before computing anything.

use super::{archiver::HeapArchiver, error::ArchiveError};
use crate::runtime::{
    klass::{FieldType, Klass},
    ref_ptr::Ref,
    value::ObjectRef,
};
use tracing::{debug, info};

pub fn handle_enum_obj(
    archiver: &mut HeapArchiver<'_>,
    level: usize,
    holder: Ref<Klass>,
    object: ObjectRef,
) -> Result<(), ArchiveError> {
    let klass = object.klass();
    if !archiver.enum_klasses.insert(klass) {
        return Ok(());
    }
    if klass == holder {
        // the entry fields already cover the constants
        return Ok(());
    }
    info!(target: "cds::heap", "Archiving static fields of enum class {}", klass.name());

    let fields: Vec<_> = klass
        .static_fields()
        .iter()
        .filter(|field| field.ty == FieldType::Reference)
        .copied()
        .collect();
    for field in fields {
        let value = archiver.runtime.static_field_at(klass, field.offset).as_object();
        let root = match value {
            Some(value) => {
                archiver.archive_reachable_objects_from(level, holder, value)?;
                archiver.archived_form(value)
            }
            None => None,
        };
        let root_index = archiver.roots.append_root(root);
        debug!(
            target: "cds::heap",
            "  {}::{} => root {}",
            klass.name(),
            archiver.runtime.resolve_symbol(field.name),
            root_index
        );
        let info = archiver.info_mut(klass);
        info.add_subgraph_entry_field(field.offset, root_index);
        info.set_has_archived_enum_constants();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::cds::{entry_fields::EntryFieldConfig, HeapArchive};
    use crate::runtime::{
        class_loader::{ClassDefinition, ClassLoader},
        options::Options,
        value::Value,
        vm::Runtime,
    };

    fn define(rt: &mut Runtime) {
        rt.define_class(
            ClassDefinition::new("base/test/Color")
                .enum_like()
                .reference_static("RED")
                .reference_static("GREEN")
                .reference_static("$VALUES")
                .initializer(|rt, klass| {
                    if rt.initialize_from_archived_subgraph(klass).is_some()
                        && !rt.static_field(klass, "RED")?.is_null()
                    {
                        return Ok(());
                    }
                    let red = rt.allocate_instance(klass);
                    let green = rt.allocate_instance(klass);
                    let values = rt.allocate_object_array(klass, vec![Value::from(red), Value::from(green)])?;
                    rt.set_static_field(klass, "RED", Value::from(red))?;
                    rt.set_static_field(klass, "GREEN", Value::from(green))?;
                    rt.set_static_field(klass, "$VALUES", Value::from(values))
                }),
        );
        rt.define_class(
            ClassDefinition::new("base/test/Holder")
                .reference_static("favorite")
                .initializer(|rt, klass| {
                    if rt.initialize_from_archived_subgraph(klass).is_some()
                        && !rt.static_field(klass, "favorite")?.is_null()
                    {
                        return Ok(());
                    }
                    let color = rt.resolve_class("base/test/Color")?;
                    rt.initialize_class(color)?;
                    let green = rt.static_field(color, "GREEN")?;
                    rt.set_static_field(klass, "favorite", green)
                }),
        );
    }

    #[test]
    fn enum_constants_keep_their_identity() {
        let mut rt = Runtime::new(Options::default());
        define(&mut rt);
        let config = EntryFieldConfig::empty().with_entry_field("base/test/Holder", "favorite");
        let archive = HeapArchive::dump(&mut rt, &config).unwrap();
        let color_image = archive
            .klasses
            .iter()
            .find(|image| image.name == "base/test/Color")
            .unwrap();
        assert!(color_image.has_archived_enum_constants);

        let mut rt = Runtime::with_archive(Options::default(), &archive).unwrap();
        define(&mut rt);
        let holder = rt.resolve_class("base/test/Holder").unwrap();
        rt.initialize_class(holder).unwrap();
        let color = rt.resolve_class("base/test/Color").unwrap();
        let favorite = rt.static_field(holder, "favorite").unwrap().as_object().unwrap();
        let green = rt.static_field(color, "GREEN").unwrap().as_object().unwrap();
        assert_eq!(favorite, green);
        assert!(favorite.header().is_archived_copy());
    }
}
