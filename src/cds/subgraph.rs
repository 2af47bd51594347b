/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use super::{
    archive_builder::ArchiveBuilder,
    deserializer::{ArchiveDeserializer, Deserializable},
    error::ArchiveError,
    serializer::{ArchiveSerializer, Serializable},
};
use crate::{
    heap::address::Address,
    runtime::{
        klass::{Klass, KlassKind, LoaderKind, BASE_MODULE_NAME},
        ref_ptr::Ref,
        vm_classes,
    },
};
use std::collections::HashMap;
use tracing::debug;

/// Static slot `offset` of the holder is restored from root `root_index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubgraphEntry {
    pub offset: u32,
    pub root_index: u32,
}

/// Dump-time bookkeeping for the subgraphs of one holder class.
#[derive(Debug)]
pub struct SubgraphInfo {
    klass: Ref<Klass>,
    is_full_module_graph: bool,
    has_non_early_klasses: bool,
    entry_fields: Vec<SubgraphEntry>,
    subgraph_object_klasses: Vec<Ref<Klass>>,
    has_archived_enum_constants: bool,
}

impl SubgraphInfo {
    pub fn new(klass: Ref<Klass>, is_full_module_graph: bool) -> Self {
        Self {
            klass,
            is_full_module_graph,
            has_non_early_klasses: false,
            entry_fields: Vec::new(),
            subgraph_object_klasses: Vec::new(),
            has_archived_enum_constants: false,
        }
    }

    pub fn klass(&self) -> Ref<Klass> {
        self.klass
    }

    pub fn is_full_module_graph(&self) -> bool {
        self.is_full_module_graph
    }

    pub fn has_non_early_klasses(&self) -> bool {
        self.has_non_early_klasses
    }

    pub fn entry_fields(&self) -> &[SubgraphEntry] {
        &self.entry_fields
    }

    pub fn subgraph_object_klasses(&self) -> &[Ref<Klass>] {
        &self.subgraph_object_klasses
    }

    pub fn has_archived_enum_constants(&self) -> bool {
        self.has_archived_enum_constants
    }

    pub(crate) fn set_has_archived_enum_constants(&mut self) {
        self.has_archived_enum_constants = true;
    }

    pub fn add_subgraph_entry_field(&mut self, offset: u32, root_index: u32) {
        self.entry_fields.push(SubgraphEntry { offset, root_index });
    }

    /// Records that `klass` must be loaded before the holder's archived
    /// fields may be exposed. Classes that are always present at restore
    /// time are skipped. Returns true if `klass` was added.
    pub fn add_subgraph_object_klass(
        &mut self,
        klass: Ref<Klass>,
        allow_test_classes: bool,
    ) -> Result<bool, ArchiveError> {
        if klass == self.klass {
            return Ok(false);
        }
        match klass.kind() {
            KlassKind::Instance => {
                if klass.name() == vm_classes::STRING || klass.name() == vm_classes::OBJECT {
                    return Ok(false);
                }
                check_allowed_klass(klass, allow_test_classes)?;
            }
            KlassKind::ObjArray { .. } => {
                let bottom = klass.bottom_klass();
                if bottom.is_instance_klass() {
                    check_allowed_klass(bottom, allow_test_classes)?;
                }
                if klass.name() == vm_classes::OBJECT_ARRAY {
                    return Ok(false);
                }
            }
            KlassKind::TypeArray(_) => return Ok(false),
        }
        if self.subgraph_object_klasses.contains(&klass) {
            return Ok(false);
        }
        debug!(target: "cds::heap", "Adding klass {}", klass.name());
        self.subgraph_object_klasses.push(klass);
        self.has_non_early_klasses |= is_non_early_klass(klass);
        Ok(true)
    }
}

/// Only classes of the foundational module may appear in archived
/// subgraphs. With a test class configured, classes in an unnamed package
/// of the unnamed module are accepted too.
pub fn check_allowed_klass(klass: Ref<Klass>, allow_test_classes: bool) -> Result<(), ArchiveError> {
    if klass.is_in_base_module() {
        if klass.loader() != LoaderKind::Boot {
            return Err(ArchiveError::DisallowedClass {
                class_name: klass.name().to_owned(),
                reason: "classes in the base module must be loaded by the boot loader".to_owned(),
            });
        }
        if klass.package().is_none() {
            return Err(ArchiveError::DisallowedClass {
                class_name: klass.name().to_owned(),
                reason: format!("classes in {} cannot be in an unnamed package", BASE_MODULE_NAME),
            });
        }
        return Ok(());
    }
    if allow_test_classes && klass.is_in_unnamed_module() && klass.package().is_none() {
        return Ok(());
    }
    let extra = if allow_test_classes {
        ", or in an unnamed package of an unnamed module"
    } else {
        ""
    };
    Err(ArchiveError::DisallowedClass {
        class_name: klass.name().to_owned(),
        reason: format!("must be in {}{}", BASE_MODULE_NAME, extra),
    })
}

/// True if `klass` (or the bottom class of an object array) was loaded
/// after the early bootstrap phase.
pub fn is_non_early_klass(klass: Ref<Klass>) -> bool {
    let klass = klass.bottom_klass();
    if klass.is_instance_klass() && !klass.is_early() {
        debug!(target: "cds::heap", "non-early: {}", klass.name());
        return true;
    }
    false
}

/// Subgraph infos of the current dump, in creation order.
#[derive(Default)]
pub struct DumpTimeSubgraphTable {
    infos: Vec<SubgraphInfo>,
    index: HashMap<Ref<Klass>, usize>,
}

impl DumpTimeSubgraphTable {
    pub fn get_or_init(&mut self, klass: Ref<Klass>, is_full_module_graph: bool) -> &mut SubgraphInfo {
        let infos = &mut self.infos;
        let at = *self.index.entry(klass).or_insert_with(|| {
            infos.push(SubgraphInfo::new(klass, is_full_module_graph));
            infos.len() - 1
        });
        &mut self.infos[at]
    }

    pub fn get(&self, klass: Ref<Klass>) -> Option<&SubgraphInfo> {
        self.index.get(&klass).map(|at| &self.infos[*at])
    }

    pub fn get_mut(&mut self, klass: Ref<Klass>) -> Option<&mut SubgraphInfo> {
        match self.index.get(&klass) {
            Some(at) => Some(&mut self.infos[*at]),
            None => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubgraphInfo> {
        self.infos.iter()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

/// Frozen form of a [`SubgraphInfo`]: class references are buffered
/// addresses, entries are `(static slot offset, root index)` pairs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchivedSubgraphRecord {
    pub klass: Address,
    pub is_full_module_graph: bool,
    pub has_non_early_klasses: bool,
    pub entry_field_records: Vec<(u32, u32)>,
    pub subgraph_object_klasses: Vec<Address>,
}

impl ArchivedSubgraphRecord {
    pub fn init(info: &SubgraphInfo, builder: &dyn ArchiveBuilder) -> Self {
        // The full module graph is only restored when no class-rewriting
        // hooks are active, so the early-class gate does not apply.
        let has_non_early_klasses = !info.is_full_module_graph() && info.has_non_early_klasses();
        let record = Self {
            klass: builder.get_buffered_klass(info.klass()),
            is_full_module_graph: info.is_full_module_graph(),
            has_non_early_klasses,
            entry_field_records: info
                .entry_fields()
                .iter()
                .map(|entry| (entry.offset, entry.root_index))
                .collect(),
            subgraph_object_klasses: info
                .subgraph_object_klasses()
                .iter()
                .map(|klass| builder.get_buffered_klass(*klass))
                .collect(),
        };
        debug!(
            target: "cds::heap",
            "archived subgraph record for {}: {} entries, {} classes{}",
            info.klass().name(),
            record.entry_field_records.len(),
            record.subgraph_object_klasses.len(),
            if record.has_non_early_klasses { ", has non-early classes" } else { "" }
        );
        record
    }
}

const FLAG_FULL_MODULE_GRAPH: u8 = 1 << 0;
const FLAG_NON_EARLY_KLASSES: u8 = 1 << 1;

impl Serializable for ArchivedSubgraphRecord {
    fn serialize(&self, serializer: &mut ArchiveSerializer) {
        serializer.write_address(self.klass);
        let mut flags = 0;
        if self.is_full_module_graph {
            flags |= FLAG_FULL_MODULE_GRAPH;
        }
        if self.has_non_early_klasses {
            flags |= FLAG_NON_EARLY_KLASSES;
        }
        serializer.write_u8(flags);
        self.entry_field_records.serialize(serializer);
        self.subgraph_object_klasses.serialize(serializer);
    }
}

impl Deserializable for ArchivedSubgraphRecord {
    fn deserialize(deserializer: &mut ArchiveDeserializer<'_>) -> Result<Self, ArchiveError> {
        let klass = deserializer.get_address()?;
        let flags = deserializer.get_u8()?;
        if flags & !(FLAG_FULL_MODULE_GRAPH | FLAG_NON_EARLY_KLASSES) != 0 {
            return Err(ArchiveError::Malformed(format!("unknown subgraph record flags {:#x}", flags)));
        }
        Ok(Self {
            klass,
            is_full_module_graph: flags & FLAG_FULL_MODULE_GRAPH != 0,
            has_non_early_klasses: flags & FLAG_NON_EARLY_KLASSES != 0,
            entry_field_records: Vec::deserialize(deserializer)?,
            subgraph_object_klasses: Vec::deserialize(deserializer)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{
        class_loader::{ClassDefinition, ClassLoader},
        options::Options,
        vm::Runtime,
    };

    fn runtime() -> Runtime {
        let mut rt = Runtime::new(Options::default());
        rt.define_class(ClassDefinition::new("base/test/Holder").reference_static("field"));
        rt.define_class(ClassDefinition::new("base/test/Node").instance_fields(1));
        rt.define_class(ClassDefinition::new("TestClass").unnamed_module().reference_static("archivedObjects"));
        rt.define_class(ClassDefinition::new("app/Foreign").unnamed_module().loader(LoaderKind::App));
        rt
    }

    #[test]
    fn well_known_and_holder_classes_are_skipped() {
        let mut rt = runtime();
        let holder = rt.resolve_class("base/test/Holder").unwrap();
        let node = rt.resolve_class("base/test/Node").unwrap();
        let int_array = rt.resolve_class("[I").unwrap();
        let mut info = SubgraphInfo::new(holder, false);
        assert!(!info.add_subgraph_object_klass(holder, false).unwrap());
        assert!(!info.add_subgraph_object_klass(rt.string_klass(), false).unwrap());
        assert!(!info.add_subgraph_object_klass(rt.object_klass(), false).unwrap());
        assert!(!info.add_subgraph_object_klass(rt.object_array_klass(), false).unwrap());
        assert!(!info.add_subgraph_object_klass(int_array, false).unwrap());
        assert!(info.add_subgraph_object_klass(node, false).unwrap());
        assert!(!info.add_subgraph_object_klass(node, false).unwrap());
        assert_eq!(info.subgraph_object_klasses(), &[node]);
        assert!(!info.has_non_early_klasses());
    }

    #[test]
    fn foreign_classes_are_rejected() {
        let mut rt = runtime();
        let holder = rt.resolve_class("base/test/Holder").unwrap();
        let foreign = rt.resolve_class("app/Foreign").unwrap();
        let foreign_array = rt.resolve_class("[Lapp/Foreign;").unwrap();
        let mut info = SubgraphInfo::new(holder, false);
        assert!(matches!(
            info.add_subgraph_object_klass(foreign, true),
            Err(ArchiveError::DisallowedClass { .. })
        ));
        assert!(matches!(
            info.add_subgraph_object_klass(foreign_array, false),
            Err(ArchiveError::DisallowedClass { .. })
        ));
    }

    #[test]
    fn test_classes_need_the_override() {
        let mut rt = runtime();
        let holder = rt.resolve_class("base/test/Holder").unwrap();
        let test_class = rt.resolve_class("TestClass").unwrap();
        let mut info = SubgraphInfo::new(holder, false);
        assert!(info.add_subgraph_object_klass(test_class, false).is_err());
        assert!(info.add_subgraph_object_klass(test_class, true).unwrap());
    }

    #[test]
    fn late_classes_mark_the_subgraph_non_early() {
        let mut rt = runtime();
        let holder = rt.resolve_class("base/test/Holder").unwrap();
        rt.end_early_phase();
        let node_array = rt.resolve_class("[Lbase/test/Node;").unwrap();
        assert!(is_non_early_klass(node_array));
        let mut info = SubgraphInfo::new(holder, false);
        info.add_subgraph_object_klass(node_array, false).unwrap();
        assert!(info.has_non_early_klasses());
    }

    #[test]
    fn dump_time_table_keeps_one_info_per_holder() {
        let mut rt = runtime();
        let holder = rt.resolve_class("base/test/Holder").unwrap();
        let mut table = DumpTimeSubgraphTable::default();
        table.get_or_init(holder, false).add_subgraph_entry_field(0, 3);
        table.get_or_init(holder, true).add_subgraph_entry_field(1, 4);
        assert_eq!(table.len(), 1);
        let info = table.get(holder).unwrap();
        assert!(!info.is_full_module_graph());
        assert_eq!(info.entry_fields().len(), 2);
    }
}
