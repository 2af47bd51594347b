/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use super::{
    archive_builder::ArchiveBuilder,
    dictionary::CompactDictionaryWriter,
    entry_fields::{ArchivableStaticFieldInfo, EntryTables},
    error::{ArchiveError, Diagnostics},
    heap_writer::{write_klass_images, ArchiveHeapWriter},
    mirrors::ScratchMirrors,
    object_cache::{AllocationStats, ArchivedObjectCache},
    roots::RootTable,
    stats::{DumpStats, RecordingStats},
    subgraph::{ArchivedSubgraphRecord, DumpTimeSubgraphTable, SubgraphInfo},
    visited::SeenObjects,
    HeapArchive,
};
use crate::{
    heap::{
        trace::{SimpleVisitor, Slot},
        NoRelocationScope,
    },
    runtime::{
        klass::{BasicType, Klass},
        options::MAX_PERMOBJ_SEGMENT_SHIFT,
        ref_ptr::Ref,
        value::ObjectRef,
        vm::Runtime,
        vm_classes,
    },
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use vec_map::VecMap;

/// State of one dump pass: everything that is written between pinning the
/// heap and producing the archive.
///
/// The heap stays pinned for the lifetime of the archiver, so live object
/// addresses can key its tables.
pub struct HeapArchiver<'a> {
    pub(super) runtime: &'a Runtime,
    pub(super) mirrors: &'a ScratchMirrors,
    pub(super) object_cache: ArchivedObjectCache,
    pub(super) seen: SeenObjects,
    pub(super) roots: RootTable,
    pub(super) subgraphs: DumpTimeSubgraphTable,
    /// Objects being walked, outermost first.
    pub(super) trace: Vec<ObjectRef>,
    /// Entry class and field labels of the current walk.
    pub(super) context: Vec<String>,
    pub(super) alloc_stats: AllocationStats,
    pub(super) session: RecordingStats,
    pub(super) totals: RecordingStats,
    pub(super) enum_klasses: HashSet<Ref<Klass>>,
    pub(super) session_full_module_graph: bool,
    pub(super) default_subgraph: Ref<Klass>,
    recorded_klasses_at_start: usize,
    mirror_indices: HashMap<Ref<Klass>, u32>,
    basic_type_mirror_indices: VecMap<u32>,
    _no_relocation: NoRelocationScope<'a>,
}

impl<'a> HeapArchiver<'a> {
    pub fn new(runtime: &'a Runtime, mirrors: &'a ScratchMirrors) -> Self {
        let default_subgraph = runtime.object_klass();
        let mut subgraphs = DumpTimeSubgraphTable::default();
        subgraphs.get_or_init(default_subgraph, false);
        Self {
            runtime,
            mirrors,
            object_cache: ArchivedObjectCache::default(),
            seen: SeenObjects::default(),
            roots: RootTable::new(),
            subgraphs,
            trace: Vec::new(),
            context: Vec::new(),
            alloc_stats: AllocationStats::default(),
            session: RecordingStats::default(),
            totals: RecordingStats::default(),
            enum_klasses: HashSet::new(),
            session_full_module_graph: false,
            default_subgraph,
            recorded_klasses_at_start: 0,
            mirror_indices: HashMap::new(),
            basic_type_mirror_indices: VecMap::new(),
            _no_relocation: runtime.heap().no_relocation(),
        }
    }

    pub fn roots(&self) -> &RootTable {
        &self.roots
    }

    pub fn subgraph_info(&self, holder: Ref<Klass>) -> Option<&SubgraphInfo> {
        self.subgraphs.get(holder)
    }

    pub fn archived_object_count(&self) -> usize {
        self.object_cache.len()
    }

    /// The object that ends up in the archive for `object`: mirrors are
    /// replaced by their scratch counterparts.
    pub fn archived_form(&self, object: ObjectRef) -> Option<ObjectRef> {
        if object.is_mirror() {
            self.mirrors.scratch_for(object)
        } else {
            Some(object)
        }
    }

    pub fn has_been_archived(&self, object: ObjectRef) -> bool {
        match self.archived_form(object) {
            Some(object) => self.object_cache.contains(object),
            None => false,
        }
    }

    pub(super) fn referrer(&self) -> Option<ObjectRef> {
        self.trace.iter().rev().nth(1).copied()
    }

    /// Commits `object` to the archive. Returns false if the object is too
    /// large or cannot be represented; calling it again for an archived
    /// object is a no-op.
    pub fn archive_object(&mut self, object: ObjectRef) -> bool {
        if self.object_cache.contains(object) {
            return true;
        }
        let size = object.size();
        if size > self.runtime.options().max_archived_object_size {
            debug!(
                target: "cds::heap",
                "Cannot archive, object ({}) is too large: {}",
                object.address(),
                size
            );
            return false;
        }
        if !object.klass().is_archivable() {
            debug!(target: "cds::heap", "Cannot archive, {} is not archivable", object.klass().name());
            return false;
        }
        self.alloc_stats.count_allocation(size);
        // Discovery order is deterministic, so hashes assigned here are
        // reproducible across dumps.
        self.runtime.heap().identity_hash(object);
        let referrer = self.referrer();
        self.object_cache.insert(object, referrer);
        debug!(
            target: "cds::heap",
            "Archived heap object {} : {}",
            object.address(),
            object.klass().name()
        );
        true
    }

    pub(super) fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            context: self.context.clone(),
            trace: self
                .trace
                .iter()
                .map(|object| self.runtime.describe(*object))
                .collect(),
        }
    }

    pub fn start_session(&mut self, holder: Ref<Klass>, is_full_module_graph: bool) {
        info!(
            target: "cds::heap",
            "Start recording subgraph(s) for archived fields in {}",
            holder.name()
        );
        let info = self.subgraphs.get_or_init(holder, is_full_module_graph);
        self.recorded_klasses_at_start = info.subgraph_object_klasses().len();
        self.session_full_module_graph = is_full_module_graph;
        self.seen.start();
        self.session = RecordingStats::default();
    }

    /// Archives the graph reachable from `holder`'s static slot `offset` and
    /// records the entry. A null slot is recorded with a null root; a value
    /// that cannot be archived at the top level is skipped.
    pub fn archive_entry(&mut self, holder: Ref<Klass>, offset: u32, field_name: &str) -> Result<(), ArchiveError> {
        let value = self.runtime.static_field_at(holder, offset);
        let object = match value.as_object() {
            Some(object) => object,
            None => {
                let root_index = self.roots.append_root(None);
                self.info_mut(holder).add_subgraph_entry_field(offset, root_index);
                return Ok(());
            }
        };
        debug!(
            target: "cds::heap",
            "Start archiving from: {}::{} ({})",
            holder.name(),
            field_name,
            object.address()
        );
        if !self.archive_reachable_objects_from(1, holder, object)? {
            info!(
                target: "cds::heap",
                "Archiving failed {}::{} (some reachable objects cannot be archived)",
                holder.name(),
                field_name
            );
            return Ok(());
        }
        let archived = self.archived_form(object).unwrap_or(object);
        let root_index = self.roots.append_root(Some(archived));
        self.info_mut(holder).add_subgraph_entry_field(offset, root_index);
        info!(
            target: "cds::heap",
            "Archived field {}::{} => {}",
            holder.name(),
            field_name,
            archived.address()
        );
        Ok(())
    }

    pub fn end_session(&mut self, holder: Ref<Klass>) {
        let recorded = self
            .subgraphs
            .get(holder)
            .map_or(0, |info| info.subgraph_object_klasses().len());
        self.session.recorded_klasses = recorded - self.recorded_klasses_at_start;
        self.session.subgraph_recordings = 1;
        info!(
            target: "cds::heap",
            "Done recording subgraph(s) for archived fields in {}: walked {} objs, archived {} new objs, recorded {} classes",
            holder.name(),
            self.session.walked_objects,
            self.session.archived_objects,
            self.session.recorded_klasses
        );
        self.seen.stop();
        self.totals += self.session;
    }

    pub(super) fn info_mut(&mut self, holder: Ref<Klass>) -> &mut SubgraphInfo {
        let is_full_module_graph = self.session_full_module_graph;
        self.subgraphs.get_or_init(holder, is_full_module_graph)
    }

    /// Archives every primitive and class mirror in the default subgraph and
    /// gives each a root, so mirrors can be installed before any subgraph is
    /// restored.
    pub fn copy_special_objects(&mut self, builder: &dyn ArchiveBuilder) -> Result<(), ArchiveError> {
        self.seen.start();
        self.archive_java_mirrors(builder)?;
        self.seen.stop();
        Ok(())
    }

    fn archive_special_mirror(&mut self, live: ObjectRef, label: String) -> Result<u32, ArchiveError> {
        self.context.push(label);
        let archived = self.archive_reachable_objects_from(1, self.default_subgraph, live);
        self.context.pop();
        let scratch = self.archived_form(live).unwrap_or(live);
        if !archived? {
            return Err(ArchiveError::ObjectTooLarge {
                class_name: scratch.klass().name().to_owned(),
                size: scratch.size(),
                diagnostics: self.diagnostics(),
            });
        }
        Ok(self.roots.append_root(Some(scratch)))
    }

    fn archive_java_mirrors(&mut self, builder: &dyn ArchiveBuilder) -> Result<(), ArchiveError> {
        for bt in BasicType::ALL.iter().copied() {
            let live = match self.runtime.primitive_mirror(bt) {
                Some(live) => live,
                None => continue,
            };
            let index = self.archive_special_mirror(live, format!("{} mirror", bt.name()))?;
            self.basic_type_mirror_indices.insert(bt.index(), index);
            debug!(target: "cds::heap", "Archived {} mirror as root {}", bt.name(), index);
        }
        for klass in builder.klasses().iter().copied() {
            let live = match klass.mirror() {
                Some(live) if self.mirrors.scratch_java_mirror(klass).is_some() => live,
                _ => continue,
            };
            let index = self.archive_special_mirror(live, format!("{} mirror", klass.name()))?;
            self.mirror_indices.insert(klass, index);
            debug!(target: "cds::heap", "Archived {} mirror as root {}", klass.name(), index);
        }
        Ok(())
    }

    /// Archives one entry table. Consecutive entries of the same holder
    /// share a recording session.
    pub fn archive_object_subgraphs(
        &mut self,
        fields: &[ArchivableStaticFieldInfo],
        is_full_module_graph: bool,
    ) -> Result<(), ArchiveError> {
        self.totals = RecordingStats::default();
        let mut i = 0;
        while i < fields.len() {
            let holder = fields[i].klass;
            self.start_session(holder, is_full_module_graph);
            self.context.push(fields[i].klass_name.clone());
            while i < fields.len() && fields[i].klass == holder {
                let field = &fields[i];
                self.context.push(format!("{}::{}", field.klass_name, field.field_name));
                let result = self.archive_entry(holder, field.offset, &field.field_name);
                self.context.pop();
                result?;
                i += 1;
            }
            self.context.pop();
            self.end_session(holder);
        }
        self.totals.log_totals();

        #[cfg(debug_assertions)]
        {
            for field in fields.iter() {
                self.verify_subgraph_from_static_field(field.klass, field.offset)?;
            }
            info!(target: "cds::heap", "  Verified {} references", self.totals.verifications);
        }
        Ok(())
    }

    /// Checks that everything reachable from an archived entry value was
    /// archived too.
    pub fn verify_subgraph_from_static_field(&mut self, holder: Ref<Klass>, offset: u32) -> Result<(), ArchiveError> {
        let root = match self.runtime.static_field_at(holder, offset).as_object() {
            Some(root) => root,
            None => return Ok(()),
        };
        if !self.has_been_archived(root) {
            // skipped entry
            return Ok(());
        }
        self.seen.start();
        let result = self.verify_reachable_objects_from(root);
        self.seen.stop();
        result
    }

    fn verify_reachable_objects_from(&mut self, root: ObjectRef) -> Result<(), ArchiveError> {
        let mut stack = vec![root];
        while let Some(object) = stack.pop() {
            let object = self.archived_form(object).ok_or_else(|| {
                ArchiveError::Verification(format!("no scratch mirror for {}", self.runtime.describe(object)))
            })?;
            if self.seen.has_been_seen(object) {
                continue;
            }
            self.seen.set_has_been_seen(object);
            self.totals.verifications += 1;
            if !self.object_cache.contains(object) {
                return Err(ArchiveError::Verification(format!(
                    "{} is reachable from an archived entry but was not archived",
                    self.runtime.describe(object)
                )));
            }
            object.trace(&mut SimpleVisitor::new(&mut |slot: Slot| stack.push(slot.value())));
        }
        Ok(())
    }

    /// The default subgraph may only hold objects of the few classes that
    /// exist before any other class is loaded.
    pub fn check_default_subgraph_classes(&self) {
        let info = match self.subgraphs.get(self.default_subgraph) {
            Some(info) => info,
            None => return,
        };
        let mut warned = 0;
        for (i, klass) in info.subgraph_object_klasses().iter().enumerate() {
            info!(
                target: "cds::heap",
                "Archived object klass (default subgraph {}) => {}",
                i,
                klass.name()
            );
            debug_assert!(
                klass.bottom_klass().is_in_base_module() && klass.bottom_klass().is_early(),
                "{} cannot be in the default subgraph",
                klass.name()
            );
            if ![vm_classes::CLASS, vm_classes::STRING, vm_classes::OBJECT_ARRAY, vm_classes::CHAR_ARRAY]
                .contains(&klass.name())
            {
                warned += 1;
                info!(
                    target: "cds",
                    "Archived unusual klass (default subgraph {}) => {}",
                    warned,
                    klass.name()
                );
            }
        }
    }

    /// Freezes the dump into an archive: subgraph records go into the
    /// builder's read-only region, objects into the heap region.
    pub fn finish(self, builder: &mut dyn ArchiveBuilder) -> Result<HeapArchive, ArchiveError> {
        let mut dictionary = CompactDictionaryWriter::new();
        for info in self.subgraphs.iter() {
            let record = ArchivedSubgraphRecord::init(info, &*builder);
            let hash = builder.hash_for_shared_dictionary(record.klass);
            dictionary.add(builder, hash, &record);
        }
        let subgraph_records = dictionary.len();
        let subgraph_table = dictionary.finish(builder);

        let heap = ArchiveHeapWriter::new(self.runtime, &*builder, self.mirrors).write(
            self.object_cache.objects(),
            self.roots.to_vec(),
            self.runtime.options().permobj_segment_shift,
        )?;
        let klasses = write_klass_images(self.runtime, &*builder, &self.mirror_indices, &self.enum_klasses);

        if self.runtime.options().print_stats {
            self.alloc_stats.print_stats();
        }
        let mut basic_type_mirrors: Vec<(BasicType, u32)> = BasicType::ALL
            .iter()
            .filter_map(|bt| self.basic_type_mirror_indices.get(bt.index()).map(|index| (*bt, *index)))
            .collect();
        basic_type_mirrors.sort();

        let stats = DumpStats {
            recording: self.totals,
            archived_objects: self.object_cache.len(),
            archived_bytes: self.alloc_stats.total_bytes(),
            roots: heap.roots.len(),
            subgraph_records,
            klasses: klasses.len(),
        };
        Ok(HeapArchive {
            klasses,
            heap,
            basic_type_mirrors,
            ro_region: builder.ro_region().to_vec(),
            subgraph_table,
            stats,
        })
    }
}

/// Archives the special objects and both entry tables, then writes the
/// archive. `rt` must not change while this runs.
pub fn dump_heap(
    rt: &Runtime,
    tables: &EntryTables,
    mirrors: &ScratchMirrors,
    builder: &mut dyn ArchiveBuilder,
) -> Result<HeapArchive, ArchiveError> {
    let shift = rt.options().permobj_segment_shift;
    if shift > MAX_PERMOBJ_SEGMENT_SHIFT {
        return Err(ArchiveError::InvalidOption(format!(
            "permanent-object segment shift {} exceeds {}",
            shift, MAX_PERMOBJ_SEGMENT_SHIFT
        )));
    }
    let mut archiver = HeapArchiver::new(rt, mirrors);
    archiver.copy_special_objects(&*builder)?;
    archiver.archive_object_subgraphs(&tables.archive_subgraph_entry_fields, false)?;
    if let Some(fields) = &tables.fmg_archive_subgraph_entry_fields {
        archiver.archive_object_subgraphs(fields, true)?;
    }
    archiver.check_default_subgraph_classes();
    archiver.finish(builder)
}

#[cfg(test)]
mod tests {
    use super::HeapArchiver;
    use crate::cds::mirrors::ScratchMirrors;
    use crate::runtime::{
        class_loader::{ClassDefinition, ClassLoader},
        klass::BasicType,
        options::Options,
        value::Value,
        vm::Runtime,
    };

    const HOLDER: &str = "base/test/Holder";

    #[test]
    fn archive_object_twice_is_a_no_op() {
        let mut rt = Runtime::new(Options::default().with_max_archived_object_size(256));
        let object_klass = rt.object_klass();
        let object = rt.allocate_instance(object_klass);
        let big = rt.allocate_type_array(BasicType::Long, &[0; 100]).unwrap();
        let mirrors = ScratchMirrors::create(&mut rt);
        let mut archiver = HeapArchiver::new(&rt, &mirrors);

        assert!(archiver.archive_object(object));
        assert!(archiver.archive_object(object));
        assert_eq!(archiver.archived_object_count(), 1);
        assert!(archiver.has_been_archived(object));

        assert!(!archiver.archive_object(big));
        assert!(!archiver.archive_object(big));
        assert_eq!(archiver.archived_object_count(), 1);
        assert!(!archiver.has_been_archived(big));
    }

    #[test]
    fn archived_scratch_mirror_stands_for_the_live_mirror() {
        let mut rt = Runtime::new(Options::default());
        let integer = rt.resolve_class("base/lang/Integer").unwrap();
        let live = integer.mirror().unwrap();
        let mirrors = ScratchMirrors::create(&mut rt);
        let scratch = mirrors.scratch_java_mirror(integer).unwrap();
        let default_subgraph = rt.object_klass();
        let mut archiver = HeapArchiver::new(&rt, &mirrors);
        assert!(!archiver.has_been_archived(live));

        archiver.start_session(default_subgraph, false);
        assert!(archiver
            .archive_reachable_objects_from(1, default_subgraph, live)
            .unwrap());
        archiver.end_session(default_subgraph);

        assert!(archiver.has_been_archived(live));
        assert!(archiver.has_been_archived(scratch));
        assert!(!archiver.object_cache.contains(live));
        assert_eq!(archiver.archived_form(live), Some(scratch));
    }

    #[test]
    fn shared_objects_and_cycles_get_one_cache_entry() {
        let mut rt = Runtime::new(Options::default());
        rt.define_class(
            ClassDefinition::new(HOLDER)
                .reference_static("first")
                .reference_static("second")
                .reference_static("cycle"),
        );
        let holder = rt.resolve_class(HOLDER).unwrap();
        let object_klass = rt.object_klass();
        let shared = rt.allocate_instance(object_klass);
        let first = rt.allocate_object_array(object_klass, vec![Value::from(shared)]).unwrap();
        let second = rt
            .allocate_object_array(object_klass, vec![Value::from(shared), Value::Int(2)])
            .unwrap();
        let mut a = rt.allocate_object_array(object_klass, vec![Value::Null]).unwrap();
        let b = rt.allocate_object_array(object_klass, vec![Value::from(a)]).unwrap();
        a.set_field(0, Value::from(b));
        let mut offsets = Vec::new();
        for (name, value) in [("first", first), ("second", second), ("cycle", a)].iter() {
            rt.set_static_field(holder, name, Value::from(*value)).unwrap();
            offsets.push((*name, rt.static_field_info(holder, name).unwrap().offset));
        }
        let mirrors = ScratchMirrors::create(&mut rt);
        let mut archiver = HeapArchiver::new(&rt, &mirrors);

        archiver.start_session(holder, false);
        for (name, offset) in offsets.iter() {
            archiver.archive_entry(holder, *offset, name).unwrap();
        }
        archiver.end_session(holder);

        // shared, first, second, a and b
        assert_eq!(archiver.archived_object_count(), 5);
        for object in [shared, first, second, a, b].iter() {
            assert!(archiver.has_been_archived(*object));
        }
        let info = archiver.subgraph_info(holder).unwrap();
        let roots: Vec<_> = info
            .entry_fields()
            .iter()
            .map(|entry| archiver.roots().get_root(entry.root_index, false))
            .collect();
        assert_eq!(roots, vec![Some(first), Some(second), Some(a)]);

        // a later session reaching the same objects archives nothing new
        archiver.start_session(holder, false);
        let (name, offset) = offsets[1];
        archiver.archive_entry(holder, offset, name).unwrap();
        assert_eq!(archiver.session.archived_objects, 0);
        archiver.end_session(holder);
        assert_eq!(archiver.archived_object_count(), 5);
    }
}
