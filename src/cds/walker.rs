/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use super::{archiver::HeapArchiver, enum_klass, error::ArchiveError, mirrors::can_mirror_be_used_in_subgraph};
use crate::{
    heap::trace::SlotCollector,
    log_if,
    runtime::{klass::Klass, ref_ptr::Ref, value::ObjectRef},
};
use tracing::error;

impl<'a> HeapArchiver<'a> {
    /// Archives `orig` and everything reachable from it on behalf of the
    /// subgraph of `holder`. `level` is 1 for an entry value.
    ///
    /// Returns `Ok(false)` only when an entry value itself cannot be
    /// archived; the same condition deeper in the graph, or any object the
    /// archive cannot represent, is fatal.
    pub fn archive_reachable_objects_from(
        &mut self,
        level: usize,
        holder: Ref<Klass>,
        orig: ObjectRef,
    ) -> Result<bool, ArchiveError> {
        self.trace.push(orig);
        let result = self.walk(level, holder, orig);
        self.trace.pop();
        result
    }

    fn walk(&mut self, level: usize, holder: Ref<Klass>, orig: ObjectRef) -> Result<bool, ArchiveError> {
        if !orig.klass().is_archivable() {
            error!(
                target: "cds::heap",
                "Cannot archive object of class {}",
                orig.klass().name()
            );
            return Err(ArchiveError::UnsupportedObject {
                class_name: orig.klass().name().to_owned(),
                reason: "class instances cannot be archived".to_owned(),
                diagnostics: self.diagnostics(),
            });
        }

        let object = if orig.is_mirror() {
            if level > 1 && holder != self.default_subgraph && !can_mirror_be_used_in_subgraph(orig) {
                error!(
                    target: "cds::heap",
                    "{} is not allowed in an archived subgraph of {}",
                    self.runtime.describe(orig),
                    holder.name()
                );
                return Err(ArchiveError::UnsupportedObject {
                    class_name: orig.klass().name().to_owned(),
                    reason: "mirror not allowed in this subgraph".to_owned(),
                    diagnostics: self.diagnostics(),
                });
            }
            match self.mirrors.scratch_for(orig) {
                Some(scratch) => scratch,
                None => {
                    return Err(ArchiveError::UnsupportedObject {
                        class_name: orig.klass().name().to_owned(),
                        reason: "no scratch mirror".to_owned(),
                        diagnostics: self.diagnostics(),
                    })
                }
            }
        } else {
            orig
        };

        if self.seen.has_been_seen(object) {
            // an earlier visit in this session may have failed to archive it
            if self.object_cache.contains(object) {
                return Ok(true);
            }
            return self.not_archived(level, object);
        }
        self.seen.set_has_been_seen(object);
        self.session.walked_objects += 1;

        if !self.object_cache.contains(object) {
            if !self.archive_object(object) {
                return self.not_archived(level, object);
            }
            self.session.archived_objects += 1;
        }

        let allow_test_classes = self.runtime.options().archive_heap_test_class.is_some();
        self.info_mut(holder)
            .add_subgraph_object_klass(object.klass(), allow_test_classes)?;

        let mut collector = SlotCollector::default();
        object.trace(&mut collector);
        let log_walk = self.runtime.options().log_walk;
        for slot in collector.slots {
            log_if!(
                log_walk,
                target: "cds::heap",
                "({}) {}[{}] ==> {}",
                level,
                object.klass().name(),
                slot.index(),
                self.runtime.describe(slot.value())
            );
            self.archive_reachable_objects_from(level + 1, holder, slot.value())?;
        }

        if object.klass().has_synthetic_constant_table() {
            enum_klass::handle_enum_obj(self, level + 1, holder, object)?;
        }
        Ok(true)
    }

    /// Outcome for an object the cache refused: an entry value is skipped
    /// by the caller, anything deeper aborts the dump.
    fn not_archived(&self, level: usize, object: ObjectRef) -> Result<bool, ArchiveError> {
        if level == 1 {
            return Ok(false);
        }
        error!(
            target: "cds::heap",
            "Cannot archive object {} at level {}",
            self.runtime.describe(object),
            level
        );
        Err(ArchiveError::ObjectTooLarge {
            class_name: object.klass().name().to_owned(),
            size: object.size(),
            diagnostics: self.diagnostics(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::cds::{archiver::HeapArchiver, error::ArchiveError, mirrors::ScratchMirrors};
    use crate::runtime::{
        class_loader::{ClassDefinition, ClassLoader},
        klass::BasicType,
        options::Options,
        value::Value,
        vm::Runtime,
    };

    const HOLDER: &str = "base/test/Holder";

    #[test]
    fn linked_chain_records_its_classes() {
        let mut rt = Runtime::new(Options::default());
        rt.define_class(ClassDefinition::new(HOLDER).reference_static("field1"));
        rt.define_class(ClassDefinition::new("base/test/Head").instance_fields(1));
        rt.define_class(ClassDefinition::new("base/test/Tail").instance_fields(1));
        let holder = rt.resolve_class(HOLDER).unwrap();
        let head_klass = rt.resolve_class("base/test/Head").unwrap();
        let tail_klass = rt.resolve_class("base/test/Tail").unwrap();
        let tail = rt.allocate_instance(tail_klass);
        let mut head = rt.allocate_instance(head_klass);
        head.set_field(0, Value::from(tail));
        rt.set_static_field(holder, "field1", Value::from(head)).unwrap();
        let offset = rt.static_field_info(holder, "field1").unwrap().offset;
        let mirrors = ScratchMirrors::create(&mut rt);
        let mut archiver = HeapArchiver::new(&rt, &mirrors);

        archiver.start_session(holder, false);
        archiver.archive_entry(holder, offset, "field1").unwrap();
        archiver.end_session(holder);

        let info = archiver.subgraph_info(holder).unwrap();
        assert_eq!(info.entry_fields().len(), 1);
        let entry = info.entry_fields()[0];
        assert_eq!(entry.offset, offset);
        assert_eq!(archiver.roots().get_root(entry.root_index, false), Some(head));
        let klasses = info.subgraph_object_klasses();
        assert_eq!(klasses.len(), 2);
        assert!(klasses.contains(&head_klass));
        assert!(klasses.contains(&tail_klass));
        assert!(!klasses.contains(&holder));
        assert_eq!(archiver.archived_object_count(), 2);
    }

    #[test]
    fn refused_entry_value_stays_refused_within_a_session() {
        let mut rt = Runtime::new(Options::default().with_max_archived_object_size(256));
        let holder = rt.object_klass();
        let object_klass = rt.object_klass();
        let big = rt.allocate_type_array(BasicType::Long, &[0; 100]).unwrap();
        let wrapper = rt.allocate_object_array(object_klass, vec![Value::from(big)]).unwrap();
        let mirrors = ScratchMirrors::create(&mut rt);
        let mut archiver = HeapArchiver::new(&rt, &mirrors);

        archiver.start_session(holder, false);
        assert!(!archiver.archive_reachable_objects_from(1, holder, big).unwrap());
        assert!(!archiver.archive_reachable_objects_from(1, holder, big).unwrap());
        match archiver.archive_reachable_objects_from(1, holder, wrapper) {
            Err(ArchiveError::ObjectTooLarge { class_name, diagnostics, .. }) => {
                assert_eq!(class_name, "[J");
                assert_eq!(diagnostics.trace.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        archiver.end_session(holder);
        assert!(!archiver.has_been_archived(big));
    }
}
