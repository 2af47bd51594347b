/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Runtime side of archived subgraphs.
//!
//! A holder class moves through `NotResolved -> Resolved -> Initialized`,
//! or ends in `Rejected`. Resolution loads and links the holder and every
//! class involved in its subgraphs without running initializers. The
//! initialization step runs those initializers and then moves each entry's
//! root into the holder's static slot. A rejected holder has its roots
//! cleared and its fields are computed by the program as if there were no
//! archive.

use super::{heap_loader::LoadedArchive, roots::RootTable, subgraph::ArchivedSubgraphRecord};
use crate::{
    heap::address::Address,
    runtime::{
        class_loader::{ClassLoadError, ClassLoader},
        klass::{Klass, KlassKind},
        ref_ptr::Ref,
        value::Value,
        vm::Runtime,
        vm_classes,
    },
};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreState {
    NotResolved,
    Resolved,
    Initialized,
    Rejected(RejectReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// The record belongs to the full module graph, which is not in use.
    FullModuleGraphDisabled,
    /// The subgraph involves non-early classes and class-rewriting hooks
    /// are active.
    ClassFileLoadHookEnabled,
    /// A class resolved to a different descriptor than the archived one.
    ClassReplaced,
    ClassResolutionFailed,
    InitializationFailed,
}

type PreseedHook = fn(&mut Runtime, Ref<Klass>, &ArchivedSubgraphRecord, &RootTable) -> Result<(), ClassLoadError>;

/// Holders whose initializer depends, through one of their involved
/// classes, on fields of the holder that have not been restored yet.
/// These fields are stored from the root table before any involved class is
/// initialized.
const PRESEED_HOOKS: &[(&str, PreseedHook)] = &[(vm_classes::METHOD_TYPE, preseed_method_type)];

/// `MethodType.archivedObjects` is an `Object[]` whose first two elements
/// are the values of `archivedMethodTypes` and `objectOnlyTypes`.
fn preseed_method_type(
    rt: &mut Runtime,
    klass: Ref<Klass>,
    record: &ArchivedSubgraphRecord,
    roots: &RootTable,
) -> Result<(), ClassLoadError> {
    let (_, root_index) = match record.entry_field_records.first() {
        Some(entry) => *entry,
        None => return Ok(()),
    };
    let archived_objects = match roots.get_root(root_index, false) {
        Some(object) => object,
        None => return Ok(()),
    };
    rt.set_static_field(klass, "archivedMethodTypes", archived_objects.field(0))?;
    rt.set_static_field(klass, "objectOnlyTypes", archived_objects.field(1))?;
    debug!(target: "cds::restore", "pre-seeded {}", klass.name());
    Ok(())
}

fn preseed_hook_for(klass: Ref<Klass>) -> Option<PreseedHook> {
    PRESEED_HOOKS
        .iter()
        .find(|(name, _)| *name == klass.name())
        .map(|(_, hook)| *hook)
}

fn check_gates(rt: &Runtime, klass: Ref<Klass>, record: &ArchivedSubgraphRecord) -> Result<(), RejectReason> {
    if record.is_full_module_graph && !rt.options().load_full_module_graph {
        info!(
            target: "cds::restore",
            "subgraph {} cannot be used because full module graph is disabled",
            klass.name()
        );
        return Err(RejectReason::FullModuleGraphDisabled);
    }
    if record.has_non_early_klasses && rt.options().class_file_load_hook {
        info!(
            target: "cds::restore",
            "subgraph {} cannot be used because a class file load hook is enabled",
            klass.name()
        );
        return Err(RejectReason::ClassFileLoadHookEnabled);
    }
    Ok(())
}

fn involved_klasses(archive: &LoadedArchive, record: &ArchivedSubgraphRecord) -> Result<Vec<Ref<Klass>>, RejectReason> {
    record
        .subgraph_object_klasses
        .iter()
        .map(|address| {
            archive.klass_at(*address).ok_or_else(|| {
                warn!(target: "cds::restore", "no shared class at {}", address);
                RejectReason::ClassResolutionFailed
            })
        })
        .collect()
}

/// Loads `klass` by name and checks that the loader picked the archived
/// descriptor.
fn resolve(rt: &mut Runtime, klass: Ref<Klass>) -> Result<(), RejectReason> {
    match rt.resolve_class(klass.name()) {
        Ok(resolved) if resolved == klass => rt.link_class(klass).map_err(|error| {
            debug!(target: "cds::restore", "cannot link {}: {}", klass.name(), error);
            RejectReason::ClassResolutionFailed
        }),
        Ok(_) => {
            info!(target: "cds::restore", "{} was replaced since the archive was written", klass.name());
            Err(RejectReason::ClassReplaced)
        }
        Err(error) => {
            debug!(target: "cds::restore", "cannot resolve {}: {}", klass.name(), error);
            Err(RejectReason::ClassResolutionFailed)
        }
    }
}

fn initialize(rt: &mut Runtime, klass: Ref<Klass>) -> Result<(), RejectReason> {
    if !klass.is_shared() {
        return Err(RejectReason::ClassReplaced);
    }
    let target = match klass.kind() {
        KlassKind::Instance => klass,
        KlassKind::ObjArray { .. } if klass.bottom_klass().is_instance_klass() => klass.bottom_klass(),
        _ => return Ok(()),
    };
    rt.initialize_class(target).map_err(|error| {
        debug!(target: "cds::restore", "cannot initialize {}: {}", target.name(), error);
        RejectReason::InitializationFailed
    })
}

fn resolve_classes_of(
    rt: &mut Runtime,
    archive: &LoadedArchive,
    klass: Ref<Klass>,
    record: &ArchivedSubgraphRecord,
) -> Result<(), RejectReason> {
    check_gates(rt, klass, record)?;
    info!(target: "cds::restore", "resolve subgraph {}", klass.name());
    resolve(rt, klass)?;
    for involved in involved_klasses(archive, record)? {
        resolve(rt, involved)?;
    }
    Ok(())
}

fn initialize_classes_of(
    rt: &mut Runtime,
    archive: &LoadedArchive,
    klass: Ref<Klass>,
    record: &ArchivedSubgraphRecord,
) -> Result<(), RejectReason> {
    check_gates(rt, klass, record)?;
    info!(target: "cds::restore", "init subgraph {}", klass.name());
    if let Some(hook) = preseed_hook_for(klass) {
        hook(rt, klass, record, archive.roots()).map_err(|error| {
            warn!(target: "cds::restore", "pre-seeding {} failed: {}", klass.name(), error);
            RejectReason::InitializationFailed
        })?;
    }
    initialize(rt, klass)?;
    for involved in involved_klasses(archive, record)? {
        initialize(rt, involved)?;
    }
    Ok(())
}

fn reject(
    rt: &mut Runtime,
    archive: &LoadedArchive,
    klass: Ref<Klass>,
    record: &ArchivedSubgraphRecord,
    reason: RejectReason,
) -> RestoreState {
    clear_archived_roots_of(archive, record);
    if reason == RejectReason::InitializationFailed && preseed_hook_for(klass).is_some() {
        // pre-seeded values must not stay visible
        for field in klass.static_fields().iter() {
            if rt.static_field_at(klass, field.offset).as_object().map_or(false, |object| {
                object.header().is_archived_copy()
            }) {
                rt.set_static_field_at(klass, field.offset, field.ty.default_value());
            }
        }
    }
    let state = RestoreState::Rejected(reason);
    archive.set_state(record.klass, state);
    state
}

/// Nulls every root referenced by `record`.
pub fn clear_archived_roots_of(archive: &LoadedArchive, record: &ArchivedSubgraphRecord) {
    for (_, root_index) in record.entry_field_records.iter() {
        archive.roots().clear_root(*root_index);
    }
}

fn lookup(archive: &LoadedArchive, klass: Ref<Klass>) -> Option<ArchivedSubgraphRecord> {
    match archive.lookup(klass) {
        Ok(record) => record,
        Err(error) => {
            warn!(target: "cds::restore", "cannot read subgraph record of {}: {}", klass.name(), error);
            None
        }
    }
}

/// Resolution step for one holder. Returns `None` when `klass` has no
/// archived subgraph.
pub fn resolve_classes_for_subgraph_of(rt: &mut Runtime, klass: Ref<Klass>) -> Option<RestoreState> {
    let archive = rt.archive()?;
    let record = lookup(&archive, klass)?;
    let state = archive.state_of(record.klass);
    if state != RestoreState::NotResolved {
        return Some(state);
    }
    Some(match resolve_classes_of(rt, &archive, klass, &record) {
        Ok(()) => {
            archive.set_state(record.klass, RestoreState::Resolved);
            RestoreState::Resolved
        }
        Err(reason) => reject(rt, &archive, klass, &record, reason),
    })
}

/// Resolution step for every archived holder.
pub fn resolve_classes(rt: &mut Runtime) {
    let archive = match rt.archive() {
        Some(archive) => archive,
        None => return,
    };
    let records = match archive.records() {
        Ok(records) => records,
        Err(error) => {
            warn!(target: "cds::restore", "cannot read subgraph records: {}", error);
            return;
        }
    };
    for record in records.iter() {
        match archive.klass_at(record.klass) {
            Some(holder) => {
                resolve_classes_for_subgraph_of(rt, holder);
            }
            None => clear_archived_roots_of(&archive, record),
        }
    }
}

/// Stores the archived values of `klass`'s entry fields into its static
/// slots, resolving and initializing the involved classes first. Called from
/// class initialization paths; repeated calls are no-ops. Returns `None`
/// when `klass` has no archived subgraph.
pub fn initialize_from_archived_subgraph(rt: &mut Runtime, klass: Ref<Klass>) -> Option<RestoreState> {
    let archive = rt.archive()?;
    let record = lookup(&archive, klass)?;
    match archive.state_of(record.klass) {
        RestoreState::NotResolved => {
            if let Some(RestoreState::Rejected(reason)) = resolve_classes_for_subgraph_of(rt, klass) {
                return Some(RestoreState::Rejected(reason));
            }
        }
        RestoreState::Resolved => {}
        state => return Some(state),
    }
    if !archive.enter(record.klass) {
        // an involved class's initializer came back to this holder
        return Some(RestoreState::Resolved);
    }
    let state = match initialize_classes_of(rt, &archive, klass, &record) {
        Ok(()) => {
            init_archived_fields_for(rt, &archive, klass, &record);
            archive.set_state(record.klass, RestoreState::Initialized);
            RestoreState::Initialized
        }
        Err(reason) => reject(rt, &archive, klass, &record, reason),
    };
    archive.exit(record.klass);
    Some(state)
}

fn init_archived_fields_for(rt: &mut Runtime, archive: &LoadedArchive, klass: Ref<Klass>, record: &ArchivedSubgraphRecord) {
    for (offset, root_index) in record.entry_field_records.iter() {
        let value = archive.roots().get_root(*root_index, true);
        rt.set_static_field_at(klass, *offset, Value::from(value));
        debug!(
            target: "cds::restore",
            "  {} init field @ {:2} = {}",
            klass.name(),
            offset,
            value.map_or(Address::null(), |object| object.address())
        );
    }
    info!(
        target: "cds::restore",
        "initialize_from_archived_subgraph {}{}",
        klass.name(),
        if rt.is_early_phase() { " (early)" } else { "" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cds::{entry_fields::EntryFieldConfig, HeapArchive};
    use crate::runtime::{class_loader::ClassDefinition, options::Options};

    const HOLDER: &str = "base/test/Holder";

    fn record(is_full_module_graph: bool, has_non_early_klasses: bool) -> ArchivedSubgraphRecord {
        ArchivedSubgraphRecord {
            klass: Address::null(),
            is_full_module_graph,
            has_non_early_klasses,
            entry_field_records: Vec::new(),
            subgraph_object_klasses: Vec::new(),
        }
    }

    fn define(rt: &mut Runtime) {
        rt.define_class(
            ClassDefinition::new(HOLDER)
                .reference_static("value")
                .initializer(|rt, klass| {
                    rt.initialize_from_archived_subgraph(klass);
                    if !rt.static_field(klass, "value")?.is_null() {
                        return Ok(());
                    }
                    let object = rt.object_klass();
                    let value = rt.allocate_object_array(object, vec![Value::Int(5)])?;
                    rt.set_static_field(klass, "value", Value::from(value))
                }),
        );
    }

    fn archive() -> HeapArchive {
        let mut rt = Runtime::new(Options::default());
        define(&mut rt);
        let config = EntryFieldConfig::empty().with_entry_field(HOLDER, "value");
        HeapArchive::dump(&mut rt, &config).unwrap()
    }

    fn gate(options: Options, record: &ArchivedSubgraphRecord) -> Result<(), RejectReason> {
        let rt = Runtime::new(options);
        check_gates(&rt, rt.object_klass(), record)
    }

    #[test]
    fn gates_follow_the_options() {
        assert_eq!(gate(Options::default(), &record(true, false)), Ok(()));
        assert_eq!(gate(Options::default(), &record(false, true)), Ok(()));

        let no_fmg = || Options::default().with_load_full_module_graph(false);
        assert_eq!(
            gate(no_fmg(), &record(true, false)),
            Err(RejectReason::FullModuleGraphDisabled)
        );
        assert_eq!(gate(no_fmg(), &record(false, true)), Ok(()));

        let hooked = || Options::default().with_class_file_load_hook(true);
        assert_eq!(
            gate(hooked(), &record(false, true)),
            Err(RejectReason::ClassFileLoadHookEnabled)
        );
        assert_eq!(gate(hooked(), &record(false, false)), Ok(()));
        // full-module-graph records never carry the early-class flag
        assert_eq!(gate(hooked(), &record(true, false)), Ok(()));
    }

    #[test]
    fn only_method_type_is_pre_seeded() {
        let mut rt = Runtime::new(Options::default());
        let method_type = rt.resolve_class(vm_classes::METHOD_TYPE).unwrap();
        assert!(preseed_hook_for(method_type).is_some());
        assert!(preseed_hook_for(rt.object_klass()).is_none());
        assert!(preseed_hook_for(rt.string_klass()).is_none());
    }

    #[test]
    fn holder_moves_through_resolved_to_initialized() {
        let archive = archive();
        let mut rt = Runtime::with_archive(Options::default(), &archive).unwrap();
        define(&mut rt);
        let klass = rt.resolve_class(HOLDER).unwrap();
        let loaded = rt.archive().unwrap();
        let address = klass.shared_address().unwrap();
        assert_eq!(loaded.state_of(address), RestoreState::NotResolved);

        assert_eq!(resolve_classes_for_subgraph_of(&mut rt, klass), Some(RestoreState::Resolved));
        assert!(!klass.is_initialized());
        let record = loaded.lookup(klass).unwrap().unwrap();
        let (_, root_index) = record.entry_field_records[0];
        assert!(loaded.roots().get_root(root_index, false).is_some());

        rt.initialize_class(klass).unwrap();
        assert_eq!(loaded.state_of(address), RestoreState::Initialized);
        assert_eq!(loaded.roots().get_root(root_index, false), None);
        let value = rt.static_field(klass, "value").unwrap().as_object().unwrap();
        assert!(value.header().is_archived_copy());
        assert_eq!(value.field(0), Value::Int(5));

        assert_eq!(resolve_classes_for_subgraph_of(&mut rt, klass), Some(RestoreState::Initialized));
        assert_eq!(rt.initialize_from_archived_subgraph(klass), Some(RestoreState::Initialized));
    }

    #[test]
    fn rejection_clears_the_roots() {
        let archive = archive();
        let mut rt = Runtime::with_archive(Options::default(), &archive).unwrap();
        define(&mut rt);
        let klass = rt.resolve_class(HOLDER).unwrap();
        let loaded = rt.archive().unwrap();
        let record = loaded.lookup(klass).unwrap().unwrap();
        let (_, root_index) = record.entry_field_records[0];

        let state = reject(&mut rt, &loaded, klass, &record, RejectReason::FullModuleGraphDisabled);
        assert_eq!(state, RestoreState::Rejected(RejectReason::FullModuleGraphDisabled));
        assert_eq!(loaded.state_of(record.klass), state);
        assert_eq!(loaded.roots().get_root(root_index, false), None);

        rt.initialize_class(klass).unwrap();
        let value = rt.static_field(klass, "value").unwrap().as_object().unwrap();
        assert!(!value.header().is_archived_copy());
    }
}
