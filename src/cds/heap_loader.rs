/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use super::{
    archive_builder::hash_for_shared_dictionary,
    dictionary::CompactDictionary,
    error::ArchiveError,
    heap_writer::{ImageKind, ImageValue, KlassImage, KlassImageKind, ObjectImage},
    restore::RestoreState,
    roots::{PermanentIndexTable, RootTable},
    subgraph::ArchivedSubgraphRecord,
    HeapArchive,
};
use crate::{
    heap::{
        address::Address,
        cell::{CellKind, MirrorOf},
    },
    runtime::{
        klass::{BasicType, FieldInfo, Klass, KlassKind, KlassShape},
        options::MAX_PERMOBJ_SEGMENT_SHIFT,
        ref_ptr::Ref,
        value::{ObjectRef, Value},
        vm::Runtime,
    },
};
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
};
use tracing::{debug, info};
use vec_map::VecMap;

/// An archive mapped into a runtime: shared descriptors, materialized
/// objects, the root table and the subgraph dictionary.
pub struct LoadedArchive {
    klasses: HashMap<Address, Ref<Klass>>,
    roots: RootTable,
    permanent: PermanentIndexTable,
    basic_type_mirrors: VecMap<u32>,
    ro_region: Vec<u8>,
    subgraph_table: u32,
    object_count: usize,
    states: RefCell<HashMap<Address, RestoreState>>,
    in_progress: RefCell<HashSet<Address>>,
}

impl LoadedArchive {
    /// Creates shared descriptors for every archived class and copies the
    /// archived objects into `rt`'s heap. Must run before bootstrap.
    pub fn map(rt: &mut Runtime, archive: &HeapArchive) -> Result<Self, ArchiveError> {
        let klasses = map_klasses(rt, &archive.klasses)?;
        let objects = materialize_objects(rt, &klasses, &archive.heap.objects)?;

        let mut slots = Vec::with_capacity(archive.heap.roots.len());
        for root in archive.heap.roots.iter() {
            slots.push(match root {
                Some(offset) => Some(lookup_object(&objects, *offset)?),
                None => None,
            });
        }
        let permobj = archive.heap.permobj;
        if permobj.first_root as usize + permobj.count as usize > slots.len() {
            return Err(ArchiveError::Malformed("permanent-object segments outside the root table".to_owned()));
        }
        if permobj.shift > MAX_PERMOBJ_SEGMENT_SHIFT {
            return Err(ArchiveError::Malformed(format!(
                "permanent-object segment shift {} exceeds {}",
                permobj.shift, MAX_PERMOBJ_SEGMENT_SHIFT
            )));
        }

        let mut basic_type_mirrors = VecMap::new();
        for (bt, index) in archive.basic_type_mirrors.iter() {
            basic_type_mirrors.insert(bt.index(), *index);
        }

        // Validate the dictionary header now, so later lookups only fail on
        // corrupt records.
        CompactDictionary::new(&archive.ro_region, archive.subgraph_table)?;

        info!(
            target: "cds",
            "mapped archive: {} classes, {} objects, {} roots",
            klasses.len(),
            objects.len(),
            slots.len()
        );
        Ok(Self {
            klasses,
            roots: RootTable::from_slots(slots),
            permanent: PermanentIndexTable::new(permobj.first_root, permobj.count, permobj.shift),
            basic_type_mirrors,
            ro_region: archive.ro_region.clone(),
            subgraph_table: archive.subgraph_table,
            object_count: objects.len(),
            states: RefCell::new(HashMap::new()),
            in_progress: RefCell::new(HashSet::new()),
        })
    }

    pub fn roots(&self) -> &RootTable {
        &self.roots
    }

    pub fn object_count(&self) -> usize {
        self.object_count
    }

    pub fn basic_type_mirror_index(&self, bt: BasicType) -> Option<u32> {
        self.basic_type_mirrors.get(bt.index()).copied()
    }

    /// Shared descriptor created for the class buffered at `address`.
    pub fn klass_at(&self, address: Address) -> Option<Ref<Klass>> {
        self.klasses.get(&address).copied()
    }

    pub fn get_archived_object_permanent_index(&self, object: ObjectRef) -> Option<u32> {
        self.permanent.get_archived_object_permanent_index(&self.roots, object)
    }

    pub fn get_archived_object(&self, index: u32) -> Option<ObjectRef> {
        self.permanent.get_archived_object(&self.roots, index)
    }

    fn dictionary(&self) -> Result<CompactDictionary<'_>, ArchiveError> {
        CompactDictionary::new(&self.ro_region, self.subgraph_table)
    }

    /// Subgraph record whose holder is `klass`. Only shared descriptors can
    /// have one.
    pub fn lookup(&self, klass: Ref<Klass>) -> Result<Option<ArchivedSubgraphRecord>, ArchiveError> {
        let address = match klass.shared_address() {
            Some(address) => address,
            None => return Ok(None),
        };
        self.dictionary()?
            .lookup(hash_for_shared_dictionary(address), |record: &ArchivedSubgraphRecord| {
                record.klass == address
            })
    }

    pub fn records(&self) -> Result<Vec<ArchivedSubgraphRecord>, ArchiveError> {
        self.dictionary()?.records()
    }

    pub fn state_of(&self, holder: Address) -> RestoreState {
        self.states
            .borrow()
            .get(&holder)
            .copied()
            .unwrap_or(RestoreState::NotResolved)
    }

    pub(crate) fn set_state(&self, holder: Address, state: RestoreState) {
        debug!(target: "cds::restore", "{} => {:?}", holder, state);
        self.states.borrow_mut().insert(holder, state);
    }

    /// Marks `holder` as being initialized; false if it already is.
    pub(crate) fn enter(&self, holder: Address) -> bool {
        self.in_progress.borrow_mut().insert(holder)
    }

    pub(crate) fn exit(&self, holder: Address) {
        self.in_progress.borrow_mut().remove(&holder);
    }
}

fn map_klasses(rt: &mut Runtime, images: &[KlassImage]) -> Result<HashMap<Address, Ref<Klass>>, ArchiveError> {
    let mut klasses = HashMap::with_capacity(images.len());
    for image in images.iter() {
        let kind = match image.kind {
            KlassImageKind::Instance => KlassKind::Instance,
            KlassImageKind::TypeArray(bt) => KlassKind::TypeArray(bt),
            KlassImageKind::ObjArray { element } => KlassKind::ObjArray {
                element: klasses.get(&element).copied().ok_or_else(|| {
                    ArchiveError::Malformed(format!("element of {} precedes it in the archive", image.name))
                })?,
            },
        };
        let static_fields = image
            .static_fields
            .iter()
            .enumerate()
            .map(|(offset, (name, ty))| FieldInfo {
                name: rt.intern(name),
                offset: offset as u32,
                ty: *ty,
            })
            .collect();
        let klass = Klass::new(KlassShape {
            name: image.name.clone(),
            symbol: rt.intern(&image.name),
            kind,
            module: image.module.clone(),
            package: image.package.clone(),
            loader: image.loader,
            static_fields,
            instance_field_count: image.instance_field_count,
            has_synthetic_constant_table: image.has_synthetic_constant_table,
            archivable: image.archivable,
        });
        let klass = rt.register_shared_klass(klass, image.address);
        klass.set_archived_mirror_index(image.archived_mirror_index);
        if klasses.insert(image.address, klass).is_some() {
            return Err(ArchiveError::Malformed(format!("duplicate class address {}", image.address)));
        }
    }
    Ok(klasses)
}

fn lookup_object(objects: &HashMap<u32, ObjectRef>, offset: u32) -> Result<ObjectRef, ArchiveError> {
    objects
        .get(&offset)
        .copied()
        .ok_or_else(|| ArchiveError::Malformed(format!("no archived object at offset {}", offset)))
}

fn materialize_objects(
    rt: &mut Runtime,
    klasses: &HashMap<Address, Ref<Klass>>,
    images: &[ObjectImage],
) -> Result<HashMap<u32, ObjectRef>, ArchiveError> {
    let klass_at = |address: Address| {
        klasses
            .get(&address)
            .copied()
            .ok_or_else(|| ArchiveError::Malformed(format!("unknown class address {}", address)))
    };

    let mut objects = HashMap::with_capacity(images.len());
    for image in images.iter() {
        let kind = match image.kind {
            ImageKind::Instance => CellKind::Instance,
            ImageKind::ObjArray => CellKind::ObjArray,
            ImageKind::TypeArray(bt) => CellKind::TypeArray(bt),
            ImageKind::KlassMirror(address) => CellKind::Mirror(MirrorOf::Klass(klass_at(address)?)),
            ImageKind::PrimitiveMirror(bt) => CellKind::Mirror(MirrorOf::Primitive(bt)),
        };
        // references are patched once every object exists
        let fields = image
            .fields
            .iter()
            .map(|value| match value {
                ImageValue::Int(x) => Value::Int(*x),
                ImageValue::Null | ImageValue::Ref(_) => Value::Null,
            })
            .collect();
        let mut object = rt.heap_mut().allocate(klass_at(image.klass)?, kind, fields);
        object.header_mut().set_archived_copy();
        if image.hash != 0 {
            object.header().set_identity_hash(image.hash);
        }
        if objects.insert(image.offset, object).is_some() {
            return Err(ArchiveError::Malformed(format!("two objects at offset {}", image.offset)));
        }
    }

    for image in images.iter() {
        let mut object = objects[&image.offset];
        for (index, value) in image.fields.iter().enumerate() {
            if let ImageValue::Ref(target) = value {
                object.set_field(index, Value::Object(lookup_object(&objects, *target)?));
            }
        }
    }
    Ok(objects)
}
