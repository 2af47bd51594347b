/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use super::{archive_builder::ArchiveBuilder, error::ArchiveError, mirrors::ScratchMirrors};
use crate::{
    heap::{
        address::Address,
        cell::{CellKind, MirrorOf, HEADER_SIZE, HEAP_WORD_SIZE},
    },
    runtime::{
        klass::{BasicType, FieldType, Klass, KlassKind, LoaderKind},
        ref_ptr::Ref,
        value::{ObjectRef, Value},
        vm::Runtime,
    },
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// A field or element of an archived object. References are byte offsets
/// of the target inside the archived heap region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageValue {
    Null,
    Int(i64),
    Ref(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageKind {
    Instance,
    ObjArray,
    TypeArray(BasicType),
    /// Mirror of the class buffered at this address.
    KlassMirror(Address),
    PrimitiveMirror(BasicType),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectImage {
    pub offset: u32,
    /// Buffered address of the object's class.
    pub klass: Address,
    pub kind: ImageKind,
    /// Identity hash, `0` if none was assigned.
    pub hash: u32,
    pub fields: Vec<ImageValue>,
}

impl ObjectImage {
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.fields.len() * HEAP_WORD_SIZE
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KlassImageKind {
    Instance,
    ObjArray { element: Address },
    TypeArray(BasicType),
}

/// Buffered copy of a class descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlassImage {
    pub address: Address,
    pub name: String,
    pub kind: KlassImageKind,
    pub module: Option<String>,
    pub package: Option<String>,
    pub loader: LoaderKind,
    pub static_fields: Vec<(String, FieldType)>,
    pub instance_field_count: usize,
    pub has_synthetic_constant_table: bool,
    pub archivable: bool,
    /// Root holding the archived (scratch) mirror of this class.
    pub archived_mirror_index: Option<u32>,
    pub has_archived_enum_constants: bool,
}

/// Location of the permanent-object segments in the root table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermObjSegments {
    pub first_root: u32,
    pub count: u32,
    pub shift: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedHeapRegion {
    pub objects: Vec<ObjectImage>,
    /// Root table; each slot is an object offset or null.
    pub roots: Vec<Option<u32>>,
    pub used: usize,
    pub permobj: PermObjSegments,
}

/// Copies archived objects into buffer form.
pub struct ArchiveHeapWriter<'a> {
    runtime: &'a Runtime,
    builder: &'a dyn ArchiveBuilder,
    mirrors: &'a ScratchMirrors,
    offsets: HashMap<ObjectRef, u32>,
    used: usize,
}

impl<'a> ArchiveHeapWriter<'a> {
    pub fn new(runtime: &'a Runtime, builder: &'a dyn ArchiveBuilder, mirrors: &'a ScratchMirrors) -> Self {
        Self {
            runtime,
            builder,
            mirrors,
            offsets: HashMap::new(),
            used: 0,
        }
    }

    fn allocate(&mut self, size: usize) -> u32 {
        let offset = self.used as u32;
        self.used += size;
        offset
    }

    /// Archived form of a live reference: mirrors are replaced by their
    /// scratch counterparts.
    fn source_of(&self, object: ObjectRef) -> ObjectRef {
        if object.is_mirror() {
            self.mirrors.scratch_for(object).unwrap_or(object)
        } else {
            object
        }
    }

    fn offset_of(&self, object: ObjectRef) -> Result<u32, ArchiveError> {
        let source = self.source_of(object);
        self.offsets
            .get(&source)
            .copied()
            .ok_or_else(|| ArchiveError::UnarchivedReference(self.runtime.describe(source)))
    }

    fn image_kind(&self, object: ObjectRef) -> ImageKind {
        match object.kind() {
            CellKind::Instance => ImageKind::Instance,
            CellKind::ObjArray => ImageKind::ObjArray,
            CellKind::TypeArray(bt) => ImageKind::TypeArray(bt),
            CellKind::Mirror(MirrorOf::Klass(klass)) => ImageKind::KlassMirror(self.builder.get_buffered_klass(klass)),
            CellKind::Mirror(MirrorOf::Primitive(bt)) => ImageKind::PrimitiveMirror(bt),
        }
    }

    fn copy_object(&self, object: ObjectRef) -> Result<ObjectImage, ArchiveError> {
        let mut fields = Vec::with_capacity(object.len());
        for value in object.fields().iter() {
            fields.push(match value {
                Value::Null => ImageValue::Null,
                Value::Int(x) => ImageValue::Int(*x),
                Value::Object(target) => ImageValue::Ref(self.offset_of(*target)?),
            });
        }
        Ok(ObjectImage {
            offset: self.offsets[&object],
            klass: self.builder.get_buffered_klass(object.klass()),
            kind: self.image_kind(object),
            hash: object.identity_hash().unwrap_or(0),
            fields,
        })
    }

    /// Writes `source_objects` (in archive order) followed by the
    /// permanent-object segments, which are appended to `roots`.
    pub fn write(
        mut self,
        source_objects: &[ObjectRef],
        roots: Vec<Option<ObjectRef>>,
        permobj_segment_shift: u32,
    ) -> Result<ArchivedHeapRegion, ArchiveError> {
        for object in source_objects.iter().copied() {
            let offset = self.allocate(object.size());
            self.offsets.insert(object, offset);
        }
        let mut objects = Vec::with_capacity(source_objects.len());
        for object in source_objects.iter().copied() {
            objects.push(self.copy_object(object)?);
        }

        let mut root_offsets = Vec::with_capacity(roots.len());
        for root in roots.iter() {
            root_offsets.push(match root {
                Some(object) => Some(self.offset_of(*object)?),
                None => None,
            });
        }

        let permobj = self.write_permobj_segments(&mut objects, &mut root_offsets, permobj_segment_shift);
        debug!(
            target: "cds::heap",
            "heap region: {} objects, {} roots, {} bytes used",
            objects.len(),
            root_offsets.len(),
            self.used
        );
        Ok(ArchivedHeapRegion {
            objects,
            roots: root_offsets,
            used: self.used,
            permobj,
        })
    }

    fn write_permobj_segments(
        &mut self,
        objects: &mut Vec<ObjectImage>,
        roots: &mut Vec<Option<u32>>,
        shift: u32,
    ) -> PermObjSegments {
        let first_root = roots.len() as u32;
        let segment_klass = self.builder.get_buffered_klass(self.runtime.object_array_klass());
        let members: Vec<u32> = objects.iter().map(|image| image.offset).collect();
        let mut count = 0;
        for chunk in members.chunks(1 << shift) {
            let fields: Vec<ImageValue> = chunk.iter().copied().map(ImageValue::Ref).collect();
            let offset = self.allocate(HEADER_SIZE + fields.len() * HEAP_WORD_SIZE);
            objects.push(ObjectImage {
                offset,
                klass: segment_klass,
                kind: ImageKind::ObjArray,
                hash: 0,
                fields,
            });
            roots.push(Some(offset));
            count += 1;
        }
        info!(
            target: "cds::heap",
            "{} permanent objects in {} segments of {}",
            members.len(),
            count,
            1u32 << shift
        );
        PermObjSegments {
            first_root,
            count,
            shift,
        }
    }
}

/// Buffered copies of every class descriptor known to `builder`.
pub fn write_klass_images(
    rt: &Runtime,
    builder: &dyn ArchiveBuilder,
    mirror_indices: &HashMap<Ref<Klass>, u32>,
    enum_klasses: &HashSet<Ref<Klass>>,
) -> Vec<KlassImage> {
    builder
        .klasses()
        .iter()
        .map(|klass| {
            let kind = match klass.kind() {
                KlassKind::Instance => KlassImageKind::Instance,
                KlassKind::ObjArray { element } => KlassImageKind::ObjArray {
                    element: builder.get_buffered_klass(element),
                },
                KlassKind::TypeArray(bt) => KlassImageKind::TypeArray(bt),
            };
            KlassImage {
                address: builder.get_buffered_klass(*klass),
                name: klass.name().to_owned(),
                kind,
                module: klass.module().map(str::to_owned),
                package: klass.package().map(str::to_owned),
                loader: klass.loader(),
                static_fields: klass
                    .static_fields()
                    .iter()
                    .map(|field| (rt.resolve_symbol(field.name).to_owned(), field.ty))
                    .collect(),
                instance_field_count: klass.instance_field_count(),
                has_synthetic_constant_table: klass.has_synthetic_constant_table(),
                archivable: klass.is_archivable(),
                archived_mirror_index: mirror_indices.get(klass).copied(),
                has_archived_enum_constants: enum_klasses.contains(klass),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cds::archive_builder::BufferedArchiveBuilder,
        runtime::{
            class_loader::{ClassDefinition, ClassLoader},
            options::Options,
        },
    };

    #[test]
    fn references_become_offsets_and_segments_cover_all_objects() {
        let mut rt = Runtime::new(Options::default());
        rt.define_class(ClassDefinition::new("base/test/Node").instance_fields(2));
        let node = rt.resolve_class("base/test/Node").unwrap();
        let mut a = rt.allocate_instance(node);
        let b = rt.allocate_instance(node);
        let c = rt.allocate_instance(node);
        a.set_field(0, Value::Object(b));
        a.set_field(1, Value::Int(42));
        let mirrors = ScratchMirrors::create(&mut rt);
        let builder = BufferedArchiveBuilder::new(&rt);

        let writer = ArchiveHeapWriter::new(&rt, &builder, &mirrors);
        let region = writer.write(&[a, b, c], vec![Some(a), None], 1).unwrap();

        // 3 objects + 2 segments of at most 2 elements
        assert_eq!(region.objects.len(), 5);
        assert_eq!(region.objects[0].fields[0], ImageValue::Ref(region.objects[1].offset));
        assert_eq!(region.objects[0].fields[1], ImageValue::Int(42));
        assert_eq!(region.roots[..2], [Some(0), None]);
        assert_eq!(region.permobj.first_root, 2);
        assert_eq!(region.permobj.count, 2);
        assert_eq!(region.roots.len(), 4);
        assert_eq!(region.objects[4].fields, vec![ImageValue::Ref(region.objects[2].offset)]);
    }

    #[test]
    fn unarchived_reference_is_reported() {
        let mut rt = Runtime::new(Options::default());
        rt.define_class(ClassDefinition::new("base/test/Node").instance_fields(1));
        let node = rt.resolve_class("base/test/Node").unwrap();
        let mut a = rt.allocate_instance(node);
        let b = rt.allocate_instance(node);
        a.set_field(0, Value::Object(b));
        let mirrors = ScratchMirrors::create(&mut rt);
        let builder = BufferedArchiveBuilder::new(&rt);

        let writer = ArchiveHeapWriter::new(&rt, &builder, &mirrors);
        assert!(matches!(
            writer.write(&[a], vec![Some(a)], 4),
            Err(ArchiveError::UnarchivedReference(_))
        ));
    }
}
