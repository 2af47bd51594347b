/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use crate::{
    heap::cell::{CellKind, MirrorOf},
    runtime::{
        klass::{BasicType, Klass},
        ref_ptr::Ref,
        value::{ObjectRef, Value},
        vm::Runtime,
        vm_classes,
    },
};
use std::collections::HashMap;
use tracing::debug;
use vec_map::VecMap;

/// Archive-only stand-ins for class mirrors.
///
/// Live mirrors hold the current static field values and are tied to the
/// loaded class. A scratch mirror carries the same identity hash but default
/// static values, and is what ends up in the archive wherever the live
/// mirror was referenced.
#[derive(Default)]
pub struct ScratchMirrors {
    by_klass: HashMap<Ref<Klass>, ObjectRef>,
    by_basic_type: VecMap<ObjectRef>,
}

impl ScratchMirrors {
    /// Creates scratch mirrors for every loaded class and primitive type.
    /// Must run before the heap is pinned for the walk.
    pub fn create(rt: &mut Runtime) -> Self {
        let mut mirrors = Self::default();
        let class_klass = rt.class_klass();
        for bt in BasicType::ALL.iter().copied() {
            let live = rt.primitive_mirror(bt);
            let scratch = new_scratch_mirror(rt, class_klass, MirrorOf::Primitive(bt), Vec::new(), live);
            mirrors.by_basic_type.insert(bt.index(), scratch);
        }
        let klasses = rt.loaded_klasses().to_vec();
        for klass in klasses {
            let live = klass.mirror();
            let scratch = new_scratch_mirror(
                rt,
                class_klass,
                MirrorOf::Klass(klass),
                klass.default_static_values(),
                live,
            );
            mirrors.by_klass.insert(klass, scratch);
        }
        debug!(
            target: "cds::heap",
            "created {} scratch mirrors",
            mirrors.by_klass.len() + mirrors.by_basic_type.len()
        );
        mirrors
    }

    pub fn scratch_java_mirror(&self, klass: Ref<Klass>) -> Option<ObjectRef> {
        self.by_klass.get(&klass).copied()
    }

    pub fn scratch_primitive_mirror(&self, bt: BasicType) -> Option<ObjectRef> {
        self.by_basic_type.get(bt.index()).copied()
    }

    /// Scratch counterpart of any mirror; scratch mirrors map to themselves.
    pub fn scratch_for(&self, mirror: ObjectRef) -> Option<ObjectRef> {
        if mirror.header().is_scratch_mirror() {
            return Some(mirror);
        }
        match mirror.mirror_of()? {
            MirrorOf::Klass(klass) => self.scratch_java_mirror(klass),
            MirrorOf::Primitive(bt) => self.scratch_primitive_mirror(bt),
        }
    }

    pub fn len(&self) -> usize {
        self.by_klass.len() + self.by_basic_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn new_scratch_mirror(
    rt: &mut Runtime,
    class_klass: Ref<Klass>,
    of: MirrorOf,
    statics: Vec<Value>,
    live: Option<ObjectRef>,
) -> ObjectRef {
    let hash = live.map(|live| rt.heap().identity_hash(live));
    let mut scratch = rt.heap_mut().allocate(class_klass, CellKind::Mirror(of), statics);
    scratch.header_mut().set_scratch_mirror();
    if let Some(hash) = hash {
        scratch.header().set_identity_hash(hash);
    }
    scratch
}

/// Classes whose mirrors may be referenced from inside an archived subgraph.
const MIRROR_ALLOW_LIST: &[&str] = &[
    "base/lang/Boolean",
    "base/lang/Character",
    "base/lang/Float",
    "base/lang/Double",
    "base/lang/Byte",
    "base/lang/Short",
    "base/lang/Integer",
    "base/lang/Long",
    "base/lang/Void",
    vm_classes::OBJECT,
];

/// Mirrors of primitive types and of a few foundational classes are always
/// available at restore time, so they may appear anywhere in a subgraph.
pub fn can_mirror_be_used_in_subgraph(mirror: ObjectRef) -> bool {
    match mirror.mirror_of() {
        Some(MirrorOf::Primitive(_)) => true,
        Some(MirrorOf::Klass(klass)) => MIRROR_ALLOW_LIST.contains(&klass.name()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{
        class_loader::{ClassDefinition, ClassLoader},
        options::Options,
    };

    #[test]
    fn scratch_mirrors_copy_identity_hash_and_strip_statics() {
        let mut rt = Runtime::new(Options::default());
        rt.define_class(ClassDefinition::new("base/test/Holder").reference_static("value"));
        let holder = rt.resolve_class("base/test/Holder").unwrap();
        let string = rt.new_string("live").unwrap();
        rt.set_static_field(holder, "value", string.into()).unwrap();

        let mirrors = ScratchMirrors::create(&mut rt);
        let live = holder.mirror().unwrap();
        let scratch = mirrors.scratch_java_mirror(holder).unwrap();
        assert_ne!(live, scratch);
        assert!(scratch.header().is_scratch_mirror());
        assert_eq!(scratch.identity_hash(), live.identity_hash());
        assert!(scratch.field(0).is_null());
        assert_eq!(mirrors.scratch_for(live), Some(scratch));
        assert_eq!(mirrors.scratch_for(scratch), Some(scratch));
    }

    #[test]
    fn primitive_mirrors_are_covered() {
        let mut rt = Runtime::new(Options::default());
        let mirrors = ScratchMirrors::create(&mut rt);
        for bt in BasicType::ALL.iter().copied() {
            let live = rt.primitive_mirror(bt).unwrap();
            assert_eq!(mirrors.scratch_for(live), mirrors.scratch_primitive_mirror(bt));
        }
    }

    #[test]
    fn allow_list() {
        let mut rt = Runtime::new(Options::default());
        rt.define_class(ClassDefinition::new("base/test/Other"));
        let other = rt.resolve_class("base/test/Other").unwrap();
        let integer = rt.resolve_class("base/lang/Integer").unwrap();
        assert!(can_mirror_be_used_in_subgraph(rt.primitive_mirror(BasicType::Int).unwrap()));
        assert!(can_mirror_be_used_in_subgraph(integer.mirror().unwrap()));
        assert!(can_mirror_be_used_in_subgraph(rt.object_klass().mirror().unwrap()));
        assert!(!can_mirror_be_used_in_subgraph(other.mirror().unwrap()));
        assert!(!can_mirror_be_used_in_subgraph(rt.string_klass().mirror().unwrap()));
    }
}
