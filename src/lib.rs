/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Archiving of static-field object graphs and their lazy restoration.
//!
//! The [`runtime`] module provides a small managed runtime (class
//! descriptors, mirrors, a class loader) and [`heap`] its object heap. The
//! [`cds`] module walks object graphs reachable from configured static
//! fields, writes them into a relocatable [`cds::HeapArchive`] and restores
//! them into a later [`runtime::vm::Runtime`].

/// Emits a `tracing` event only when `$val` holds.
#[macro_export]
macro_rules! log_if {
    ($val: expr, $($rest:tt)*) => {
        if $val {
            ::tracing::debug!($($rest)*);
        }
    };
}

/// Like [`log_if!`] but at `info` level, for output a user asked for explicitly.
#[macro_export]
macro_rules! logln_if {
    ($val: expr, $($rest:tt)*) => {
        if $val {
            ::tracing::info!($($rest)*);
        }
    };
}

pub mod cds;
pub mod heap;
pub mod runtime;

pub mod prelude {
    pub use crate::cds::{
        archive_builder::{ArchiveBuilder, BufferedArchiveBuilder},
        entry_fields::{ArchivableStaticFieldInfo, EntryFieldConfig},
        error::ArchiveError,
        restore::{RejectReason, RestoreState},
        HeapArchive,
    };
    pub use crate::heap::{cell::HeapCell, Heap};
    pub use crate::runtime::{
        class_loader::{ClassDefinition, ClassLoadError, ClassLoader},
        klass::{BasicType, ClassState, FieldType, Klass, LoaderKind},
        options::Options,
        ref_ptr::Ref,
        value::{ObjectRef, Value},
        vm::Runtime,
    };
}
