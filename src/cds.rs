/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Heap archiving.
//!
//! At dump time the object graphs reachable from a fixed set of static
//! fields ("entry fields") are copied into a [`HeapArchive`], together with
//! one [`subgraph::ArchivedSubgraphRecord`] per holder class listing its
//! entries and the classes whose instances occur in its graphs. At run time
//! the archive is mapped with [`runtime::vm::Runtime::with_archive`] and
//! each holder's fields are restored lazily from its class initializer, see
//! [`restore`].
//!
//! [`runtime::vm::Runtime::with_archive`]: crate::runtime::vm::Runtime::with_archive

pub mod archive_builder;
pub mod archiver;
pub mod deserializer;
pub mod dictionary;
pub mod entry_fields;
pub mod enum_klass;
pub mod error;
pub mod heap_loader;
pub mod heap_writer;
pub mod mirrors;
pub mod object_cache;
pub mod restore;
pub mod roots;
pub mod serializer;
pub mod stats;
pub mod subgraph;
pub mod visited;
pub mod walker;

use self::{
    archive_builder::BufferedArchiveBuilder,
    entry_fields::{init_subgraph_entry_fields, EntryFieldConfig},
    error::ArchiveError,
    heap_writer::{ArchivedHeapRegion, KlassImage},
    mirrors::ScratchMirrors,
    stats::DumpStats,
};
use crate::runtime::{klass::BasicType, vm::Runtime};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};
use tracing::info;

/// A finished archive: class images, the archived heap region with its root
/// table, and the read-only region holding the subgraph dictionary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapArchive {
    pub klasses: Vec<KlassImage>,
    pub heap: ArchivedHeapRegion,
    /// Root index of each primitive mirror.
    pub basic_type_mirrors: Vec<(BasicType, u32)>,
    pub ro_region: Vec<u8>,
    /// Offset of the subgraph dictionary in `ro_region`.
    pub subgraph_table: u32,
    pub stats: DumpStats,
}

impl HeapArchive {
    /// Initializes every configured holder class in `rt` and archives the
    /// graphs reachable from their entry fields. `rt` is left usable but
    /// carries the scratch mirrors allocated for the dump.
    pub fn dump(rt: &mut Runtime, config: &EntryFieldConfig) -> Result<Self, ArchiveError> {
        let tables = init_subgraph_entry_fields(rt, config)?;
        let mirrors = ScratchMirrors::create(rt);
        let mut builder = BufferedArchiveBuilder::new(rt);
        let archive = archiver::dump_heap(rt, &tables, &mirrors, &mut builder)?;
        info!(
            target: "cds",
            "dumped {} objects in {} subgraph records",
            archive.stats.archived_objects,
            archive.stats.subgraph_records
        );
        Ok(archive)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), ArchiveError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
