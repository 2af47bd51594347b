/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use tracing::info;

/// Counters of one recording session, or of a whole entry table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStats {
    pub subgraph_recordings: usize,
    pub walked_objects: usize,
    pub archived_objects: usize,
    pub recorded_klasses: usize,
    pub verifications: usize,
}

impl AddAssign for RecordingStats {
    fn add_assign(&mut self, other: Self) {
        self.subgraph_recordings += other.subgraph_recordings;
        self.walked_objects += other.walked_objects;
        self.archived_objects += other.archived_objects;
        self.recorded_klasses += other.recorded_klasses;
        self.verifications += other.verifications;
    }
}

impl RecordingStats {
    pub fn log_totals(&self) {
        info!(target: "cds::heap", "Archived subgraph records = {}", self.subgraph_recordings);
        info!(target: "cds::heap", "  Walked {} objects", self.walked_objects);
        info!(target: "cds::heap", "  Archived {} objects", self.archived_objects);
        info!(target: "cds::heap", "  Recorded {} klasses", self.recorded_klasses);
    }
}

/// Summary of a finished dump, stored with the archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpStats {
    pub recording: RecordingStats,
    pub archived_objects: usize,
    pub archived_bytes: usize,
    pub roots: usize,
    pub subgraph_records: usize,
    pub klasses: usize,
}

impl DumpStats {
    pub fn print(&self) {
        info!(
            target: "cds",
            "archived {} objects ({} bytes), {} roots, {} subgraph records, {} classes",
            self.archived_objects,
            self.archived_bytes,
            self.roots,
            self.subgraph_records,
            self.klasses
        );
        self.recording.log_totals();
    }
}
