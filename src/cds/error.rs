/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use crate::runtime::class_loader::ClassLoadError;
use std::fmt;
use thiserror::Error;

/// Dump-time failures. Every variant aborts the dump; the one recoverable
/// condition (a too-large entry value) never becomes an error.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot archive object of class {class_name}: {reason}\n{diagnostics}")]
    UnsupportedObject {
        class_name: String,
        reason: String,
        diagnostics: Diagnostics,
    },
    #[error("object of class {class_name} ({size} bytes) is too large to archive\n{diagnostics}")]
    ObjectTooLarge {
        class_name: String,
        size: usize,
        diagnostics: Diagnostics,
    },
    #[error("class {class_name} cannot be part of an archived subgraph: {reason}")]
    DisallowedClass { class_name: String, reason: String },
    #[error("invalid archived entry field: {0}")]
    EntryField(String),
    #[error("archived subgraph verification failed: {0}")]
    Verification(String),
    #[error("reference to an object that was not archived: {0}")]
    UnarchivedReference(String),
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("malformed archive: {0}")]
    Malformed(String),
    #[error(transparent)]
    ClassLoad(#[from] ClassLoadError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Where the walker was when a fatal condition was detected: the context
/// labels (entry class and field) and the chain of objects being walked,
/// outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub context: Vec<String>,
    pub trace: Vec<String>,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            writeln!(f, "Context:")?;
            for label in self.context.iter() {
                writeln!(f, "- {}", label)?;
            }
        }
        if !self.trace.is_empty() {
            writeln!(f, "Reference trace:")?;
            for (level, object) in self.trace.iter().enumerate() {
                writeln!(f, "[{}] {}", level, object)?;
            }
        }
        Ok(())
    }
}
