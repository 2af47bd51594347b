/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use std::{num::ParseIntError, path::PathBuf};
use structopt::StructOpt;

fn parse_size_from_osstr(s: &str) -> Result<usize, ParseIntError> {
    let s = s.to_lowercase();
    let (number, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len()));
    let multiplier = match unit {
        "kb" | "k" => 1024,
        "mb" | "m" => 1024 * 1024,
        "gb" | "g" => 1024 * 1024 * 1024,
        _ => 1,
    };

    number.parse::<usize>().map(|x| x * multiplier)
}

fn parse_segment_shift(s: &str) -> Result<u32, String> {
    let shift = s.parse::<u32>().map_err(|error| error.to_string())?;
    if shift > MAX_PERMOBJ_SEGMENT_SHIFT {
        return Err(format!("must be at most {}", MAX_PERMOBJ_SEGMENT_SHIFT));
    }
    Ok(shift)
}

/// Largest object the archive accepts by default.
pub const DEFAULT_MAX_ARCHIVED_OBJECT_SIZE: usize = 1024 * 1024;
/// Each permanent-object segment holds `1 << shift` objects.
pub const DEFAULT_PERMOBJ_SEGMENT_SHIFT: u32 = 14;
pub const MAX_PERMOBJ_SEGMENT_SHIFT: u32 = 20;
pub const DEFAULT_HASH_SEED: u32 = 0x5eed;

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "heap-archive",
    about = "Archive static-field object graphs and restore them in a fresh runtime"
)]
pub struct Options {
    #[structopt(
        long = "full-module-graph",
        help = "Also archive the subgraphs that make up the full module graph"
    )]
    pub dump_full_module_graph: bool,
    #[structopt(
        long = "no-load-full-module-graph",
        parse(from_flag = std::ops::Not::not),
        help = "Do not use archived full-module-graph subgraphs when restoring"
    )]
    pub load_full_module_graph: bool,
    #[structopt(
        long = "class-file-load-hook",
        help = "Simulate an agent with class-rewriting hooks when restoring"
    )]
    pub class_file_load_hook: bool,
    #[structopt(
        long = "archive-heap-test-class",
        help = "Class in the unnamed module whose `archivedObjects` field is archived as well"
    )]
    pub archive_heap_test_class: Option<String>,
    #[structopt(
        long = "max-archived-object-size",
        help = "Objects larger than this are not archived",
        default_value = "1MB",
        parse(try_from_str = parse_size_from_osstr)
    )]
    pub max_archived_object_size: usize,
    #[structopt(
        long = "permobj-segment-shift",
        help = "log2 of the number of objects per permanent-object segment",
        default_value = "14",
        parse(try_from_str = parse_segment_shift)
    )]
    pub permobj_segment_shift: u32,
    #[structopt(long = "hash-seed", help = "Seed for identity hashes", default_value = "24301")]
    pub hash_seed: u32,
    #[structopt(
        long = "entry-config",
        parse(from_os_str),
        help = "JSON file listing the archived entry fields"
    )]
    pub entry_config: Option<PathBuf>,
    #[structopt(
        short = "o",
        long = "output",
        parse(from_os_str),
        help = "Write the archive to this file"
    )]
    pub output: Option<PathBuf>,
    #[structopt(long = "log-walk", help = "Log every reference followed while archiving")]
    pub log_walk: bool,
    #[structopt(long = "print-stats", help = "Print archiving statistics")]
    pub print_stats: bool,
    #[structopt(short = "v", long = "verbose", help = "Enable debug logging")]
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dump_full_module_graph: false,
            load_full_module_graph: true,
            class_file_load_hook: false,
            archive_heap_test_class: None,
            max_archived_object_size: DEFAULT_MAX_ARCHIVED_OBJECT_SIZE,
            permobj_segment_shift: DEFAULT_PERMOBJ_SEGMENT_SHIFT,
            hash_seed: DEFAULT_HASH_SEED,
            entry_config: None,
            output: None,
            log_walk: false,
            print_stats: false,
            verbose: false,
        }
    }
}

impl Options {
    pub fn with_full_module_graph(mut self, enabled: bool) -> Self {
        self.dump_full_module_graph = enabled;
        self
    }

    pub fn with_load_full_module_graph(mut self, enabled: bool) -> Self {
        self.load_full_module_graph = enabled;
        self
    }

    pub fn with_class_file_load_hook(mut self, enabled: bool) -> Self {
        self.class_file_load_hook = enabled;
        self
    }

    pub fn with_archive_heap_test_class(mut self, name: impl Into<String>) -> Self {
        self.archive_heap_test_class = Some(name.into());
        self
    }

    pub fn with_max_archived_object_size(mut self, size: usize) -> Self {
        self.max_archived_object_size = size;
        self
    }

    /// Larger shifts are clamped to [`MAX_PERMOBJ_SEGMENT_SHIFT`].
    pub fn with_permobj_segment_shift(mut self, shift: u32) -> Self {
        self.permobj_segment_shift = shift.min(MAX_PERMOBJ_SEGMENT_SHIFT);
        self
    }

    pub fn with_hash_seed(mut self, seed: u32) -> Self {
        self.hash_seed = seed;
        self
    }

    pub fn with_log_walk(mut self, enabled: bool) -> Self {
        self.log_walk = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_with_units() {
        assert_eq!(parse_size_from_osstr("512").unwrap(), 512);
        assert_eq!(parse_size_from_osstr("4KB").unwrap(), 4096);
        assert_eq!(parse_size_from_osstr("1mb").unwrap(), 1024 * 1024);
        assert!(parse_size_from_osstr("lots").is_err());
    }

    #[test]
    fn defaults_match_command_line_defaults() {
        let parsed = Options::from_iter(&["heap-archive"]);
        let default = Options::default();
        assert_eq!(parsed.max_archived_object_size, default.max_archived_object_size);
        assert_eq!(parsed.permobj_segment_shift, default.permobj_segment_shift);
        assert_eq!(parsed.hash_seed, default.hash_seed);
        assert!(parsed.load_full_module_graph);
        assert!(!parsed.dump_full_module_graph);
    }

    #[test]
    fn flags_are_parsed() {
        let parsed = Options::from_iter(&[
            "heap-archive",
            "--full-module-graph",
            "--no-load-full-module-graph",
            "--class-file-load-hook",
            "--max-archived-object-size",
            "2KB",
        ]);
        assert!(parsed.dump_full_module_graph);
        assert!(!parsed.load_full_module_graph);
        assert!(parsed.class_file_load_hook);
        assert_eq!(parsed.max_archived_object_size, 2048);
    }

    #[test]
    fn segment_shift_is_bounded() {
        let parsed = Options::from_iter(&["heap-archive", "--permobj-segment-shift", "20"]);
        assert_eq!(parsed.permobj_segment_shift, 20);
        assert!(Options::from_iter_safe(&["heap-archive", "--permobj-segment-shift", "21"]).is_err());
        assert!(Options::from_iter_safe(&["heap-archive", "--permobj-segment-shift", "32"]).is_err());

        let options = Options::default().with_permobj_segment_shift(32);
        assert_eq!(options.permobj_segment_shift, MAX_PERMOBJ_SEGMENT_SHIFT);
        let options = Options::default().with_permobj_segment_shift(3);
        assert_eq!(options.permobj_segment_shift, 3);
    }
}
