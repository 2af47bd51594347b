/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use heap_archive::cds::{entry_fields::EntryFieldConfig, restore};
use heap_archive::prelude::*;
use heap_archive::runtime::library::define_base_library;
use std::process;
use structopt::StructOpt;
use tracing::{info, warn};

fn init_logging(options: &Options) {
    let level = if options.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(true)
        .init();
}

fn run(options: Options) -> Result<(), ArchiveError> {
    let config = match &options.entry_config {
        Some(path) => EntryFieldConfig::from_file(path)?,
        None => EntryFieldConfig::default(),
    };

    let mut rt = Runtime::new(options.clone());
    define_base_library(&mut rt);
    rt.end_early_phase();
    let archive = HeapArchive::dump(&mut rt, &config)?;
    if options.print_stats {
        archive.stats.print();
    }
    let archive = match &options.output {
        Some(path) => {
            archive.write_to_file(path)?;
            info!(target: "cds", "wrote {}", path.display());
            HeapArchive::read_from_file(path)?
        }
        None => archive,
    };

    let mut rt = Runtime::with_archive(options, &archive)?;
    define_base_library(&mut rt);
    restore::resolve_classes(&mut rt);
    let holders = config
        .archive_subgraph_entry_fields
        .iter()
        .chain(config.fmg_archive_subgraph_entry_fields.iter())
        .map(|spec| spec.klass_name.as_str());
    let mut last = None;
    for name in holders {
        if last == Some(name) {
            continue;
        }
        last = Some(name);
        let klass = rt.resolve_class(name)?;
        if let Err(error) = rt.initialize_class(klass) {
            warn!(target: "cds", "{}", error);
            continue;
        }
        let state = rt
            .archive()
            .and_then(|archive| klass.shared_address().map(|address| archive.state_of(address)));
        match state {
            Some(state) => info!(target: "cds", "{}: {:?}", name, state),
            None => info!(target: "cds", "{}: not archived", name),
        }
    }
    Ok(())
}

fn main() {
    let options = Options::from_args();
    init_logging(&options);
    if let Err(error) = run(options) {
        eprintln!("error: {}", error);
        process::exit(1);
    }
}
