/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use super::error::ArchiveError;
use crate::runtime::{
    class_loader::ClassLoader,
    klass::{FieldType, Klass, LoaderKind},
    ref_ptr::Ref,
    vm::Runtime,
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::{info, warn};

/// Static field of the test class that is archived when one is configured.
pub const ARCHIVE_TEST_FIELD_NAME: &str = "archivedObjects";

/// An entry point as written in configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFieldSpec {
    pub klass_name: String,
    pub field_name: String,
}

impl EntryFieldSpec {
    pub fn new(klass_name: &str, field_name: &str) -> Self {
        Self {
            klass_name: klass_name.to_owned(),
            field_name: field_name.to_owned(),
        }
    }
}

fn specs(table: &[(&str, &str)]) -> Vec<EntryFieldSpec> {
    table
        .iter()
        .map(|(klass_name, field_name)| EntryFieldSpec::new(klass_name, field_name))
        .collect()
}

const ARCHIVE_SUBGRAPH_ENTRY_FIELDS: &[(&str, &str)] = &[
    ("base/lang/Integer$IntegerCache", "archivedCache"),
    ("base/lang/Long$LongCache", "archivedCache"),
    ("base/lang/Byte$ByteCache", "archivedCache"),
    ("base/lang/Short$ShortCache", "archivedCache"),
    ("base/lang/Character$CharacterCache", "archivedCache"),
    ("base/util/ImmutableCollections", "archivedObjects"),
    ("base/lang/ModuleLayer", "EMPTY_LAYER"),
    ("base/invoke/MethodType", "archivedObjects"),
];

const FMG_ARCHIVE_SUBGRAPH_ENTRY_FIELDS: &[(&str, &str)] = &[
    ("base/internal/loader/ArchivedClassLoaders", "archivedClassLoaders"),
    ("base/internal/module/ArchivedBootLayer", "archivedBootLayer"),
    ("base/lang/Module$ArchivedData", "archivedData"),
];

/// The configured entry tables. Consecutive entries of the same holder are
/// archived in one recording session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFieldConfig {
    #[serde(default)]
    pub archive_subgraph_entry_fields: Vec<EntryFieldSpec>,
    /// Only archived when dumping the full module graph.
    #[serde(default)]
    pub fmg_archive_subgraph_entry_fields: Vec<EntryFieldSpec>,
}

impl Default for EntryFieldConfig {
    fn default() -> Self {
        Self {
            archive_subgraph_entry_fields: specs(ARCHIVE_SUBGRAPH_ENTRY_FIELDS),
            fmg_archive_subgraph_entry_fields: specs(FMG_ARCHIVE_SUBGRAPH_ENTRY_FIELDS),
        }
    }
}

impl EntryFieldConfig {
    /// A configuration with both tables empty.
    pub fn empty() -> Self {
        Self {
            archive_subgraph_entry_fields: Vec::new(),
            fmg_archive_subgraph_entry_fields: Vec::new(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn with_entry_field(mut self, klass_name: &str, field_name: &str) -> Self {
        self.archive_subgraph_entry_fields
            .push(EntryFieldSpec::new(klass_name, field_name));
        self
    }

    pub fn with_full_module_graph_entry_field(mut self, klass_name: &str, field_name: &str) -> Self {
        self.fmg_archive_subgraph_entry_fields
            .push(EntryFieldSpec::new(klass_name, field_name));
        self
    }
}

/// An entry point whose holder has been loaded and initialized.
#[derive(Clone, Debug)]
pub struct ArchivableStaticFieldInfo {
    pub klass_name: String,
    pub field_name: String,
    pub klass: Ref<Klass>,
    /// Static slot of the field in the holder's mirror.
    pub offset: u32,
}

/// Resolved entry tables for one dump.
#[derive(Clone, Debug, Default)]
pub struct EntryTables {
    pub archive_subgraph_entry_fields: Vec<ArchivableStaticFieldInfo>,
    /// `None` unless the full module graph is being dumped.
    pub fmg_archive_subgraph_entry_fields: Option<Vec<ArchivableStaticFieldInfo>>,
}

fn entry_error(message: String) -> ArchiveError {
    ArchiveError::EntryField(message)
}

fn init_entry_field(rt: &mut Runtime, spec: &EntryFieldSpec) -> Result<ArchivableStaticFieldInfo, ArchiveError> {
    let test_class_name = rt.options().archive_heap_test_class.clone();
    let is_test_class = test_class_name.as_deref() == Some(spec.klass_name.as_str());
    if is_test_class {
        warn!(target: "cds", "Loading archive heap test class {} ...", spec.klass_name);
    }

    let klass = rt.resolve_class(&spec.klass_name).map_err(|_| {
        entry_error(format!(
            "Fail to initialize archive heap: {} cannot be loaded by the boot loader",
            spec.klass_name
        ))
    })?;
    if !klass.is_instance_klass() {
        return Err(entry_error(format!(
            "Fail to initialize archive heap: {} is not an instance class",
            spec.klass_name
        )));
    }
    if klass.loader() != LoaderKind::Boot {
        return Err(entry_error(format!("{} is not a boot class", spec.klass_name)));
    }
    if is_test_class {
        if !klass.is_in_unnamed_module() {
            return Err(entry_error(format!(
                "archive heap test class {} is not in unnamed module",
                spec.klass_name
            )));
        }
        if klass.package().is_some() {
            return Err(entry_error(format!(
                "archive heap test class {} is not in unnamed package",
                spec.klass_name
            )));
        }
        warn!(target: "cds", "Initializing archive heap test class {} ...", spec.klass_name);
    } else if !klass.is_in_base_module() {
        return Err(entry_error(format!("{} is not in the base module", spec.klass_name)));
    }

    rt.initialize_class(klass).map_err(|error| {
        entry_error(format!("Fail to initialize archive heap: {}", error))
    })?;

    let field = rt
        .static_field_info(klass, &spec.field_name)
        .ok()
        .filter(|field| field.ty == FieldType::Reference)
        .ok_or_else(|| {
            entry_error(format!(
                "Unable to find the static reference field {}::{}",
                spec.klass_name, spec.field_name
            ))
        })?;
    Ok(ArchivableStaticFieldInfo {
        klass_name: spec.klass_name.clone(),
        field_name: spec.field_name.clone(),
        klass,
        offset: field.offset,
    })
}

fn init_entry_fields(rt: &mut Runtime, specs: &[EntryFieldSpec]) -> Result<Vec<ArchivableStaticFieldInfo>, ArchiveError> {
    specs.iter().map(|spec| init_entry_field(rt, spec)).collect()
}

/// Loads and initializes every holder of the configured entry points and
/// locates their fields. Any violation aborts the dump.
pub fn init_subgraph_entry_fields(rt: &mut Runtime, config: &EntryFieldConfig) -> Result<EntryTables, ArchiveError> {
    let mut default_table = config.archive_subgraph_entry_fields.clone();
    if let Some(test_class) = rt.options().archive_heap_test_class.clone() {
        default_table.push(EntryFieldSpec::new(&test_class, ARCHIVE_TEST_FIELD_NAME));
    }
    let archive_subgraph_entry_fields = init_entry_fields(rt, &default_table)?;
    let fmg_archive_subgraph_entry_fields = if rt.options().dump_full_module_graph {
        Some(init_entry_fields(rt, &config.fmg_archive_subgraph_entry_fields)?)
    } else {
        None
    };
    info!(
        target: "cds",
        "{} entry fields{}",
        archive_subgraph_entry_fields.len(),
        match &fmg_archive_subgraph_entry_fields {
            Some(fields) => format!(", {} full module graph entry fields", fields.len()),
            None => String::new(),
        }
    );
    Ok(EntryTables {
        archive_subgraph_entry_fields,
        fmg_archive_subgraph_entry_fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{class_loader::ClassDefinition, options::Options};

    #[test]
    fn default_tables() {
        let config = EntryFieldConfig::default();
        assert_eq!(
            config.archive_subgraph_entry_fields[0],
            EntryFieldSpec::new("base/lang/Integer$IntegerCache", "archivedCache")
        );
        assert_eq!(config.fmg_archive_subgraph_entry_fields.len(), 3);
    }

    #[test]
    fn json_override() {
        let config: EntryFieldConfig = serde_json::from_str(
            r#"{"archive_subgraph_entry_fields": [{"klass_name": "base/test/Holder", "field_name": "field1"}]}"#,
        )
        .unwrap();
        assert_eq!(
            config,
            EntryFieldConfig::empty().with_entry_field("base/test/Holder", "field1")
        );
    }

    #[test]
    fn holders_are_validated() {
        let mut rt = Runtime::new(Options::default());
        rt.define_class(ClassDefinition::new("base/test/Holder").reference_static("field1"));
        rt.define_class(
            ClassDefinition::new("base/test/Prim").static_field("count", FieldType::Primitive(crate::runtime::klass::BasicType::Int)),
        );
        rt.define_class(ClassDefinition::new("other/Holder").module(Some("other")).reference_static("f"));

        let ok = init_subgraph_entry_fields(&mut rt, &EntryFieldConfig::empty().with_entry_field("base/test/Holder", "field1")).unwrap();
        assert_eq!(ok.archive_subgraph_entry_fields[0].offset, 0);
        assert!(ok.archive_subgraph_entry_fields[0].klass.is_initialized());
        assert!(ok.fmg_archive_subgraph_entry_fields.is_none());

        for (klass, field) in [
            ("base/test/Missing", "f"),
            ("[I", "f"),
            ("other/Holder", "f"),
            ("base/test/Holder", "nope"),
            ("base/test/Prim", "count"),
        ] {
            let config = EntryFieldConfig::empty().with_entry_field(klass, field);
            assert!(
                matches!(init_subgraph_entry_fields(&mut rt, &config), Err(ArchiveError::EntryField(_))),
                "{}::{} should be rejected",
                klass,
                field
            );
        }
    }

    #[test]
    fn test_class_must_be_in_unnamed_package_of_unnamed_module() {
        let options = Options::default().with_archive_heap_test_class("TestClass");
        let mut rt = Runtime::new(options);
        rt.define_class(ClassDefinition::new("TestClass").unnamed_module().reference_static("archivedObjects"));
        let tables = init_subgraph_entry_fields(&mut rt, &EntryFieldConfig::empty()).unwrap();
        assert_eq!(tables.archive_subgraph_entry_fields[0].field_name, ARCHIVE_TEST_FIELD_NAME);

        let options = Options::default().with_archive_heap_test_class("test/TestClass");
        let mut rt = Runtime::new(options);
        rt.define_class(ClassDefinition::new("test/TestClass").unnamed_module().reference_static("archivedObjects"));
        assert!(init_subgraph_entry_fields(&mut rt, &EntryFieldConfig::empty()).is_err());
    }
}
