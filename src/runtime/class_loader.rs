/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use super::{
    klass::{package_of, FieldType, Klass, LoaderKind, BASE_MODULE_NAME},
    ref_ptr::Ref,
    vm::Runtime,
};
use std::{fmt, rc::Rc};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassLoadError {
    #[error("class {0} not found")]
    ClassNotFound(String),
    #[error("no static field {field} in {class}")]
    NoSuchField { class: String, field: String },
    #[error("initializer of {class} failed: {reason}")]
    InitializationFailed { class: String, reason: String },
    #[error("class {0} is in an erroneous state")]
    Erroneous(String),
    #[error("incompatible class change: {0}")]
    IncompatibleClassChange(String),
}

/// Class loading collaborator: name resolution, linking and initialization.
pub trait ClassLoader {
    fn resolve_class(&mut self, name: &str) -> Result<Ref<Klass>, ClassLoadError>;
    fn link_class(&mut self, klass: Ref<Klass>) -> Result<(), ClassLoadError>;
    /// Runs the class initializer once. A request made while the class is
    /// being initialized returns immediately.
    fn initialize_class(&mut self, klass: Ref<Klass>) -> Result<(), ClassLoadError>;
}

pub type Initializer = Rc<dyn Fn(&mut Runtime, Ref<Klass>) -> Result<(), ClassLoadError>>;

/// Source of a loadable class, the equivalent of a class file on the class path.
#[derive(Clone)]
pub struct ClassDefinition {
    pub(crate) name: String,
    pub(crate) module: Option<String>,
    pub(crate) package: Option<String>,
    pub(crate) loader: LoaderKind,
    pub(crate) static_fields: Vec<(String, FieldType)>,
    pub(crate) instance_fields: usize,
    pub(crate) has_synthetic_constant_table: bool,
    pub(crate) archivable: bool,
    pub(crate) initializer: Option<Initializer>,
}

impl ClassDefinition {
    /// Boot-loaded class in the base module; the package is derived from the name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let package = package_of(&name).map(str::to_owned);
        Self {
            name,
            module: Some(BASE_MODULE_NAME.to_owned()),
            package,
            loader: LoaderKind::Boot,
            static_fields: Vec::new(),
            instance_fields: 0,
            has_synthetic_constant_table: false,
            archivable: true,
            initializer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(mut self, module: Option<&str>) -> Self {
        self.module = module.map(str::to_owned);
        self
    }

    pub fn unnamed_module(self) -> Self {
        self.module(None)
    }

    pub fn loader(mut self, loader: LoaderKind) -> Self {
        self.loader = loader;
        self
    }

    pub fn static_field(mut self, name: &str, ty: FieldType) -> Self {
        self.static_fields.push((name.to_owned(), ty));
        self
    }

    pub fn reference_static(self, name: &str) -> Self {
        self.static_field(name, FieldType::Reference)
    }

    pub fn instance_fields(mut self, count: usize) -> Self {
        self.instance_fields = count;
        self
    }

    /// Marks the class as enum-like: its static reference fields hold its
    /// constants and are archived together with any archived instance.
    pub fn enum_like(mut self) -> Self {
        self.has_synthetic_constant_table = true;
        self
    }

    pub fn unarchivable(mut self) -> Self {
        self.archivable = false;
        self
    }

    pub fn initializer<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Runtime, Ref<Klass>) -> Result<(), ClassLoadError> + 'static,
    {
        self.initializer = Some(Rc::new(f));
        self
    }
}

impl fmt::Debug for ClassDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDefinition")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("loader", &self.loader)
            .field("static_fields", &self.static_fields)
            .field("instance_fields", &self.instance_fields)
            .finish()
    }
}
