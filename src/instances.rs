//! Loading of the instances file that declares server sections.
//!
//! The file is TOML whose top-level tables are sections, in the same shape
//! as the INI layout it replaces:
//!
//! ```toml
//! [DEFAULT]
//! timezone = "UTC"
//!
//! [web1]
//! userdata = "templates/web.yaml.jinja"
//! verbatim_files_dirs = "files/common:files/web"
//!
//! [web1-userdata-vars]
//! timezone = "Europe/London"
//! ```
//!
//! Table order is preserved, so sections are processed in declaration order.

use std::collections::BTreeMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::overlay::{OVERLAY_SUFFIX, OverlaySet, VariableOverlay};
use crate::value::{Scalar, Value, ValueError};

/// Name of the table holding global defaults.
pub const DEFAULT_SECTION: &str = "DEFAULT";
/// Template used when neither the section nor the defaults name one.
pub const DEFAULT_USERDATA_TEMPLATE: &str = "userdata-default.yaml.jinja";

const USERDATA_KEY: &str = "userdata";
const VERBATIM_DIRS_KEY: &str = "verbatim_files_dirs";
const TEMPLATE_DIRS_KEY: &str = "template_files_dirs";

/// Fatal errors raised while loading the instances file.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum InstancesError {
    /// The file could not be read.
    #[error("failed to read instances file {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// The file is not valid TOML.
    #[error("failed to parse instances file {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// A section has an unexpected shape.
    #[error("invalid section [{section}] in {path}: {message}")]
    InvalidSection {
        /// File containing the section.
        path: Utf8PathBuf,
        /// Offending section name.
        section: String,
        /// Description of the problem.
        message: String,
    },
    /// A value nests too deeply.
    #[error("invalid section [{section}] in {path}: {source}")]
    Value {
        /// File containing the section.
        path: Utf8PathBuf,
        /// Offending section name.
        section: String,
        /// Depth violation.
        #[source]
        source: ValueError,
    },
    /// A requested section is not declared.
    #[error("section [{0}] is not declared in the instances file")]
    UnknownSection(String),
}

/// One server to generate userdata for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerSection {
    /// Section (and server) name.
    pub name: String,
    /// Top-level userdata template, relative to the template root.
    pub userdata: Utf8PathBuf,
    /// Directories embedded byte for byte.
    pub verbatim_files_dirs: Vec<Utf8PathBuf>,
    /// Directories whose files are rendered before embedding.
    pub template_files_dirs: Vec<Utf8PathBuf>,
}

impl ServerSection {
    /// Creates a section with no file directories.
    #[must_use]
    pub fn new(name: impl Into<String>, userdata: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            userdata: userdata.into(),
            verbatim_files_dirs: Vec::new(),
            template_files_dirs: Vec::new(),
        }
    }

    /// Sets the verbatim directories from a colon-separated list.
    #[must_use]
    pub fn with_verbatim_dirs(mut self, list: &str) -> Self {
        self.verbatim_files_dirs = split_dir_list(list);
        self
    }

    /// Sets the template directories from a colon-separated list.
    #[must_use]
    pub fn with_template_dirs(mut self, list: &str) -> Self {
        self.template_files_dirs = split_dir_list(list);
        self
    }
}

/// Sections and variables declared by an instances file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Instances {
    /// Server sections in declaration order.
    pub sections: Vec<ServerSection>,
    /// Defaults and per-section overlays.
    pub overlays: OverlaySet,
}

impl Instances {
    /// Reads and parses the instances file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`InstancesError`] when the file is missing, unreadable or
    /// malformed.
    pub fn load(path: &Utf8Path) -> Result<Self, InstancesError> {
        let contents = read_file(path).map_err(|err| InstancesError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::parse(path, &contents)
    }

    /// Parses instances TOML; `path` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`InstancesError`] when the content is malformed.
    pub fn parse(path: &Utf8Path, contents: &str) -> Result<Self, InstancesError> {
        let table: toml::Table = toml::from_str(contents).map_err(|err| InstancesError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        let invalid = |section: &str, message: String| InstancesError::InvalidSection {
            path: path.to_path_buf(),
            section: section.to_owned(),
            message,
        };
        let overlay_from = |section: &str, entries: &toml::Table| {
            VariableOverlay::new(convert_table(entries)).map_err(|source| InstancesError::Value {
                path: path.to_path_buf(),
                section: section.to_owned(),
                source,
            })
        };

        let defaults_table = match table.get(DEFAULT_SECTION) {
            Some(toml::Value::Table(entries)) => entries.clone(),
            Some(_) => return Err(invalid(DEFAULT_SECTION, String::from("must be a table"))),
            None => toml::Table::new(),
        };
        let inherited = |key: &str| {
            optional_string(&defaults_table, key).map_err(|message| invalid(DEFAULT_SECTION, message))
        };
        let default_userdata = inherited(USERDATA_KEY)?.unwrap_or(DEFAULT_USERDATA_TEMPLATE);
        let default_verbatim_dirs = inherited(VERBATIM_DIRS_KEY)?.unwrap_or_default();
        let default_template_dirs = inherited(TEMPLATE_DIRS_KEY)?.unwrap_or_default();
        let mut overlays = OverlaySet::new(overlay_from(DEFAULT_SECTION, &defaults_table)?);
        let mut sections = Vec::new();

        for (name, raw) in &table {
            if name == DEFAULT_SECTION {
                continue;
            }
            let toml::Value::Table(entries) = raw else {
                return Err(invalid(name.as_str(), String::from("must be a table")));
            };

            if let Some(server) = name.strip_suffix(OVERLAY_SUFFIX) {
                overlays.insert(server, overlay_from(name.as_str(), entries)?);
                continue;
            }

            let text = |key: &str| {
                optional_string(entries, key).map_err(|message| invalid(name.as_str(), message))
            };
            let section = ServerSection::new(
                name.as_str(),
                text(USERDATA_KEY)?.unwrap_or(default_userdata),
            )
            .with_verbatim_dirs(text(VERBATIM_DIRS_KEY)?.unwrap_or(default_verbatim_dirs))
            .with_template_dirs(text(TEMPLATE_DIRS_KEY)?.unwrap_or(default_template_dirs));
            sections.push(section);
        }

        Ok(Self { sections, overlays })
    }

    /// Keeps only the named sections, preserving declaration order.
    ///
    /// An empty filter keeps everything.
    ///
    /// # Errors
    ///
    /// Returns [`InstancesError::UnknownSection`] for names that are not
    /// declared.
    pub fn retain_sections(&mut self, names: &[String]) -> Result<(), InstancesError> {
        if names.is_empty() {
            return Ok(());
        }
        if let Some(unknown) = names
            .iter()
            .find(|name| !self.sections.iter().any(|section| &section.name == *name))
        {
            return Err(InstancesError::UnknownSection(unknown.clone()));
        }
        self.sections.retain(|section| names.contains(&section.name));
        Ok(())
    }
}

/// Splits a colon-separated directory list, ignoring empty entries.
#[must_use]
pub fn split_dir_list(list: &str) -> Vec<Utf8PathBuf> {
    list.split(':')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(Utf8PathBuf::from)
        .collect()
}

fn optional_string<'t>(entries: &'t toml::Table, key: &str) -> Result<Option<&'t str>, String> {
    match entries.get(key) {
        None => Ok(None),
        Some(toml::Value::String(text)) => Ok(Some(text.as_str())),
        Some(_) => Err(format!("`{key}` must be a string")),
    }
}

fn convert_table(entries: &toml::Table) -> BTreeMap<String, Value> {
    entries
        .iter()
        .map(|(key, value)| (key.clone(), convert_value(value)))
        .collect()
}

fn convert_value(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(text) => Value::string(text.as_str()),
        toml::Value::Integer(number) => Value::Scalar(Scalar::Integer(*number)),
        toml::Value::Float(number) => Value::Scalar(Scalar::Float(*number)),
        toml::Value::Boolean(flag) => Value::Scalar(Scalar::Boolean(*flag)),
        toml::Value::Datetime(stamp) => Value::string(stamp.to_string()),
        toml::Value::Array(items) => Value::Sequence(items.iter().map(convert_value).collect()),
        toml::Value::Table(nested) => Value::Mapping(convert_table(nested)),
    }
}

fn read_file(path: &Utf8Path) -> io::Result<String> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no file name")
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.read_to_string(file_name)
}
