//! Per-section variable resolution.
//!
//! Every server section renders against its own variable mapping. When the
//! instances file declares a `<section>-userdata-vars` table that table is
//! used on its own; otherwise the global defaults apply. Either way the
//! section receives a structural copy, so embedding records added while
//! processing one section never show up in another.

use std::collections::BTreeMap;

use crate::embed::EmbeddedFiles;
use crate::value::{Value, ValueError, check_depth};

/// Suffix marking a table as the overlay for the section it prefixes.
pub const OVERLAY_SUFFIX: &str = "-userdata-vars";

/// Variable mapping declared in the instances file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VariableOverlay {
    entries: BTreeMap<String, Value>,
}

impl VariableOverlay {
    /// Wraps `entries` after checking their nesting depth.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::TooDeep`] when a value nests too deeply.
    pub fn new(entries: BTreeMap<String, Value>) -> Result<Self, ValueError> {
        check_depth(&entries)?;
        Ok(Self { entries })
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns all entries.
    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    /// Returns `true` when the overlay declares no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn structural_copy(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .map(|(key, value)| (key.clone(), value.structural_copy()))
            .collect()
    }
}

/// Defaults plus the named overlays declared alongside them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OverlaySet {
    defaults: VariableOverlay,
    overlays: BTreeMap<String, VariableOverlay>,
}

impl OverlaySet {
    /// Creates a set with the given defaults and no named overlays.
    #[must_use]
    pub fn new(defaults: VariableOverlay) -> Self {
        Self {
            defaults,
            overlays: BTreeMap::new(),
        }
    }

    /// Registers the overlay for `section`, replacing any earlier one.
    pub fn insert(&mut self, section: impl Into<String>, overlay: VariableOverlay) {
        self.overlays.insert(section.into(), overlay);
    }

    /// Global default variables.
    #[must_use]
    pub const fn defaults(&self) -> &VariableOverlay {
        &self.defaults
    }

    /// Overlay explicitly declared for `section`, if any.
    #[must_use]
    pub fn overlay_for(&self, section: &str) -> Option<&VariableOverlay> {
        self.overlays.get(section)
    }

    /// Resolves the effective mapping for `section`.
    #[must_use]
    pub fn resolve(&self, section: &str) -> VariableMapping {
        resolve_overlay(&self.defaults, self.overlay_for(section))
    }
}

/// Returns an independent mapping built from `overlay`, or from `defaults`
/// when no overlay exists. The two are never merged.
#[must_use]
pub fn resolve_overlay(
    defaults: &VariableOverlay,
    overlay: Option<&VariableOverlay>,
) -> VariableMapping {
    let source = overlay.unwrap_or(defaults);
    VariableMapping {
        variables: source.structural_copy(),
        files: EmbeddedFiles::default(),
    }
}

/// Mutable variables for one section's processing pass.
///
/// Holds the resolved overlay together with the files embedded so far.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VariableMapping {
    variables: BTreeMap<String, Value>,
    files: EmbeddedFiles,
}

impl VariableMapping {
    /// Returns the variable stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Sets `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.variables.insert(key.into(), value)
    }

    /// All plain variables.
    #[must_use]
    pub const fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    /// Files embedded so far, in embedding order.
    #[must_use]
    pub const fn files(&self) -> &EmbeddedFiles {
        &self.files
    }

    pub(crate) const fn files_mut(&mut self) -> &mut EmbeddedFiles {
        &mut self.files
    }
}
