//! Canonical destination paths for embedded files.
//!
//! Files discovered while walking a local directory are written to the
//! instance relative to cloud-init's working directory. The path recorded in
//! the userdata must therefore never be absolute: root prefixes, drive
//! designators and parent-directory hops are removed here so the destination
//! cannot escape into arbitrary locations.

use std::fmt;

use camino::Utf8Path;
use serde::Serialize;

/// Forward-slash, relative destination path for an embedded file.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(transparent)]
pub struct TargetPath(String);

impl TargetPath {
    /// Builds the target path for `walked`, a file discovered beneath `root`.
    ///
    /// The root prefix is stripped first; paths that do not live under the
    /// root are normalised as-is.
    #[must_use]
    pub fn from_walked(root: &Utf8Path, walked: &Utf8Path) -> Self {
        let relative = walked.strip_prefix(root).unwrap_or(walked);
        Self::normalize(relative.as_str())
    }

    /// Canonicalises a raw path string.
    ///
    /// Both `/` and `\` act as separators so the result does not depend on
    /// the host platform. Normalising an already-normal path is a no-op.
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        let mut parts: Vec<&str> = Vec::new();
        for component in raw.split(['/', '\\']) {
            let mut part = component;
            // Only the leading component can carry a drive designator; strip
            // it before `.`/`..` handling so `C:..` cannot survive as `..`.
            if parts.is_empty() {
                while let Some(rest) = strip_drive(part) {
                    part = rest;
                }
            }
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }

        Self(parts.join("/"))
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` when no path components remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Synthesises the key under which the file is published to templates.
    ///
    /// Separators and dots become hyphens and a single leading hyphen is
    /// dropped, so `etc/motd.txt` becomes `etc-motd-txt` and `.bashrc`
    /// becomes `bashrc`.
    #[must_use]
    pub fn embedding_key(&self) -> String {
        let replaced = self.0.replace(['/', '.'], "-");
        replaced
            .strip_prefix('-')
            .map_or_else(|| replaced.clone(), str::to_owned)
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the remainder of `component` after a `C:` style drive prefix.
fn strip_drive(component: &str) -> Option<&str> {
    let mut chars = component.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => Some(chars.as_str()),
        _ => None,
    }
}
