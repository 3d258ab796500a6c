//! Embedding of local files into a section's variable mapping.
//!
//! Each declared directory is walked recursively. Every file is read (or
//! rendered, for template directories), checked against the per-file size
//! ceiling, encoded in its smallest form, and recorded as an
//! [`EmbeddedFile`] under a key synthesised from its target path. Templates
//! see the records as `files_to_write` (ordered keys) and `write_files`
//! (key to record).

use std::collections::BTreeMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Serialize;
use thiserror::Error;

use crate::overlay::VariableMapping;
use crate::render::{RenderError, TemplateRenderer};
use crate::target_path::TargetPath;

mod encoding;
mod walk;

pub use encoding::{DecodeError, EncodedContent, Encoding};

/// Largest file, in bytes before encoding, that may be embedded.
pub const MAX_FILE_BYTES: usize = 10_240;

/// Errors that abort embedding for the current section.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum EmbedError {
    /// A file exceeds [`MAX_FILE_BYTES`].
    #[error("`{path}` is {size} bytes; files larger than {limit} bytes cannot be embedded")]
    OversizedFile {
        /// Local path of the offending file.
        path: Utf8PathBuf,
        /// Size that was observed.
        size: u64,
        /// Configured ceiling.
        limit: usize,
    },
    /// Two files synthesise the same embedding key.
    #[error("`{second}` and `{first}` both map to embedding key `{key}`")]
    KeyCollision {
        /// Colliding key.
        key: String,
        /// Target path embedded first.
        first: TargetPath,
        /// Target path that collided.
        second: TargetPath,
    },
    /// A directory or file could not be read.
    #[error("failed to read `{path}`: {message}")]
    FileAccess {
        /// Path that failed.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// A template file failed to render.
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// How files in a directory list are turned into content.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EmbedMode {
    /// Files are embedded byte for byte.
    Verbatim,
    /// Files are rendered as templates against the current mapping first.
    Template,
}

/// One file destined for cloud-init's `write_files`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EmbeddedFile {
    /// Key synthesised from the target path.
    pub key: String,
    /// Relative, forward-slash destination path.
    pub path: TargetPath,
    /// Encoded file content.
    pub content: EncodedContent,
    /// Permissions from `<key>-permissions`, if set.
    pub permissions: Option<String>,
    /// Owner from `<key>-owner`, if set.
    pub owner: Option<String>,
    /// Whether cloud-init appends instead of overwriting (`<key>-append`).
    pub append: bool,
}

/// Embedded files in the order they were discovered.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EmbeddedFiles {
    files: Vec<EmbeddedFile>,
    positions: BTreeMap<String, usize>,
}

impl EmbeddedFiles {
    /// Appends `file`, refusing keys that are already taken.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::KeyCollision`] when the key is already present.
    pub fn push(&mut self, file: EmbeddedFile) -> Result<(), EmbedError> {
        if let Some(existing) = self.get(&file.key) {
            return Err(EmbedError::KeyCollision {
                key: file.key.clone(),
                first: existing.path.clone(),
                second: file.path,
            });
        }
        self.positions.insert(file.key.clone(), self.files.len());
        self.files.push(file);
        Ok(())
    }

    /// Returns the record stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&EmbeddedFile> {
        self.positions
            .get(key)
            .and_then(|position| self.files.get(*position))
    }

    /// Iterates records in embedding order.
    pub fn iter(&self) -> impl Iterator<Item = &EmbeddedFile> {
        self.files.iter()
    }

    /// Keys in embedding order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|file| file.key.as_str())
    }

    /// Number of embedded files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` when nothing has been embedded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Optional per-file settings read from the section's variables.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct FileMetadata {
    permissions: Option<String>,
    owner: Option<String>,
    append: bool,
}

impl FileMetadata {
    fn lookup(mapping: &VariableMapping, key: &str) -> Self {
        let text = |suffix: &str| {
            mapping
                .get(&format!("{key}-{suffix}"))
                .and_then(crate::value::Value::as_text)
                .filter(|value| !value.is_empty())
        };
        Self {
            permissions: text("permissions"),
            owner: text("owner"),
            append: mapping
                .get(&format!("{key}-append"))
                .is_some_and(crate::value::Value::is_truthy),
        }
    }
}

/// Walks directories and embeds their files into a [`VariableMapping`].
#[derive(Clone, Copy, Debug)]
pub struct FileEmbedder<'a> {
    renderer: &'a TemplateRenderer,
}

impl<'a> FileEmbedder<'a> {
    /// Creates an embedder resolving directories (and templates) against the
    /// renderer's search root.
    #[must_use]
    pub const fn new(renderer: &'a TemplateRenderer) -> Self {
        Self { renderer }
    }

    /// Embeds every file beneath each of `dirs`, in order.
    ///
    /// Records accumulate in `mapping`; earlier records stay visible to
    /// templates rendered later in the same pass. Returns the number of files
    /// embedded by this call.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError`] on the first file that cannot be embedded.
    /// Files embedded before the failure remain in `mapping`.
    pub fn embed_directories(
        &self,
        dirs: &[Utf8PathBuf],
        mode: EmbedMode,
        mapping: &mut VariableMapping,
    ) -> Result<usize, EmbedError> {
        let before = mapping.files().len();
        for dir in dirs {
            self.embed_directory(dir, mode, mapping)?;
        }
        Ok(mapping.files().len() - before)
    }

    fn embed_directory(
        &self,
        dir: &Utf8Path,
        mode: EmbedMode,
        mapping: &mut VariableMapping,
    ) -> Result<(), EmbedError> {
        let local_root = self.renderer.root().join(dir);
        let access = |message: String| EmbedError::FileAccess {
            path: local_root.clone(),
            message,
        };
        let handle = match Dir::open_ambient_dir(&local_root, ambient_authority()) {
            Ok(handle) => handle,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(dir = %local_root, "declared directory does not exist");
                return Ok(());
            }
            Err(err) => return Err(access(err.to_string())),
        };
        let relatives = walk::list_files(&handle).map_err(|err| access(err.to_string()))?;

        for relative in relatives {
            let walked = dir.join(&relative);
            let content = self.read_content(&handle, &relative, &walked, mode, mapping)?;
            let target = TargetPath::from_walked(dir, &walked);
            let key = target.embedding_key();
            let metadata = FileMetadata::lookup(mapping, &key);
            let encoded =
                EncodedContent::encode(&content).map_err(|err| EmbedError::FileAccess {
                    path: walked.clone(),
                    message: err.to_string(),
                })?;

            tracing::debug!(
                file = %walked,
                target = %target,
                key = %key,
                encoding = %encoded.encoding,
                bytes = content.len(),
                "embedded file"
            );

            mapping.files_mut().push(EmbeddedFile {
                key,
                path: target,
                content: encoded,
                permissions: metadata.permissions,
                owner: metadata.owner,
                append: metadata.append,
            })?;
        }
        Ok(())
    }

    fn read_content(
        &self,
        handle: &Dir,
        relative: &Utf8Path,
        walked: &Utf8Path,
        mode: EmbedMode,
        mapping: &VariableMapping,
    ) -> Result<Vec<u8>, EmbedError> {
        let content = match mode {
            EmbedMode::Verbatim => {
                let size = handle
                    .metadata(relative)
                    .map_err(|err| EmbedError::FileAccess {
                        path: walked.to_path_buf(),
                        message: err.to_string(),
                    })?
                    .len();
                ensure_within_limit(walked, size)?;
                handle
                    .read(relative)
                    .map_err(|err| EmbedError::FileAccess {
                        path: walked.to_path_buf(),
                        message: err.to_string(),
                    })?
            }
            EmbedMode::Template => self.renderer.render(walked, mapping, None)?.into_bytes(),
        };
        ensure_within_limit(walked, u64::try_from(content.len()).unwrap_or(u64::MAX))?;
        Ok(content)
    }
}

fn ensure_within_limit(path: &Utf8Path, size: u64) -> Result<(), EmbedError> {
    if size > MAX_FILE_BYTES as u64 {
        return Err(EmbedError::OversizedFile {
            path: path.to_path_buf(),
            size,
            limit: MAX_FILE_BYTES,
        });
    }
    Ok(())
}
