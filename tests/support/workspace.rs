//! Temporary template roots for integration tests.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tempfile::TempDir;

/// Temporary directory holding an instances file, templates and file trees.
pub struct Workspace {
    _temp: TempDir,
    root: Utf8PathBuf,
    dir: Dir,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-UTF-8 tempdir: {}", path.display()));
        let dir = Dir::open_ambient_dir(&root, ambient_authority())
            .unwrap_or_else(|err| panic!("open tempdir: {err}"));
        Self {
            _temp: temp,
            root,
            dir,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Writes `contents` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, contents: impl AsRef<[u8]>) -> &Self {
        let path = Utf8Path::new(relative);
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            self.dir
                .create_dir_all(parent)
                .unwrap_or_else(|err| panic!("create {parent}: {err}"));
        }
        self.dir
            .write(path, contents)
            .unwrap_or_else(|err| panic!("write {relative}: {err}"));
        self
    }
}
