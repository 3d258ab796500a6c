//! Deterministic recursive file enumeration.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs_utf8::Dir;

/// Lists every regular file beneath `dir`, relative to it.
///
/// Each directory contributes its own files (sorted by name) before its
/// subdirectories are visited, also in name order. Symlinked files are
/// included when they resolve inside the directory; symlinked directories
/// are not followed.
pub(crate) fn list_files(dir: &Dir) -> io::Result<Vec<Utf8PathBuf>> {
    let mut found = Vec::new();
    visit(dir, Utf8Path::new(""), &mut found)?;
    Ok(found)
}

fn visit(dir: &Dir, prefix: &Utf8Path, found: &mut Vec<Utf8PathBuf>) -> io::Result<()> {
    let mut files = Vec::new();
    let mut subdirs = Vec::new();

    for entry_result in dir.entries()? {
        let entry = entry_result?;
        let name = entry.file_name()?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            subdirs.push(name);
        } else if file_type.is_file() || resolves_to_file(dir, &name) {
            files.push(name);
        } else {
            tracing::debug!(path = %prefix.join(&name), "skipping non-regular entry");
        }
    }

    files.sort();
    subdirs.sort();
    found.extend(files.iter().map(|name| prefix.join(name)));

    for name in subdirs {
        let child = dir.open_dir(&name)?;
        visit(&child, &prefix.join(&name), found)?;
    }
    Ok(())
}

fn resolves_to_file(dir: &Dir, name: &str) -> bool {
    dir.metadata(name).is_ok_and(|metadata| metadata.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cap_std::ambient_authority;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn lists_files_before_subdirectories_in_name_order() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = tmp.path();
        for dir in ["b", "a/nested"] {
            fs::create_dir_all(root.join(dir)).unwrap_or_else(|err| panic!("mkdir: {err}"));
        }
        for file in ["z.txt", "m.txt", "b/one", "a/two", "a/nested/three"] {
            fs::write(root.join(file), "x").unwrap_or_else(|err| panic!("write: {err}"));
        }

        let dir = Dir::open_ambient_dir(
            Utf8Path::from_path(root).unwrap_or_else(|| panic!("utf8 tempdir")),
            ambient_authority(),
        )
        .unwrap_or_else(|err| panic!("open: {err}"));
        let listed = list_files(&dir).unwrap_or_else(|err| panic!("list: {err}"));

        let expected: Vec<Utf8PathBuf> = ["m.txt", "z.txt", "a/two", "a/nested/three", "b/one"]
            .into_iter()
            .map(Utf8PathBuf::from)
            .collect();
        assert_eq!(listed, expected);
    }
}
