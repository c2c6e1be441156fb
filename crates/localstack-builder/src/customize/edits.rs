//! Guarded text edits against the source tree
//!
//! Every edit checks its own guard before writing, so applying an edit to
//! an already-edited file leaves it byte-for-byte unchanged.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// What an edit does to its target file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditKind {
    /// Replace every occurrence of `from`; no-op once `from` is gone
    Replace { from: String, to: String },

    /// Drop lines containing the pattern
    DeleteLinesContaining(String),

    /// Drop lines starting with the prefix
    DeleteLinesStartingWith(String),

    /// Append a line unless an identical line exists
    AppendLine(String),

    /// Insert `line` after the first line containing `anchor`, unless
    /// `guard` already occurs in the file
    InsertAfter {
        anchor: String,
        line: String,
        guard: String,
    },

    /// Write the whole file; no-op when contents already match
    WriteFile(String),
}

/// A text edit on one file, path relative to the tree root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub path: PathBuf,
    pub kind: EditKind,
    /// Fail when the target file does not exist
    pub required: bool,
}

/// Outcome of applying an edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Changed,
    Unchanged,
    /// Optional target missing
    Skipped,
}

impl TextEdit {
    pub fn replace(path: impl Into<PathBuf>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EditKind::Replace {
                from: from.into(),
                to: to.into(),
            },
            required: false,
        }
    }

    pub fn append_line(path: impl Into<PathBuf>, line: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EditKind::AppendLine(line.into()),
            required: true,
        }
    }

    pub fn delete_lines(path: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EditKind::DeleteLinesContaining(pattern.into()),
            required: false,
        }
    }

    pub fn delete_lines_starting(path: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EditKind::DeleteLinesStartingWith(prefix.into()),
            required: false,
        }
    }

    pub fn insert_after(
        path: impl Into<PathBuf>,
        anchor: impl Into<String>,
        line: impl Into<String>,
        guard: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            kind: EditKind::InsertAfter {
                anchor: anchor.into(),
                line: line.into(),
                guard: guard.into(),
            },
            required: false,
        }
    }

    pub fn write_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EditKind::WriteFile(contents.into()),
            required: true,
        }
    }

    /// Apply under `root`
    pub fn apply(&self, root: &Path) -> io::Result<EditOutcome> {
        let path = root.join(&self.path);

        if let EditKind::WriteFile(contents) = &self.kind {
            if fs::read_to_string(&path).ok().as_deref() == Some(contents.as_str()) {
                return Ok(EditOutcome::Unchanged);
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)?;
            return Ok(EditOutcome::Changed);
        }

        let original = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !self.required => {
                return Ok(EditOutcome::Skipped)
            }
            Err(e) => return Err(e),
        };

        let updated = match &self.kind {
            EditKind::Replace { from, to } => {
                if from.is_empty() || !original.contains(from.as_str()) {
                    None
                } else {
                    Some(original.replace(from.as_str(), to))
                }
            }
            EditKind::DeleteLinesContaining(pattern) => {
                delete_lines(&original, |l| l.contains(pattern.as_str()))
            }
            EditKind::DeleteLinesStartingWith(prefix) => {
                delete_lines(&original, |l| l.starts_with(prefix.as_str()))
            }
            EditKind::AppendLine(line) => {
                if original.lines().any(|l| l == line) {
                    None
                } else {
                    let mut out = original.clone();
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                    out.push_str(line);
                    out.push('\n');
                    Some(out)
                }
            }
            EditKind::InsertAfter {
                anchor,
                line,
                guard,
            } => {
                if original.contains(guard.as_str()) {
                    None
                } else {
                    insert_after(&original, anchor, line)
                }
            }
            EditKind::WriteFile(_) => None,
        };

        match updated {
            Some(text) if text != original => {
                fs::write(&path, text)?;
                Ok(EditOutcome::Changed)
            }
            _ => Ok(EditOutcome::Unchanged),
        }
    }
}

fn delete_lines(text: &str, reject: impl Fn(&str) -> bool) -> Option<String> {
    if !text.lines().any(&reject) {
        return None;
    }
    let mut kept = text
        .lines()
        .filter(|l| !reject(*l))
        .collect::<Vec<_>>()
        .join("\n");
    if text.ends_with('\n') && !kept.is_empty() {
        kept.push('\n');
    }
    Some(kept)
}

fn insert_after(text: &str, anchor: &str, line: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len() + line.len() + 1);
    let mut inserted = false;
    for l in text.split_inclusive('\n') {
        out.push_str(l);
        if !inserted && l.contains(anchor) {
            if !l.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(line);
            out.push('\n');
            inserted = true;
        }
    }
    inserted.then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn read(root: &Path, rel: &str) -> String {
        fs::read_to_string(root.join(rel)).unwrap()
    }

    #[test]
    fn test_replace_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.java", "QSB_ON_FIRST_SCREEN = true;\n");
        let edit = TextEdit::replace(
            "a.java",
            "QSB_ON_FIRST_SCREEN = true;",
            "QSB_ON_FIRST_SCREEN = false;",
        );

        assert_eq!(edit.apply(tmp.path()).unwrap(), EditOutcome::Changed);
        assert_eq!(edit.apply(tmp.path()).unwrap(), EditOutcome::Unchanged);
        assert_eq!(read(tmp.path(), "a.java"), "QSB_ON_FIRST_SCREEN = false;\n");
    }

    #[test]
    fn test_delete_lines() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "p.mk",
            "PRODUCT_PACKAGES += \\\n    Browser2 \\\n    Calendar \\\n    Camera2 \\\n",
        );
        TextEdit::delete_lines("p.mk", "Browser2").apply(tmp.path()).unwrap();
        TextEdit::delete_lines("p.mk", "Calendar \\").apply(tmp.path()).unwrap();
        assert_eq!(read(tmp.path(), "p.mk"), "PRODUCT_PACKAGES += \\\n    Camera2 \\\n");
    }

    #[test]
    fn test_delete_lines_starting_with() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "g.sh", "tar cvf a.tar b\nmv a.tar c.tar\necho done # mv \n");
        let edit = TextEdit::delete_lines_starting("g.sh", "mv ");
        assert_eq!(edit.apply(tmp.path()).unwrap(), EditOutcome::Changed);
        assert_eq!(edit.apply(tmp.path()).unwrap(), EditOutcome::Unchanged);
        assert_eq!(read(tmp.path(), "g.sh"), "tar cvf a.tar b\necho done # mv \n");
    }

    #[test]
    fn test_append_line_once() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "h.mk", "# handheld");
        let edit = TextEdit::append_line("h.mk", "PRODUCT_PACKAGES += Updater");
        edit.apply(tmp.path()).unwrap();
        edit.apply(tmp.path()).unwrap();
        assert_eq!(read(tmp.path(), "h.mk"), "# handheld\nPRODUCT_PACKAGES += Updater\n");
    }

    #[test]
    fn test_insert_after_guarded() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "AndroidManifest.xml",
            "<manifest>\n<uses-permission android:name=\"android.permission.READ_EXTERNAL_STORAGE\" />\n</manifest>\n",
        );
        let edit = TextEdit::insert_after(
            "AndroidManifest.xml",
            "android.permission.READ_EXTERNAL_STORAGE",
            "<uses-permission android:name=\"android.permission.FOREGROUND_SERVICE\" />",
            "android.permission.FOREGROUND_SERVICE",
        );
        assert_eq!(edit.apply(tmp.path()).unwrap(), EditOutcome::Changed);
        assert_eq!(edit.apply(tmp.path()).unwrap(), EditOutcome::Unchanged);
        assert_eq!(
            read(tmp.path(), "AndroidManifest.xml")
                .matches("FOREGROUND_SERVICE")
                .count(),
            1
        );
    }

    #[test]
    fn test_missing_optional_target_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let edit = TextEdit::replace("device/google/bonito/aosp_sargo.mk", "a", "b");
        assert_eq!(edit.apply(tmp.path()).unwrap(), EditOutcome::Skipped);
    }

    #[test]
    fn test_missing_required_target_fails() {
        let tmp = TempDir::new().unwrap();
        let edit = TextEdit::append_line("build/make/target/product/handheld_system.mk", "X");
        assert!(edit.apply(tmp.path()).is_err());
    }

    #[test]
    fn test_write_file_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let edit = TextEdit::write_file(".repo/local_manifests/localstack.xml", "<manifest/>\n");
        assert_eq!(edit.apply(tmp.path()).unwrap(), EditOutcome::Changed);
        assert_eq!(edit.apply(tmp.path()).unwrap(), EditOutcome::Unchanged);
    }
}
