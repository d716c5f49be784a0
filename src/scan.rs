//! Classpath validation and classfile enumeration. Directory roots are
//! walked as-is: hidden entries and ignore files are not filtered.

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

use crate::error::PathValidationError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClasspathRoot {
    Archive(PathBuf),
    Directory(PathBuf),
}

impl ClasspathRoot {
    pub fn path(&self) -> &Path {
        match self {
            ClasspathRoot::Archive(p) | ClasspathRoot::Directory(p) => p,
        }
    }
}

/// Checks every path up front. A single bad entry rejects the whole set.
pub fn validate_classpath<P: AsRef<Path>>(
    paths: &[P],
) -> Result<Vec<ClasspathRoot>, PathValidationError> {
    let mut roots = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PathValidationError::NotFound(path.to_path_buf()));
        }
        if path.is_dir() {
            roots.push(ClasspathRoot::Directory(path.to_path_buf()));
        } else if path.is_file() && is_jar(path) {
            roots.push(ClasspathRoot::Archive(path.to_path_buf()));
        } else {
            return Err(PathValidationError::Unsupported(path.to_path_buf()));
        }
    }
    Ok(roots)
}

fn is_jar(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("jar"))
}

/// Lazily walks `dir` for classfiles. Nothing is filtered by ignore files or
/// hidden-ness; a classpath directory is taken as-is.
pub fn class_files(dir: &Path) -> impl Iterator<Item = Result<PathBuf, ignore::Error>> {
    WalkBuilder::new(dir)
        .hidden(false)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => {
                let path = entry.path();
                let is_file = entry.file_type().is_some_and(|t| t.is_file());
                (is_file && is_class_entry(&path.to_string_lossy()))
                    .then(|| Ok(path.to_path_buf()))
            }
            Err(e) => Some(Err(e)),
        })
}

/// True for classfile entry names worth decoding. `package-info` and
/// `module-info` carry no structural relationships.
pub fn is_class_entry(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".class") else {
        return false;
    };
    !(stem.ends_with("package-info") || stem.ends_with("module-info"))
}

pub fn class_name_to_class_path(class_name: &str) -> String {
    format!("{}.class", class_name.replace('.', "/"))
}
