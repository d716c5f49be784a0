//! Classification of class names by where they come from.

use anyhow::Context;
use memmap2::Mmap;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::warn;
use zip::ZipArchive;

use crate::scan::{ClasspathRoot, class_name_to_class_path};

pub const ROOT_OBJECT: &str = "java.lang.Object";

const PLATFORM_PREFIXES: &[&str] = &["java.", "javax.", "jdk.", "sun.", "com.sun."];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassOrigin {
    RootObject,
    Platform,
    Application,
    Unknown,
}

impl ClassOrigin {
    /// RGB color the renderer uses for nodes of this origin.
    pub fn color(self) -> [f32; 3] {
        match self {
            ClassOrigin::RootObject => [1.0, 1.0, 1.0],
            ClassOrigin::Platform => [1.0, 0.0, 0.0],
            ClassOrigin::Application => [0.0, 1.0, 0.0],
            ClassOrigin::Unknown => [0.0, 0.0, 1.0],
        }
    }
}

/// Resolves a class name to its [`ClassOrigin`].
///
/// Directory roots are probed on the filesystem at lookup time. Archive
/// roots are cataloged once, when the resolver is built.
#[derive(Debug, Default)]
pub struct ClassOriginResolver {
    directories: Vec<PathBuf>,
    archived: HashSet<String>,
}

impl ClassOriginResolver {
    pub fn new(roots: &[ClasspathRoot]) -> Self {
        let mut directories = Vec::new();
        let mut archived = HashSet::new();

        for root in roots {
            match root {
                ClasspathRoot::Directory(dir) => directories.push(dir.clone()),
                ClasspathRoot::Archive(jar) => match catalog_class_paths(jar) {
                    Ok(paths) => archived.extend(paths),
                    Err(e) => {
                        warn!(root = %jar.display(), error = %format!("{e:#}"), "failed to catalog archive")
                    }
                },
            }
        }

        Self {
            directories,
            archived,
        }
    }

    pub fn resolve(&self, class_name: &str) -> ClassOrigin {
        if class_name == ROOT_OBJECT {
            return ClassOrigin::RootObject;
        }

        if PLATFORM_PREFIXES.iter().any(|p| class_name.starts_with(p)) {
            return ClassOrigin::Platform;
        }

        let class_path = class_name_to_class_path(class_name);
        if self.archived.contains(&class_path)
            || self
                .directories
                .iter()
                .any(|dir| dir.join(&class_path).is_file())
        {
            return ClassOrigin::Application;
        }

        ClassOrigin::Unknown
    }
}

fn catalog_class_paths(jar_path: &Path) -> anyhow::Result<Vec<String>> {
    let file = File::open(jar_path)
        .with_context(|| format!("cannot open jar: {}", jar_path.display()))?;
    // SAFETY: read-only mapping, dropped before `file` goes out of scope.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("cannot mmap jar: {}", jar_path.display()))?;
    let archive = ZipArchive::new(Cursor::new(&mmap[..]))
        .with_context(|| format!("cannot read zip structure: {}", jar_path.display()))?;

    Ok(archive
        .file_names()
        .filter(|name| name.ends_with(".class"))
        .map(str::to_string)
        .collect())
}
