//! File layout of a CSV datasource directory.
//!
//! ```text
//! <dir>/people.csv             data: id column(s) + one column per variable
//! <dir>/people.variables.csv   optional variables sheet
//! <dir>/people.categories.csv  optional categories sheet
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use magma_core::{MagmaError, Result};
use tracing::debug;

const DATA_SUFFIX: &str = ".csv";
const VARIABLES_SUFFIX: &str = ".variables.csv";
const CATEGORIES_SUFFIX: &str = ".categories.csv";

/// The files of one table.
#[derive(Debug, Clone)]
pub(crate) struct TableFiles {
    pub data: PathBuf,
    pub variables: PathBuf,
    pub categories: PathBuf,
}

impl TableFiles {
    pub fn new(directory: &Path, table: &str) -> Self {
        Self {
            data: directory.join(format!("{table}{DATA_SUFFIX}")),
            variables: directory.join(format!("{table}{VARIABLES_SUFFIX}")),
            categories: directory.join(format!("{table}{CATEGORIES_SUFFIX}")),
        }
    }

    pub fn all(&self) -> [&Path; 3] {
        [
            self.data.as_path(),
            self.variables.as_path(),
            self.categories.as_path(),
        ]
    }

    pub fn data_name(&self) -> String {
        file_name(&self.data)
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Table names found in `directory`, sorted.
pub(crate) fn list_tables(directory: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(directory).map_err(|e| {
        MagmaError::runtime_with(
            format!("Cannot list CSV directory {}", directory.display()),
            e,
        )
    })?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(VARIABLES_SUFFIX) || name.ends_with(CATEGORIES_SUFFIX) {
            continue;
        }
        if let Some(table) = name.strip_suffix(DATA_SUFFIX) {
            if !table.is_empty() {
                names.push(table.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Replace `path` with `contents` through a temporary file in the same
/// directory.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(directory)?;
    temp.write_all(contents)?;
    temp.flush()?;
    temp.persist(path).map_err(|e| {
        MagmaError::runtime_with(format!("Cannot replace {}", path.display()), e.error)
    })?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Delete `path`; a missing file is not an error.
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Move `from` to `to` when `from` exists.
pub(crate) fn rename_if_exists(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
