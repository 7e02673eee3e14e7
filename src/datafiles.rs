//! Data file table.
//!
//! One `DataFileEntry` per input unit. The caller owns the table; the
//! extraction coordinator mutates `path`/`name` of archive entries in place
//! once unpacking succeeds - that is the only cross-boundary mutation, and it
//! is always performed by the coordinator itself, never by workers.

use std::fmt;
use std::path::{Path, PathBuf};

/// Declared type of one input unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Thermo .raw file
    ThermoRaw,
    /// Bruker .d folder, ready to use
    BrukerD,
    /// Zipped Bruker .d folder, needs extraction
    BrukerDZip,
    /// Plain directory
    Folder,
    /// Anything else
    OtherFile,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileType::ThermoRaw => "Thermo Raw",
            FileType::BrukerD => "Bruker D",
            FileType::BrukerDZip => "Bruker D Zip",
            FileType::Folder => "Folder",
            FileType::OtherFile => "File",
        };
        f.write_str(s)
    }
}

/// One row of the filetable.
#[derive(Debug, Clone)]
pub struct DataFileEntry {
    /// Display name (file name component of the original path)
    pub name: String,
    pub file_type: FileType,
    /// Filesystem location; repointed at the unpacked directory after a
    /// successful extraction
    pub path: PathBuf,
    /// Free-text metadata, default empty
    pub replicate: String,
    pub condition: String,
    pub fraction: String,
    /// Reference-channel flag
    pub reference: bool,
}

impl DataFileEntry {
    /// Build an entry from a path with the type auto-detected and empty
    /// metadata fields.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            name,
            file_type: detect_file_type(path),
            path: path.to_path_buf(),
            replicate: String::new(),
            condition: String::new(),
            fraction: String::new(),
            reference: false,
        }
    }
}

/// Classify a path the way the tool expects its inputs.
pub fn detect_file_type(path: &Path) -> FileType {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if path.is_dir() {
        if ext == "d" {
            FileType::BrukerD
        } else {
            FileType::Folder
        }
    } else if path.is_file() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if ext == "raw" {
            FileType::ThermoRaw
        } else if name.ends_with(".d.zip") {
            FileType::BrukerDZip
        } else {
            FileType::OtherFile
        }
    } else {
        FileType::OtherFile
    }
}

/// Build a filetable from raw paths: sorted by file name, duplicates (by
/// path) dropped.
pub fn collect_entries(paths: &[PathBuf]) -> Vec<DataFileEntry> {
    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort_by_key(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| p.to_string_lossy().into_owned())
    });

    let mut entries: Vec<DataFileEntry> = Vec::with_capacity(sorted.len());
    for path in sorted {
        if entries.iter().any(|e| &e.path == path) {
            continue;
        }
        entries.push(DataFileEntry::from_path(path));
    }
    entries
}

/// Homogeneity check: a batch must be all Thermo, or only Bruker folders
/// and/or Bruker zips. Anything mixed (or empty) is rejected.
pub fn validate_filetable(entries: &[DataFileEntry]) -> bool {
    let types: std::collections::HashSet<FileType> =
        entries.iter().map(|e| e.file_type).collect();

    match types.len() {
        1 => {
            types.contains(&FileType::ThermoRaw)
                || types.contains(&FileType::BrukerD)
                || types.contains(&FileType::BrukerDZip)
        }
        2 => types.contains(&FileType::BrukerD) && types.contains(&FileType::BrukerDZip),
        _ => false,
    }
}

/// Stem of a display name ("sample.d.zip" -> "sample.d").
pub fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}
