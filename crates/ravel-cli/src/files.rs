//! Reading and writing unit files
//!
//! A unit is stored either in the binary container (`.rvc`) or as JSON
//! (`.json`). Output files keep the format of their input.

use anyhow::{bail, Context};
use ravel_bytecode::ClassUnit;
use std::path::{Path, PathBuf};

/// On-disk representation of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitFormat {
    /// Binary container
    Binary,
    /// Pretty-printed JSON
    Json,
}

impl UnitFormat {
    /// Format implied by a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("rvc") => Some(UnitFormat::Binary),
            Some("json") => Some(UnitFormat::Json),
            _ => None,
        }
    }

    /// File extension without the dot
    pub fn extension(self) -> &'static str {
        match self {
            UnitFormat::Binary => "rvc",
            UnitFormat::Json => "json",
        }
    }
}

/// Collect unit files from the given files and directories
///
/// Directories are searched recursively, skipping hidden entries. Files
/// named explicitly must have a unit extension.
pub fn collect_units(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            collect_in_dir(path, &mut files)?;
        } else if path.is_file() {
            if UnitFormat::from_path(path).is_none() {
                bail!("Not a unit file (expected .rvc or .json): {}", path.display());
            }
            files.push(path.clone());
        } else {
            bail!("File not found: {}", path.display());
        }
    }
    files.sort();
    Ok(files)
}

fn collect_in_dir(dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            collect_in_dir(&path, files)?;
        } else if UnitFormat::from_path(&path).is_some() {
            files.push(path);
        }
    }
    Ok(())
}

/// Read one unit, choosing the decoder by extension
pub fn read_unit(path: &Path) -> anyhow::Result<(ClassUnit, UnitFormat)> {
    let format = UnitFormat::from_path(path)
        .with_context(|| format!("Unknown unit format: {}", path.display()))?;
    let unit = match format {
        UnitFormat::Binary => {
            let bytes =
                std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            ClassUnit::decode(&bytes)
                .with_context(|| format!("Failed to decode {}", path.display()))?
        }
        UnitFormat::Json => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            ClassUnit::from_json(&text)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        }
    };
    Ok((unit, format))
}

/// Path of `class` below `root`: `app/Worker` becomes `root/app/Worker.rvc`
pub fn unit_path(root: &Path, class: &str, format: UnitFormat) -> PathBuf {
    let mut path = root.to_path_buf();
    path.extend(class.split('/'));
    path.set_extension(format.extension());
    path
}

/// Write `unit` below `root`, creating package directories as needed
pub fn write_unit(root: &Path, unit: &ClassUnit, format: UnitFormat) -> anyhow::Result<PathBuf> {
    let path = unit_path(root, &unit.name, format);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    match format {
        UnitFormat::Binary => std::fs::write(&path, unit.encode()),
        UnitFormat::Json => std::fs::write(&path, unit.to_json()?),
    }
    .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(UnitFormat::from_path(Path::new("a/B.rvc")), Some(UnitFormat::Binary));
        assert_eq!(UnitFormat::from_path(Path::new("a/B.json")), Some(UnitFormat::Json));
        assert_eq!(UnitFormat::from_path(Path::new("a/B.class")), None);
    }

    #[test]
    fn test_unit_path_nests_packages() {
        let path = unit_path(Path::new("out"), "app/sub/Worker", UnitFormat::Json);
        assert_eq!(path, Path::new("out").join("app").join("sub").join("Worker.json"));
    }
}
