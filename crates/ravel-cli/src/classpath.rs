//! Ancestor lookup over directories of unit files

use crate::files::{read_unit, unit_path, UnitFormat};
use ravel_bytecode::ClassUnit;
use ravel_instrument::ClassResolver;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Resolves classes from `root/<package>/<Name>.rvc` or `.json`, searching
/// the roots in order
#[derive(Debug, Clone, Default)]
pub struct ClasspathResolver {
    roots: Vec<PathBuf>,
}

impl ClasspathResolver {
    /// Resolver over `roots`
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

impl ClassResolver for ClasspathResolver {
    fn resolve(&self, name: &str) -> Option<ClassUnit> {
        for root in &self.roots {
            for format in [UnitFormat::Binary, UnitFormat::Json] {
                let path = unit_path(root, name, format);
                if !path.is_file() {
                    continue;
                }
                match read_unit(&path) {
                    Ok((unit, _)) if unit.name == name => {
                        debug!(class = name, path = %path.display(), "resolved from classpath");
                        return Some(unit);
                    }
                    Ok((unit, _)) => {
                        warn!(path = %path.display(), found = %unit.name, "unit name does not match its path");
                    }
                    Err(e) => warn!(path = %path.display(), "unreadable classpath entry: {:#}", e),
                }
            }
        }
        None
    }
}
