//! `ravel dump`: print a unit.

use crate::files::read_unit;
use ravel_bytecode::disassemble;
use std::path::Path;

pub fn execute(path: &Path, as_json: bool) -> anyhow::Result<String> {
    let (unit, _) = read_unit(path)?;
    if as_json {
        return Ok(unit.to_json()?);
    }
    Ok(disassemble(&unit))
}
