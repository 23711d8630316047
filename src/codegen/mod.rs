//! The x86-32 back end: maximal-munch instruction selection
//! over the IR, register allocation (trivial stack slots by default,
//! linear scan when optimisation is on), and textual NASM emission.

pub mod emit;
pub mod regalloc;
pub mod tile;

use crate::{diagnostics::InternalError, ir::ProgramIr};

/// One emitted assembly file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmFile {
    /// The file name, e.g. `A.s` or `start.s`.
    pub name: String,
    /// The NASM source text.
    pub text: String,
}

/// Which register allocator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocatorKind {
    /// Every temporary lives in a stack slot; operands reload on each use.
    #[default]
    Trivial,
    /// Linear scan over live intervals; intervals crossing calls spill.
    LinearScan,
}

/// Generates one `.s` file per compilation unit plus `start.s`.
///
/// # Errors
///
/// Internal errors only.
pub fn generate(
    program: &ProgramIr,
    allocator: AllocatorKind,
) -> Result<Vec<AsmFile>, InternalError> {
    let mut files = Vec::with_capacity(program.units.len() + 1);
    for unit in &program.units {
        let mut functions = Vec::with_capacity(unit.functions.len());
        for function in &unit.functions {
            functions.push(tile::tile(function)?);
        }
        let text = emit::unit_text(&functions, &unit.data, allocator)?;
        files.push(AsmFile {
            name: format!("{}.s", unit.stem),
            text,
        });
    }
    let start = tile::tile(&program.start)?;
    let text = emit::start_text(&start, &program.start_data, allocator)?;
    files.push(AsmFile {
        name: "start.s".to_string(),
        text,
    });
    Ok(files)
}
