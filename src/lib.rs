#![warn(
    clippy::pedantic,
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    rust_2021_compatibility
)]
#![allow(clippy::module_name_repetitions)]
#![deny(rustdoc::broken_intra_doc_links)]

//! A whole-program compiler for Joos 1W, the strict Java 1.3 subset, that
//! either rejects a program with a classified diagnostic or emits 32-bit
//! x86 assembly for linking against the fixed runtime (`__malloc`,
//! `__exception`, `__debexit`, and the native byte writer).
//!
//! The pipeline is a linear sequence of whole-program passes over a shared
//! program model: parsing, weeding, type indexing and linking, hierarchy
//! checking, name resolution, type checking, static analysis, IR lowering,
//! and code generation. See [`compiler::compile`] for the driver.

pub mod analysis;
pub mod ast;
pub mod codegen;
pub mod compiler;
pub mod diagnostics;
pub mod ir;
pub mod semantics;
pub mod syntax;
pub mod types;
