//! The front end: scanning and parsing of Joos 1W source text.
//!
//! The parser builds the typed AST of [`crate::ast`] directly; there is no
//! separate concrete-tree stage. Constructs that Java 1.3 contains but Joos
//! bans outright (`switch`, `try`, labeled statements, …) are recognized
//! here and reported with the weeder classification, since the grammar is
//! the natural place to catch them.

mod lexer;
mod parser;
mod token;

pub use lexer::Lexer;
pub use parser::Parser;
pub use token::{Keyword, Token, TokenKind};

use crate::{
    ast::{CompilationUnit, NodeIdGen},
    diagnostics::Diagnostic,
};

/// Scans and parses one source file.
///
/// # Errors
///
/// Returns the first lexical or syntactic diagnostic encountered; the caller
/// continues with the remaining files of the compilation.
pub fn parse_source(
    file: &str,
    text: &str,
    ids: &mut NodeIdGen,
) -> Result<CompilationUnit, Diagnostic> {
    let tokens = Lexer::new(file, text).scan()?;
    Parser::new(file, tokens, ids).parse_compilation_unit()
}
