//! Tree-sitter backed `FunctionCatalog` construction (§4.2, C3).
//!
//! Grounded on the teacher's `CodeGenerator` (`sentinel-agent-native::codegen`):
//! one `tree_sitter::Parser` per language, AST walked with a `TreeCursor`,
//! everything else about codegen itself left behind — this crate only ever
//! reads source to build function identities, it never writes code.

mod rust_lang;
mod solidity;
mod walker;

pub use walker::TreeSitterCatalogBuilder;

use audit_core::model::FunctionEntry;
use std::path::Path;

/// Source languages this catalog builder can parse. Extend here (and in
/// `walker::classify_path`) to add a language without touching callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceLanguage {
    Solidity,
    Rust,
}

fn extract_functions(
    lang: SourceLanguage,
    source: &str,
    relative_path: &Path,
) -> audit_core::error::Result<Vec<FunctionEntry>> {
    match lang {
        SourceLanguage::Solidity => solidity::extract(source, relative_path),
        SourceLanguage::Rust => rust_lang::extract(source, relative_path),
    }
}
