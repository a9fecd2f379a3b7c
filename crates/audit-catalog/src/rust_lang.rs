//! Rust function extraction via `tree-sitter-rust` (§4.2, C3).
//!
//! Used for audited projects that ship Rust (e.g. Solana/ink! contracts) —
//! the catalog is language-agnostic above this module, so adding a target
//! language is purely additive.

use audit_core::error::{AuditError, Result};
use audit_core::model::{FunctionEntry, Visibility};
use std::path::Path;
use tree_sitter::{Node, Parser};

pub fn extract(source: &str, relative_path: &Path) -> Result<Vec<FunctionEntry>> {
    let mut parser = Parser::new();
    parser
        .set_language(tree_sitter_rust::language())
        .map_err(|e| AuditError::Catalog(format!("loading rust grammar: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| AuditError::Catalog(format!("{}: tree-sitter failed to parse", relative_path.display())))?;

    let mut entries = Vec::new();
    walk(tree.root_node(), source.as_bytes(), "<free function>", relative_path, &mut entries);
    Ok(entries)
}

fn walk(node: Node, source: &[u8], container: &str, relative_path: &Path, out: &mut Vec<FunctionEntry>) {
    let kind = node.kind();

    if kind == "impl_item" {
        let container = node
            .child_by_field_name("type")
            .and_then(|n| n.utf8_text(source).ok())
            .unwrap_or(container)
            .to_string();
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for child in body.children(&mut cursor) {
                walk(child, source, &container, relative_path, out);
            }
        }
        return;
    }

    if kind == "function_item" {
        out.push(build_entry(node, source, container, relative_path));
        return;
    }

    if kind == "mod_item" {
        let mod_name = node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(source).ok())
            .unwrap_or(container);
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for child in body.children(&mut cursor) {
                walk(child, source, mod_name, relative_path, out);
            }
        }
        return;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, source, container, relative_path, out);
    }
}

fn build_entry(node: Node, source: &[u8], container: &str, relative_path: &Path) -> FunctionEntry {
    let name = node
        .child_by_field_name("name")
        .and_then(|n| n.utf8_text(source).ok())
        .unwrap_or("<anonymous>")
        .to_string();

    let visibility = node
        .child_by_field_name("visibility_modifier")
        .map(|_| Visibility::Public)
        .unwrap_or(Visibility::Private);

    FunctionEntry {
        container: container.to_string(),
        name,
        signature: None,
        file_path: relative_path.to_path_buf(),
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
        visibility,
        body_text: node.utf8_text(source).unwrap_or_default().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn extracts_free_and_impl_functions() {
        let source = r#"
            pub fn free_fn() {}

            struct Vault;

            impl Vault {
                pub fn withdraw(&self) {}
                fn internal_helper(&self) {}
            }
        "#;

        let entries = extract(source, &PathBuf::from("src/vault.rs")).unwrap();
        let free = entries.iter().find(|e| e.name == "free_fn").unwrap();
        assert_eq!(free.container, "<free function>");
        assert_eq!(free.visibility, Visibility::Public);

        let withdraw = entries.iter().find(|e| e.name == "withdraw").unwrap();
        assert_eq!(withdraw.container, "Vault");
        assert_eq!(withdraw.visibility, Visibility::Public);

        let helper = entries.iter().find(|e| e.name == "internal_helper").unwrap();
        assert_eq!(helper.visibility, Visibility::Private);
    }
}
