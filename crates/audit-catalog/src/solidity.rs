//! Solidity function extraction via `tree-sitter-solidity` (§4.2, C3).
//!
//! Containers are `contract`/`interface`/`library` declarations; functions
//! are `function_definition`, `constructor_definition`, `modifier_definition`,
//! and `fallback_receive_definition` nodes nested inside one. Visibility
//! keywords (`public`/`external`/`internal`/`private`) are matched as direct
//! child tokens since the grammar does not expose them as a named field.

use audit_core::error::{AuditError, Result};
use audit_core::model::{FunctionEntry, Visibility};
use std::path::Path;
use tree_sitter::{Node, Parser};

const CONTAINER_KINDS: &[&str] = &["contract_declaration", "interface_declaration", "library_declaration"];
const FUNCTION_KINDS: &[&str] = &[
    "function_definition",
    "constructor_definition",
    "modifier_definition",
    "fallback_receive_definition",
];

pub fn extract(source: &str, relative_path: &Path) -> Result<Vec<FunctionEntry>> {
    let mut parser = Parser::new();
    parser
        .set_language(tree_sitter_solidity::language())
        .map_err(|e| AuditError::Catalog(format!("loading solidity grammar: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| AuditError::Catalog(format!("{}: tree-sitter failed to parse", relative_path.display())))?;

    let mut entries = Vec::new();
    walk(tree.root_node(), source.as_bytes(), None, relative_path, &mut entries);
    Ok(entries)
}

fn walk(node: Node, source: &[u8], container: Option<&str>, relative_path: &Path, out: &mut Vec<FunctionEntry>) {
    let kind = node.kind();

    if CONTAINER_KINDS.contains(&kind) {
        let name = node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(source).ok())
            .unwrap_or("<anonymous>")
            .to_string();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk(child, source, Some(&name), relative_path, out);
        }
        return;
    }

    if FUNCTION_KINDS.contains(&kind) {
        if let Some(container) = container {
            out.push(build_entry(node, source, container, kind, relative_path));
        }
        // Function bodies can't nest another function/contract declaration
        // in Solidity, so there's nothing further to recurse into here.
        return;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, source, container, relative_path, out);
    }
}

fn build_entry(node: Node, source: &[u8], container: &str, kind: &str, relative_path: &Path) -> FunctionEntry {
    let name = function_name(node, source, kind);
    let visibility = function_visibility(node, source);
    let body_text = node.utf8_text(source).unwrap_or_default().to_string();

    FunctionEntry {
        container: container.to_string(),
        name,
        signature: None,
        file_path: relative_path.to_path_buf(),
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
        visibility,
        body_text,
    }
}

fn function_name(node: Node, source: &[u8], kind: &str) -> String {
    match kind {
        "constructor_definition" => "constructor".to_string(),
        "fallback_receive_definition" => node
            .utf8_text(source)
            .ok()
            .and_then(|text| {
                if text.trim_start().starts_with("receive") {
                    Some("receive".to_string())
                } else if text.trim_start().starts_with("fallback") {
                    Some("fallback".to_string())
                } else {
                    None
                }
            })
            .unwrap_or_else(|| "fallback".to_string()),
        _ => node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(source).ok())
            .unwrap_or("<anonymous>")
            .to_string(),
    }
}

/// Defaults to `Internal`, Solidity's visibility for a function/modifier
/// without an explicit visibility keyword.
fn function_visibility(node: Node, source: &[u8]) -> Visibility {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Ok(text) = child.utf8_text(source) {
            match text {
                "public" => return Visibility::Public,
                "external" => return Visibility::External,
                "private" => return Visibility::Private,
                "internal" => return Visibility::Internal,
                _ => {}
            }
        }
    }
    Visibility::Internal
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn extracts_functions_across_two_contracts() {
        let source = r#"
            pragma solidity ^0.8.0;

            contract A {
                function f() public {
                    g();
                }

                function g() internal {}
            }

            contract B {
                constructor() {}

                receive() external payable {}
            }
        "#;

        let entries = extract(source, &PathBuf::from("contracts/A.sol")).unwrap();
        let names: Vec<String> = entries.iter().map(|e| format!("{}.{}", e.container, e.name)).collect();

        assert!(names.contains(&"A.f".to_string()));
        assert!(names.contains(&"A.g".to_string()));
        assert!(names.contains(&"B.constructor".to_string()));
        assert!(names.contains(&"B.receive".to_string()));

        let f = entries.iter().find(|e| e.name == "f").unwrap();
        assert_eq!(f.visibility, Visibility::Public);
        let g = entries.iter().find(|e| e.name == "g").unwrap();
        assert_eq!(g.visibility, Visibility::Internal);
    }
}
