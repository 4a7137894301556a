//! Definition parser: turns document text into function, template, and warmhole definitions.
//!
//! Parsing is permissive. A declaration block that does not match its grammar is skipped and
//! the rest of the document still loads. Cross-references (a function naming a template) are
//! not checked here; they fail when the path is executed.

pub mod declarations;
pub mod headers;

use indexmap::IndexMap;
use readmes_types::{FunctionDef, HeaderEntry, TemplateDef, WarmholeDef};
use tracing::debug;

pub use declarations::{DeclarationBlock, DeclarationKind, split_blocks};
pub use headers::{count_sections, index_headers, normalize_heading};

/// Everything one parse of a document yields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub functions: IndexMap<String, FunctionDef>,
    pub templates: IndexMap<String, TemplateDef>,
    pub warmholes: IndexMap<String, WarmholeDef>,
    pub headers: IndexMap<String, HeaderEntry>,
    /// Number of level-2 headings.
    pub sections: usize,
}

/// Parses `text`. Never fails; malformed blocks are dropped and duplicate names keep the last block.
pub fn parse_document(text: &str) -> ParsedDocument {
    let mut parsed = ParsedDocument {
        headers: index_headers(text),
        sections: count_sections(text),
        ..ParsedDocument::default()
    };

    for block in split_blocks(text) {
        let accepted = match block.kind {
            DeclarationKind::Function => declarations::parse_function(&block.text)
                .map(|function| parsed.functions.insert(function.name.clone(), function))
                .is_some(),
            DeclarationKind::Template => declarations::parse_template(&block.text)
                .map(|template| parsed.templates.insert(template.name.clone(), template))
                .is_some(),
            DeclarationKind::Warmhole => declarations::parse_warmhole(&block.text)
                .map(|warmhole| parsed.warmholes.insert(warmhole.name.clone(), warmhole))
                .is_some(),
        };
        if !accepted {
            debug!(kind = block.kind.as_str(), line = block.line, "skipping malformed declaration block");
        }
    }

    debug!(
        functions = parsed.functions.len(),
        templates = parsed.templates.len(),
        warmholes = parsed.warmholes.len(),
        headers = parsed.headers.len(),
        "document parsed"
    );
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUNCTION: &str = "# Function: process_text\n- description: \"Processes input text\"\n- input: text: string\n- output: result: string\n- template: text_processor\n";
    const TEMPLATE: &str = "# Template: text_processor\n- input_placeholder: \"{{text}}\"\n- transform: |\n    return context.text.toUpperCase();\n- output_format: string\n";
    const WARMHOLE: &str = "# Warmhole: start\n- description: \"Start warmhole\"\n- state_transfer: [\"text\"]\n- condition: \"true\"\n- next_warmhole: \"process\"\n";

    #[test]
    fn block_order_does_not_change_the_registry() {
        let forward = parse_document(&format!("{FUNCTION}\n{TEMPLATE}\n{WARMHOLE}"));
        let reversed = parse_document(&format!("{WARMHOLE}\n{TEMPLATE}\n{FUNCTION}"));
        assert_eq!(forward.functions, reversed.functions);
        assert_eq!(forward.templates, reversed.templates);
        assert_eq!(forward.warmholes, reversed.warmholes);
        assert_eq!(forward.functions.len(), 1);
        assert_eq!(forward.templates.len(), 1);
        assert_eq!(forward.warmholes.len(), 1);
    }

    #[test]
    fn parsing_twice_yields_the_same_result() {
        let text = format!("## Overview\n{FUNCTION}\n{TEMPLATE}");
        assert_eq!(parse_document(&text), parse_document(&text));
    }

    #[test]
    fn malformed_block_is_skipped() {
        let broken = "# Function: broken\n- description: \"missing the rest\"\n";
        let parsed = parse_document(&format!("{broken}{WARMHOLE}"));
        assert_eq!(parsed.functions.len(), 0);
        assert_eq!(parsed.warmholes.len(), 1);
    }

    #[test]
    fn last_duplicate_wins() {
        let second = FUNCTION.replace("Processes input text", "Second version");
        let parsed = parse_document(&format!("{FUNCTION}{second}"));
        assert_eq!(parsed.functions.len(), 1);
        assert_eq!(parsed.functions["process_text"].description, "Second version");
    }

    #[test]
    fn windows_line_endings_parse() {
        let parsed = parse_document(&TEMPLATE.replace('\n', "\r\n"));
        assert_eq!(parsed.templates["text_processor"].transform, "return context.text.toUpperCase();");
    }

    #[test]
    fn reports_sections_and_headers() {
        let parsed = parse_document(&format!("# Intro\n## Setup\n## Usage\n{WARMHOLE}"));
        assert_eq!(parsed.sections, 2);
        assert!(parsed.headers.contains_key("intro_setup_usage_warmhole:_start"));
    }
}
