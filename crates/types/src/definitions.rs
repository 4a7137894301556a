//! Definition records extracted from a document.
//!
//! These mirror the three declaration kinds a document can carry. They are created by the
//! parser, never mutated afterwards (with the single exception of the auditable
//! warmhole optimization path), and replaced wholesale when the document is parsed again.

use serde::{Deserialize, Serialize};

/// Declared input or output slot of a function (`text: string`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IoSpec {
    /// Slot name; for inputs this is the context key the caller's `input` is copied into.
    pub name: String,
    /// Informational type tag (`string`, `number`, ...).
    #[serde(rename = "type")]
    pub r#type: String,
}

impl IoSpec {
    pub fn new(name: impl Into<String>, r#type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            r#type: r#type.into(),
        }
    }
}

/// Named binding from a declared input/output shape to a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub input: IoSpec,
    pub output: IoSpec,
    /// Name of the [`TemplateDef`] this function delegates to. Resolved at execution time.
    pub template: String,
}

/// Parameterized executable fragment producing a typed result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateDef {
    pub name: String,
    /// Raw placeholder pattern as authored (informational only).
    pub placeholder: String,
    /// Code body evaluated in the sandbox after placeholder substitution.
    pub transform: String,
    /// Shape tag reported alongside successful results.
    #[serde(rename = "outputFormat")]
    pub output_format: String,
}

/// Node of the navigation graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WarmholeDef {
    pub name: String,
    pub description: String,
    /// Context variables promoted into durable memory when leaving this node.
    #[serde(default)]
    pub state_transfer: Vec<String>,
    /// Opaque guard predicate, only ever interpreted by the decision service.
    #[serde(default)]
    pub condition: String,
    /// Static transition target; empty means terminal.
    #[serde(default)]
    pub next_warmhole: String,
}

impl WarmholeDef {
    /// Returns `true` when the static pointer marks this node as terminal.
    pub fn is_terminal(&self) -> bool {
        self.next_warmhole.trim().is_empty()
    }
}

/// Header index entry keyed by its hierarchical id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderEntry {
    /// Always `section` for now; kept as a field so the editor can distinguish future kinds.
    #[serde(rename = "type")]
    pub kind: String,
    /// The heading line exactly as it appeared in the document.
    pub line: String,
    /// Heading depth (number of leading `#`).
    pub level: usize,
}

impl HeaderEntry {
    pub fn section(line: impl Into<String>, level: usize) -> Self {
        Self {
            kind: "section".to_string(),
            line: line.into(),
            level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn template_serializes_output_format_in_camel_case() {
        let template = TemplateDef {
            name: "upper".into(),
            placeholder: "{{text}}".into(),
            transform: "return context.text;".into(),
            output_format: "string".into(),
        };
        let value = serde_json::to_value(&template).expect("serialize");
        assert_eq!(value["outputFormat"], json!("string"));
        assert!(value.get("output_format").is_none());
    }

    #[test]
    fn warmhole_without_target_is_terminal() {
        let warmhole: WarmholeDef = serde_json::from_value(json!({
            "name": "end",
            "description": "End",
        }))
        .expect("deserialize");
        assert!(warmhole.is_terminal());
        assert!(warmhole.state_transfer.is_empty());
    }
}
