//! Declaration blocks: `# Function:`, `# Template:`, and `# Warmhole:` sections.

use once_cell::sync::Lazy;
use readmes_types::{FunctionDef, IoSpec, TemplateDef, WarmholeDef};
use regex::Regex;

static FUNCTION_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"^# Function:\s*(\w+)[ \t]*\n"#,
        r#"-\s*description:\s*"([^"\n]*)"[ \t]*\n"#,
        r#"-\s*input:\s*(\w+):\s*(\w+)[ \t]*\n"#,
        r#"-\s*output:\s*(\w+):\s*(\w+)[ \t]*\n"#,
        r#"-\s*template:\s*(\w+)"#,
    ))
    .expect("function block pattern")
});

// Body lines may not start with '-' at column 0; the first such line ends the transform.
static TEMPLATE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"^# Template:\s*(\w+)[ \t]*\n"#,
        r#"-\s*input_placeholder:\s*"([^"\n]*)"[ \t]*\n"#,
        r#"-\s*transform:[ \t]*\|([^\n]*(?:\n(?:[^\n-][^\n]*)?)*)\n"#,
        r#"-\s*output_format:\s*(\w+)"#,
    ))
    .expect("template block pattern")
});

static WARMHOLE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"^# Warmhole:\s*(\w+)[ \t]*\n"#,
        r#"-\s*description:\s*"([^"\n]*)"[ \t]*\n"#,
        r#"-\s*state_transfer:\s*\[([^\]]*)\][ \t]*\n"#,
        r#"-\s*condition:\s*"([^"\n]*)""#,
        r#"(?:[ \t]*\n-\s*next_warmhole:[ \t]*(?:"(\w*)"|(\w*)))?"#,
    ))
    .expect("warmhole block pattern")
});

/// Which declaration a block introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Function,
    Template,
    Warmhole,
}

impl DeclarationKind {
    fn from_heading(line: &str) -> Option<Self> {
        if line.starts_with("# Function:") {
            Some(Self::Function)
        } else if line.starts_with("# Template:") {
            Some(Self::Template)
        } else if line.starts_with("# Warmhole:") {
            Some(Self::Warmhole)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Template => "template",
            Self::Warmhole => "warmhole",
        }
    }
}

/// Raw text of one declaration block, heading included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationBlock {
    pub kind: DeclarationKind,
    /// 1-based line of the heading.
    pub line: usize,
    pub text: String,
}

/// Splits a document into declaration blocks.
///
/// A block starts at a declaration heading and runs until the next line beginning with `# `
/// or the end of the document. Deeper headings (`## ...`) stay inside the block.
pub fn split_blocks(text: &str) -> Vec<DeclarationBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<DeclarationBlock> = None;

    for (index, line) in text.lines().enumerate() {
        if line.starts_with("# ") {
            blocks.extend(current.take());
            if let Some(kind) = DeclarationKind::from_heading(line) {
                current = Some(DeclarationBlock {
                    kind,
                    line: index + 1,
                    text: line.to_string(),
                });
            }
            continue;
        }
        if let Some(block) = current.as_mut() {
            block.text.push('\n');
            block.text.push_str(line);
        }
    }
    blocks.extend(current);
    blocks
}

pub fn parse_function(block: &str) -> Option<FunctionDef> {
    let captures = FUNCTION_BLOCK.captures(block)?;
    Some(FunctionDef {
        name: captures[1].to_string(),
        description: captures[2].to_string(),
        input: IoSpec::new(&captures[3], &captures[4]),
        output: IoSpec::new(&captures[5], &captures[6]),
        template: captures[7].to_string(),
    })
}

pub fn parse_template(block: &str) -> Option<TemplateDef> {
    let captures = TEMPLATE_BLOCK.captures(block)?;
    Some(TemplateDef {
        name: captures[1].to_string(),
        placeholder: captures[2].to_string(),
        transform: captures[3].trim().to_string(),
        output_format: captures[4].to_string(),
    })
}

pub fn parse_warmhole(block: &str) -> Option<WarmholeDef> {
    let captures = WARMHOLE_BLOCK.captures(block)?;
    let next_warmhole = captures
        .get(5)
        .or_else(|| captures.get(6))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    Some(WarmholeDef {
        name: captures[1].to_string(),
        description: captures[2].to_string(),
        state_transfer: parse_transfer_list(&captures[3]),
        condition: captures[4].to_string(),
        next_warmhole,
    })
}

/// `"a", 'b', c` -> `[a, b, c]`; empty entries are dropped.
fn parse_transfer_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|entry| entry.trim().trim_matches(|c| c == '"' || c == '\'').trim())
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_blocks_at_top_level_headings() {
        let text = "intro\n# Function: a\n- x\n## nested\n- y\n# Notes\nignored\n# Warmhole: w\n- z";
        let blocks = split_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].kind, DeclarationKind::Function);
        assert_eq!(blocks[0].line, 2);
        assert_eq!(blocks[0].text, "# Function: a\n- x\n## nested\n- y");
        assert_eq!(blocks[1].kind, DeclarationKind::Warmhole);
        assert_eq!(blocks[1].text, "# Warmhole: w\n- z");
    }

    #[test]
    fn parses_function_block() {
        let block = "# Function: process_text\n- description: \"Processes input text\"\n- input: text: string\n- output: result: string\n- template: text_processor\n";
        let function = parse_function(block).unwrap();
        assert_eq!(function.name, "process_text");
        assert_eq!(function.description, "Processes input text");
        assert_eq!(function.input, IoSpec::new("text", "string"));
        assert_eq!(function.output, IoSpec::new("result", "string"));
        assert_eq!(function.template, "text_processor");
    }

    #[test]
    fn function_with_missing_bullet_is_rejected() {
        let block = "# Function: broken\n- description: \"no template\"\n- input: text: string\n- output: result: string";
        assert!(parse_function(block).is_none());
    }

    #[test]
    fn template_transform_runs_until_next_bullet() {
        let block = "# Template: text_processor\n- input_placeholder: \"{{text}}\"\n- transform: |\n    const upper = context.text.toUpperCase();\n\n    return upper;\n- output_format: string\n";
        let template = parse_template(block).unwrap();
        assert_eq!(template.placeholder, "{{text}}");
        assert_eq!(template.transform, "const upper = context.text.toUpperCase();\n\n    return upper;");
        assert_eq!(template.output_format, "string");
    }

    #[test]
    fn indented_dash_lines_stay_in_the_transform() {
        let block = "# Template: t\n- input_placeholder: \"{{n}}\"\n- transform: |\n    return 10\n      - 3;\n- output_format: number";
        let template = parse_template(block).unwrap();
        assert_eq!(template.transform, "return 10\n      - 3;");
    }

    #[test]
    fn parses_warmhole_with_quoted_transfer_list() {
        let block = "# Warmhole: start\n- description: \"Start warmhole\"\n- state_transfer: [\"text\", 'count', ]\n- condition: \"true\"\n- next_warmhole: \"process\"";
        let warmhole = parse_warmhole(block).unwrap();
        assert_eq!(warmhole.state_transfer, vec!["text".to_string(), "count".to_string()]);
        assert_eq!(warmhole.condition, "true");
        assert_eq!(warmhole.next_warmhole, "process");
    }

    #[test]
    fn warmhole_without_next_is_terminal() {
        let empty = "# Warmhole: end\n- description: \"Done\"\n- state_transfer: []\n- condition: \"always\"\n- next_warmhole: \"\"";
        let absent = "# Warmhole: end\n- description: \"Done\"\n- state_transfer: []\n- condition: \"always\"\n";
        for block in [empty, absent] {
            let warmhole = parse_warmhole(block).unwrap();
            assert!(warmhole.is_terminal());
            assert!(warmhole.state_transfer.is_empty());
        }
    }
}
