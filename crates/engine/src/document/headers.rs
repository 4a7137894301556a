//! Header index used for quick lookup of document sections by hierarchical id.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use readmes_types::HeaderEntry;
use regex::Regex;

static ATX_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})[ \t]+(\S.*?)[ \t]*$").expect("heading pattern"));
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Builds the header index for `text`.
///
/// Each heading's id is the previous heading's id joined to its own normalized text with `_`.
/// Later headings with the same id replace earlier ones.
pub fn index_headers(text: &str) -> IndexMap<String, HeaderEntry> {
    let mut index = IndexMap::new();
    let mut previous_id = String::new();

    for line in text.lines() {
        let Some(captures) = ATX_HEADING.captures(line) else {
            continue;
        };
        let level = captures[1].len();
        let normalized = normalize_heading(&captures[2]);
        let id = if previous_id.is_empty() {
            normalized
        } else {
            format!("{previous_id}_{normalized}")
        };
        index.insert(id.clone(), HeaderEntry::section(line, level));
        previous_id = id;
    }
    index
}

/// Number of level-2 (`## `) headings.
pub fn count_sections(text: &str) -> usize {
    text.lines().filter(|line| line.starts_with("## ")).count()
}

pub fn normalize_heading(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text.trim(), "_").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_chain_through_previous_headings() {
        let text = "# Getting Started\nintro\n## Install  Steps\n### On Linux\nnot # a heading";
        let index = index_headers(text);
        let ids: Vec<_> = index.keys().cloned().collect();
        assert_eq!(
            ids,
            vec![
                "getting_started".to_string(),
                "getting_started_install_steps".to_string(),
                "getting_started_install_steps_on_linux".to_string(),
            ]
        );
        let entry = &index["getting_started_install_steps"];
        assert_eq!(entry.kind, "section");
        assert_eq!(entry.line, "## Install  Steps");
        assert_eq!(entry.level, 2);
    }

    #[test]
    fn declaration_headings_are_indexed() {
        let index = index_headers("# Function: process_text\n- description: \"x\"");
        assert!(index.contains_key("function:_process_text"));
    }

    #[test]
    fn hashes_without_space_are_not_headings() {
        assert!(index_headers("#hashtag\n####### seven").is_empty());
    }

    #[test]
    fn counts_level_two_sections() {
        assert_eq!(count_sections("# A\n## B\n### C\n## D"), 2);
    }
}
