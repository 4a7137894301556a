//! Prompt text for text-in/text-out decision services.

use readmes_types::{DecisionKind, DecisionRequest};

const PREAMBLE: &str = "You are the decision service for a READMEs program: a markdown document whose \
functions, templates, and warmholes (navigation states) are executed by a runtime. \
Answer the request below with a single JSON object and nothing else.";

/// Renders `request` as a sectioned prompt with the expected reply shape for its kind.
pub fn build_prompt(request: &DecisionRequest) -> anyhow::Result<String> {
    let payload = serde_json::to_string_pretty(&request.payload)?;
    Ok(format!(
        "{PREAMBLE}\n\n# Request type\n{}\n\n# Payload\n{payload}\n\n# Response format\n{}\n",
        request.kind,
        response_format(request.kind)
    ))
}

fn response_format(kind: DecisionKind) -> &'static str {
    match kind {
        DecisionKind::AnalyzeIntent => {
            "{\"steps\": [{\"type\": \"navigate\", \"warmhole\": \"<name>\", \"context\": {}} | \
             {\"type\": \"execute\", \"function\": \"<name>\", \"input\": {}} | \
             {\"type\": \"optimize\", \"warmhole\": \"<name>\"}], \"userMessage\": \"<text>\"}"
        }
        DecisionKind::EvaluateCondition => {
            "{\"allowed\": true|false, \"reason\": \"<text>\", \"next_warmhole\": \"<name, optional override>\"}"
        }
        DecisionKind::SuggestAlternative => "{\"alternative\": \"<warmhole name, or empty when there is none>\"}",
        DecisionKind::ValidateInput => "{\"valid\": true|false, \"input\": {}, \"message\": \"<text>\"}",
        DecisionKind::OptimizeWarmhole => {
            "{\"changes\": {\"description\": \"...\", \"condition\": \"...\", \"next_warmhole\": \"...\", \
             \"state_transfer\": [\"...\"]}} (include only the fields to change)"
        }
        DecisionKind::AnalyzeState => "{\"summary\": \"<text>\", \"suggestions\": [\"<text>\"]}",
    }
}
