use crate::agent::{AgentOutput, StageResult};

/// Hand-off text used whenever a stage result carries no usable text.
pub const EXTRACTION_PLACEHOLDER: &str = "Error: Could not extract text from agent result.";

/// Reduce a stage result to the plain text handed to the next stage.
///
/// Plain text passes through untouched; block lists yield their first text
/// block. Everything else degrades to [`EXTRACTION_PLACEHOLDER`].
pub fn extract(result: &StageResult) -> String {
    text_of(result).unwrap_or_else(|| EXTRACTION_PLACEHOLDER.to_string())
}

/// The answer text of a successful result, if it has any.
pub fn text_of(result: &StageResult) -> Option<String> {
    match result {
        StageResult::Success {
            output: AgentOutput::Text(text),
        } => Some(text.clone()),
        StageResult::Success {
            output: AgentOutput::Blocks(blocks),
        } => blocks.iter().find_map(|b| b.as_text()).map(str::to_string),
        StageResult::Failure { .. } => None,
    }
}
