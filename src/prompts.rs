//! Instruction prompts for the vision describer.
//!
//! Callers can override the default via
//! [`crate::config::PipelineConfig::describe_prompt`]; the constant here is
//! used only when no override is provided.

/// Default instruction sent alongside every embedded lecture image.
///
/// The description is consumed by a retrieval system rather than shown on
/// the slide, so it asks for content a student would search for.
pub const DEFAULT_DESCRIBE_PROMPT: &str = "Describe this image in detail for a pharmacy student. \
If it's a chemical structure, describe the rings and groups. \
If it's a diagram, describe the flow.";

/// Bracketed description stored when the vision call fails.
pub fn description_unavailable(detail: &str) -> String {
    format!("[Image description unavailable: {}]", detail)
}
