use gravgate_common::config::GenerationDefaults;
use gravgate_protocol::upstream::types::{GenerationConfig, ThinkingConfig};

/// Turn markers the upstream dialect treats as hard stops; client-requested
/// stop sequences are only used for stop-reason classification, never
/// forwarded.
pub const INTERNAL_STOP_SEQUENCES: [&str; 3] = ["<|user|>", "<|assistant|>", "<|endoftext|>"];

/// Models that run in thinking mode without carrying the `-thinking` suffix.
const THINKING_ALLOWLIST: [&str; 2] = ["gemini-2.5-flash-thinking", "claude-sonnet-4-5-thinking"];

/// The one model whose wire name keeps its `-thinking` suffix.
const KEEP_SUFFIX_EXCEPTION: &str = "gemini-2.5-flash-thinking";

const THINKING_BUDGET: u32 = 1024;

/// Generation parameters as they arrived from the client, any dialect.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
}

pub fn is_thinking_model(model: &str) -> bool {
    model.ends_with("-thinking") || THINKING_ALLOWLIST.contains(&model)
}

/// Model name as sent on the wire: the `-thinking` suffix is dropped, except
/// for the whitelisted model that genuinely carries it.
pub fn wire_model_name(model: &str) -> String {
    if model == KEEP_SUFFIX_EXCEPTION {
        return model.to_string();
    }
    model
        .strip_suffix("-thinking")
        .unwrap_or(model)
        .to_string()
}

pub fn build(
    model: &str,
    params: &GenerationParams,
    defaults: &GenerationDefaults,
) -> GenerationConfig {
    let thinking = is_thinking_model(model);
    let claude_family = model.contains("claude");

    let top_p = if thinking && claude_family {
        None
    } else {
        Some(params.top_p.unwrap_or(defaults.top_p))
    };

    GenerationConfig {
        candidate_count: 1,
        temperature: Some(params.temperature.unwrap_or(defaults.temperature)),
        top_p,
        top_k: Some(params.top_k.unwrap_or(defaults.top_k)),
        max_output_tokens: Some(params.max_tokens.unwrap_or(defaults.max_tokens)),
        stop_sequences: INTERNAL_STOP_SEQUENCES
            .iter()
            .map(|sequence| sequence.to_string())
            .collect(),
        thinking_config: thinking.then_some(ThinkingConfig {
            include_thoughts: true,
            thinking_budget: THINKING_BUDGET,
        }),
    }
}
