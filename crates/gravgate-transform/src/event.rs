/// Normalized stream event: the internal currency between the upstream
/// reader and the dialect-specific re-framers.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text { delta: String },
    Thinking { delta: String, phase: ThinkingPhase },
    Image { mime: String, data: String },
    /// Emitted once per upstream turn, when a finish reason arrives with
    /// pending calls accumulated.
    ToolCalls(Vec<ToolCallOut>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingPhase {
    Start,
    Mid,
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallOut {
    pub id: String,
    pub name: String,
    /// JSON text of the call arguments, stringified from the upstream value.
    pub arguments: String,
}

const SIGNATURE_PREFIX: &str = "<!-- thought_signature: ";
const SIGNATURE_SUFFIX: &str = " -->";

pub fn thought_signature_sentinel(signature: &str) -> String {
    format!("{SIGNATURE_PREFIX}{signature}{SIGNATURE_SUFFIX}")
}

/// Split a thought-signature sentinel off assistant text. Returns the text
/// with the sentinel removed and the lifted signature, if one was embedded.
pub fn strip_thought_signature(text: &str) -> (String, Option<String>) {
    let Some(start) = text.find(SIGNATURE_PREFIX) else {
        return (text.to_string(), None);
    };
    let after = &text[start + SIGNATURE_PREFIX.len()..];
    let Some(end) = after.find(SIGNATURE_SUFFIX) else {
        return (text.to_string(), None);
    };
    let signature = after[..end].to_string();
    let mut cleaned = String::with_capacity(text.len());
    cleaned.push_str(&text[..start]);
    cleaned.push_str(&after[end + SIGNATURE_SUFFIX.len()..]);
    (cleaned, Some(signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_round_trips() {
        let text = format!("reasoning…{}", thought_signature_sentinel("ABC"));
        let (cleaned, signature) = strip_thought_signature(&text);
        assert_eq!(cleaned, "reasoning…");
        assert_eq!(signature.as_deref(), Some("ABC"));
    }

    #[test]
    fn text_without_sentinel_passes_through() {
        let (cleaned, signature) = strip_thought_signature("plain text");
        assert_eq!(cleaned, "plain text");
        assert!(signature.is_none());
    }

    #[test]
    fn unterminated_sentinel_is_left_alone() {
        let text = "before <!-- thought_signature: dangling";
        let (cleaned, signature) = strip_thought_signature(text);
        assert_eq!(cleaned, text);
        assert!(signature.is_none());
    }
}
