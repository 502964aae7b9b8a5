use http::HeaderMap;
use http::header;

/// Pull the caller's API key out of `Authorization: Bearer …` or
/// `x-api-key`, in that order.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
    {
        let raw = raw.trim();
        let prefix = "Bearer ";
        if raw.len() > prefix.len() && raw[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let token = raw[prefix.len()..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    if let Some(value) = headers.get("x-api-key")
        && let Ok(raw) = value.to_str()
    {
        let raw = raw.trim();
        if !raw.is_empty() {
            return Some(raw.to_string());
        }
    }

    None
}
