use bytes::Bytes;

/// Incremental parser for the upstream's line-delimited stream: UTF-8 text
/// split on `\n`, with payloads on `data: ` lines. Anything else (blank
/// separators, comments, partial trailing lines) is buffered or dropped.
#[derive(Debug, Default)]
pub struct DataLineParser {
    buffer: String,
}

impl DataLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<String> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);

            if line.ends_with('\r') {
                line.pop();
            }

            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }

        payloads
    }

    /// Drain a final unterminated line at EOF.
    pub fn finish(&mut self) -> Vec<String> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let mut line = std::mem::take(&mut self.buffer);
        if line.ends_with('\r') {
            line.pop();
        }
        data_payload(&line).into_iter().collect()
    }
}

fn data_payload(line: &str) -> Option<String> {
    let value = line.strip_prefix("data:")?;
    let value = value.strip_prefix(' ').unwrap_or(value);
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::DataLineParser;

    #[test]
    fn splits_payloads_across_chunk_boundaries() {
        let mut parser = DataLineParser::new();
        assert!(parser.push_str("data: {\"a\":").is_empty());
        let payloads = parser.push_str("1}\n\ndata: {\"b\":2}\n");
        assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn ignores_non_data_lines() {
        let mut parser = DataLineParser::new();
        let payloads = parser.push_str(": comment\nevent: ping\ndata: x\n");
        assert_eq!(payloads, vec!["x"]);
    }

    #[test]
    fn crlf_lines_are_trimmed() {
        let mut parser = DataLineParser::new();
        let payloads = parser.push_str("data: one\r\n");
        assert_eq!(payloads, vec!["one"]);
    }

    #[test]
    fn finish_drains_trailing_line() {
        let mut parser = DataLineParser::new();
        assert!(parser.push_str("data: tail").is_empty());
        assert_eq!(parser.finish(), vec!["tail"]);
        assert!(parser.finish().is_empty());
    }
}
