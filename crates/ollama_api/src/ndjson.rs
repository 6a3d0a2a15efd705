use crate::error::OllamaApiError;
use crate::events::{OllamaChatChunk, OllamaStreamEvent};

pub type ParsedEvent = Result<OllamaStreamEvent, OllamaApiError>;

/// Incremental parser for newline-delimited JSON response bodies.
///
/// Bytes are buffered raw so a multi-byte character split across network
/// chunks is decoded only once its line is complete.
#[derive(Debug, Default)]
pub struct NdjsonStreamParser {
    buffer: Vec<u8>,
}

impl NdjsonStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete lines.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ParsedEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(split) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=split).collect();
            parse_line(&line[..split], &mut events);
        }

        events
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<ParsedEvent> {
        let line = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        parse_line(&line, &mut events);
        events
    }

    /// Parse a complete NDJSON body in one shot.
    pub fn parse_lines(input: &str) -> Vec<ParsedEvent> {
        let mut parser = Self::default();
        let mut events = parser.feed(input.as_bytes());
        events.extend(parser.finish());
        events
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

fn parse_line(line: &[u8], events: &mut Vec<ParsedEvent>) {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(error) => {
            events.push(Err(OllamaApiError::MalformedChunk(format!(
                "line is not valid UTF-8: {error}"
            ))));
            return;
        }
    };
    if text.is_empty() {
        return;
    }

    let chunk = match serde_json::from_str::<OllamaChatChunk>(text) {
        Ok(chunk) => chunk,
        Err(error) => {
            events.push(Err(OllamaApiError::MalformedChunk(format!(
                "{error}: {}",
                preview(text)
            ))));
            return;
        }
    };

    if let Some(message) = chunk.error.as_deref() {
        events.push(Err(OllamaApiError::StreamFailed(message.to_owned())));
        return;
    }

    events.extend(chunk.into_events().into_iter().map(Ok));
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 120;
    if text.len() <= LIMIT {
        return text.to_owned();
    }
    let mut end = LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::NdjsonStreamParser;
    use crate::events::OllamaStreamEvent;

    #[test]
    fn parse_lines_incrementally() {
        let mut parser = NdjsonStreamParser::default();

        let first = parser.feed(b"{\"message\":{\"content\":\"Hel");
        assert!(first.is_empty());
        assert!(!parser.is_empty_buffer());

        let second = parser.feed(b"lo\"},\"done\":false}\n");
        assert_eq!(second.len(), 1);
        assert!(matches!(
            &second[0],
            Ok(OllamaStreamEvent::ContentDelta(text)) if text == "Hello"
        ));
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn split_multibyte_character_is_reassembled() {
        let line = "{\"message\":{\"content\":\"caf\u{e9}\"},\"done\":false}\n";
        let bytes = line.as_bytes();
        let split = line.find('\u{e9}').expect("accent") + 1;

        let mut parser = NdjsonStreamParser::default();
        assert!(parser.feed(&bytes[..split]).is_empty());
        let events = parser.feed(&bytes[split..]);

        assert!(matches!(
            &events[0],
            Ok(OllamaStreamEvent::ContentDelta(text)) if text == "caf\u{e9}"
        ));
    }
}
