//! Incremental `text/event-stream` decoder.

use serde::de::DeserializeOwned;

use crate::error::Result;

/// Event name used when the server does not send an `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

impl ServerEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
        }
    }

    /// Decode the data field as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

/// Stateful decoder fed with arbitrary byte chunks.
///
/// Lines may end with `\n`, `\r\n` or `\r`, and a `\r\n` pair may be split
/// across two chunks. Partial lines are buffered until the next chunk.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
    retry: Option<u64>,
    skip_lf: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconnection delay last announced by the server, in milliseconds.
    pub fn retry(&self) -> Option<u64> {
        self.retry
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Feed a chunk and return every event it completed.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        for &byte in chunk {
            if self.skip_lf {
                self.skip_lf = false;
                if byte == b'\n' {
                    continue;
                }
            }

            match byte {
                b'\n' => self.end_line(&mut events),
                b'\r' => {
                    self.skip_lf = true;
                    self.end_line(&mut events);
                }
                _ => self.buffer.push(byte),
            }
        }

        events
    }

    fn end_line(&mut self, events: &mut Vec<ServerEvent>) {
        let line = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&line);

        if line.is_empty() {
            if let Some(event) = self.dispatch() {
                events.push(event);
            }
            return;
        }

        self.process_line(&line);
    }

    fn process_line(&mut self, line: &str) {
        // Comment / keep-alive
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.last_id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(retry) = value.parse::<u64>() {
                    self.retry = Some(retry);
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(ServerEvent {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            id: self.last_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_named_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.decode(b"event: participant-checked-in\ndata: {\"id\":1}\n\n");
        assert_eq!(
            events,
            vec![ServerEvent::new("participant-checked-in", "{\"id\":1}")]
        );
    }

    #[test]
    fn test_events_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"event: IN").is_empty());
        assert!(decoder.decode(b"IT\nda").is_empty());
        assert!(decoder.decode(b"ta: hello\n").is_empty());

        let events = decoder.decode(b"\nevent: second\ndata: x\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ServerEvent::new("INIT", "hello"));
        assert_eq!(events[1], ServerEvent::new("second", "x"));
    }

    #[test]
    fn test_crlf_split_between_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"data: a\r").is_empty());
        // The `\n` completing `\r\n` must not count as a blank line.
        assert!(decoder.decode(b"\ndata: b\r\n").is_empty());

        let events = decoder.decode(b"\r\n");
        assert_eq!(events, vec![ServerEvent::new(DEFAULT_EVENT, "a\nb")]);
    }

    #[test]
    fn test_bare_cr_line_endings() {
        let mut decoder = SseDecoder::new();
        let events = decoder.decode(b"event: ping\rdata: 1\r\r");
        assert_eq!(events, vec![ServerEvent::new("ping", "1")]);
    }

    #[test]
    fn test_comments_and_unknown_fields_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.decode(b": keep-alive\nfoo: bar\ndata:no-space\n\n");
        assert_eq!(events, vec![ServerEvent::new(DEFAULT_EVENT, "no-space")]);
    }

    #[test]
    fn test_event_without_data_is_not_dispatched() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"event: empty\n\n").is_empty());

        // The name does not leak into the next event.
        let events = decoder.decode(b"data: x\n\n");
        assert_eq!(events[0].event, DEFAULT_EVENT);
    }

    #[test]
    fn test_id_and_retry() {
        let mut decoder = SseDecoder::new();
        let events = decoder.decode(b"id: 42\nretry: 3000\ndata: a\n\ndata: b\n\n");
        assert_eq!(events[0].id.as_deref(), Some("42"));
        // The last id carries over to later events.
        assert_eq!(events[1].id.as_deref(), Some("42"));
        assert_eq!(decoder.retry(), Some(3000));
        assert_eq!(decoder.last_event_id(), Some("42"));
    }

    #[test]
    fn test_json_payload() {
        #[derive(serde::Deserialize)]
        struct Payload {
            id: u32,
        }

        let event = ServerEvent::new("x", r#"{"id": 9}"#);
        assert_eq!(event.json::<Payload>().unwrap().id, 9);
        assert!(ServerEvent::new("x", "not json").json::<Payload>().is_err());
    }
}
