//! Event-stream decoder
//!
//! Incremental framing for provider response streams. Records are separated
//! by a blank line. Inside a record:
//! - `:`-prefixed lines are comments
//! - `event: name` sets the record's event name
//! - `data: value` lines are joined with `\n` in arrival order
//! - a line without a colon continues the previous `data` line
//!
//! Lines end in `\n` or `\r\n`, and the terminator may be split across calls.

use tracing::{debug, warn};

/// One complete record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseRecord {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
struct PartialRecord {
    event: Option<String>,
    data: Vec<String>,
    saw_field: bool,
}

impl PartialRecord {
    fn take(&mut self) -> Option<SseRecord> {
        let record = std::mem::take(self);
        if !record.saw_field {
            return None;
        }
        if record.data.is_empty() {
            warn!(event = ?record.event, "Dropping event-stream record without data");
            return None;
        }
        Some(SseRecord {
            event: record.event,
            data: record.data.join("\n"),
        })
    }
}

/// Incremental event-stream decoder
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: String,
    pending_bytes: Vec<u8>,
    record: PartialRecord,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text chunk, returning every record it completes
    pub fn feed(&mut self, chunk: &str) -> Vec<SseRecord> {
        self.buffer.push_str(chunk);

        let mut records = Vec::new();
        let mut consumed = 0;

        while let Some(offset) = self.buffer[consumed..].find('\n') {
            let end = consumed + offset;
            let line = self.buffer[consumed..end].trim_end_matches('\r');
            if let Some(record) = Self::process_line(&mut self.record, line) {
                records.push(record);
            }
            consumed = end + 1;
        }

        self.buffer.drain(..consumed);
        records
    }

    /// Feed raw bytes, holding back an incomplete UTF-8 sequence until the
    /// next call completes it
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<SseRecord> {
        self.pending_bytes.extend_from_slice(bytes);

        let text = match std::str::from_utf8(&self.pending_bytes) {
            Ok(text) => {
                let text = text.to_string();
                self.pending_bytes.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                let tail = self.pending_bytes.split_off(e.valid_up_to());
                let head = std::mem::replace(&mut self.pending_bytes, tail);
                String::from_utf8_lossy(&head).into_owned()
            }
            Err(e) => {
                debug!("Replacing invalid UTF-8 in provider stream: {}", e);
                let text = String::from_utf8_lossy(&self.pending_bytes).into_owned();
                self.pending_bytes.clear();
                text
            }
        };

        self.feed(&text)
    }

    /// Discard all buffered state without emitting anything
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending_bytes.clear();
        self.record = PartialRecord::default();
    }

    /// Whether any partial input is buffered
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty() || !self.pending_bytes.is_empty() || self.record.saw_field
    }

    fn process_line(record: &mut PartialRecord, line: &str) -> Option<SseRecord> {
        if line.is_empty() {
            return record.take();
        }
        if line.starts_with(':') {
            return None;
        }

        let Some((name, value)) = line.split_once(':') else {
            match line {
                "data" => {
                    record.data.push(String::new());
                    record.saw_field = true;
                }
                "event" => {
                    record.event = None;
                    record.saw_field = true;
                }
                _ => match record.data.last_mut() {
                    Some(last) => {
                        last.push('\n');
                        last.push_str(line);
                    }
                    None => debug!("Ignoring stray event-stream line"),
                },
            }
            return None;
        };

        let value = value.strip_prefix(' ').unwrap_or(value);
        match name {
            "event" => {
                record.event = (!value.is_empty()).then(|| value.to_string());
                record.saw_field = true;
            }
            "data" => {
                record.data.push(value.to_string());
                record.saw_field = true;
            }
            _ => {
                // id, retry and unknown fields carry nothing we use
                record.saw_field = true;
            }
        }
        None
    }
}
