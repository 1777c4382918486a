//! Raw transcript records and the line decoder
//!
//! Each line of a transcript is one independently parseable JSON record.
//! Decoding is lenient about nulls and unknown fields: transcripts are
//! written by an external tool and a single odd line must not cost us the
//! rest of the file.

use super::types::{TokenUsage, ToolInput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::io::{self, BufRead};
use thiserror::Error;

/// Why a single line could not be turned into a record
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,

    #[error("line of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Record discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    System,
    User,
    Assistant,
    #[serde(other)]
    Other,
}

impl Default for RecordKind {
    fn default() -> Self {
        RecordKind::Other
    }
}

/// One decoded transcript line
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(rename = "type", default)]
    pub kind: RecordKind,

    #[serde(default, deserialize_with = "lenient_string")]
    pub subtype: String,

    #[serde(default, deserialize_with = "lenient_string")]
    pub uuid: String,

    #[serde(default)]
    pub parent_uuid: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub session_id: String,

    #[serde(default, deserialize_with = "lenient_string")]
    pub cwd: String,

    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub version: String,

    #[serde(default, deserialize_with = "lenient_string")]
    pub git_branch: String,

    #[serde(default)]
    pub message: Option<RawMessage>,

    #[serde(default)]
    pub compact_metadata: Option<CompactMetadata>,

    /// Replayed summary injected after a compaction, not a user action
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_compact_summary: bool,
}

impl RawRecord {
    /// Stable id of the assistant message this record is a revision of
    pub fn message_id(&self) -> Option<&str> {
        self.message
            .as_ref()
            .map(|m| m.id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn is_compact_boundary(&self) -> bool {
        self.kind == RecordKind::System && self.subtype == "compact_boundary"
    }
}

/// Role/content payload of user and assistant records
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "lenient_string")]
    pub role: String,

    /// Plain string for typed prompts, list of blocks otherwise
    #[serde(default)]
    pub content: Value,

    #[serde(default, deserialize_with = "lenient_string")]
    pub model: String,

    #[serde(default)]
    pub usage: Option<RawUsage>,

    /// Message id, shared by every incremental revision
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
}

impl RawMessage {
    /// Content when it is a plain string
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }

    /// Content blocks, skipping any block that does not decode
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match &self.content {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| ContentBlock::deserialize(item).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage.as_ref().map(RawUsage::to_usage).unwrap_or_default()
    }
}

/// Usage block as written by the model API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
}

impl RawUsage {
    pub fn to_usage(&self) -> TokenUsage {
        TokenUsage {
            input: self.input_tokens.unwrap_or(0),
            output: self.output_tokens.unwrap_or(0),
            cache_read: self.cache_read_input_tokens.unwrap_or(0),
            cache_write: self.cache_creation_input_tokens.unwrap_or(0),
        }
    }
}

/// Metadata on a `compact_boundary` system record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactMetadata {
    #[serde(default, deserialize_with = "lenient_string")]
    pub trigger: String,
    #[serde(default)]
    pub pre_tokens: Option<u64>,
}

/// One typed block inside a message's content list
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default, deserialize_with = "lenient_string")]
        text: String,
    },
    Thinking {
        #[serde(default, deserialize_with = "lenient_string")]
        thinking: String,
    },
    ToolUse {
        #[serde(default, deserialize_with = "lenient_string")]
        id: String,
        #[serde(default, deserialize_with = "lenient_string")]
        name: String,
        #[serde(default, deserialize_with = "lenient_object")]
        input: ToolInput,
    },
    ToolResult {
        #[serde(default, deserialize_with = "lenient_string")]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default, deserialize_with = "lenient_bool")]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

/// Flatten tool result content into a single output string.
///
/// Strings pass through, part lists concatenate their `text` fields, any
/// other JSON is rendered compactly. Missing content is empty.
pub fn flatten_tool_output(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect(),
        other => other.to_string(),
    }
}

/// Decode one transcript line.
///
/// Text sliced mid-emoji leaves unpaired UTF-16 surrogate escapes behind,
/// which serde_json refuses. Such lines are retried with each lone surrogate
/// replaced by U+FFFD.
pub fn decode_line(line: &str) -> Result<RawRecord, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }
    match serde_json::from_str(line) {
        Ok(record) => Ok(record),
        Err(e) => match replace_lone_surrogates(line) {
            Some(repaired) => Ok(serde_json::from_str(&repaired)?),
            None => Err(e.into()),
        },
    }
}

/// Rewrite `\uD800`-`\uDFFF` escapes that are not part of a surrogate pair
/// to `\uFFFD`. Returns `None` when the line has none.
fn replace_lone_surrogates(line: &str) -> Option<String> {
    let bytes = line.as_bytes();
    let mut out = String::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        let Some(unit) = unicode_escape(bytes, i) else {
            // Any other escape is two bytes; skipping both keeps `\\u` literal
            i += 2;
            continue;
        };
        match unit {
            0xD800..=0xDBFF if matches!(unicode_escape(bytes, i + 6), Some(0xDC00..=0xDFFF)) => {
                i += 12;
            }
            0xD800..=0xDFFF => {
                out.push_str(&line[copied..i]);
                out.push_str("\\uFFFD");
                i += 6;
                copied = i;
            }
            _ => i += 6,
        }
    }

    if copied == 0 {
        return None;
    }
    out.push_str(&line[copied..]);
    Some(out)
}

/// Code unit of the `\uXXXX` escape starting at `at`, if there is one
fn unicode_escape(bytes: &[u8], at: usize) -> Option<u16> {
    let escape = bytes.get(at..at + 6)?;
    if escape[0] != b'\\' || escape[1] != b'u' || !escape[2..].iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let hex = std::str::from_utf8(&escape[2..]).ok()?;
    u16::from_str_radix(hex, 16).ok()
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

fn lenient_object<'de, D>(deserializer: D) -> Result<ToolInput, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map),
        _ => Ok(ToolInput::new()),
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

/// Parse an RFC 3339 timestamp (fractional seconds optional)
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Line reader with a hard ceiling on line length.
///
/// Bytes of an oversized line are drained without being buffered, so a
/// corrupt multi-gigabyte line costs time but not memory.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    max: usize,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R, max: usize) -> Self {
        LineReader {
            inner,
            buf: Vec::new(),
            max,
        }
    }

    /// Read the next line. `Ok(None)` at end of input; the inner result
    /// carries line-level problems that the caller may skip past.
    pub fn next_line(&mut self) -> io::Result<Option<Result<String, DecodeError>>> {
        let LineReader { inner, buf, max } = self;
        buf.clear();

        let mut len = 0usize;
        let mut oversized = false;
        let mut read_any = false;

        loop {
            let (used, done) = {
                let available = match inner.fill_buf() {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };
                if available.is_empty() {
                    break;
                }
                read_any = true;

                let (chunk, used, done) = match available.iter().position(|&b| b == b'\n') {
                    Some(i) => (&available[..i], i + 1, true),
                    None => (available, available.len(), false),
                };

                len += chunk.len();
                if !oversized {
                    if len > *max {
                        oversized = true;
                        buf.clear();
                    } else {
                        buf.extend_from_slice(chunk);
                    }
                }
                (used, done)
            };
            inner.consume(used);
            if done {
                break;
            }
        }

        if !read_any {
            return Ok(None);
        }
        if oversized {
            return Ok(Some(Err(DecodeError::Oversized { len, max: *max })));
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        let line = String::from_utf8(std::mem::take(buf)).map_err(|_| DecodeError::InvalidUtf8);
        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(input: &[u8], max: usize) -> Vec<Result<String, String>> {
        let mut reader = LineReader::new(Cursor::new(input.to_vec()), max);
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().unwrap() {
            lines.push(line.map_err(|e| e.to_string()));
        }
        lines
    }

    #[test]
    fn test_decode_assistant_record() {
        let line = r#"{"type":"assistant","uuid":"a1","parentUuid":null,"timestamp":"2025-01-01T00:00:01.250Z","cwd":"/w","message":{"id":"m1","model":"claude-opus","content":[{"type":"text","text":"ok"}],"usage":{"input_tokens":10,"output_tokens":5,"cache_read_input_tokens":2}}}"#;
        let record = decode_line(line).unwrap();
        assert_eq!(record.kind, RecordKind::Assistant);
        assert_eq!(record.uuid, "a1");
        assert!(record.parent_uuid.is_none());
        assert_eq!(record.message_id(), Some("m1"));
        assert_eq!(record.cwd, "/w");
        assert!(record.timestamp.is_some());

        let message = record.message.unwrap();
        assert_eq!(message.usage().input, 10);
        assert_eq!(message.usage().cache_read, 2);
        assert_eq!(message.usage().cache_write, 0);
        assert_eq!(
            message.blocks(),
            vec![ContentBlock::Text { text: "ok".into() }]
        );
    }

    #[test]
    fn test_decode_tolerates_nulls_and_unknown_types() {
        let line = r#"{"type":"file-history-snapshot","uuid":null,"timestamp":"not a time","isCompactSummary":null}"#;
        let record = decode_line(line).unwrap();
        assert_eq!(record.kind, RecordKind::Other);
        assert_eq!(record.uuid, "");
        assert!(record.timestamp.is_none());
        assert!(!record.is_compact_summary);
    }

    #[test]
    fn test_decode_rejects_truncated_line() {
        let err = decode_line(r#"{"type":"user","message":{"content":"hel"#).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
        assert!(matches!(decode_line("   "), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_replaces_lone_surrogates() {
        let line = r#"{"type":"assistant","message":{"id":"m","content":[{"type":"text","text":"Looking \ud83d"}]}}"#;
        let record = decode_line(line).unwrap();
        assert_eq!(
            record.message.unwrap().blocks(),
            vec![ContentBlock::Text { text: "Looking \u{FFFD}".into() }]
        );

        let record =
            decode_line(r#"{"type":"user","message":{"content":"\udc00 and \ud83d\ude00"}}"#).unwrap();
        assert_eq!(record.message.unwrap().text(), Some("\u{FFFD} and \u{1F600}"));
    }

    #[test]
    fn test_replace_lone_surrogates_leaves_other_escapes() {
        assert_eq!(replace_lone_surrogates(r#""\ud83d\ude00 \n A""#), None);
        assert_eq!(replace_lone_surrogates(r#""\\ud83d""#), None);
        assert_eq!(
            replace_lone_surrogates(r#""a\ud83d\\b\udc00""#).as_deref(),
            Some(r#""a\uFFFD\\b\uFFFD""#)
        );
        assert_eq!(
            replace_lone_surrogates(r#""\ud83dA""#).as_deref(),
            Some(r#""\uFFFDA""#)
        );
    }

    #[test]
    fn test_bad_block_is_skipped_not_fatal() {
        let line = r#"{"type":"assistant","message":{"id":"m","content":[42,{"type":"tool_use","id":"t1","name":"Bash","input":"oops"},{"type":"image"}]}}"#;
        let record = decode_line(line).unwrap();
        let blocks = record.message.unwrap().blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(
            blocks[0],
            ContentBlock::ToolUse {
                id: "t1".into(),
                name: "Bash".into(),
                input: ToolInput::new(),
            }
        );
        assert_eq!(blocks[1], ContentBlock::Other);
    }

    #[test]
    fn test_flatten_tool_output() {
        assert_eq!(flatten_tool_output(&Value::String("a".into())), "a");
        let parts = serde_json::json!([{"type":"text","text":"x"},{"type":"image"},{"text":"y"}]);
        assert_eq!(flatten_tool_output(&parts), "xy");
        assert_eq!(flatten_tool_output(&serde_json::json!({"k":1})), r#"{"k":1}"#);
        assert_eq!(flatten_tool_output(&Value::Null), "");
    }

    #[test]
    fn test_line_reader_splits_and_strips_cr() {
        let lines = read_all(b"one\r\ntwo\n\nthree", 64);
        assert_eq!(
            lines,
            vec![
                Ok("one".to_string()),
                Ok("two".to_string()),
                Ok(String::new()),
                Ok("three".to_string()),
            ]
        );
    }

    #[test]
    fn test_line_reader_skips_oversized_line() {
        let mut input = b"short\n".to_vec();
        input.extend(std::iter::repeat(b'x').take(100));
        input.extend_from_slice(b"\nafter\n");

        let lines = read_all(&input, 16);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], Ok("short".to_string()));
        assert!(lines[1].as_ref().unwrap_err().contains("100 bytes"));
        assert_eq!(lines[2], Ok("after".to_string()));
    }

    #[test]
    fn test_line_reader_oversized_across_small_buffer() {
        let mut input = std::iter::repeat(b'y').take(50).collect::<Vec<u8>>();
        input.extend_from_slice(b"\nok\n");
        let reader = std::io::BufReader::with_capacity(8, Cursor::new(input));
        let mut lines = LineReader::new(reader, 10);

        assert!(matches!(
            lines.next_line().unwrap(),
            Some(Err(DecodeError::Oversized { len: 50, max: 10 }))
        ));
        assert_eq!(lines.next_line().unwrap().unwrap().unwrap(), "ok");
        assert!(lines.next_line().unwrap().is_none());
    }

    #[test]
    fn test_line_reader_invalid_utf8() {
        let lines = read_all(b"\xff\xfe\nfine\n", 64);
        assert!(lines[0].is_err());
        assert_eq!(lines[1], Ok("fine".to_string()));
    }
}
