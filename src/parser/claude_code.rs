//! Claude Code session parser
//!
//! Builds the event timeline and session summary from decoded JSONL records.

use super::pricing::Pricing;
use super::record::{flatten_tool_output, ContentBlock, RawRecord, RecordKind};
use super::resolver::resolve_revisions;
use super::types::*;
use super::SessionParser;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Parser for Claude Code session files
pub struct ClaudeCodeParser {
    pricing: Pricing,
}

impl ClaudeCodeParser {
    pub fn new(pricing: Pricing) -> Self {
        ClaudeCodeParser { pricing }
    }

    fn user_events(&self, record: &RawRecord) -> Vec<Event> {
        // Replayed after a compaction; not something the user did
        if record.is_compact_summary {
            return Vec::new();
        }
        let Some(message) = &record.message else {
            return Vec::new();
        };
        let ts = record.timestamp;

        if let Some(text) = message.text() {
            if text.trim().is_empty() {
                return Vec::new();
            }
            return vec![Event::new(
                ts,
                &record.uuid,
                EventKind::UserPrompt {
                    text: text.to_string(),
                },
            )];
        }

        message
            .blocks()
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some(EventKind::ToolResult {
                    id: tool_use_id,
                    output: flatten_tool_output(&content),
                    is_error,
                }),
                ContentBlock::Text { text } if !text.trim().is_empty() => {
                    Some(EventKind::UserPrompt { text })
                }
                _ => None,
            })
            .map(|kind| Event::new(ts, &record.uuid, kind))
            .collect()
    }

    fn assistant_events(&self, record: &RawRecord) -> Vec<Event> {
        let Some(message) = &record.message else {
            return Vec::new();
        };
        let usage = message.usage();

        message
            .blocks()
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Thinking { thinking } if !thinking.trim().is_empty() => {
                    Some(EventKind::Thinking { text: thinking })
                }
                ContentBlock::Text { text } if !text.trim().is_empty() => {
                    Some(EventKind::Text { text })
                }
                ContentBlock::ToolUse { id, name, input } => {
                    Some(EventKind::ToolUse { name, input, id })
                }
                _ => None,
            })
            .map(|kind| {
                Event::new(record.timestamp, &record.uuid, kind)
                    .with_tokens(usage.input, usage.output)
            })
            .collect()
    }

    fn compaction_event(&self, record: &RawRecord) -> Event {
        let metadata = record.compact_metadata.clone().unwrap_or_default();
        Event::new(
            record.timestamp,
            &record.uuid,
            EventKind::Compaction {
                pre_tokens: metadata.pre_tokens.unwrap_or(0),
                trigger: metadata.trigger,
            },
        )
    }
}

impl Default for ClaudeCodeParser {
    fn default() -> Self {
        Self::new(Pricing::default())
    }
}

impl SessionParser for ClaudeCodeParser {
    fn parse(&self, source: SessionSource, records: &[RawRecord]) -> Session {
        // Every revision must be known before the first event is built
        let resolution = resolve_revisions(records);

        let mut summary = SessionSummary::new(source);
        let mut events = Vec::new();
        let mut emitted: HashSet<&str> = HashSet::new();

        for (index, record) in records.iter().enumerate() {
            observe_record(&mut summary, record);

            let produced = match record.kind {
                RecordKind::System if record.is_compact_boundary() => {
                    vec![self.compaction_event(record)]
                }
                RecordKind::User => self.user_events(record),
                RecordKind::Assistant => {
                    let Some(id) = record.message_id() else {
                        continue;
                    };
                    if emitted.contains(id) || !resolution.is_emission_point(records, index) {
                        continue;
                    }
                    let Some(winner) = resolution.authoritative(id).map(|i| &records[i]) else {
                        continue;
                    };
                    emitted.insert(id);

                    if let Some(message) = &winner.message {
                        summary.tokens += message.usage();
                    }
                    self.assistant_events(winner)
                }
                _ => Vec::new(),
            };

            for event in &produced {
                tally_event(&mut summary, event);
            }
            events.extend(produced);
        }

        // Stable: equal timestamps keep file order
        events.sort_by_key(|e| e.timestamp);

        summary.event_count = events.len();
        summary.cost_usd = self.pricing.estimate(&summary.tokens);

        Session { summary, events }
    }

    fn name(&self) -> &'static str {
        "claude_code"
    }
}

/// Session-level metadata visible on any record
fn observe_record(summary: &mut SessionSummary, record: &RawRecord) {
    if summary.cwd.is_none() && !record.cwd.is_empty() {
        summary.cwd = Some(record.cwd.clone());
    }

    if summary.model.is_none() && record.kind == RecordKind::Assistant && record.message_id().is_some() {
        if let Some(message) = &record.message {
            if !message.model.is_empty() {
                summary.model = Some(message.model.clone());
            }
        }
    }

    if let Some(ts) = record.timestamp {
        summary.start_time = Some(min_ts(summary.start_time, ts));
        summary.last_update = Some(max_ts(summary.last_update, ts));
    }
}

fn min_ts(current: Option<DateTime<Utc>>, ts: DateTime<Utc>) -> DateTime<Utc> {
    current.map_or(ts, |c| c.min(ts))
}

fn max_ts(current: Option<DateTime<Utc>>, ts: DateTime<Utc>) -> DateTime<Utc> {
    current.map_or(ts, |c| c.max(ts))
}

/// Activity counters and file sets
fn tally_event(summary: &mut SessionSummary, event: &Event) {
    match &event.kind {
        EventKind::UserPrompt { .. } => summary.user_prompts += 1,
        EventKind::ToolResult { is_error: true, .. } => summary.errors += 1,
        EventKind::ToolUse { name, .. } => {
            summary.tool_call_count += 1;

            let file_path = event.tool_input_str("file_path").map(str::to_string);
            match name.as_str() {
                "Read" => summary.files_read.extend(file_path),
                "Write" => summary.files_created.extend(file_path),
                "Edit" => summary.files_written.extend(file_path),
                "Bash" => summary.bash_commands += 1,
                _ => {}
            }
        }
        _ => {}
    }
}
