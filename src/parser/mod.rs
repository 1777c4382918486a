//! JSONL session transcript parsing
//!
//! Decode lines into records, resolve assistant message revisions, then build
//! the event timeline and summary.

pub mod claude_code;
pub mod pricing;
pub mod record;
pub mod resolver;
pub mod types;

pub use claude_code::ClaudeCodeParser;
pub use pricing::Pricing;
pub use record::{decode_line, DecodeError, LineReader, RawRecord};
pub use types::*;

use crate::error::{CoreError, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Parser trait for session file formats
pub trait SessionParser: Send + Sync {
    /// Build a session from every decoded record of one file, in file order
    fn parse(&self, source: SessionSource, records: &[RawRecord]) -> Session;

    /// Get the parser name
    fn name(&self) -> &'static str;
}

/// Get a parser for the specified AI tool
pub fn get_parser(tool: &str, pricing: Pricing) -> Option<Box<dyn SessionParser>> {
    match tool {
        "claude_code" | "claude-code" => Some(Box::new(ClaudeCodeParser::new(pricing))),
        _ => None,
    }
}

/// Records decoded from one file plus how many lines were dropped
#[derive(Debug, Default)]
pub struct DecodedFile {
    pub records: Vec<RawRecord>,
    pub skipped_lines: usize,
}

/// Read and decode every line of a transcript.
///
/// Malformed, truncated and oversized lines are skipped; only failing to
/// open or read the file is an error.
pub fn read_records(path: &Path, max_line_bytes: usize) -> Result<DecodedFile> {
    let file = File::open(path)?;
    let mut lines = LineReader::new(BufReader::new(file), max_line_bytes);
    let mut decoded = DecodedFile::default();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line()? {
        line_no += 1;
        match line.and_then(|l| decode_line(&l)) {
            Ok(record) => decoded.records.push(record),
            Err(DecodeError::Empty) => {}
            Err(e) => {
                decoded.skipped_lines += 1;
                tracing::trace!("Skipping line {} of {}: {}", line_no, path.display(), e);
            }
        }
    }

    Ok(decoded)
}

/// Fully parse one transcript file
pub fn parse_session_file(
    path: &Path,
    parser: &dyn SessionParser,
    max_line_bytes: usize,
) -> Result<Session> {
    let source = SessionSource::from_path(path).ok_or_else(|| {
        CoreError::Parser(format!("Not a session transcript path: {}", path.display()))
    })?;

    let decoded = read_records(path, max_line_bytes)?;
    if decoded.skipped_lines > 0 {
        tracing::debug!(
            "Skipped {} malformed lines in {}",
            decoded.skipped_lines,
            path.display()
        );
    }

    Ok(parser.parse(source, &decoded.records))
}

/// Whether a path looks like a session transcript
pub fn is_session_file(path: &Path, include_agents: bool) -> bool {
    if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
        return false;
    }

    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => include_agents || !name.starts_with("agent-"),
        None => false,
    }
}
