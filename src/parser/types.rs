//! Session and event types produced by the parsers

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

/// Named tool parameters, passed through verbatim from the transcript.
///
/// Values keep their JSON shape (string, number, boolean, nested map or list),
/// so known tools can be matched on while unknown ones pass through opaquely.
pub type ToolInput = serde_json::Map<String, Value>;

/// One displayable occurrence in a session's timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// When the originating record was written (None if unparseable)
    pub timestamp: Option<DateTime<Utc>>,

    /// Identifier of the raw record this event came from
    pub uuid: String,

    /// Input tokens of the assistant message containing this event
    #[serde(skip_serializing_if = "is_zero")]
    pub input_tokens: u64,

    /// Output tokens of the assistant message containing this event
    #[serde(skip_serializing_if = "is_zero")]
    pub output_tokens: u64,

    #[serde(flatten)]
    pub kind: EventKind,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Variant-specific event payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    UserPrompt {
        text: String,
    },
    Thinking {
        text: String,
    },
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        input: ToolInput,
        /// Correlation id matched by the later `ToolResult`
        id: String,
    },
    ToolResult {
        /// Correlation id of the `ToolUse` this answers (not validated)
        id: String,
        output: String,
        is_error: bool,
    },
    System {
        text: String,
    },
    Compaction {
        pre_tokens: u64,
        trigger: String,
    },
}

impl Event {
    pub fn new(timestamp: Option<DateTime<Utc>>, uuid: &str, kind: EventKind) -> Self {
        Event {
            timestamp,
            uuid: uuid.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            kind,
        }
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    /// Short name of the variant, e.g. "tool_use"
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            EventKind::UserPrompt { .. } => "user_prompt",
            EventKind::Thinking { .. } => "thinking",
            EventKind::Text { .. } => "text",
            EventKind::ToolUse { .. } => "tool_use",
            EventKind::ToolResult { .. } => "tool_result",
            EventKind::System { .. } => "system",
            EventKind::Compaction { .. } => "compaction",
        }
    }

    /// String parameter of a tool call, if this is one and the key holds a string
    pub fn tool_input_str(&self, key: &str) -> Option<&str> {
        match &self.kind {
            EventKind::ToolUse { input, .. } => input.get(key).and_then(Value::as_str),
            _ => None,
        }
    }
}

/// The four token counters reported by the model API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input
            .saturating_add(self.output)
            .saturating_add(self.cache_read)
            .saturating_add(self.cache_write)
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input = self.input.saturating_add(rhs.input);
        self.output = self.output.saturating_add(rhs.output);
        self.cache_read = self.cache_read.saturating_add(rhs.cache_read);
        self.cache_write = self.cache_write.saturating_add(rhs.cache_write);
    }
}

/// Where a session transcript lives and what its path says about it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSource {
    /// Session identifier (file stem)
    pub id: String,

    /// Project path decoded from the project directory name
    pub project_dir: String,

    /// Last component of `project_dir`
    pub project_name: String,

    /// Full path to the transcript
    pub file_path: PathBuf,

    /// `agent-*` files are subagent sidecar sessions
    pub is_agent: bool,
}

impl SessionSource {
    /// Derive identity from `<base>/<project-dir>/<session-id>.jsonl`.
    ///
    /// Project directories encode the project path with `/` replaced by `-`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let id = path.file_stem()?.to_str()?.to_string();
        let dir_name = path.parent()?.file_name()?.to_str()?;

        let project_dir = dir_name.replace('-', "/");
        let project_name = Path::new(&project_dir)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&project_dir)
            .to_string();

        Some(SessionSource {
            id,
            project_dir,
            project_name,
            file_path: path.to_path_buf(),
            is_agent: file_name.starts_with("agent-"),
        })
    }
}

/// Derived per-session metadata, rebuilt on every parse
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub project_dir: String,
    pub project_name: String,
    pub file_path: PathBuf,
    pub is_agent: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub start_time: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,

    pub tokens: TokenUsage,
    pub cost_usd: f64,

    pub event_count: usize,
    pub tool_call_count: usize,
    pub user_prompts: usize,
    pub bash_commands: usize,
    pub errors: usize,

    pub files_read: BTreeSet<String>,
    /// Paths touched by `Edit`
    pub files_written: BTreeSet<String>,
    /// Paths touched by `Write`
    pub files_created: BTreeSet<String>,
}

impl SessionSummary {
    pub fn new(source: SessionSource) -> Self {
        SessionSummary {
            id: source.id,
            project_dir: source.project_dir,
            project_name: source.project_name,
            file_path: source.file_path,
            is_agent: source.is_agent,
            cwd: None,
            model: None,
            start_time: None,
            last_update: None,
            tokens: TokenUsage::default(),
            cost_usd: 0.0,
            event_count: 0,
            tool_call_count: 0,
            user_prompts: 0,
            bash_commands: 0,
            errors: 0,
            files_read: BTreeSet::new(),
            files_written: BTreeSet::new(),
            files_created: BTreeSet::new(),
        }
    }

    /// Whether this session belongs to `project` by name or decoded path
    pub fn matches_project(&self, project: &str) -> bool {
        self.project_name == project || self.project_dir == project
    }
}

/// A fully parsed session: summary plus ordered timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub summary: SessionSummary,
    pub events: Vec<Event>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.summary.id
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
