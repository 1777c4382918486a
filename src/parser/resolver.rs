//! Revision resolution for incrementally rewritten assistant messages
//!
//! The transcript writer appends a new record every time an assistant
//! message grows, all sharing the same message id. Only the latest revision
//! is authoritative. Resolution runs over the complete record list before
//! any event is built, so nothing is ever emitted and later retracted.

use super::record::{RawRecord, RecordKind};
use std::collections::HashMap;

/// Authoritative record per assistant message id
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Resolution {
    authoritative: HashMap<String, usize>,
}

impl Resolution {
    /// Index (into the record slice) of the authoritative revision
    pub fn authoritative(&self, message_id: &str) -> Option<usize> {
        self.authoritative.get(message_id).copied()
    }

    /// Whether the record at `index` is where the message should be emitted.
    ///
    /// That is the authoritative record itself, or an earlier byte-for-byte
    /// copy of it (same record uuid). Callers still emit each id only once.
    pub fn is_emission_point(&self, records: &[RawRecord], index: usize) -> bool {
        let record = &records[index];
        let Some(id) = record.message_id() else {
            return false;
        };
        let Some(winner) = self.authoritative(id) else {
            return false;
        };
        winner == index || (!record.uuid.is_empty() && records[winner].uuid == record.uuid)
    }
}

/// Pick the authoritative revision of every assistant message.
///
/// The latest timestamp wins. On equal timestamps the record later in the
/// file wins: the file is append-only, so a later position cannot hold older
/// content. Records without a timestamp order before any dated record.
pub fn resolve_revisions(records: &[RawRecord]) -> Resolution {
    let mut authoritative: HashMap<String, usize> = HashMap::new();

    for (index, record) in records.iter().enumerate() {
        if record.kind != RecordKind::Assistant {
            continue;
        }
        let Some(id) = record.message_id() else {
            continue;
        };

        match authoritative.get_mut(id) {
            Some(best) => {
                if record.timestamp >= records[*best].timestamp {
                    *best = index;
                }
            }
            None => {
                authoritative.insert(id.to_string(), index);
            }
        }
    }

    Resolution { authoritative }
}
