//! SQLite-backed storage for issues, conversation messages, and proposals.
//!
//! One `mend.db` file using WAL mode. The store is mechanism only: it never
//! validates workflow transitions (that is the state machine's job), but it
//! does provide the atomic compare-and-swap on phase kind that closes the
//! concurrent-start race.

use mend_core::{now_rfc3339, Issue, PhaseKind, WorkflowPhase};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS issues (
    id TEXT PRIMARY KEY,
    source_project TEXT NOT NULL,
    source_data TEXT NOT NULL,
    phase_kind TEXT NOT NULL,
    phase TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_issues_updated_at ON issues(updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_issues_phase_kind ON issues(phase_kind);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id TEXT NOT NULL REFERENCES issues(id),
    session_id TEXT NOT NULL,
    phase_kind TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_issue ON messages(issue_id, phase_kind, created_at);

CREATE TABLE IF NOT EXISTS proposals (
    issue_id TEXT PRIMARY KEY REFERENCES issues(id),
    content TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("issue not found: \"{0}\"")]
    NotFound(String),
    #[error("storage failure")]
    Storage(#[from] rusqlite::Error),
    #[error("storage I/O failure")]
    Io(#[from] std::io::Error),
    #[error("phase encode/decode failure")]
    Codec(#[from] serde_json::Error),
}

/// Outcome of a conditional phase update.
#[derive(Debug, Clone)]
pub enum CasOutcome {
    /// The expected-kind check passed and the new phase was written.
    Applied(Issue),
    /// The issue was in a different phase; nothing was written. Carries the
    /// record as it stood so callers can report the conflicting phase.
    Conflict(Issue),
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

/// A row from the append-only `messages` table. Never mutated or reordered;
/// ordering is creation order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub id: i64,
    pub issue_id: String,
    pub session_id: String,
    pub phase_kind: PhaseKind,
    pub role: MessageRole,
    pub content: String,
    pub created_at: String,
}

/// Message fields supplied by the caller; id and timestamp are assigned on
/// append.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub issue_id: String,
    pub session_id: String,
    pub phase_kind: PhaseKind,
    pub role: MessageRole,
    pub content: String,
}

/// The single latest-proposal slot for an issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub issue_id: String,
    pub content: String,
    pub updated_at: String,
}

/// SQLite-backed issue store.
pub struct IssueStore {
    conn: Connection,
}

impl IssueStore {
    /// Open or create the database with full schema.
    pub fn open_or_create(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.apply_pragmas()?;
        store.apply_schema()?;
        Ok(store)
    }

    /// In-memory store, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.apply_schema()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn apply_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('version', '1')",
            [],
        )?;
        Ok(())
    }

    // ── Issues ──────────────────────────────────────────────────────

    /// Insert-if-absent-else-update, applied to source-derived fields only.
    ///
    /// New records start in `Pending`. Existing records get fresh
    /// `source_project`/`source_data` and a bumped `updated_at`; `phase` is
    /// never touched (last write wins on data fields only, so stale or
    /// out-of-order refreshes are harmless).
    pub fn upsert(
        &self,
        id: &str,
        source_project: &str,
        source_data: &serde_json::Value,
    ) -> Result<Issue, StoreError> {
        let now = now_rfc3339();
        let data = serde_json::to_string(source_data)?;
        let pending = serde_json::to_string(&WorkflowPhase::Pending)?;
        self.conn.execute(
            "INSERT INTO issues (id, source_project, source_data, phase_kind, phase, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 source_project = excluded.source_project,
                 source_data = excluded.source_data,
                 updated_at = excluded.updated_at",
            params![id, source_project, data, PhaseKind::Pending.as_str(), pending, now],
        )?;
        self.require(id)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Issue>, StoreError> {
        let row: Option<IssueRow> = self
            .conn
            .query_row(
                "SELECT id, source_project, source_data, phase, created_at, updated_at
                 FROM issues WHERE id = ?1",
                params![id],
                issue_row,
            )
            .optional()?;
        row.map(row_to_issue).transpose()
    }

    fn require(&self, id: &str) -> Result<Issue, StoreError> {
        self.get_by_id(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// All issues, most recently touched first. The ordering backs the
    /// "what changed recently" views and must stay `updated_at DESC`.
    pub fn list_all(&self, limit: u32, offset: u32) -> Result<Vec<Issue>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source_project, source_data, phase, created_at, updated_at
             FROM issues ORDER BY updated_at DESC, id ASC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
            .query_map(params![limit, offset], issue_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(row_to_issue).collect()
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let n: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Issues whose phase kind is in `kinds`. Recovery/sweep input.
    pub fn list_by_phase_kinds(&self, kinds: &[PhaseKind]) -> Result<Vec<Issue>, StoreError> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; kinds.len()].join(", ");
        let sql = format!(
            "SELECT id, source_project, source_data, phase, created_at, updated_at
             FROM issues WHERE phase_kind IN ({placeholders})
             ORDER BY updated_at DESC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params_from_iter(kinds.iter().map(|k| k.as_str())),
                issue_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(row_to_issue).collect()
    }

    /// Unconditional phase overwrite plus `updated_at` bump. Callers must
    /// have validated the transition first.
    pub fn set_phase(&self, id: &str, phase: &WorkflowPhase) -> Result<Issue, StoreError> {
        let now = now_rfc3339();
        let encoded = serde_json::to_string(phase)?;
        let changed = self.conn.execute(
            "UPDATE issues SET phase_kind = ?1, phase = ?2, updated_at = ?3 WHERE id = ?4",
            params![phase.kind().as_str(), encoded, now, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.require(id)
    }

    /// Compare-and-swap on phase kind: write `phase` only if the current
    /// kind is one of `expected`. The check-and-set is a single SQL
    /// statement, so two concurrent transition requests for the same issue
    /// cannot both pass validation.
    pub fn set_phase_if(
        &self,
        id: &str,
        expected: &[PhaseKind],
        phase: &WorkflowPhase,
    ) -> Result<CasOutcome, StoreError> {
        let now = now_rfc3339();
        let encoded = serde_json::to_string(phase)?;
        let placeholders = vec!["?"; expected.len()].join(", ");
        let sql = format!(
            "UPDATE issues SET phase_kind = ?, phase = ?, updated_at = ?
             WHERE id = ? AND phase_kind IN ({placeholders})"
        );
        let mut args: Vec<String> = vec![
            phase.kind().as_str().to_string(),
            encoded,
            now,
            id.to_string(),
        ];
        args.extend(expected.iter().map(|k| k.as_str().to_string()));
        let changed = self.conn.execute(&sql, params_from_iter(args.iter()))?;
        let issue = self.require(id)?;
        if changed == 1 {
            Ok(CasOutcome::Applied(issue))
        } else {
            Ok(CasOutcome::Conflict(issue))
        }
    }

    /// Compare-and-swap on the full phase value: write `phase` only if the
    /// stored phase deep-equals `expected`. Used by agent-driven
    /// completions so a stale event pump can never clobber a phase that was
    /// replaced underneath it.
    pub fn set_phase_if_eq(
        &self,
        id: &str,
        expected: &WorkflowPhase,
        phase: &WorkflowPhase,
    ) -> Result<CasOutcome, StoreError> {
        let now = now_rfc3339();
        let expected_enc = serde_json::to_string(expected)?;
        let encoded = serde_json::to_string(phase)?;
        let changed = self.conn.execute(
            "UPDATE issues SET phase_kind = ?1, phase = ?2, updated_at = ?3
             WHERE id = ?4 AND phase = ?5",
            params![phase.kind().as_str(), encoded, now, id, expected_enc],
        )?;
        let issue = self.require(id)?;
        if changed == 1 {
            Ok(CasOutcome::Applied(issue))
        } else {
            Ok(CasOutcome::Conflict(issue))
        }
    }

    // ── Conversation log ────────────────────────────────────────────

    /// Append to the conversation transcript. Append-only: rows are never
    /// mutated or reordered.
    pub fn append_message(&self, msg: &NewMessage) -> Result<ConversationMessage, StoreError> {
        // Clean NotFound instead of a bare FK violation.
        self.require(&msg.issue_id)?;
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO messages (issue_id, session_id, phase_kind, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                msg.issue_id,
                msg.session_id,
                msg.phase_kind.as_str(),
                msg.role.as_str(),
                msg.content,
                now
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(ConversationMessage {
            id,
            issue_id: msg.issue_id.clone(),
            session_id: msg.session_id.clone(),
            phase_kind: msg.phase_kind,
            role: msg.role,
            content: msg.content.clone(),
            created_at: now,
        })
    }

    /// Transcript for an issue in creation order, optionally restricted to
    /// one phase kind.
    pub fn list_messages(
        &self,
        issue_id: &str,
        phase_kind: Option<PhaseKind>,
    ) -> Result<Vec<ConversationMessage>, StoreError> {
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<MessageRow> {
            Ok(MessageRow {
                id: row.get(0)?,
                issue_id: row.get(1)?,
                session_id: row.get(2)?,
                phase_kind: row.get(3)?,
                role: row.get(4)?,
                content: row.get(5)?,
                created_at: row.get(6)?,
            })
        };
        let rows = match phase_kind {
            Some(kind) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, issue_id, session_id, phase_kind, role, content, created_at
                     FROM messages WHERE issue_id = ?1 AND phase_kind = ?2 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map(params![issue_id, kind.as_str()], map_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, issue_id, session_id, phase_kind, role, content, created_at
                     FROM messages WHERE issue_id = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map(params![issue_id], map_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        rows.into_iter().map(row_to_message).collect()
    }

    // ── Proposal slot ───────────────────────────────────────────────

    /// Create-or-replace the single proposal slot for an issue.
    pub fn upsert_proposal(&self, issue_id: &str, content: &str) -> Result<Proposal, StoreError> {
        self.require(issue_id)?;
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO proposals (issue_id, content, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(issue_id) DO UPDATE SET
                 content = excluded.content,
                 updated_at = excluded.updated_at",
            params![issue_id, content, now],
        )?;
        Ok(Proposal {
            issue_id: issue_id.to_string(),
            content: content.to_string(),
            updated_at: now,
        })
    }

    pub fn get_proposal(&self, issue_id: &str) -> Result<Option<Proposal>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT issue_id, content, updated_at FROM proposals WHERE issue_id = ?1",
                params![issue_id],
                |row| {
                    Ok(Proposal {
                        issue_id: row.get(0)?,
                        content: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

struct IssueRow {
    id: String,
    source_project: String,
    source_data: String,
    phase: String,
    created_at: String,
    updated_at: String,
}

fn issue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IssueRow> {
    Ok(IssueRow {
        id: row.get(0)?,
        source_project: row.get(1)?,
        source_data: row.get(2)?,
        phase: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_issue(row: IssueRow) -> Result<Issue, StoreError> {
    Ok(Issue {
        id: row.id,
        source_project: row.source_project,
        source_data: serde_json::from_str(&row.source_data)?,
        phase: serde_json::from_str(&row.phase)?,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

struct MessageRow {
    id: i64,
    issue_id: String,
    session_id: String,
    phase_kind: String,
    role: String,
    content: String,
    created_at: String,
}

fn row_to_message(row: MessageRow) -> Result<ConversationMessage, StoreError> {
    let phase_kind = PhaseKind::parse(&row.phase_kind)
        .ok_or_else(|| StoreError::Codec(serde::de::Error::custom("unknown phase kind")))?;
    let role = MessageRole::parse(&row.role)
        .ok_or_else(|| StoreError::Codec(serde::de::Error::custom("unknown message role")))?;
    Ok(ConversationMessage {
        id: row.id,
        issue_id: row.issue_id,
        session_id: row.session_id,
        phase_kind,
        role,
        content: row.content,
        created_at: row.created_at,
    })
}
