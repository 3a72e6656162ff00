//! Intent log for two-phase operations.
//!
//! An intent is written before the first phase of an upload, a permanent
//! delete, or a caption write-through, and completed after the second. Anything still pending after a
//! crash or a store failure is picked up by the reconciliation sweep.

use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use chatfs_types::{now_millis, ClusterId, MessageId};

use super::MirrorDb;
use crate::error::{DriveError, DriveResult};

/// What the intent is protecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Store write followed by a mirror sync.
    Upload,
    /// Mirror removal followed by a store delete.
    Delete,
    /// Mirror rename or move followed by a store caption edit. Carries the
    /// target caption.
    Caption,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Upload => "upload",
            IntentKind::Delete => "delete",
            IntentKind::Caption => "caption",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(IntentKind::Upload),
            "delete" => Some(IntentKind::Delete),
            "caption" => Some(IntentKind::Caption),
            _ => None,
        }
    }
}

/// Lifecycle of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    Pending,
    Done,
    /// Given up on (the first phase never happened).
    Abandoned,
}

impl IntentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentState::Pending => "pending",
            IntentState::Done => "done",
            IntentState::Abandoned => "abandoned",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IntentState::Pending),
            "done" => Some(IntentState::Done),
            "abandoned" => Some(IntentState::Abandoned),
            _ => None,
        }
    }
}

/// A persisted intent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Intent {
    pub id: i64,
    pub kind: IntentKind,
    pub cluster_id: ClusterId,
    pub id_message: Option<MessageId>,
    pub caption: Option<String>,
    pub state: IntentState,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

const INTENT_COLUMNS: &str =
    "id, kind, cluster_id, id_message, caption, state, last_error, created_at, updated_at";

fn conversion_error(what: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, what.into())
}

fn row_to_intent(row: &Row<'_>) -> rusqlite::Result<Intent> {
    let kind: String = row.get(1)?;
    let state: String = row.get(5)?;
    Ok(Intent {
        id: row.get(0)?,
        kind: IntentKind::from_str(&kind)
            .ok_or_else(|| conversion_error(format!("unknown intent kind: {kind}")))?,
        cluster_id: ClusterId::new(row.get(2)?),
        id_message: row.get::<_, Option<String>>(3)?.map(MessageId::new),
        caption: row.get(4)?,
        state: IntentState::from_str(&state)
            .ok_or_else(|| conversion_error(format!("unknown intent state: {state}")))?,
        last_error: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl MirrorDb {
    /// Record a pending intent. Returns its id.
    pub fn begin_intent(
        &self,
        kind: IntentKind,
        cluster_id: ClusterId,
        id_message: Option<&MessageId>,
        caption: Option<&str>,
    ) -> DriveResult<i64> {
        let conn = self.conn();
        let now = now_millis();
        conn.execute(
            "INSERT INTO intents (kind, cluster_id, id_message, caption, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)",
            params![
                kind.as_str(),
                cluster_id.get(),
                id_message.map(MessageId::as_str),
                caption,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Attach the store-issued message id once the first phase returns it.
    pub fn attach_intent_message(&self, intent_id: i64, id_message: &MessageId) -> DriveResult<()> {
        self.update_intent(
            "UPDATE intents SET id_message = ?2, updated_at = ?3 WHERE id = ?1",
            params![intent_id, id_message.as_str(), now_millis()],
            intent_id,
        )
    }

    /// Mark an intent done.
    pub fn complete_intent(&self, intent_id: i64) -> DriveResult<()> {
        self.set_intent_state(intent_id, IntentState::Done, None)
    }

    /// Keep an intent pending and record why the last attempt failed.
    pub fn fail_intent(&self, intent_id: i64, error: &str) -> DriveResult<()> {
        self.set_intent_state(intent_id, IntentState::Pending, Some(error))
    }

    /// Give up on an intent whose first phase never took effect.
    pub fn abandon_intent(&self, intent_id: i64, error: &str) -> DriveResult<()> {
        self.set_intent_state(intent_id, IntentState::Abandoned, Some(error))
    }

    /// Pending intents for a cluster, oldest first.
    pub fn pending_intents(&self, cluster_id: ClusterId) -> DriveResult<Vec<Intent>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM intents
             WHERE cluster_id = ?1 AND state = 'pending'
             ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![cluster_id.get()], row_to_intent)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Fetch one intent.
    pub fn get_intent(&self, intent_id: i64) -> DriveResult<Intent> {
        let conn = self.conn();
        let sql = format!("SELECT {INTENT_COLUMNS} FROM intents WHERE id = ?1");
        conn.query_row(&sql, params![intent_id], row_to_intent)
            .optional()?
            .ok_or_else(|| DriveError::not_found(format!("intent {intent_id}")))
    }

    fn set_intent_state(&self, intent_id: i64, state: IntentState, error: Option<&str>) -> DriveResult<()> {
        self.update_intent(
            "UPDATE intents SET state = ?2, last_error = COALESCE(?3, last_error), updated_at = ?4
             WHERE id = ?1",
            params![intent_id, state.as_str(), error, now_millis()],
            intent_id,
        )
    }

    fn update_intent(&self, sql: &str, params: &[&dyn rusqlite::ToSql], intent_id: i64) -> DriveResult<()> {
        let conn = self.conn();
        if conn.execute(sql, params)? == 0 {
            return Err(DriveError::not_found(format!("intent {intent_id}")));
        }
        Ok(())
    }
}
