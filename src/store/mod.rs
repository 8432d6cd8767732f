//! SQLite-backed ticket persistence.
//!
//! One `tickets` table; `confirmations` and `feedback_history` are JSON text
//! columns that are (de)serialized into typed structures at this boundary;
//! nothing above the store ever touches the raw JSON. The connection sits
//! behind a mutex and every mutation runs in a transaction, so state
//! transitions for a given ticket serialize: two near-simultaneous
//! confirmations from the same team cannot both commit, and the final
//! confirmation cannot race a cancellation into two terminal states.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use log::warn;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::classifier::Team;
use crate::error::{Result, TicketError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketState {
    Pending,
    Completed,
    Cancelled,
}

impl TicketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Confirmation,
    FeedbackResponse,
}

/// One entry in a ticket's append-only history: a team-scoped acknowledgment
/// or a free-text update that does not close out the team's portion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub user_id: String,
    /// `None` for reporter-side comments.
    pub team: Option<Team>,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
    pub kind: FeedbackKind,
}

#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: i64,
    pub unique_message_id: String,
    pub original_msg_id: String,
    pub description: String,
    pub reporter_id: String,
    pub created_at: DateTime<Utc>,
    pub state: TicketState,
    pub categories: Vec<Team>,
    pub confirmations: BTreeMap<Team, DateTime<Utc>>,
    pub feedback_history: Vec<FeedbackRecord>,
    pub origin_channel: String,
    pub media: Option<String>,
    pub phase: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    pub completed_by_name: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Teams that have confirmed, restricted to the required categories.
    pub fn confirmed_teams(&self) -> Vec<Team> {
        self.categories
            .iter()
            .copied()
            .filter(|t| self.confirmations.contains_key(t))
            .collect()
    }

    /// Required categories still waiting for a confirmation.
    pub fn outstanding_teams(&self) -> Vec<Team> {
        self.categories
            .iter()
            .copied()
            .filter(|t| !self.confirmations.contains_key(t))
            .collect()
    }

    /// "k/n" derived from confirmations vs categories.
    pub fn phase_string(&self) -> String {
        format!("{}/{}", self.confirmed_teams().len(), self.categories.len())
    }
}

/// Fields supplied by the coordinator when a new report is accepted.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub unique_message_id: String,
    pub original_msg_id: String,
    pub description: String,
    pub reporter_id: String,
    pub categories: Vec<Team>,
    pub origin_channel: String,
    pub media: Option<String>,
}

pub struct TicketStore {
    conn: Arc<Mutex<Connection>>,
}

impl TicketStore {
    /// Open or create the store at `path`, creating missing parent
    /// directories first so a fresh deployment works with the default path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Private in-memory store; used by tests and the resolver fallback path.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("ticket store lock poisoned")
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                unique_message_id TEXT NOT NULL,
                original_msg_id TEXT NOT NULL,
                description TEXT NOT NULL,
                reporter_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                categories TEXT NOT NULL,
                confirmations TEXT NOT NULL DEFAULT '{}',
                feedback_history TEXT NOT NULL DEFAULT '[]',
                origin_channel TEXT NOT NULL,
                media TEXT,
                phase TEXT,
                cancelled_at TEXT,
                completed_by TEXT,
                completed_by_name TEXT,
                completed_at TEXT
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tickets_unique_msg ON tickets(unique_message_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tickets_original_msg ON tickets(original_msg_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tickets_state ON tickets(state)",
            [],
        )?;
        Ok(())
    }

    /// Insert a new Pending ticket and return its assigned id.
    pub fn create(&self, new: &NewTicket) -> Result<i64> {
        if new.categories.is_empty() {
            return Err(TicketError::Validation(
                "a ticket needs at least one category".into(),
            ));
        }
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO tickets
                (unique_message_id, original_msg_id, description, reporter_id,
                 created_at, state, categories, confirmations, feedback_history,
                 origin_channel, media)
            VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, '{}', '[]', ?7, ?8)
            "#,
            params![
                new.unique_message_id,
                new.original_msg_id,
                new.description,
                new.reporter_id,
                Utc::now(),
                join_categories(&new.categories),
                new.origin_channel,
                new.media,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Ticket>> {
        let conn = self.lock();
        conn.query_row("SELECT * FROM tickets WHERE id = ?1", params![id], row_to_ticket)
            .optional()
            .map_err(TicketError::from)
    }

    pub fn find_by_unique_message_id(&self, unique_id: &str) -> Result<Option<Ticket>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM tickets WHERE unique_message_id = ?1 LIMIT 1",
            params![unique_id],
            row_to_ticket,
        )
        .optional()
        .map_err(TicketError::from)
    }

    pub fn find_by_original_msg_id(&self, original_id: &str) -> Result<Option<Ticket>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM tickets WHERE original_msg_id = ?1 LIMIT 1",
            params![original_id],
            row_to_ticket,
        )
        .optional()
        .map_err(TicketError::from)
    }

    /// Record a team's confirmation and append its Confirmation record in one
    /// transaction. The duplicate check and the write are atomic with respect
    /// to concurrent confirmations for the same ticket/team pair.
    ///
    /// Returns the updated ticket so the caller can derive the phase without
    /// a second read.
    pub fn record_confirmation(&self, id: i64, team: Team, record: FeedbackRecord) -> Result<Ticket> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let ticket = tx
            .query_row("SELECT * FROM tickets WHERE id = ?1", params![id], row_to_ticket)
            .optional()?
            .ok_or(TicketError::NotFound(id))?;

        if ticket.state != TicketState::Pending {
            return Err(TicketError::PreconditionFailed {
                id,
                state: ticket.state.as_str().to_string(),
            });
        }
        // Confirmations stay a subset of the required categories; a reply in
        // a channel whose team was reclassified away must not count.
        if !ticket.categories.contains(&team) {
            return Err(TicketError::Validation(format!(
                "team {} is not a category of ticket {id}",
                team.code()
            )));
        }
        if ticket.confirmations.contains_key(&team) {
            return Err(TicketError::AlreadyConfirmed {
                id,
                team: team.code().to_string(),
            });
        }

        let mut confirmations = ticket.confirmations.clone();
        confirmations.insert(team, record.timestamp);
        let mut history = ticket.feedback_history.clone();
        history.push(record);

        tx.execute(
            "UPDATE tickets SET confirmations = ?1, feedback_history = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(&confirmations)?,
                serde_json::to_string(&history)?,
                id
            ],
        )?;
        tx.commit()?;

        let mut updated = ticket;
        updated.confirmations = confirmations;
        updated.feedback_history = history;
        Ok(updated)
    }

    /// Append one record to the feedback history. Append-only: the history is
    /// never reordered or truncated.
    pub fn append_feedback(&self, id: i64, record: FeedbackRecord) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT feedback_history FROM tickets WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or(TicketError::NotFound(id))?;

        let mut history: Vec<FeedbackRecord> = serde_json::from_str(&raw).unwrap_or_default();
        history.push(record);

        tx.execute(
            "UPDATE tickets SET feedback_history = ?1 WHERE id = ?2",
            params![serde_json::to_string(&history)?, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn update_phase(&self, id: i64, phase: &str) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE tickets SET phase = ?1 WHERE id = ?2",
            params![phase, id],
        )?;
        if changed == 0 {
            return Err(TicketError::NotFound(id));
        }
        Ok(())
    }

    /// Transition to Completed. Conditional write: only a Pending ticket can
    /// complete, so a final confirmation cannot override a cancellation.
    pub fn complete(
        &self,
        id: i64,
        completed_by: &str,
        completed_by_name: &str,
        completed_at: DateTime<Utc>,
        phase: &str,
    ) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            r#"
            UPDATE tickets
               SET state = 'completed', completed_by = ?1, completed_by_name = ?2,
                   completed_at = ?3, phase = ?4
             WHERE id = ?5 AND state = 'pending'
            "#,
            params![completed_by, completed_by_name, completed_at, phase, id],
        )?;
        if changed == 0 {
            return Err(self.transition_failure(&conn, id));
        }
        Ok(())
    }

    /// Transition to Cancelled. Conditional write: zero rows affected surfaces
    /// as `PreconditionFailed` (or `NotFound`), never as success.
    pub fn cancel(&self, id: i64) -> Result<DateTime<Utc>> {
        let conn = self.lock();
        let cancelled_at = Utc::now();
        let changed = conn.execute(
            "UPDATE tickets SET state = 'cancelled', cancelled_at = ?1 \
             WHERE id = ?2 AND state = 'pending'",
            params![cancelled_at, id],
        )?;
        if changed == 0 {
            return Err(self.transition_failure(&conn, id));
        }
        Ok(cancelled_at)
    }

    /// Distinguish "wrong state" from "no such ticket" after a conditional
    /// update touched zero rows.
    fn transition_failure(&self, conn: &Connection, id: i64) -> TicketError {
        let state: std::result::Result<String, _> = conn.query_row(
            "SELECT state FROM tickets WHERE id = ?1",
            params![id],
            |row| row.get(0),
        );
        match state {
            Ok(state) => TicketError::PreconditionFailed { id, state },
            Err(rusqlite::Error::QueryReturnedNoRows) => TicketError::NotFound(id),
            Err(e) => TicketError::Persistence(e),
        }
    }

    /// Reconciliation path for post-submission edits.
    pub fn update_categories(&self, id: i64, categories: &[Team]) -> Result<()> {
        if categories.is_empty() {
            return Err(TicketError::Validation(
                "categories cannot become empty".into(),
            ));
        }
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE tickets SET categories = ?1 WHERE id = ?2",
            params![join_categories(categories), id],
        )?;
        if changed == 0 {
            return Err(TicketError::NotFound(id));
        }
        Ok(())
    }

    pub fn update_description(&self, id: i64, description: &str) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE tickets SET description = ?1 WHERE id = ?2",
            params![description, id],
        )?;
        if changed == 0 {
            return Err(TicketError::NotFound(id));
        }
        Ok(())
    }

    /// Read API for the report exporter.
    pub fn list_by_category(&self, team: Team) -> Result<Vec<Ticket>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM tickets WHERE categories LIKE ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![format!("%{}%", team.code())], row_to_ticket)?;
        let mut out = Vec::new();
        for row in rows {
            let ticket = row?;
            // LIKE is a coarse filter; confirm on the parsed list.
            if ticket.categories.contains(&team) {
                out.push(ticket);
            }
        }
        Ok(out)
    }

    /// Tickets created on one calendar day (UTC).
    pub fn list_by_date(&self, date: NaiveDate) -> Result<Vec<Ticket>> {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        let end = start + Duration::days(1);
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM tickets WHERE created_at >= ?1 AND created_at < ?2 \
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![start, end], row_to_ticket)?;
        rows.map(|r| r.map_err(TicketError::from)).collect()
    }

    pub fn list_by_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM tickets WHERE created_at >= ?1 AND created_at <= ?2 \
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![from, to], row_to_ticket)?;
        rows.map(|r| r.map_err(TicketError::from)).collect()
    }
}

fn join_categories(categories: &[Team]) -> String {
    categories
        .iter()
        .map(Team::code)
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_categories(raw: &str) -> Vec<Team> {
    let mut out = Vec::new();
    for code in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match Team::from_str(code) {
            Ok(team) => {
                if !out.contains(&team) {
                    out.push(team);
                }
            }
            Err(_) => warn!("ignoring unknown team code in stored categories: {code}"),
        }
    }
    out
}

fn row_to_ticket(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    let categories: String = row.get("categories")?;
    let confirmations_raw: String = row.get("confirmations")?;
    let history_raw: String = row.get("feedback_history")?;
    let state_raw: String = row.get("state")?;

    Ok(Ticket {
        id: row.get("id")?,
        unique_message_id: row.get("unique_message_id")?,
        original_msg_id: row.get("original_msg_id")?,
        description: row.get("description")?,
        reporter_id: row.get("reporter_id")?,
        created_at: row.get("created_at")?,
        state: TicketState::parse(&state_raw),
        categories: parse_categories(&categories),
        confirmations: serde_json::from_str(&confirmations_raw).unwrap_or_default(),
        feedback_history: serde_json::from_str(&history_raw).unwrap_or_default(),
        origin_channel: row.get("origin_channel")?,
        media: row.get("media")?,
        phase: row.get("phase")?,
        cancelled_at: row.get("cancelled_at")?,
        completed_by: row.get("completed_by")?,
        completed_by_name: row.get("completed_by_name")?,
        completed_at: row.get("completed_at")?,
    })
}
