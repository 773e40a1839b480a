//! Transactional unit of work exposing the thread/message/run repositories.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row, Transaction};
use tracing::debug;

use parley_types::{
    ChatMessage, ChatRole, MessageId, Run, RunId, RunStatus, Thread, ThreadId, UserId,
};

use crate::error::{Result, StoreError};

/// A transactional view over the chat store.
///
/// Borrowed from an open transaction inside
/// [`ChatStore::with_unit_of_work`](crate::ChatStore::with_unit_of_work);
/// all operations performed through it commit or roll back together.
pub struct UnitOfWork<'tx> {
    tx: &'tx Transaction<'tx>,
}

impl<'tx> UnitOfWork<'tx> {
    pub(crate) fn new(tx: &'tx Transaction<'tx>) -> Self {
        Self { tx }
    }

    // ── Threads ─────────────────────────────────────────────────────────────

    /// Insert a new thread.
    pub fn insert_thread(&self, thread: &Thread) -> Result<()> {
        self.tx.execute(
            r#"
            INSERT INTO threads (id, user_id, title, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                thread.id.to_string(),
                thread.user_id.as_str(),
                thread.title,
                thread.created_at.to_rfc3339(),
                thread.updated_at.to_rfc3339(),
            ],
        )?;

        debug!("Inserted thread {}", thread.id);
        Ok(())
    }

    /// Get a thread by ID without an ownership check.
    pub fn get_thread(&self, id: ThreadId) -> Result<Option<Thread>> {
        let mut stmt = self.tx.prepare(
            "SELECT id, user_id, title, created_at, updated_at FROM threads WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id.to_string()])?;

        match rows.next()? {
            Some(row) => Ok(Some(row_to_thread(row)?)),
            None => Ok(None),
        }
    }

    /// Get a thread scoped to its owner.
    ///
    /// Returns `NotFound` when the thread does not exist and `Forbidden` when
    /// it exists but belongs to another user. The two map to distinct client
    /// error codes.
    pub fn get_thread_owned(&self, id: ThreadId, user_id: &UserId) -> Result<Thread> {
        match self.get_thread(id)? {
            None => Err(StoreError::NotFound(format!("Thread {id}"))),
            Some(thread) if thread.user_id != *user_id => {
                Err(StoreError::Forbidden(format!("Thread {id}")))
            }
            Some(thread) => Ok(thread),
        }
    }

    /// Touch a thread's `updated_at` timestamp.
    pub fn touch_thread(&self, id: ThreadId, at: DateTime<Utc>) -> Result<()> {
        let rows = self.tx.execute(
            "UPDATE threads SET updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), at.to_rfc3339()],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Thread {id}")));
        }
        Ok(())
    }

    /// List threads owned by a user, most recently updated first.
    pub fn list_threads_for_user(&self, user_id: &UserId, limit: usize) -> Result<Vec<Thread>> {
        let mut stmt = self.tx.prepare(
            r#"
            SELECT id, user_id, title, created_at, updated_at
            FROM threads
            WHERE user_id = ?1
            ORDER BY updated_at DESC
            LIMIT ?2
            "#,
        )?;
        let mut rows = stmt.query(params![user_id.as_str(), limit as i64])?;

        let mut threads = Vec::new();
        while let Some(row) = rows.next()? {
            threads.push(row_to_thread(row)?);
        }
        Ok(threads)
    }

    // ── Messages ────────────────────────────────────────────────────────────

    /// Insert a message into its thread.
    pub fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        self.tx.execute(
            r#"
            INSERT INTO messages (id, thread_id, role, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                message.id.to_string(),
                message.thread_id.to_string(),
                message.role.as_str(),
                message.content,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List messages in a thread, oldest first, scoped to the thread owner.
    pub fn list_messages(
        &self,
        user_id: &UserId,
        thread_id: ThreadId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        // Ownership check first so another tenant's history is never read.
        self.get_thread_owned(thread_id, user_id)?;

        let mut stmt = self.tx.prepare(
            r#"
            SELECT id, thread_id, role, content, created_at
            FROM messages
            WHERE thread_id = ?1
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?2
            "#,
        )?;
        let mut rows = stmt.query(params![thread_id.to_string(), limit as i64])?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(row_to_message(row)?);
        }
        Ok(messages)
    }

    // ── Runs ────────────────────────────────────────────────────────────────

    /// Insert a new run.
    pub fn insert_run(&self, run: &Run) -> Result<()> {
        self.tx.execute(
            r#"
            INSERT INTO runs (id, thread_id, agent, status, started_at, completed_at, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                run.id.to_string(),
                run.thread_id.to_string(),
                run.agent,
                run.status.as_str(),
                run.started_at.to_rfc3339(),
                run.completed_at.map(|t| t.to_rfc3339()),
                run.error,
            ],
        )?;

        debug!("Inserted run {} on thread {}", run.id, run.thread_id);
        Ok(())
    }

    /// Get a run by ID.
    pub fn get_run(&self, id: RunId) -> Result<Option<Run>> {
        let mut stmt = self.tx.prepare(
            "SELECT id, thread_id, agent, status, started_at, completed_at, error \
             FROM runs WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id.to_string()])?;

        match rows.next()? {
            Some(row) => Ok(Some(row_to_run(row)?)),
            None => Ok(None),
        }
    }

    /// Get the active (running) run for a thread, if any.
    ///
    /// At most one run per thread is active at a time; the dispatch layer
    /// rejects `start_agent` while one exists.
    pub fn active_run_for_thread(&self, thread_id: ThreadId) -> Result<Option<Run>> {
        let mut stmt = self.tx.prepare(
            r#"
            SELECT id, thread_id, agent, status, started_at, completed_at, error
            FROM runs
            WHERE thread_id = ?1 AND status = 'running'
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )?;
        let mut rows = stmt.query(params![thread_id.to_string()])?;

        match rows.next()? {
            Some(row) => Ok(Some(row_to_run(row)?)),
            None => Ok(None),
        }
    }

    /// Move a run to a terminal state.
    pub fn finish_run(&self, id: RunId, status: RunStatus, error: Option<&str>) -> Result<()> {
        let rows = self.tx.execute(
            r#"
            UPDATE runs
            SET status = ?2, completed_at = ?3, error = ?4
            WHERE id = ?1 AND status = 'running'
            "#,
            params![
                id.to_string(),
                status.as_str(),
                Utc::now().to_rfc3339(),
                error,
            ],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Active run {id}")));
        }
        Ok(())
    }
}

// ── Row conversions ─────────────────────────────────────────────────────────

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("Bad timestamp '{s}': {e}")))
}

fn row_to_thread(row: &Row<'_>) -> Result<Thread> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let title: Option<String> = row.get(2)?;
    let created_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;

    Ok(Thread {
        id: ThreadId::parse(&id)?,
        user_id: UserId::new(user_id),
        title,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_message(row: &Row<'_>) -> Result<ChatMessage> {
    let id: String = row.get(0)?;
    let thread_id: String = row.get(1)?;
    let role: String = row.get(2)?;
    let content: String = row.get(3)?;
    let created_at: String = row.get(4)?;

    Ok(ChatMessage {
        id: MessageId::parse(&id)?,
        thread_id: ThreadId::parse(&thread_id)?,
        role: ChatRole::parse(&role)
            .ok_or_else(|| StoreError::InvalidData(format!("Unknown role '{role}'")))?,
        content,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn row_to_run(row: &Row<'_>) -> Result<Run> {
    let id: String = row.get(0)?;
    let thread_id: String = row.get(1)?;
    let agent: String = row.get(2)?;
    let status: String = row.get(3)?;
    let started_at: String = row.get(4)?;
    let completed_at: Option<String> = row.get(5)?;
    let error: Option<String> = row.get(6)?;

    Ok(Run {
        id: RunId::parse(&id)?,
        thread_id: ThreadId::parse(&thread_id)?,
        agent,
        status: RunStatus::parse(&status)
            .ok_or_else(|| StoreError::InvalidData(format!("Unknown run status '{status}'")))?,
        started_at: parse_timestamp(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
        error,
    })
}
