//! Workspace persistence (SQLite).
//!
//! Bare-metal local DB for the mentoring session state: identities, session
//! tokens, workspaces, ordered levels, append-only messages, and the quota
//! ledger rows. IDs are role-prefixed (`ws_`, `lvl_`, `msg_`, `qta_`) purely
//! for human debuggability.
//!
//! Every write below a workspace is ownership-scoped: handlers call
//! [`WorkspaceStore::find_owned`] before any mutation, and the workspace
//! queries themselves carry the `user_id` predicate.

use dojo_core::{Persona, Role};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::PathBuf;

/// Level titles the client seeds before the user picks a real first
/// objective. A workspace whose single level carries one of these is still
/// onboarding: the first real level replaces it instead of appending.
const ONBOARDING_PLACEHOLDERS: [&str; 3] = [
    "Pending Onboarding...",
    "Waiting for topic selection...",
    "Restored Session",
];

pub fn is_onboarding_placeholder(task_title: &str) -> bool {
    ONBOARDING_PLACEHOLDERS.contains(&task_title)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn prefixed_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4())
}

fn parse_role(idx: usize, raw: String) -> rusqlite::Result<Role> {
    Role::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown message role '{}'", raw).into(),
        )
    })
}

fn parse_persona(idx: usize, raw: String) -> rusqlite::Result<Persona> {
    Persona::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown persona '{}'", raw).into(),
        )
    })
}

#[derive(Clone)]
pub struct WorkspaceStore {
    db_path: PathBuf,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRow {
    pub id: String,
    pub user_id: String,
    pub persona: Persona,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelRow {
    pub id: String,
    pub workspace_id: String,
    pub step_number: i64,
    pub task_title: String,
    pub code_snapshot: String,
    pub language: String,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: String,
    pub workspace_id: String,
    pub role: Role,
    pub content: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRow {
    pub id: String,
    pub user_id: String,
    pub message_count: i64,
    pub last_reset_at_ms: i64,
}

/// Tab-bar listing: workspace plus the title of its newest level.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSummary {
    pub id: String,
    pub user_id: String,
    pub persona: Persona,
    pub updated_at_ms: i64,
    pub workspace_levels: Vec<LevelTitle>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelTitle {
    pub task_title: String,
}

/// Full workspace payload for hydration: messages ascending by creation
/// time, levels ascending by step number.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspacePayload {
    #[serde(flatten)]
    pub workspace: WorkspaceRow,
    pub messages: Vec<MessageRow>,
    pub workspace_levels: Vec<LevelRow>,
}

impl WorkspaceStore {
    pub fn new(db_path: PathBuf) -> Result<Self, rusqlite::Error> {
        let this = Self { db_path };
        this.init()?;
        Ok(this)
    }

    fn open(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        // Enforce FK constraints on every connection (SQLite default is OFF unless set).
        let _ = conn.pragma_update(None, "foreign_keys", "ON");
        Ok(conn)
    }

    fn init(&self) -> Result<(), rusqlite::Error> {
        if let Some(parent) = self.db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = self.open()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                created_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS auth_sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at_ms INTEGER NOT NULL,
                FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS workspaces (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                persona TEXT NOT NULL,
                updated_at_ms INTEGER NOT NULL,
                FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_workspaces_user_id ON workspaces(user_id);

            CREATE TABLE IF NOT EXISTS workspace_levels (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                step_number INTEGER NOT NULL,
                task_title TEXT NOT NULL,
                code_snapshot TEXT NOT NULL,
                language TEXT NOT NULL,
                FOREIGN KEY(workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE,
                UNIQUE(workspace_id, step_number)
            );

            CREATE INDEX IF NOT EXISTS idx_levels_workspace_id ON workspace_levels(workspace_id);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                FOREIGN KEY(workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_workspace_id ON messages(workspace_id);
            CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at_ms);

            CREATE TABLE IF NOT EXISTS user_quotas (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL UNIQUE,
                message_count INTEGER NOT NULL,
                last_reset_at_ms INTEGER NOT NULL,
                FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            "#,
        )?;
        Ok(())
    }

    // --- identities & sessions ---

    pub fn upsert_user(&self, user_id: &str, email: &str) -> Result<(), rusqlite::Error> {
        let conn = self.open()?;
        conn.execute(
            r#"
            INSERT INTO users (id, email, created_at_ms)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET email = excluded.email
            "#,
            params![user_id, email, now_ms()],
        )?;
        Ok(())
    }

    pub fn create_session(
        &self,
        token: &str,
        user_id: &str,
        expires_at_ms: i64,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.open()?;
        conn.execute(
            r#"
            INSERT INTO auth_sessions (token, user_id, expires_at_ms)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(token) DO UPDATE SET
                user_id = excluded.user_id,
                expires_at_ms = excluded.expires_at_ms
            "#,
            params![token, user_id, expires_at_ms],
        )?;
        Ok(())
    }

    /// Resolves a session token to its user id; expired tokens resolve to None.
    pub fn resolve_session(&self, token: &str) -> Result<Option<String>, rusqlite::Error> {
        let conn = self.open()?;
        let user_id: Option<String> = conn
            .query_row(
                "SELECT user_id FROM auth_sessions WHERE token = ?1 AND expires_at_ms > ?2",
                params![token, now_ms()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(user_id)
    }

    // --- workspaces ---

    pub fn create_workspace(
        &self,
        user_id: &str,
        persona: Persona,
    ) -> Result<WorkspaceRow, rusqlite::Error> {
        let conn = self.open()?;
        let id = prefixed_id("ws");
        let ts = now_ms();
        conn.execute(
            "INSERT INTO workspaces (id, user_id, persona, updated_at_ms) VALUES (?1, ?2, ?3, ?4)",
            params![id, user_id, persona.as_str(), ts],
        )?;
        Ok(WorkspaceRow {
            id,
            user_id: user_id.to_string(),
            persona,
            updated_at_ms: ts,
        })
    }

    /// The ownership guard primitive: the workspace row only when it exists
    /// AND belongs to `user_id`. Callers must not distinguish the two
    /// failure causes.
    pub fn find_owned(
        &self,
        workspace_id: &str,
        user_id: &str,
    ) -> Result<Option<WorkspaceRow>, rusqlite::Error> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, user_id, persona, updated_at_ms FROM workspaces WHERE id = ?1 AND user_id = ?2",
                params![workspace_id, user_id],
                |r| {
                    Ok(WorkspaceRow {
                        id: r.get(0)?,
                        user_id: r.get(1)?,
                        persona: parse_persona(2, r.get(2)?)?,
                        updated_at_ms: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Owned workspaces newest-first, each with its latest level title for
    /// the tab bar.
    pub fn list_workspaces(&self, user_id: &str) -> Result<Vec<WorkspaceSummary>, rusqlite::Error> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, persona, updated_at_ms FROM workspaces WHERE user_id = ?1 ORDER BY updated_at_ms DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], |r| {
                Ok(WorkspaceRow {
                    id: r.get(0)?,
                    user_id: r.get(1)?,
                    persona: parse_persona(2, r.get(2)?)?,
                    updated_at_ms: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut summaries = Vec::with_capacity(rows.len());
        for ws in rows {
            let title: Option<String> = conn
                .query_row(
                    "SELECT task_title FROM workspace_levels WHERE workspace_id = ?1 ORDER BY step_number DESC LIMIT 1",
                    params![ws.id],
                    |r| r.get(0),
                )
                .optional()?;
            summaries.push(WorkspaceSummary {
                id: ws.id,
                user_id: ws.user_id,
                persona: ws.persona,
                updated_at_ms: ws.updated_at_ms,
                workspace_levels: title.into_iter().map(|t| LevelTitle { task_title: t }).collect(),
            });
        }
        Ok(summaries)
    }

    /// Hydration payload: the owned workspace with messages (ascending by
    /// creation time) and levels (ascending by step number).
    pub fn fetch_workspace(
        &self,
        workspace_id: &str,
        user_id: &str,
    ) -> Result<Option<WorkspacePayload>, rusqlite::Error> {
        let Some(workspace) = self.find_owned(workspace_id, user_id)? else {
            return Ok(None);
        };
        Ok(Some(WorkspacePayload {
            messages: self.list_messages(workspace_id)?,
            workspace_levels: self.list_levels(workspace_id)?,
            workspace,
        }))
    }

    pub fn update_persona(
        &self,
        workspace_id: &str,
        user_id: &str,
        persona: Persona,
    ) -> Result<bool, rusqlite::Error> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE workspaces SET persona = ?1, updated_at_ms = ?2 WHERE id = ?3 AND user_id = ?4",
            params![persona.as_str(), now_ms(), workspace_id, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Cascades to levels and messages through the FK constraints.
    pub fn delete_workspace(
        &self,
        workspace_id: &str,
        user_id: &str,
    ) -> Result<bool, rusqlite::Error> {
        let conn = self.open()?;
        let changed = conn.execute(
            "DELETE FROM workspaces WHERE id = ?1 AND user_id = ?2",
            params![workspace_id, user_id],
        )?;
        Ok(changed > 0)
    }

    // --- messages ---

    pub fn append_message(
        &self,
        workspace_id: &str,
        role: Role,
        content: &str,
    ) -> Result<MessageRow, rusqlite::Error> {
        let conn = self.open()?;
        let id = prefixed_id("msg");
        let ts = now_ms();
        conn.execute(
            "INSERT INTO messages (id, workspace_id, role, content, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, workspace_id, role.as_str(), content, ts],
        )?;
        conn.execute(
            "UPDATE workspaces SET updated_at_ms = ?1 WHERE id = ?2",
            params![ts, workspace_id],
        )?;
        Ok(MessageRow {
            id,
            workspace_id: workspace_id.to_string(),
            role,
            content: content.to_string(),
            created_at_ms: ts,
        })
    }

    pub fn list_messages(&self, workspace_id: &str) -> Result<Vec<MessageRow>, rusqlite::Error> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, workspace_id, role, content, created_at_ms FROM messages WHERE workspace_id = ?1 ORDER BY created_at_ms ASC",
        )?;
        let rows = stmt
            .query_map(params![workspace_id], |r| {
                Ok(MessageRow {
                    id: r.get(0)?,
                    workspace_id: r.get(1)?,
                    role: parse_role(2, r.get(2)?)?,
                    content: r.get(3)?,
                    created_at_ms: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // --- levels ---

    pub fn create_level(
        &self,
        workspace_id: &str,
        step_number: i64,
        task_title: &str,
        code_snapshot: &str,
        language: &str,
    ) -> Result<LevelRow, rusqlite::Error> {
        let conn = self.open()?;
        let id = prefixed_id("lvl");
        conn.execute(
            "INSERT INTO workspace_levels (id, workspace_id, step_number, task_title, code_snapshot, language) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, workspace_id, step_number, task_title, code_snapshot, language],
        )?;
        Ok(LevelRow {
            id,
            workspace_id: workspace_id.to_string(),
            step_number,
            task_title: task_title.to_string(),
            code_snapshot: code_snapshot.to_string(),
            language: language.to_string(),
        })
    }

    pub fn list_levels(&self, workspace_id: &str) -> Result<Vec<LevelRow>, rusqlite::Error> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, workspace_id, step_number, task_title, code_snapshot, language FROM workspace_levels WHERE workspace_id = ?1 ORDER BY step_number ASC",
        )?;
        let rows = stmt
            .query_map(params![workspace_id], |r| {
                Ok(LevelRow {
                    id: r.get(0)?,
                    workspace_id: r.get(1)?,
                    step_number: r.get(2)?,
                    task_title: r.get(3)?,
                    code_snapshot: r.get(4)?,
                    language: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Periodic client save: replaces only the code snapshot of one
    /// `(workspace, step)` pair.
    pub fn update_level_snapshot(
        &self,
        workspace_id: &str,
        step_number: i64,
        code_snapshot: &str,
    ) -> Result<bool, rusqlite::Error> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE workspace_levels SET code_snapshot = ?1 WHERE workspace_id = ?2 AND step_number = ?3",
            params![code_snapshot, workspace_id, step_number],
        )?;
        Ok(changed > 0)
    }

    /// Task advancement: writes the system marker message and the new level
    /// in one transaction, so the marker is never visible without its level
    /// (and vice versa) and two racing turns cannot compute the same next
    /// step number.
    ///
    /// Onboarding: a workspace holding exactly one placeholder-titled level
    /// is rewritten in place instead of appended to.
    pub fn record_advancement(
        &self,
        workspace_id: &str,
        objective: &str,
        code_snapshot: &str,
        language: &str,
    ) -> Result<(MessageRow, LevelRow), rusqlite::Error> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let ts = now_ms();

        let marker_id = prefixed_id("msg");
        let marker_content = format!("🎯 Current Task: {}", objective);
        tx.execute(
            "INSERT INTO messages (id, workspace_id, role, content, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![marker_id, workspace_id, Role::System.as_str(), marker_content, ts],
        )?;

        let existing: Vec<(String, i64, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, step_number, task_title FROM workspace_levels WHERE workspace_id = ?1 ORDER BY step_number ASC",
            )?;
            let rows = stmt
                .query_map(params![workspace_id], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, String>(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let level = if let [(level_id, step_number, title)] = existing.as_slice() {
            if is_onboarding_placeholder(title) {
                tx.execute(
                    "UPDATE workspace_levels SET task_title = ?1, code_snapshot = ?2, language = ?3 WHERE id = ?4",
                    params![objective, code_snapshot, language, level_id],
                )?;
                tracing::info!(
                    target: "dojo::store",
                    workspace = %workspace_id,
                    "Onboarding level replaced with first real objective"
                );
                Some(LevelRow {
                    id: level_id.clone(),
                    workspace_id: workspace_id.to_string(),
                    step_number: *step_number,
                    task_title: objective.to_string(),
                    code_snapshot: code_snapshot.to_string(),
                    language: language.to_string(),
                })
            } else {
                None
            }
        } else {
            None
        };

        let level = if let Some(level) = level {
            level
        } else {
            let next_step: i64 = existing.iter().map(|(_, n, _)| n + 1).max().unwrap_or(0);
            let level_id = prefixed_id("lvl");
            tx.execute(
                "INSERT INTO workspace_levels (id, workspace_id, step_number, task_title, code_snapshot, language) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![level_id, workspace_id, next_step, objective, code_snapshot, language],
            )?;
            LevelRow {
                id: level_id,
                workspace_id: workspace_id.to_string(),
                step_number: next_step,
                task_title: objective.to_string(),
                code_snapshot: code_snapshot.to_string(),
                language: language.to_string(),
            }
        };

        tx.execute(
            "UPDATE workspaces SET updated_at_ms = ?1 WHERE id = ?2",
            params![ts, workspace_id],
        )?;
        tx.commit()?;

        let marker = MessageRow {
            id: marker_id,
            workspace_id: workspace_id.to_string(),
            role: Role::System,
            content: marker_content,
            created_at_ms: ts,
        };
        Ok((marker, level))
    }

    // --- quota ledger rows ---

    pub fn get_quota(&self, user_id: &str) -> Result<Option<QuotaRow>, rusqlite::Error> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, user_id, message_count, last_reset_at_ms FROM user_quotas WHERE user_id = ?1",
                params![user_id],
                |r| {
                    Ok(QuotaRow {
                        id: r.get(0)?,
                        user_id: r.get(1)?,
                        message_count: r.get(2)?,
                        last_reset_at_ms: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn init_quota(&self, user_id: &str) -> Result<QuotaRow, rusqlite::Error> {
        let conn = self.open()?;
        let id = prefixed_id("qta");
        let ts = now_ms();
        conn.execute(
            "INSERT INTO user_quotas (id, user_id, message_count, last_reset_at_ms) VALUES (?1, ?2, 0, ?3)",
            params![id, user_id, ts],
        )?;
        Ok(QuotaRow {
            id,
            user_id: user_id.to_string(),
            message_count: 0,
            last_reset_at_ms: ts,
        })
    }

    pub fn reset_quota(&self, user_id: &str, reset_at_ms: i64) -> Result<(), rusqlite::Error> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE user_quotas SET message_count = 0, last_reset_at_ms = ?1 WHERE user_id = ?2",
            params![reset_at_ms, user_id],
        )?;
        Ok(())
    }

    pub fn increment_quota(&self, user_id: &str) -> Result<(), rusqlite::Error> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE user_quotas SET message_count = message_count + 1 WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    /// Test/backfill hook: pins a quota row to an exact counter and reset
    /// timestamp.
    pub fn set_quota(
        &self,
        user_id: &str,
        message_count: i64,
        last_reset_at_ms: i64,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE user_quotas SET message_count = ?1, last_reset_at_ms = ?2 WHERE user_id = ?3",
            params![message_count, last_reset_at_ms, user_id],
        )?;
        if changed == 0 {
            conn.execute(
                "INSERT INTO user_quotas (id, user_id, message_count, last_reset_at_ms) VALUES (?1, ?2, ?3, ?4)",
                params![prefixed_id("qta"), user_id, message_count, last_reset_at_ms],
            )?;
        }
        Ok(())
    }
}
