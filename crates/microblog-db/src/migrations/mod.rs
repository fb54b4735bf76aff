//! Linear, reversible schema history.
//!
//! The store records exactly one revision in [`REVISION_TABLE`]; an empty
//! store has none. Each [`Step`] moves it one revision forward or back inside
//! its own transaction, so a failure leaves the store at the last revision
//! that committed.

pub mod ops;
pub mod store;
pub mod versions;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::Database;
use crate::error::{DbError, DbResult};
use crate::schema::{self, Schema};

use self::ops::Op;

pub const REVISION_TABLE: &str = "schema_revision";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub revision: String,
    /// Predecessor; `None` for the first step of a chain.
    pub down_revision: Option<String>,
    pub label: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub upgrade: Vec<Op>,
    pub downgrade: Vec<Op>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

impl Step {
    /// Build a step whose downgrade is the exact inverse of `upgrade`.
    pub fn from_ops(
        revision: &str,
        down_revision: Option<&str>,
        label: &str,
        created_at: Option<DateTime<Utc>>,
        upgrade: Vec<Op>,
    ) -> Self {
        let downgrade = upgrade.iter().rev().map(Op::inverse).collect();
        Self {
            revision: revision.to_string(),
            down_revision: down_revision.map(str::to_string),
            label: label.to_string(),
            created_at,
            upgrade,
            downgrade,
        }
    }

    /// Apply this step's upgrade. The store must sit at `down_revision`.
    pub fn upgrade(&self, db: &Database) -> DbResult<()> {
        db.with_conn_mut(|conn| with_foreign_keys_off(conn, |conn| self.run(conn, Direction::Up)))
    }

    /// Apply this step's downgrade. The store must sit at `revision`.
    pub fn downgrade(&self, db: &Database) -> DbResult<()> {
        db.with_conn_mut(|conn| with_foreign_keys_off(conn, |conn| self.run(conn, Direction::Down)))
    }

    fn run(&self, conn: &mut Connection, direction: Direction) -> DbResult<()> {
        let (expected, next, ops) = match direction {
            Direction::Up => (self.down_revision.clone(), Some(self.revision.as_str()), &self.upgrade),
            Direction::Down => (Some(self.revision.clone()), self.down_revision.as_deref(), &self.downgrade),
        };

        // IMMEDIATE takes the write lock up front, serializing migrators
        // across processes sharing the file.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let found = read_revision(&tx)?;
        if found != expected {
            return Err(DbError::RevisionMismatch { expected, found });
        }

        let failed = |source: DbError| DbError::StepApplicationFailure {
            revision: self.revision.clone(),
            reached: found.clone(),
            source: Box::new(source),
        };

        for op in ops {
            op.apply(&tx).map_err(|e| failed(e.on_table(op.table())))?;
        }
        check_foreign_keys(&tx).map_err(failed)?;
        write_revision(&tx, next).map_err(failed)?;
        tx.commit().map_err(|e| failed(e.into()))?;

        match direction {
            Direction::Up => info!("Upgraded {} -> {}: {}", rev_label(&found), self.revision, self.label),
            Direction::Down => info!(
                "Downgraded {} -> {}: {}",
                self.revision,
                rev_label(&self.down_revision),
                self.label
            ),
        }
        Ok(())
    }
}

/// An ordered, validated sequence of steps from base to head.
#[derive(Debug, Clone, Default)]
pub struct MigrationChain {
    steps: Vec<Step>,
}

impl MigrationChain {
    /// Order `steps` by their predecessor links. The links must form a single
    /// line with one root.
    pub fn new(steps: Vec<Step>) -> DbResult<Self> {
        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.revision.as_str()) {
                return Err(DbError::InvalidChain(format!("duplicate revision {}", step.revision)));
            }
        }

        let mut remaining = steps;
        let mut ordered: Vec<Step> = Vec::with_capacity(remaining.len());
        let mut parent: Option<String> = None;

        while !remaining.is_empty() {
            let mut children: Vec<usize> = remaining
                .iter()
                .enumerate()
                .filter(|(_, s)| s.down_revision == parent)
                .map(|(i, _)| i)
                .collect();
            match children.len() {
                1 => {}
                0 => {
                    let orphan = &remaining[0];
                    return Err(DbError::InvalidChain(format!(
                        "step {} revises {}, which does not lead back to the base",
                        orphan.revision,
                        rev_label(&orphan.down_revision)
                    )));
                }
                _ => {
                    return Err(DbError::InvalidChain(format!(
                        "history branches after {}",
                        rev_label(&parent)
                    )));
                }
            }
            let step = remaining.swap_remove(children.remove(0));
            parent = Some(step.revision.clone());
            ordered.push(step);
        }

        Ok(Self { steps: ordered })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn head(&self) -> Option<&str> {
        self.steps.last().map(|s| s.revision.as_str())
    }

    pub fn base(&self) -> Option<&str> {
        self.steps.first().map(|s| s.revision.as_str())
    }

    pub fn get(&self, revision: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.revision == revision)
    }

    /// Number of steps applied when the store sits at `revision`.
    fn depth(&self, revision: Option<&str>) -> DbResult<usize> {
        match revision {
            None => Ok(0),
            Some(rev) => self
                .steps
                .iter()
                .position(|s| s.revision == rev)
                .map(|i| i + 1)
                .ok_or_else(|| DbError::UnknownRevision(rev.to_string())),
        }
    }

    /// Add a step on top of head.
    pub fn append(&mut self, step: Step) -> DbResult<()> {
        if step.down_revision.as_deref() != self.head() {
            return Err(DbError::InvalidChain(format!(
                "step {} revises {}, but head is {}",
                step.revision,
                rev_label(&step.down_revision),
                self.head().unwrap_or("<base>")
            )));
        }
        if self.get(&step.revision).is_some() {
            return Err(DbError::InvalidChain(format!("duplicate revision {}", step.revision)));
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn current(&self, db: &Database) -> DbResult<Option<String>> {
        db.with_conn(read_revision)
    }

    /// Walk forward to `target` (head when `None`). Returns the revision
    /// the store ends at.
    pub fn upgrade(&self, db: &Database, target: Option<&str>) -> DbResult<Option<String>> {
        db.with_conn_mut(|conn| {
            let current = read_revision(conn)?;
            let from = self.depth(current.as_deref())?;
            let to = match target {
                Some(rev) => self.depth(Some(rev))?,
                None => self.steps.len(),
            };
            if to < from {
                return Err(DbError::InvalidTarget {
                    current,
                    target: target.map(str::to_string),
                });
            }
            if to == from {
                debug!("Already at {}", rev_label(&current));
                return Ok(current);
            }

            with_foreign_keys_off(conn, |conn| {
                for step in &self.steps[from..to] {
                    step.run(conn, Direction::Up)?;
                }
                Ok(())
            })?;
            Ok(self.steps[..to].last().map(|s| s.revision.clone()))
        })
    }

    /// Walk backward to `target` (the empty store when `None`). Returns the
    /// revision the store ends at.
    pub fn downgrade(&self, db: &Database, target: Option<&str>) -> DbResult<Option<String>> {
        db.with_conn_mut(|conn| {
            let current = read_revision(conn)?;
            let from = self.depth(current.as_deref())?;
            let to = self.depth(target)?;
            if to > from {
                return Err(DbError::InvalidTarget {
                    current,
                    target: target.map(str::to_string),
                });
            }
            if to == from {
                debug!("Already at {}", rev_label(&current));
                return Ok(current);
            }

            with_foreign_keys_off(conn, |conn| {
                for step in self.steps[to..from].iter().rev() {
                    step.run(conn, Direction::Down)?;
                }
                Ok(())
            })?;
            Ok(target.map(str::to_string))
        })
    }

    /// Compare the store (which must be at head) with `declared` and return
    /// a new step covering the difference, or `None` when they already match.
    pub fn generate(&self, db: &Database, declared: &Schema, label: &str) -> DbResult<Option<Step>> {
        let (current, live) = db.with_conn(|conn| Ok((read_revision(conn)?, schema::introspect(conn)?)))?;
        let head = self.head().map(str::to_string);
        if current != head {
            return Err(DbError::RevisionMismatch {
                expected: head,
                found: current,
            });
        }

        let ops = schema::diff(&live, declared);
        if ops.is_empty() {
            return Ok(None);
        }

        Ok(Some(Step::from_ops(
            &new_revision_id(),
            self.head(),
            label,
            Some(Utc::now()),
            ops,
        )))
    }
}

/// Twelve hex characters, the same shape as the built-in revision ids.
pub fn new_revision_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

pub(crate) fn read_revision(conn: &Connection) -> DbResult<Option<String>> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [REVISION_TABLE],
            |_| Ok(()),
        )
        .optional()?;
    if exists.is_none() {
        return Ok(None);
    }

    let revision = conn
        .query_row(&format!("SELECT revision FROM {REVISION_TABLE}"), [], |row| row.get(0))
        .optional()?;
    Ok(revision)
}

fn write_revision(conn: &Connection, revision: Option<&str>) -> DbResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {REVISION_TABLE} (revision TEXT NOT NULL PRIMARY KEY);
         DELETE FROM {REVISION_TABLE};"
    ))?;
    if let Some(revision) = revision {
        conn.execute(&format!("INSERT INTO {REVISION_TABLE} (revision) VALUES (?1)"), [revision])?;
    }
    Ok(())
}

fn check_foreign_keys(conn: &Connection) -> DbResult<()> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let mut rows = stmt.query([])?;
    if let Some(row) = rows.next()? {
        let table: String = row.get(0)?;
        return Err(DbError::ForeignKeyViolation { table });
    }
    Ok(())
}

/// `PRAGMA foreign_keys` is a no-op inside a transaction, so it is toggled
/// around the whole walk and restored even when a step fails.
fn with_foreign_keys_off<T>(
    conn: &mut Connection,
    f: impl FnOnce(&mut Connection) -> DbResult<T>,
) -> DbResult<T> {
    let enabled: bool = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", false)?;
    let result = f(conn);
    if enabled {
        conn.pragma_update(None, "foreign_keys", true)?;
    }
    result
}

fn rev_label(revision: &Option<String>) -> &str {
    revision.as_deref().unwrap_or("<base>")
}

#[cfg(test)]
mod tests;
