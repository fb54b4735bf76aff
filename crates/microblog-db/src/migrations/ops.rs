use std::fmt;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::schema::{self, Column, ForeignKey, Index, Table, quote};

/// One structural change. Every variant carries enough of the schema to be
/// inverted exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Create a table together with its indexes.
    CreateTable(Table),
    DropTable(Table),
    AddColumn {
        table: String,
        column: Column,
        #[serde(default)]
        placement: Placement,
    },
    /// `placement` records where the column sat so the inverse can put it back.
    DropColumn {
        table: String,
        column: Column,
        #[serde(default)]
        placement: Placement,
    },
    AlterColumn { table: String, from: Column, to: Column },
    CreateIndex { table: String, index: Index },
    DropIndex { table: String, index: Index },
    AddForeignKey { table: String, foreign_key: ForeignKey },
    DropForeignKey { table: String, foreign_key: ForeignKey },
}

impl Op {
    pub fn inverse(&self) -> Op {
        match self.clone() {
            Op::CreateTable(t) => Op::DropTable(t),
            Op::DropTable(t) => Op::CreateTable(t),
            Op::AddColumn { table, column, placement } => Op::DropColumn { table, column, placement },
            Op::DropColumn { table, column, placement } => Op::AddColumn { table, column, placement },
            Op::AlterColumn { table, from, to } => Op::AlterColumn { table, from: to, to: from },
            Op::CreateIndex { table, index } => Op::DropIndex { table, index },
            Op::DropIndex { table, index } => Op::CreateIndex { table, index },
            Op::AddForeignKey { table, foreign_key } => Op::DropForeignKey { table, foreign_key },
            Op::DropForeignKey { table, foreign_key } => Op::AddForeignKey { table, foreign_key },
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Op::CreateTable(t) | Op::DropTable(t) => &t.name,
            Op::AddColumn { table, .. }
            | Op::DropColumn { table, .. }
            | Op::AlterColumn { table, .. }
            | Op::CreateIndex { table, .. }
            | Op::DropIndex { table, .. }
            | Op::AddForeignKey { table, .. }
            | Op::DropForeignKey { table, .. } => table,
        }
    }

    /// Execute against the store. Applying an op whose effect is already
    /// present leaves the store unchanged.
    ///
    /// Foreign key enforcement must be off while this runs: rebuilding a
    /// table briefly leaves referencing tables dangling.
    pub fn apply(&self, conn: &Connection) -> DbResult<()> {
        debug!("{}", self);
        match self {
            Op::CreateTable(t) => {
                conn.execute_batch(&t.create_sql())?;
                for index in &t.indexes {
                    conn.execute_batch(&index.create_sql(&t.name))?;
                }
            }
            Op::DropTable(t) => {
                conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote(&t.name)))?;
            }
            Op::AddColumn { table, column, placement } => {
                let current = existing(conn, table)?;
                if current.get_column(&column.name).is_some() {
                    return Ok(());
                }
                let slot = placement.slot(&current)?;
                if slot == current.columns.len() && column.nullable && !column.primary_key {
                    conn.execute_batch(&format!(
                        "ALTER TABLE {} ADD COLUMN {} {}",
                        quote(table),
                        quote(&column.name),
                        column.ty.sql()
                    ))?;
                } else {
                    // SQLite only appends, and cannot add NOT NULL or key columns in place.
                    let mut target = current.clone();
                    target.columns.insert(slot, column.clone());
                    rebuild(conn, &current, &target)?;
                }
            }
            Op::DropColumn { table, column, .. } => {
                let current = existing(conn, table)?;
                let mut target = current.clone();
                target.columns.retain(|c| c.name != column.name);
                target.indexes.retain(|i| !i.columns.contains(&column.name));
                target.foreign_keys.retain(|fk| !fk.columns.contains(&column.name));
                rebuild(conn, &current, &target)?;
            }
            Op::AlterColumn { table, to, .. } => {
                let current = existing(conn, table)?;
                let mut target = current.clone();
                let slot = target
                    .columns
                    .iter_mut()
                    .find(|c| c.name == to.name)
                    .ok_or_else(|| missing(table, &to.name))?;
                *slot = to.clone();
                rebuild(conn, &current, &target)?;
            }
            Op::CreateIndex { table, index } => {
                let current = existing(conn, table)?;
                if let Some(column) = index.columns.iter().find(|c| current.get_column(c).is_none()) {
                    return Err(missing(table, column));
                }
                conn.execute_batch(&index.create_sql(table))?;
            }
            Op::DropIndex { index, .. } => {
                conn.execute_batch(&format!("DROP INDEX IF EXISTS {}", quote(&index.name)))?;
            }
            Op::AddForeignKey { table, foreign_key } => {
                let current = existing(conn, table)?;
                if current.foreign_keys.contains(foreign_key) {
                    return Ok(());
                }
                let target = current.clone().foreign_key(foreign_key.clone());
                rebuild(conn, &current, &target)?;
            }
            Op::DropForeignKey { table, foreign_key } => {
                let current = existing(conn, table)?;
                let mut target = current.clone();
                target.foreign_keys.retain(|fk| fk != foreign_key);
                rebuild(conn, &current, &target)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::CreateTable(t) => write!(f, "create table {}", t.name),
            Op::DropTable(t) => write!(f, "drop table {}", t.name),
            Op::AddColumn { table, column, .. } => {
                write!(f, "add column {}.{} {}", table, column.name, column.ty)
            }
            Op::DropColumn { table, column, .. } => write!(f, "drop column {}.{}", table, column.name),
            Op::AlterColumn { table, from, to } => write!(
                f,
                "alter column {}.{} {}{} -> {}{}",
                table,
                to.name,
                from.ty,
                if from.nullable { "" } else { " NOT NULL" },
                to.ty,
                if to.nullable { "" } else { " NOT NULL" },
            ),
            Op::CreateIndex { table, index } => {
                write!(f, "create index {} on {}", index.name, table)
            }
            Op::DropIndex { table, index } => write!(f, "drop index {} on {}", index.name, table),
            Op::AddForeignKey { table, foreign_key } => write!(
                f,
                "add foreign key {}({}) -> {}",
                table,
                foreign_key.columns.join(", "),
                foreign_key.references
            ),
            Op::DropForeignKey { table, foreign_key } => write!(
                f,
                "drop foreign key {}({}) -> {}",
                table,
                foreign_key.columns.join(", "),
                foreign_key.references
            ),
        }
    }
}

/// Where an added column lands among the existing ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    #[default]
    Last,
    First,
    After(String),
}

impl Placement {
    /// The position `column` holds in `table`.
    pub fn of(table: &Table, column: &str) -> Self {
        match table.columns.iter().position(|c| c.name == column) {
            Some(0) => Placement::First,
            Some(i) => Placement::After(table.columns[i - 1].name.clone()),
            None => Placement::Last,
        }
    }

    fn slot(&self, table: &Table) -> DbResult<usize> {
        match self {
            Placement::Last => Ok(table.columns.len()),
            Placement::First => Ok(0),
            Placement::After(name) => table
                .columns
                .iter()
                .position(|c| &c.name == name)
                .map(|i| i + 1)
                .ok_or_else(|| missing(&table.name, name)),
        }
    }
}

fn existing(conn: &Connection, table: &str) -> DbResult<Table> {
    schema::introspect_table(conn, table)?
        .ok_or_else(|| DbError::Validation(format!("table {table} does not exist")))
}

fn missing(table: &str, column: &str) -> DbError {
    DbError::Validation(format!("column {table}.{column} does not exist"))
}

/// Replace `current` with `target` by copying rows through a scratch table.
/// Columns present in both shapes keep their data.
fn rebuild(conn: &Connection, current: &Table, target: &Table) -> DbResult<()> {
    if current == target {
        return Ok(());
    }

    let scratch_name = format!("_rebuild_{}", target.name);
    let mut scratch = target.clone();
    scratch.name = scratch_name.clone();
    scratch.indexes.clear();

    let shared: Vec<String> = target
        .columns
        .iter()
        .filter(|c| current.get_column(&c.name).is_some())
        .map(|c| quote(&c.name))
        .collect();
    let shared = shared.join(", ");

    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote(&scratch_name)))?;
    conn.execute_batch(&scratch.create_sql())?;
    if !shared.is_empty() {
        conn.execute_batch(&format!(
            "INSERT INTO {} ({shared}) SELECT {shared} FROM {}",
            quote(&scratch_name),
            quote(&current.name)
        ))?;
    }
    conn.execute_batch(&format!("DROP TABLE {}", quote(&current.name)))?;
    conn.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote(&scratch_name),
        quote(&target.name)
    ))?;
    for index in &target.indexes {
        conn.execute_batch(&index.create_sql(&target.name))?;
    }

    Ok(())
}
