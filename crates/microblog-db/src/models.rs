//! Record kinds and their mapping onto SQLite rows.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};

use microblog_types::models::{Post, User};

use crate::error::{DbError, DbResult};
use crate::migrations::ops::Op;
use crate::schema::{Column, ColumnType, ForeignKey, Index, Table, diff_table};

/// Shared persistence capabilities of every record kind.
pub trait Model: Sized {
    const TABLE: &'static str;

    /// Declared shape of the backing table. Column order is the select order
    /// used by [`Model::from_row`].
    fn table() -> Table;

    fn id(&self) -> i64;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Every non-key column with its value.
    fn to_row(&self) -> Vec<(&'static str, &dyn ToSql)>;

    /// Ops moving `previous` (absent when `None`) to the declared table.
    fn diff_against(previous: Option<&Table>) -> Vec<Op> {
        diff_table(previous, Some(&Self::table()))
    }
}

impl Model for User {
    const TABLE: &'static str = "user";

    fn table() -> Table {
        Table::new(Self::TABLE)
            .column(Column::primary_key("id"))
            .column(Column::new("username", ColumnType::String(64)))
            .column(Column::new("email", ColumnType::String(120)))
            .column(Column::new("password_hash", ColumnType::String(128)))
            .index(Index::on(Self::TABLE, "username").unique())
            .index(Index::on(Self::TABLE, "email").unique())
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
        })
    }

    fn to_row(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            ("username", &self.username as &dyn ToSql),
            ("email", &self.email as &dyn ToSql),
            ("password_hash", &self.password_hash as &dyn ToSql),
        ]
    }
}

impl Model for Post {
    const TABLE: &'static str = "post";

    fn table() -> Table {
        Table::new(Self::TABLE)
            .column(Column::primary_key("id"))
            .column(Column::new("body", ColumnType::String(140)))
            .column(Column::new("timestamp", ColumnType::DateTime))
            .column(Column::new("user_id", ColumnType::Integer))
            .index(Index::on(Self::TABLE, "timestamp"))
            .foreign_key(ForeignKey::new("user_id", User::TABLE, "id"))
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Post {
            id: row.get(0)?,
            body: row.get(1)?,
            timestamp: row.get(2)?,
            user_id: row.get(3)?,
        })
    }

    fn to_row(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            ("body", &self.body as &dyn ToSql),
            ("timestamp", &self.timestamp as &dyn ToSql),
            ("user_id", &self.user_id as &dyn ToSql),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
}

impl NewUser {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password_hash: None,
        }
    }

    pub(crate) fn to_row(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            ("username", &self.username as &dyn ToSql),
            ("email", &self.email as &dyn ToSql),
            ("password_hash", &self.password_hash as &dyn ToSql),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub body: String,
    pub user_id: Option<i64>,
    /// Defaults to the creation instant.
    pub timestamp: DateTime<Utc>,
}

impl NewPost {
    pub fn new(body: impl Into<String>, user_id: i64) -> Self {
        Self {
            body: body.into(),
            user_id: Some(user_id),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn to_row(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            ("body", &self.body as &dyn ToSql),
            ("timestamp", &self.timestamp as &dyn ToSql),
            ("user_id", &self.user_id as &dyn ToSql),
        ]
    }
}

/// Reject values longer than the declared `VARCHAR` length, which SQLite
/// would otherwise store silently.
pub(crate) fn check_lengths(table: &Table, row: &[(&'static str, &dyn ToSql)]) -> DbResult<()> {
    for (name, value) in row {
        let Some(ColumnType::String(max)) = table.get_column(name).map(|c| c.ty) else {
            continue;
        };
        let len = match value.to_sql()? {
            ToSqlOutput::Borrowed(ValueRef::Text(text)) => {
                String::from_utf8_lossy(text).chars().count()
            }
            ToSqlOutput::Owned(Value::Text(text)) => text.chars().count(),
            _ => continue,
        };
        if len > max as usize {
            return Err(DbError::Validation(format!(
                "{}.{name} is {len} characters, limit is {max}",
                table.name
            )));
        }
    }
    Ok(())
}
