//! Declarative table shapes.
//!
//! A [`Schema`] is what the models say the store should look like. The
//! migration chain moves a physical store from one `Schema` to another, and
//! [`introspect`] reads the shape the store actually has.

mod diff;
mod introspect;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use microblog_types::models::{Post, User};

use crate::models::Model;

pub use diff::{diff, diff_table};
pub use introspect::{introspect, introspect_table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "length", rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    /// `VARCHAR(n)`. SQLite keeps the declared length but does not enforce it.
    String(u32),
    DateTime,
}

impl ColumnType {
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::String(len) => format!("VARCHAR({len})"),
            ColumnType::DateTime => "DATETIME".to_string(),
        }
    }

    /// Parse a declared type as reported by `PRAGMA table_info`.
    pub fn parse(decl: &str) -> Option<Self> {
        let decl = decl.trim().to_ascii_uppercase();
        match decl.as_str() {
            "INTEGER" => return Some(ColumnType::Integer),
            "DATETIME" => return Some(ColumnType::DateTime),
            _ => {}
        }

        let len = decl.strip_prefix("VARCHAR(")?.strip_suffix(')')?;
        len.trim().parse().ok().map(ColumnType::String)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

impl Column {
    /// A nullable, non-key column.
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: true,
            primary_key: false,
        }
    }

    /// System-assigned integer identity (aliases the SQLite rowid).
    pub fn primary_key(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: ColumnType::Integer,
            nullable: false,
            primary_key: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    fn definition(&self) -> String {
        let mut def = format!("{} {}", quote(&self.name), self.ty.sql());
        if !self.nullable {
            def.push_str(" NOT NULL");
        }
        def
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl Index {
    /// Conventional `ix_<table>_<column>` index over a single column.
    pub fn on(table: &str, column: &str) -> Self {
        Self {
            name: format!("ix_{table}_{column}"),
            columns: vec![column.to_string()],
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub(crate) fn create_sql(&self, table: &str) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| quote(c)).collect();
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            quote(&self.name),
            quote(table),
            columns.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub references: String,
    pub referred_columns: Vec<String>,
}

impl ForeignKey {
    pub fn new(column: &str, references: &str, referred_column: &str) -> Self {
        Self {
            columns: vec![column.to_string()],
            references: references.to_string(),
            referred_columns: vec![referred_column.to_string()],
        }
    }

    fn definition(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| quote(c)).collect();
        let referred: Vec<String> = self.referred_columns.iter().map(|c| quote(c)).collect();
        format!(
            "FOREIGN KEY({}) REFERENCES {} ({})",
            columns.join(", "),
            quote(&self.references),
            referred.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self.normalize();
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self.normalize();
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Tables referenced by this table's foreign keys, excluding itself.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.references.as_str())
            .filter(move |t| *t != self.name)
    }

    /// Indexes and foreign keys are unordered in SQLite; keep them sorted so
    /// declared and introspected tables compare equal.
    pub(crate) fn normalize(&mut self) {
        self.indexes.sort_by(|a, b| a.name.cmp(&b.name));
        self.foreign_keys.sort();
    }

    pub(crate) fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(Column::definition).collect();

        let pk: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| quote(&c.name))
            .collect();
        if !pk.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        }
        parts.extend(self.foreign_keys.iter().map(ForeignKey::definition));

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote(&self.name),
            parts.join(",\n    ")
        )
    }
}

/// Every table of one schema revision, keyed by table name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: BTreeMap<String, Table>,
}

impl Schema {
    pub fn from_tables(tables: impl IntoIterator<Item = Table>) -> Self {
        let tables = tables
            .into_iter()
            .map(|mut t| {
                t.normalize();
                (t.name.clone(), t)
            })
            .collect();
        Self { tables }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// The schema the application code expects, built from every model.
pub fn declared() -> Schema {
    Schema::from_tables([User::table(), Post::table()])
}

/// Quote an SQL identifier.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
