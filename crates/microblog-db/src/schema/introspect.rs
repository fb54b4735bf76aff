use rusqlite::{Connection, OptionalExtension};
use tracing::warn;

use crate::error::{DbError, DbResult};
use crate::migrations::REVISION_TABLE;

use super::{Column, ColumnType, ForeignKey, Index, Schema, Table};

/// Read the live shape of every application table.
///
/// SQLite internals and the revision bookkeeping table are skipped.
pub fn introspect(conn: &Connection) -> DbResult<Schema> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != ?1
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([REVISION_TABLE], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        if let Some(table) = introspect_table(conn, &name)? {
            tables.push(table);
        }
    }

    Ok(Schema::from_tables(tables))
}

pub fn introspect_table(conn: &Connection, name: &str) -> DbResult<Option<Table>> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |_| Ok(()),
        )
        .optional()?;
    if exists.is_none() {
        return Ok(None);
    }

    let mut table = Table::new(name);

    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let rows = stmt
        .query_map([name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (column, decl, not_null, pk) in rows {
        let ty = ColumnType::parse(&decl).ok_or_else(|| {
            DbError::Validation(format!("unsupported type {decl:?} on {name}.{column}"))
        })?;
        table.columns.push(Column {
            name: column,
            ty,
            nullable: !not_null,
            primary_key: pk > 0,
        });
    }

    // Only explicitly created indexes; constraint-backed ones come from the DDL.
    let mut stmt = conn.prepare(
        "SELECT name, \"unique\" FROM pragma_index_list(?1) WHERE origin = 'c'",
    )?;
    let indexes = stmt
        .query_map([name], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (index, unique) in indexes {
        let mut stmt =
            conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
        let columns = stmt
            .query_map([&index], |row| row.get::<_, Option<String>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        // Expression indexes have no column names and cannot be modelled.
        let Some(columns) = columns.into_iter().collect::<Option<Vec<_>>>() else {
            warn!("Ignoring expression index {} on {}", index, name);
            continue;
        };
        table.indexes.push(Index {
            name: index,
            columns,
            unique,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT id, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1)
         ORDER BY id, seq",
    )?;
    let rows = stmt
        .query_map([name], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut foreign_keys: Vec<(i64, ForeignKey)> = Vec::new();
    for (id, references, from, to) in rows {
        match foreign_keys.last_mut() {
            Some((last, fk)) if *last == id => {
                fk.columns.push(from);
                fk.referred_columns.extend(to);
            }
            _ => foreign_keys.push((
                id,
                ForeignKey {
                    columns: vec![from],
                    references,
                    referred_columns: to.into_iter().collect(),
                },
            )),
        }
    }
    table.foreign_keys = foreign_keys.into_iter().map(|(_, fk)| fk).collect();

    table.normalize();
    Ok(Some(table))
}
