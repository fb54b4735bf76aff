use std::collections::BTreeSet;

use crate::migrations::ops::{Op, Placement};

use super::{Schema, Table};

/// Ordered ops that turn a store shaped like `from` into one shaped like `to`.
///
/// New tables are created parents first and dropped tables are removed
/// children first, so foreign keys always point at an existing table once a
/// step commits.
pub fn diff(from: &Schema, to: &Schema) -> Vec<Op> {
    let mut ops = Vec::new();

    let created: Vec<&Table> = to
        .tables
        .values()
        .filter(|t| from.table(&t.name).is_none())
        .collect();
    for table in dependency_order(created) {
        ops.push(Op::CreateTable(table.clone()));
    }

    for (name, target) in &to.tables {
        if let Some(current) = from.table(name) {
            ops.extend(diff_table(Some(current), Some(target)));
        }
    }

    let dropped: Vec<&Table> = from
        .tables
        .values()
        .filter(|t| to.table(&t.name).is_none())
        .collect();
    for table in dependency_order(dropped).into_iter().rev() {
        ops.push(Op::DropTable(table.clone()));
    }

    ops
}

/// Ops for a single table. `None` on either side means the table is absent.
pub fn diff_table(from: Option<&Table>, to: Option<&Table>) -> Vec<Op> {
    let (current, target) = match (from, to) {
        (None, None) => return Vec::new(),
        (None, Some(t)) => return vec![Op::CreateTable(t.clone())],
        (Some(t), None) => return vec![Op::DropTable(t.clone())],
        (Some(current), Some(target)) => (current, target),
    };
    let table = &target.name;
    let mut ops = Vec::new();

    for column in &target.columns {
        match current.get_column(&column.name) {
            None => ops.push(Op::AddColumn {
                table: table.clone(),
                column: column.clone(),
                placement: Placement::of(target, &column.name),
            }),
            Some(existing) if existing != column => ops.push(Op::AlterColumn {
                table: table.clone(),
                from: existing.clone(),
                to: column.clone(),
            }),
            Some(_) => {}
        }
    }

    for fk in &target.foreign_keys {
        if !current.foreign_keys.contains(fk) {
            ops.push(Op::AddForeignKey {
                table: table.clone(),
                foreign_key: fk.clone(),
            });
        }
    }

    // A changed index is dropped and recreated under the same name.
    for index in &current.indexes {
        if target.get_index(&index.name) != Some(index) {
            ops.push(Op::DropIndex {
                table: table.clone(),
                index: index.clone(),
            });
        }
    }
    for index in &target.indexes {
        if current.get_index(&index.name) != Some(index) {
            ops.push(Op::CreateIndex {
                table: table.clone(),
                index: index.clone(),
            });
        }
    }

    for fk in &current.foreign_keys {
        if !target.foreign_keys.contains(fk) {
            ops.push(Op::DropForeignKey {
                table: table.clone(),
                foreign_key: fk.clone(),
            });
        }
    }

    // Last first, so the reversed inverses re-add each column after a
    // predecessor that is already back.
    for column in current.columns.iter().rev() {
        if target.get_column(&column.name).is_none() {
            ops.push(Op::DropColumn {
                table: table.clone(),
                column: column.clone(),
                placement: Placement::of(current, &column.name),
            });
        }
    }

    ops
}

/// Tables ordered so each comes after the tables it references. Cycles fall
/// back to name order.
fn dependency_order(mut pending: Vec<&Table>) -> Vec<&Table> {
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let waiting: BTreeSet<&str> = pending.iter().map(|t| t.name.as_str()).collect();
        let ready = pending
            .iter()
            .position(|t| t.dependencies().all(|dep| !waiting.contains(dep)))
            .unwrap_or(0);
        ordered.push(pending.remove(ready));
    }

    ordered
}
