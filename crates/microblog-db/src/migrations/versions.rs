//! The schema history shipped with the application.
//!
//! Tables are spelled out as they were at each revision rather than taken
//! from the models, which only describe the latest shape.

use chrono::{TimeZone, Utc};

use super::ops::Op;
use super::{MigrationChain, Step};
use crate::error::DbResult;
use crate::schema::{Column, ColumnType, ForeignKey, Index, Table};

pub const USERS_TABLE: &str = "dd60320d0ec8";
pub const POSTS_TABLE: &str = "d1506372820f";

pub fn builtin() -> DbResult<MigrationChain> {
    MigrationChain::new(vec![users_table(), posts_table()])
}

fn users_table() -> Step {
    let user = Table::new("user")
        .column(Column::primary_key("id"))
        .column(Column::new("username", ColumnType::String(64)))
        .column(Column::new("email", ColumnType::String(120)))
        .column(Column::new("password_hash", ColumnType::String(120)))
        .index(Index::on("user", "email").unique())
        .index(Index::on("user", "username").unique());

    Step::from_ops(
        USERS_TABLE,
        None,
        "users table",
        Utc.with_ymd_and_hms(2023, 6, 6, 15, 0, 0).single(),
        vec![Op::CreateTable(user)],
    )
}

fn posts_table() -> Step {
    let post = Table::new("post")
        .column(Column::primary_key("id"))
        .column(Column::new("body", ColumnType::String(140)))
        .column(Column::new("timestamp", ColumnType::DateTime))
        .column(Column::new("user_id", ColumnType::Integer))
        .index(Index::on("post", "timestamp"))
        .foreign_key(ForeignKey::new("user_id", "user", "id"));

    Step::from_ops(
        POSTS_TABLE,
        Some(USERS_TABLE),
        "posts table",
        Utc.with_ymd_and_hms(2023, 6, 6, 15, 32, 50).single(),
        vec![
            Op::CreateTable(post),
            Op::AlterColumn {
                table: "user".to_string(),
                from: Column::new("password_hash", ColumnType::String(120)),
                to: Column::new("password_hash", ColumnType::String(128)),
            },
        ],
    )
}
