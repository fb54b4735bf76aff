use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension};

use microblog_types::models::{Post, User};

use crate::Database;
use crate::error::{DbError, DbResult};
use crate::models::{Model, NewPost, NewUser, check_lengths};
use crate::schema::quote;

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser) -> DbResult<User> {
        self.with_conn_mut(|conn| {
            let id = insert_row(conn, &User::table(), &user.to_row())?;
            fetch_one(conn, "id", &id)?.ok_or(DbError::NotFound)
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> DbResult<Option<User>> {
        self.with_conn(|conn| fetch_one(conn, "id", &id))
    }

    pub fn get_user_by_username(&self, username: &str) -> DbResult<Option<User>> {
        self.with_conn(|conn| fetch_one(conn, "username", &username))
    }

    pub fn get_user_by_email(&self, email: &str) -> DbResult<Option<User>> {
        self.with_conn(|conn| fetch_one(conn, "email", &email))
    }

    pub fn update_user(&self, user: &User) -> DbResult<()> {
        self.with_conn_mut(|conn| update_row(conn, user))
    }

    /// Fails with `ForeignKeyViolation` while any post still references the
    /// user; posts are never deleted or orphaned implicitly.
    pub fn delete_user(&self, id: i64) -> DbResult<()> {
        self.with_conn_mut(|conn| delete_row::<User>(conn, id).map_err(|e| e.on_table(Post::TABLE)))
    }

    // -- Posts --

    pub fn create_post(&self, post: &NewPost) -> DbResult<Post> {
        self.with_conn_mut(|conn| {
            let id = insert_row(conn, &Post::table(), &post.to_row())?;
            fetch_one(conn, "id", &id)?.ok_or(DbError::NotFound)
        })
    }

    pub fn get_post_by_id(&self, id: i64) -> DbResult<Option<Post>> {
        self.with_conn(|conn| fetch_one(conn, "id", &id))
    }

    /// Newest first.
    pub fn get_posts_by_user(&self, user_id: i64) -> DbResult<Vec<Post>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM {} WHERE user_id = ?1 ORDER BY timestamp DESC, id DESC",
                select_list::<Post>(),
                quote(Post::TABLE)
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], |row| Post::from_row(row))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_post(&self, post: &Post) -> DbResult<()> {
        self.with_conn_mut(|conn| update_row(conn, post))
    }

    pub fn delete_post(&self, id: i64) -> DbResult<()> {
        self.with_conn_mut(|conn| delete_row::<Post>(conn, id))
    }
}

fn select_list<M: Model>() -> String {
    let columns: Vec<String> = M::table().columns.iter().map(|c| quote(&c.name)).collect();
    columns.join(", ")
}

fn fetch_one<M: Model>(conn: &Connection, column: &str, value: &dyn ToSql) -> DbResult<Option<M>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        select_list::<M>(),
        quote(M::TABLE),
        quote(column)
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([value], |row| M::from_row(row)).optional()?;
    Ok(row)
}

fn insert_row(
    conn: &Connection,
    table: &crate::schema::Table,
    row: &[(&'static str, &dyn ToSql)],
) -> DbResult<i64> {
    check_lengths(table, row)?;

    let columns: Vec<String> = row.iter().map(|(name, _)| quote(name)).collect();
    let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(&table.name),
        columns.join(", "),
        placeholders.join(", ")
    );

    let params: Vec<&dyn ToSql> = row.iter().map(|(_, value)| *value).collect();
    conn.execute(&sql, params.as_slice())
        .map_err(|e| DbError::from(e).on_table(&table.name))?;
    Ok(conn.last_insert_rowid())
}

fn update_row<M: Model>(conn: &Connection, record: &M) -> DbResult<()> {
    let row = record.to_row();
    check_lengths(&M::table(), &row)?;

    let assignments: Vec<String> = row
        .iter()
        .enumerate()
        .map(|(i, (name, _))| format!("{} = ?{}", quote(name), i + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?{}",
        quote(M::TABLE),
        assignments.join(", "),
        row.len() + 1
    );

    let id = record.id();
    let mut params: Vec<&dyn ToSql> = row.iter().map(|(_, value)| *value).collect();
    params.push(&id);

    let changed = conn
        .execute(&sql, params.as_slice())
        .map_err(|e| DbError::from(e).on_table(M::TABLE))?;
    if changed == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

fn delete_row<M: Model>(conn: &Connection, id: i64) -> DbResult<()> {
    let changed = conn.execute(&format!("DELETE FROM {} WHERE id = ?1", quote(M::TABLE)), [id])?;
    if changed == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}
