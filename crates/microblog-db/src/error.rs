use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("duplicate value for {table}.{column}")]
    UniquenessViolation { table: String, column: String },

    #[error("foreign key constraint failed on {table}")]
    ForeignKeyViolation { table: String },

    #[error("revision mismatch: expected store at {}, found {}", display_rev(.expected), display_rev(.found))]
    RevisionMismatch {
        expected: Option<String>,
        found: Option<String>,
    },

    #[error("step {revision} failed (store left at {}): {source}", display_rev(.reached))]
    StepApplicationFailure {
        revision: String,
        reached: Option<String>,
        #[source]
        source: Box<DbError>,
    },

    #[error("unknown revision: {0}")]
    UnknownRevision(String),

    #[error("cannot move from {} to {}", display_rev(.current), display_rev(.target))]
    InvalidTarget {
        current: Option<String>,
        target: Option<String>,
    },

    #[error("invalid migration chain: {0}")]
    InvalidChain(String),

    #[error("record not found")]
    NotFound,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DbResult<T> = Result<T, DbError>;

fn display_rev(rev: &Option<String>) -> &str {
    rev.as_deref().unwrap_or("<base>")
}

impl From<rusqlite::Error> for DbError {
    /// Constraint failures are classified so callers never have to inspect
    /// raw SQLite error codes.
    fn from(err: rusqlite::Error) -> Self {
        let rusqlite::Error::SqliteFailure(failure, Some(message)) = &err else {
            return DbError::Sqlite(err);
        };
        if failure.code != ErrorCode::ConstraintViolation {
            return DbError::Sqlite(err);
        }

        match failure.extended_code {
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                // "UNIQUE constraint failed: user.username"
                let target = message.rsplit(": ").next().unwrap_or_default();
                let first = target.split(", ").next().unwrap_or_default();
                let (table, column) = first.split_once('.').unwrap_or(("", first));
                DbError::UniquenessViolation {
                    table: table.to_string(),
                    column: column.to_string(),
                }
            }
            rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => DbError::ForeignKeyViolation {
                table: String::new(),
            },
            _ => DbError::Sqlite(err),
        }
    }
}

impl DbError {
    /// Attach the table name to a foreign key failure; SQLite does not report it.
    pub(crate) fn on_table(self, name: &str) -> Self {
        match self {
            DbError::ForeignKeyViolation { .. } => DbError::ForeignKeyViolation {
                table: name.to_string(),
            },
            other => other,
        }
    }
}
