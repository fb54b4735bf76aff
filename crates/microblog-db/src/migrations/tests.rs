use super::*;
use crate::models::{NewPost, NewUser};
use crate::schema::{Column, ColumnType, Index, declared, introspect};
use super::ops::Placement;
use super::versions::{POSTS_TABLE, USERS_TABLE};

fn db() -> Database {
    Database::open_in_memory().unwrap()
}

fn live(db: &Database) -> Schema {
    db.with_conn(|conn| introspect(conn)).unwrap()
}

fn chain() -> MigrationChain {
    versions::builtin().unwrap()
}

#[test]
fn builtin_chain_is_ordered() {
    let chain = chain();
    assert_eq!(chain.base(), Some(USERS_TABLE));
    assert_eq!(chain.head(), Some(POSTS_TABLE));
    assert_eq!(chain.steps()[1].down_revision.as_deref(), Some(USERS_TABLE));
}

#[test]
fn chain_orders_shuffled_steps() {
    let mut steps = chain().steps().to_vec();
    steps.reverse();
    let chain = MigrationChain::new(steps).unwrap();
    assert_eq!(chain.base(), Some(USERS_TABLE));
}

#[test]
fn chain_rejects_branches_and_orphans() {
    let steps = chain().steps().to_vec();

    let mut branched = steps.clone();
    branched.push(Step::from_ops("b0b0b0b0b0b0", Some(USERS_TABLE), "branch", None, vec![]));
    assert!(matches!(MigrationChain::new(branched), Err(DbError::InvalidChain(_))));

    let orphaned = vec![steps[1].clone()];
    assert!(matches!(MigrationChain::new(orphaned), Err(DbError::InvalidChain(_))));

    let duplicated = vec![steps[0].clone(), steps[0].clone()];
    assert!(matches!(MigrationChain::new(duplicated), Err(DbError::InvalidChain(_))));
}

#[test]
fn append_requires_head_as_predecessor() {
    let mut chain = chain();
    let stale = Step::from_ops("c0c0c0c0c0c0", Some(USERS_TABLE), "stale", None, vec![]);
    assert!(matches!(chain.append(stale), Err(DbError::InvalidChain(_))));

    let next = Step::from_ops("c0c0c0c0c0c0", Some(POSTS_TABLE), "next", None, vec![]);
    chain.append(next).unwrap();
    assert_eq!(chain.head(), Some("c0c0c0c0c0c0"));
}

#[test]
fn upgrade_to_head_yields_declared_schema() {
    let db = db();
    let reached = chain().upgrade(&db, None).unwrap();
    assert_eq!(reached.as_deref(), Some(POSTS_TABLE));
    assert_eq!(db.current_revision().unwrap().as_deref(), Some(POSTS_TABLE));
    assert_eq!(live(&db), declared());
}

#[test]
fn downgrade_to_first_step_undoes_widen_and_post() {
    let db = db();
    let chain = chain();
    chain.upgrade(&db, Some(POSTS_TABLE)).unwrap();

    let reached = chain.downgrade(&db, Some(USERS_TABLE)).unwrap();
    assert_eq!(reached.as_deref(), Some(USERS_TABLE));

    let schema = live(&db);
    assert!(schema.table("post").is_none());
    let user = schema.table("user").unwrap();
    assert_eq!(
        user.get_column("password_hash").unwrap().ty,
        ColumnType::String(120)
    );
    assert!(user.get_index("ix_user_username").unwrap().unique);
    assert!(user.get_index("ix_user_email").unwrap().unique);
}

#[test]
fn full_round_trip_restores_identical_structure() {
    let db = db();
    let chain = chain();

    chain.upgrade(&db, None).unwrap();
    let first = live(&db);

    assert_eq!(chain.downgrade(&db, None).unwrap(), None);
    assert!(live(&db).is_empty());
    assert_eq!(db.current_revision().unwrap(), None);

    chain.upgrade(&db, None).unwrap();
    assert_eq!(live(&db), first);
}

#[test]
fn downgrade_at_initial_is_a_no_op() {
    let db = db();
    assert_eq!(chain().downgrade(&db, None).unwrap(), None);
    assert_eq!(db.current_revision().unwrap(), None);
    assert!(live(&db).is_empty());
}

#[test]
fn upgrade_at_head_is_a_no_op() {
    let db = db();
    let chain = chain();
    chain.upgrade(&db, None).unwrap();
    assert_eq!(chain.upgrade(&db, None).unwrap().as_deref(), Some(POSTS_TABLE));
}

#[test]
fn rows_survive_widening_and_narrowing() {
    let db = db();
    let chain = chain();
    chain.upgrade(&db, Some(USERS_TABLE)).unwrap();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO \"user\" (username, email, password_hash) VALUES ('susan', 's@example.com', 'h')",
            [],
        )?;
        Ok(())
    })
    .unwrap();

    chain.upgrade(&db, None).unwrap();
    let user = db.get_user_by_username("susan").unwrap().unwrap();
    assert_eq!(user.password_hash.as_deref(), Some("h"));

    chain.downgrade(&db, Some(USERS_TABLE)).unwrap();
    let count: i64 = db
        .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM \"user\"", [], |r| r.get(0))?))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn downgrade_with_posts_referencing_users_keeps_users() {
    let db = db();
    let chain = chain();
    chain.upgrade(&db, None).unwrap();
    let user = db.create_user(&NewUser::new("susan", "s@example.com")).unwrap();
    db.create_post(&NewPost::new("hi", user.id)).unwrap();

    chain.downgrade(&db, Some(USERS_TABLE)).unwrap();
    assert!(live(&db).table("post").is_none());
    assert_eq!(db.get_user_by_id(user.id).unwrap(), Some(user));
}

#[test]
fn step_out_of_order_is_a_revision_mismatch() {
    let db = db();
    let chain = chain();
    let posts = chain.get(POSTS_TABLE).unwrap();

    let err = posts.upgrade(&db).unwrap_err();
    match err {
        DbError::RevisionMismatch { expected, found } => {
            assert_eq!(expected.as_deref(), Some(USERS_TABLE));
            assert_eq!(found, None);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(live(&db).is_empty());

    chain.upgrade(&db, Some(USERS_TABLE)).unwrap();
    let users = chain.get(USERS_TABLE).unwrap();
    assert!(matches!(users.upgrade(&db), Err(DbError::RevisionMismatch { .. })));
    assert!(matches!(posts.downgrade(&db), Err(DbError::RevisionMismatch { .. })));

    posts.upgrade(&db).unwrap();
    assert_eq!(db.current_revision().unwrap().as_deref(), Some(POSTS_TABLE));
}

fn about_me() -> Column {
    Column::new("about_me", ColumnType::String(140))
}

/// Alters a column that no table has, so applying it always fails.
fn alter_missing_column() -> Op {
    Op::AlterColumn {
        table: "user".into(),
        from: Column::new("nickname", ColumnType::String(32)),
        to: Column::new("nickname", ColumnType::String(64)),
    }
}

#[test]
fn failing_step_halts_at_last_good_revision() {
    let db = db();
    let mut chain = chain();
    chain
        .append(Step::from_ops(
            "badbadbadbad",
            Some(POSTS_TABLE),
            "broken",
            None,
            vec![
                Op::AddColumn {
                    table: "user".into(),
                    column: about_me(),
                    placement: Placement::Last,
                },
                alter_missing_column(),
            ],
        ))
        .unwrap();

    let err = chain.upgrade(&db, None).unwrap_err();
    match err {
        DbError::StepApplicationFailure { revision, reached, .. } => {
            assert_eq!(revision, "badbadbadbad");
            assert_eq!(reached.as_deref(), Some(POSTS_TABLE));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The partial step was rolled back along with its first op.
    assert_eq!(db.current_revision().unwrap().as_deref(), Some(POSTS_TABLE));
    assert_eq!(live(&db), declared());
}

#[test]
fn index_on_missing_column_fails_the_step() {
    let db = db();
    let mut chain = chain();
    chain.upgrade(&db, None).unwrap();
    chain
        .append(Step::from_ops(
            "badbadbadbad",
            Some(POSTS_TABLE),
            "bad index",
            None,
            vec![Op::CreateIndex {
                table: "user".into(),
                index: Index::on("user", "missing"),
            }],
        ))
        .unwrap();

    let err = chain.upgrade(&db, None).unwrap_err();
    assert!(matches!(
        err,
        DbError::StepApplicationFailure { ref reached, .. } if reached.as_deref() == Some(POSTS_TABLE)
    ));
    assert_eq!(db.current_revision().unwrap().as_deref(), Some(POSTS_TABLE));
    assert_eq!(live(&db), declared());

    // The user table can still be rebuilt afterwards.
    let mut fixed = self::chain();
    fixed
        .append(Step::from_ops(
            "c3c3c3c3c3c3",
            Some(POSTS_TABLE),
            "about me",
            None,
            vec![Op::AddColumn {
                table: "user".into(),
                column: about_me(),
                placement: Placement::First,
            }],
        ))
        .unwrap();
    fixed.upgrade(&db, None).unwrap();
    assert_eq!(live(&db).table("user").unwrap().columns[0].name, "about_me");
}

#[test]
fn failing_downgrade_halts_at_last_good_revision() {
    let db = db();
    let mut chain = chain();
    chain
        .append(Step {
            revision: "a1a1a1a1a1a1".into(),
            down_revision: Some(POSTS_TABLE.into()),
            label: "about me".into(),
            created_at: None,
            upgrade: vec![Op::AddColumn {
                table: "user".into(),
                column: about_me(),
                placement: Placement::Last,
            }],
            downgrade: vec![
                Op::DropColumn {
                    table: "user".into(),
                    column: about_me(),
                    placement: Placement::Last,
                },
                alter_missing_column(),
            ],
        })
        .unwrap();
    chain
        .append(Step::from_ops(
            "b2b2b2b2b2b2",
            Some("a1a1a1a1a1a1"),
            "post body index",
            None,
            vec![Op::CreateIndex {
                table: "post".into(),
                index: Index::on("post", "body"),
            }],
        ))
        .unwrap();
    chain.upgrade(&db, None).unwrap();

    let err = chain.downgrade(&db, None).unwrap_err();
    match err {
        DbError::StepApplicationFailure { revision, reached, .. } => {
            assert_eq!(revision, "a1a1a1a1a1a1");
            assert_eq!(reached.as_deref(), Some("a1a1a1a1a1a1"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The newer step came off; the failing one is untouched.
    assert_eq!(db.current_revision().unwrap().as_deref(), Some("a1a1a1a1a1a1"));
    let schema = live(&db);
    assert!(schema.table("post").unwrap().get_index("ix_post_body").is_none());
    assert!(schema.table("user").unwrap().get_column("about_me").is_some());
}

#[test]
fn dropped_column_is_restored_in_place() {
    let db = db();
    let mut chain = chain();
    chain.upgrade(&db, None).unwrap();

    let mut target = declared();
    let user = target.tables.get_mut("user").unwrap();
    user.columns.retain(|c| c.name != "username");
    user.indexes.retain(|i| i.name != "ix_user_username");

    let step = chain.generate(&db, &target, "drop username").unwrap().unwrap();
    chain.append(step).unwrap();
    chain.upgrade(&db, None).unwrap();
    assert_eq!(live(&db), target);

    chain.downgrade(&db, Some(POSTS_TABLE)).unwrap();
    let schema = live(&db);
    let columns: Vec<&str> = schema
        .table("user")
        .unwrap()
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(columns, vec!["id", "username", "email", "password_hash"]);
    assert_eq!(schema, declared());
}

#[test]
fn upgrade_target_behind_current_is_rejected() {
    let db = db();
    let chain = chain();
    chain.upgrade(&db, None).unwrap();
    assert!(matches!(
        chain.upgrade(&db, Some(USERS_TABLE)),
        Err(DbError::InvalidTarget { .. })
    ));
    assert!(matches!(
        chain.upgrade(&db, Some("ffffffffffff")),
        Err(DbError::UnknownRevision(_))
    ));
}

#[test]
fn foreign_keys_stay_enforced_after_migrating() {
    let db = db();
    chain().upgrade(&db, None).unwrap();
    let enabled: bool = db
        .with_conn(|conn| Ok(conn.pragma_query_value(None, "foreign_keys", |r| r.get(0))?))
        .unwrap();
    assert!(enabled);
}

#[test]
fn generate_at_head_finds_nothing() {
    let db = db();
    let chain = chain();
    chain.upgrade(&db, None).unwrap();
    assert_eq!(chain.generate(&db, &declared(), "noop").unwrap(), None);
}

#[test]
fn generate_requires_store_at_head() {
    let db = db();
    let chain = chain();
    chain.upgrade(&db, Some(USERS_TABLE)).unwrap();
    assert!(matches!(
        chain.generate(&db, &declared(), "too early"),
        Err(DbError::RevisionMismatch { .. })
    ));
}

#[test]
fn generated_step_applies_and_reverts() {
    let db = db();
    let mut chain = chain();
    chain.upgrade(&db, None).unwrap();

    let mut target = declared();
    let user = target.tables.get_mut("user").unwrap();
    user.columns.push(Column::new("about_me", ColumnType::String(140)));
    user.columns.retain(|c| c.name != "password_hash");

    let step = chain.generate(&db, &target, "about me").unwrap().unwrap();
    assert_eq!(step.down_revision.as_deref(), Some(POSTS_TABLE));
    assert_eq!(step.revision.len(), 12);
    assert_eq!(step.upgrade.len(), 2);

    let revision = step.revision.clone();
    chain.append(step).unwrap();
    chain.upgrade(&db, None).unwrap();
    assert_eq!(live(&db), target);
    assert_eq!(db.current_revision().unwrap(), Some(revision));

    chain.downgrade(&db, Some(POSTS_TABLE)).unwrap();
    assert_eq!(live(&db), declared());
}
