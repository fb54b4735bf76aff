//! Steps persisted as one JSON file each, `<revision>_<slug>.json`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{MigrationChain, Step, versions};
use crate::error::{DbError, DbResult};

/// Create `dir` and seed it with the built-in history.
pub fn init(dir: &Path) -> DbResult<Vec<PathBuf>> {
    if dir.exists() && fs::read_dir(dir)?.next().is_some() {
        return Err(DbError::InvalidChain(format!(
            "{} already exists and is not empty",
            dir.display()
        )));
    }
    fs::create_dir_all(dir)?;

    let chain = versions::builtin()?;
    let mut written = Vec::with_capacity(chain.steps().len());
    for step in chain.steps() {
        written.push(write(dir, step)?);
    }

    info!("Initialized {} with {} steps", dir.display(), written.len());
    Ok(written)
}

pub fn load(dir: &Path) -> DbResult<MigrationChain> {
    let mut steps = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let step: Step = serde_json::from_str(&fs::read_to_string(&path)?)?;
        steps.push(step);
    }
    MigrationChain::new(steps)
}

/// Load `dir` if it exists; otherwise fall back to the built-in history.
pub fn load_or_builtin(dir: &Path) -> DbResult<MigrationChain> {
    if dir.is_dir() {
        load(dir)
    } else {
        versions::builtin()
    }
}

pub fn write(dir: &Path, step: &Step) -> DbResult<PathBuf> {
    let path = dir.join(file_name(step));
    fs::write(&path, serde_json::to_string_pretty(step)?)?;
    Ok(path)
}

fn file_name(step: &Step) -> String {
    let mut slug = String::with_capacity(step.label.len());
    for ch in step.label.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');

    if slug.is_empty() {
        format!("{}.json", step.revision)
    } else {
        format!("{}_{}.json", step.revision, slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::ops::{Op, Placement};
    use crate::schema::{Column, ColumnType};

    #[test]
    fn file_names_are_slugged() {
        let step = Step::from_ops("abc123", None, "Posts table!", None, vec![]);
        assert_eq!(file_name(&step), "abc123_posts_table.json");

        let step = Step::from_ops("abc123", None, "  ", None, vec![]);
        assert_eq!(file_name(&step), "abc123.json");
    }

    #[test]
    fn init_then_load_matches_builtin() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("versions");

        let written = init(&dir).unwrap();
        assert_eq!(written.len(), 2);
        assert!(dir.join("d1506372820f_posts_table.json").exists());

        let loaded = load(&dir).unwrap();
        assert_eq!(loaded.steps(), versions::builtin().unwrap().steps());
    }

    #[test]
    fn init_refuses_non_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("notes.txt"), "hello").unwrap();
        assert!(matches!(init(tmp.path()), Err(DbError::InvalidChain(_))));
    }

    #[test]
    fn written_step_extends_loaded_chain() {
        let tmp = tempfile::tempdir().unwrap();
        init(tmp.path()).unwrap();

        let mut chain = load(tmp.path()).unwrap();
        let step = Step::from_ops(
            "0a1b2c3d4e5f",
            chain.head(),
            "about me",
            None,
            vec![Op::AddColumn {
                table: "user".into(),
                column: Column::new("about_me", ColumnType::String(140)),
                placement: Placement::After("password_hash".into()),
            }],
        );
        write(tmp.path(), &step).unwrap();
        chain.append(step).unwrap();

        let reloaded = load(tmp.path()).unwrap();
        assert_eq!(reloaded.head(), Some("0a1b2c3d4e5f"));
        assert_eq!(reloaded.steps(), chain.steps());
    }

    #[test]
    fn missing_dir_falls_back_to_builtin() {
        let tmp = tempfile::tempdir().unwrap();
        let chain = load_or_builtin(&tmp.path().join("absent")).unwrap();
        assert_eq!(chain.head(), Some(versions::POSTS_TABLE));
    }
}
