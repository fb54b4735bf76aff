use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use microblog_db::migrations::{MigrationChain, store};
use microblog_db::{Database, schema};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "microblog",
    version,
    about = "Microblog web application and schema migration tool",
    after_help = "Examples:\n  \
    microblog serve\n  \
    microblog db init\n  \
    microblog db revision -m \"followers\"\n  \
    microblog db upgrade\n  \
    microblog db downgrade dd60320d0ec8"
)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the web server (default)
    Serve,
    /// Manage the schema migration chain
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Create the migrations directory, seeded with the built-in history
    Init,
    /// Generate a new step from the difference between the store and the models
    Revision {
        /// Human-readable label for the step
        #[arg(short, long)]
        message: String,
    },
    /// Upgrade to a revision (default: head)
    Upgrade { target: Option<String> },
    /// Downgrade to a revision (default: base, the empty store)
    Downgrade { target: Option<String> },
    /// Show the revision the store is at
    Current,
    /// List every step from head to base
    History,
}

impl DbCommand {
    pub fn run(self, config: &Config) -> Result<()> {
        let dir = &config.migrations_dir;

        match self {
            DbCommand::Init => {
                for path in store::init(dir)? {
                    println!("Created {}", path.display());
                }
            }
            DbCommand::Revision { message } => {
                if !dir.is_dir() {
                    bail!("{} does not exist; run `microblog db init` first", dir.display());
                }
                let chain = store::load(dir)?;
                let db = open(config)?;
                match chain.generate(&db, &schema::declared(), &message)? {
                    Some(step) => {
                        for op in &step.upgrade {
                            info!("Detected {}", op);
                        }
                        let path = store::write(dir, &step)?;
                        println!("Generated {}", path.display());
                    }
                    None => println!("No changes in schema detected."),
                }
            }
            DbCommand::Upgrade { target } => {
                let chain = store::load_or_builtin(dir)?;
                let db = open(config)?;
                let target = target.filter(|t| t != "head");
                let reached = chain.upgrade(&db, target.as_deref())?;
                println!("Store at {}", describe(&chain, reached.as_deref()));
            }
            DbCommand::Downgrade { target } => {
                let chain = store::load_or_builtin(dir)?;
                let db = open(config)?;
                let target = target.filter(|t| t != "base");
                let reached = chain.downgrade(&db, target.as_deref())?;
                println!("Store at {}", describe(&chain, reached.as_deref()));
            }
            DbCommand::Current => {
                let chain = store::load_or_builtin(dir)?;
                let db = open(config)?;
                let current = db.current_revision()?;
                println!("{}", describe(&chain, current.as_deref()));
            }
            DbCommand::History => {
                let chain = store::load_or_builtin(dir)?;
                for step in chain.steps().iter().rev() {
                    let head = if Some(step.revision.as_str()) == chain.head() { " (head)" } else { "" };
                    let created = step
                        .created_at
                        .map(|at| format!(" [{}]", at.format("%Y-%m-%d %H:%M:%S")))
                        .unwrap_or_default();
                    println!(
                        "{} -> {}{}, {}{}",
                        step.down_revision.as_deref().unwrap_or("<base>"),
                        step.revision,
                        head,
                        step.label,
                        created
                    );
                }
            }
        }

        Ok(())
    }
}

fn open(config: &Config) -> Result<Database> {
    let path = config.database_path();
    Database::open(&path).with_context(|| format!("opening {}", path.display()))
}

fn describe(chain: &MigrationChain, revision: Option<&str>) -> String {
    match revision {
        None => "<base>".to_string(),
        Some(rev) => {
            let label = chain.get(rev).map(|s| s.label.as_str()).unwrap_or("unknown");
            let head = if Some(rev) == chain.head() { " (head)" } else { "" };
            format!("{rev}{head}, {label}")
        }
    }
}
