use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use taglink::{
    ActingUser, AssociationId, AssociationKey, AssociationService, Config, Database,
    NewAssociation, ObjectId, TagError, TagId, UserId,
};
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

/// taglink - maintain tag-object associations
#[derive(Parser)]
#[command(name = "taglink")]
#[command(about = "Maintain tag-object associations: tag, merge, copy, audit")]
#[command(version)]
struct Cli {
    /// Database file (overrides TAGLINK_DB)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Acting user id (overrides TAGLINK_USER)
    #[arg(long, global = true, value_name = "ID")]
    user: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Tag an object, reusing an identical existing association
    Tag(PairingArgs),
    /// Look up an existing association
    Find(PairingArgs),
    /// Remove one association by id
    Untag {
        #[arg(value_name = "ASSOCIATION_ID")]
        id: i64,
    },
    /// List the objects tagged with a tag
    Objects {
        #[arg(value_name = "TAG_ID")]
        tag: i64,
        /// Only objects in this scope
        #[arg(short, long)]
        scope: Option<String>,
    },
    /// List the tags of one object
    Tags {
        #[arg(value_name = "SCOPE")]
        scope: String,
        #[arg(value_name = "OBJECT_ID")]
        object: i64,
    },
    /// Merge one tag into another, removing duplicates
    Merge {
        #[arg(value_name = "OLD_TAG_ID")]
        old: i64,
        #[arg(value_name = "NEW_TAG_ID")]
        new: i64,
    },
    /// Copy one tag's associations onto another without duplicating
    Copy {
        #[arg(value_name = "OLD_TAG_ID")]
        old: i64,
        #[arg(value_name = "NEW_TAG_ID")]
        new: i64,
        /// Only copy associations in this scope
        #[arg(short, long)]
        scope: Option<String>,
    },
    /// Show association counts per tag
    Counts {
        #[arg(short, long)]
        scope: Option<String>,
    },
    /// Show audit log entries
    Log {
        /// Only entries attributed to this tag
        #[arg(short, long, value_name = "TAG_ID")]
        tag: Option<i64>,
    },
}

/// An object-tag pairing given on the command line.
#[derive(Parser)]
struct PairingArgs {
    #[arg(value_name = "SCOPE")]
    scope: String,
    #[arg(value_name = "OBJECT_ID")]
    object: i64,
    #[arg(value_name = "TAG_ID")]
    tag: i64,
    /// Qualifying label for the association
    #[arg(short, long)]
    label: Option<String>,
    /// User who created the association
    #[arg(long, value_name = "USER_ID")]
    tagger: Option<i64>,
}

impl PairingArgs {
    fn to_new(&self) -> NewAssociation {
        let mut new = NewAssociation::new(&self.scope, ObjectId::new(self.object), TagId::new(self.tag));
        if let Some(label) = &self.label {
            new = new.label(label);
        }
        if let Some(tagger) = self.tagger {
            new = new.tagger(UserId::new(tagger));
        }
        new
    }

    fn to_key(&self) -> AssociationKey {
        let key = AssociationKey::new(&self.scope, ObjectId::new(self.object), TagId::new(self.tag));
        match &self.label {
            Some(label) => key.with_label(label),
            None => key,
        }
    }
}

fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TAGLINK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        // Determine exit code based on error type
        let exit_code = if is_user_error(&e) { 1 } else { 2 };
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code);
    }
}

/// Determines if an error is a user error (vs internal error).
///
/// User errors are rejected inputs: invalid associations and merge/copy
/// preconditions. Everything else is internal.
fn is_user_error(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<TagError>()
            .is_some_and(TagError::is_user_error)
    })
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(db) = &cli.db {
        config.database_path = db.clone();
    }
    if let Some(user) = cli.user {
        config.user = UserId::new(user);
    }

    ensure_database_directory(&config.database_path)?;
    let db = Database::open(&config.database_path).context("Failed to open database")?;
    db.set_busy_timeout(config.busy_timeout)?;

    let service = AssociationService::new(db).with_user(ActingUser(config.user));
    let stdout = std::io::stdout();
    execute(&cli.command, &service, &mut stdout.lock())
}

/// Runs one command against a service, writing results to `out`.
///
/// Separated from `run` so tests can use in-memory databases.
fn execute(command: &Commands, service: &AssociationService, out: &mut impl Write) -> Result<()> {
    match command {
        Commands::Tag(args) => {
            let association = service
                .tag_object(&args.to_new())
                .context("Failed to tag object")?;
            writeln!(out, "Tagged (id: {})", association.id())?;
        }
        Commands::Find(args) => {
            let tagger = args.tagger.map(UserId::new);
            match service.find_one(&args.to_key(), tagger)? {
                Some(association) => writeln!(out, "{}", serde_json::to_string(&association)?)?,
                None => writeln!(out, "Not found")?,
            }
        }
        Commands::Untag { id } => {
            if service.untag(AssociationId::new(*id))? {
                writeln!(out, "Removed association {id}")?;
            } else {
                writeln!(out, "No association {id}")?;
            }
        }
        Commands::Objects { tag, scope } => {
            for association in service.objects_for_tag(TagId::new(*tag), scope.as_deref())? {
                writeln!(out, "{}", serde_json::to_string(&association)?)?;
            }
        }
        Commands::Tags { scope, object } => {
            for association in service.tags_for_object(scope, ObjectId::new(*object))? {
                writeln!(out, "{}", serde_json::to_string(&association)?)?;
            }
        }
        Commands::Merge { old, new } => {
            let report = service
                .move_to(Some(TagId::new(*old)), Some(TagId::new(*new)))
                .context("Merge failed")?;
            writeln!(
                out,
                "Merged tag {old} into {new}: {} moved, {} removed as duplicates, {} failed",
                report.moved_count(),
                report.removed_count(),
                report.failures
            )?;
        }
        Commands::Copy { old, new, scope } => {
            let report = service
                .copy_to(Some(TagId::new(*old)), Some(TagId::new(*new)), scope.as_deref())
                .context("Copy failed")?;
            writeln!(
                out,
                "Copied tag {old} to {new}: {} created, {} failed",
                report.copied_ids.len(),
                report.failures
            )?;
        }
        Commands::Counts { scope } => {
            for (tag, count) in service.tag_counts(scope.as_deref())? {
                writeln!(out, "{tag}\t{count}")?;
            }
        }
        Commands::Log { tag } => {
            for entry in service.audit_entries(tag.map(TagId::new))? {
                writeln!(
                    out,
                    "{}\t{}\t{}\ttag {}\t{}",
                    entry.id(),
                    entry.created_at().format(&Rfc3339)?,
                    entry.action(),
                    entry.tag_id(),
                    entry.payload()
                )?;
            }
        }
    }
    Ok(())
}

/// Ensures the parent directory of the database file exists.
fn ensure_database_directory(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }
    Ok(())
}
