use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sismanager::{
    config::ENV_LOG_LEVEL, fsutil, DedupeMode, DedupeOutcome, DedupeProposal, ImportOptions,
    SisManager, StoreConfig,
};
use std::{fs, path::PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Central order store: import, dedupe, export, backups")]
struct Args {
    /// YAML config file; `SISMANAGER_*` path variables still override it.
    #[arg(short, long, env = "SISMANAGER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import the first sheet of a spreadsheet into the store.
    Import {
        file: PathBuf,
        /// Non-key columns to keep (comma separated).
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,
        /// Name the file was uploaded as; its stem becomes the default order code.
        #[arg(long)]
        original_name: Option<String>,
        /// Deduplicate right after the merge (forceful or soft).
        #[arg(long)]
        dedupe: Option<DedupeMode>,
    },
    /// Remove duplicate rows, or propose and commit them in two steps.
    Dedupe {
        #[command(subcommand)]
        action: DedupeAction,
    },
    /// Write the store to an xlsx workbook.
    Export {
        path: PathBuf,
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,
    },
    /// Snapshot the store now.
    Backup,
    /// Replace the store with a snapshot.
    Restore { snapshot_id: String },
    /// Delete old snapshots; the newest is always kept.
    Prune {
        /// Age threshold in days; defaults to the configured retention.
        #[arg(long)]
        days: Option<i64>,
    },
    /// List snapshots, oldest first.
    Snapshots,
}

#[derive(Subcommand)]
enum DedupeAction {
    /// Remove every duplicate, keeping the first-seen row of each group.
    Forceful,
    /// Compute duplicate groups and save them for review.
    Propose {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Remove the duplicates of the approved groups of a saved proposal.
    Commit {
        #[arg(long)]
        proposal: Option<PathBuf>,
        /// Group ids to approve (comma separated); all groups when omitted.
        #[arg(long, value_delimiter = ',')]
        groups: Option<Vec<usize>>,
    },
}

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "info".into()))
    });
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // ─── 2) load config ──────────────────────────────────────────────
    let config = match &args.config {
        Some(path) => {
            let mut cfg = StoreConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?;
            cfg.apply_env(|k| std::env::var(k).ok());
            cfg
        }
        None => StoreConfig::from_env(),
    };
    let default_proposal = config.data_dir.join("dedupe_proposal.json");
    let sis = SisManager::new(config).context("opening record store")?;

    // ─── 3) dispatch ─────────────────────────────────────────────────
    match args.command {
        Command::Import {
            file,
            columns,
            original_name,
            dedupe,
        } => {
            let options = ImportOptions {
                accepted_columns: columns,
                original_name,
                dedupe,
            };
            let result = sis
                .import(&file, &options)
                .with_context(|| format!("importing {}", file.display()))?;
            if let Some(DedupeOutcome::Proposed { proposal }) = &result.dedupe {
                save_proposal(&default_proposal, proposal)?;
            }
            print_json(&result)?;
        }
        Command::Dedupe { action } => match action {
            DedupeAction::Forceful => {
                print_json(&sis.deduplicate(DedupeMode::Forceful)?)?;
            }
            DedupeAction::Propose { out } => {
                let out = out.unwrap_or_else(|| default_proposal.clone());
                let outcome = sis.deduplicate(DedupeMode::Soft)?;
                if let DedupeOutcome::Proposed { proposal } = &outcome {
                    save_proposal(&out, proposal)?;
                }
                print_json(&outcome)?;
            }
            DedupeAction::Commit { proposal, groups } => {
                let path = proposal.unwrap_or_else(|| default_proposal.clone());
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("reading proposal {}", path.display()))?;
                let proposal: DedupeProposal = serde_json::from_str(&text)
                    .with_context(|| format!("parsing proposal {}", path.display()))?;
                let removed = sis.commit_duplicates(&proposal, groups.as_deref())?;
                if let Err(e) = fs::remove_file(&path) {
                    warn!("could not remove used proposal {}: {}", path.display(), e);
                }
                print_json(&serde_json::json!({ "removed": removed }))?;
            }
        },
        Command::Export { path, columns } => {
            let written = sis.export(&path, columns.as_deref())?;
            print_json(&serde_json::json!({ "path": written }))?;
        }
        Command::Backup => {
            let id = sis.backup()?;
            if id.is_none() {
                info!("store file does not exist yet; nothing to back up");
            }
            print_json(&serde_json::json!({ "snapshot": id }))?;
        }
        Command::Restore { snapshot_id } => {
            sis.restore(&snapshot_id)
                .with_context(|| format!("restoring snapshot {}", snapshot_id))?;
            print_json(&serde_json::json!({ "restored": snapshot_id }))?;
        }
        Command::Prune { days } => {
            let report = sis.prune(days.map(chrono::Duration::days))?;
            print_json(&report)?;
        }
        Command::Snapshots => {
            print_json(&sis.snapshots()?)?;
        }
    }
    Ok(())
}

fn save_proposal(path: &std::path::Path, proposal: &DedupeProposal) -> Result<()> {
    let body = serde_json::to_vec_pretty(proposal)?;
    fsutil::write_atomic(path, |f| std::io::Write::write_all(f, &body))
        .with_context(|| format!("saving proposal {}", path.display()))?;
    info!(
        path = %path.display(),
        groups = proposal.groups.len(),
        "duplicate proposal saved; review it, then run `dedupe commit`"
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
