mod db;
mod history;
mod models;
mod replay;
mod snapshot;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use db::Database;
use history::GitHistory;
use models::Posting;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobtrail")]
#[command(about = "Rebuild the lifecycle of job postings from the git history of a jobs file")]
struct Cli {
    /// Log every revision and carried-over post date
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the file's history and write the jobs table
    Replay {
        /// Repository whose history is replayed
        #[arg(short, long, default_value = ".")]
        repo: PathBuf,

        /// Path of the jobs file inside the repository
        #[arg(short, long, default_value = "_data/jobs.yml")]
        path: String,

        /// SQLite file to write (defaults to the user data directory)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Replay and report without touching the database
        #[arg(long)]
        dry_run: bool,
    },

    /// List postings from the jobs table
    List {
        /// SQLite file to read (defaults to the user data directory)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Only postings that are still up
        #[arg(short, long)]
        active: bool,

        /// Filter by company
        #[arg(short, long)]
        company: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show posting counts per company
    Stats {
        /// SQLite file to read (defaults to the user data directory)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Replay {
            repo,
            path,
            db,
            dry_run,
        } => {
            let history = GitHistory::open(&repo, &path)?;
            println!(
                "Replaying history of {} in {}...",
                history.file_path(),
                history.repo_path().display()
            );

            let summary = replay::replay(&history)?;
            let ledger = &summary.ledger;
            if ledger.is_empty() {
                println!("No postings found in any revision.");
            }
            let active = ledger.active_count();
            println!(
                "Parsed {} postings ({} active, {} removed) from {} revisions",
                ledger.len(),
                active,
                ledger.len() - active,
                summary.revisions
            );

            if dry_run {
                println!("\n(Dry run - database was not written)");
                return Ok(());
            }

            let db_path = db.unwrap_or_else(Database::default_path);
            let mut database = Database::open(&db_path)?;
            database
                .replace_jobs(ledger.entries())
                .with_context(|| format!("Failed to write ledger to {}", db_path.display()))?;
            println!("Wrote {} rows to {}", ledger.len(), database.path().display());
        }

        Commands::List {
            db,
            active,
            company,
            json,
        } => {
            let database = open_existing(db)?;
            let jobs = database.list_jobs(active, company.as_deref())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                print_jobs(&jobs);
            }
        }

        Commands::Stats { db } => {
            let database = open_existing(db)?;
            let stats = database.company_stats()?;
            if stats.is_empty() {
                println!("No jobs found.");
            } else {
                println!("{:<30} {:>8} {:>8}", "COMPANY", "TOTAL", "ACTIVE");
                println!("{}", "-".repeat(48));
                for (company, total, active) in stats {
                    println!("{:<30} {:>8} {:>8}", truncate(&company, 28), total, active);
                }
            }
        }
    }

    Ok(())
}

fn open_existing(db: Option<PathBuf>) -> Result<Database> {
    let path = db.unwrap_or_else(Database::default_path);
    Database::open_existing(&path)
}

fn print_jobs(jobs: &[Posting]) {
    println!(
        "{:<30} {:<20} {:<8} {:<12} {:<12}",
        "TITLE", "COMPANY", "REMOTE", "POSTED", "REMOVED"
    );
    println!("{}", "-".repeat(86));
    for job in jobs {
        let remote = match job.remote() {
            Some(true) => "yes",
            Some(false) => "no",
            None => "-",
        };
        let removed = job
            .date_removed
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<30} {:<20} {:<8} {:<12} {:<12}",
            truncate(job.title(), 28),
            truncate(job.company(), 18),
            remote,
            job.date_posted.to_string(),
            removed
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
