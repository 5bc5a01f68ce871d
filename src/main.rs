use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use ciem_watch::diff::ChangeKind;
use ciem_watch::driver::WebDriverFactory;
use ciem_watch::model::to_snapshot;
use ciem_watch::parser::dates::DateWindow;
use ciem_watch::parser::{parse_listing, ParseRules};
use ciem_watch::store::SnapshotStore;
use ciem_watch::{ChangeSet, ScrapeOrchestrator, Settings};

#[derive(Parser)]
#[command(name = "ciem_watch", about = "Alerts on changes to the CIEM work-order scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in, read the listing and print what changed since the last check
    Check {
        /// Only keep work orders starting within the next N days
        #[arg(short, long)]
        days: Option<u32>,
        /// Fail instead of committing when the listing never finished loading
        #[arg(long)]
        reject_partial: bool,
    },
    /// Print the last committed snapshot
    Snapshot,
    /// Extract records from saved markup (e.g. a diagnostics dump) without committing
    Parse {
        file: PathBuf,
        /// Only keep work orders starting within the next N days
        #[arg(short, long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    info!(
        webdriver = %settings.webdriver_url,
        snapshot = %settings.snapshot_path.display(),
        "Settings loaded"
    );

    match cli.command {
        Commands::Check { days, reject_partial } => {
            let credential = settings.credential()?;
            if let Some(days) = days {
                settings.extract.window_days = Some(days);
            }
            settings.extract.reject_partial |= reject_partial;
            let window = settings.extract.window_days.map(DateWindow::next_days);

            let factory = Arc::new(WebDriverFactory::new(&settings.webdriver_url, settings.headless));
            let orchestrator = ScrapeOrchestrator::from_settings(factory, &settings);

            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]")?);
            spinner.set_message("Checking scheduler...");
            spinner.enable_steady_tick(Duration::from_millis(120));
            let result = orchestrator
                .fetch_changes(credential, settings.login.clone(), window)
                .await;
            spinner.finish_and_clear();

            match result {
                Ok(report) => {
                    if let Some(warning) = &report.warning {
                        println!("Warning: {}", warning);
                    }
                    print_changes(&report.changes);
                    println!("{} work orders on the listing.", report.records);
                }
                Err(e) => {
                    println!("Check failed [{:?}]: {}", e.kind(), e);
                    if let Some(diag) = e.diagnostics() {
                        println!("Diagnostics: {}", diag);
                    }
                    return Err(e.into());
                }
            }
        }
        Commands::Snapshot => {
            let snapshot = SnapshotStore::new(&settings.snapshot_path).load()?;
            if snapshot.is_empty() {
                println!("No snapshot yet. Run 'check' first.");
            }
            for (id, text) in &snapshot {
                println!("{:<10} {}", id, text);
            }
            println!("\n{} work orders in {}", snapshot.len(), settings.snapshot_path.display());
        }
        Commands::Parse { file, days } => {
            let html = std::fs::read_to_string(&file)?;
            let window = days.or(settings.extract.window_days).map(DateWindow::next_days);
            let rules = ParseRules::new(&settings.extract, window)?;
            let Some(records) = parse_listing(&html, &rules) else {
                anyhow::bail!("container `{}` not found in {}", settings.extract.container, file.display());
            };

            for r in records.values() {
                let start = r
                    .start_date
                    .map(|d| d.format("%d/%m/%Y").to_string())
                    .unwrap_or_else(|| "-".into());
                println!("{:<10} {:<10} {}", r.id, start, r.text);
            }
            println!("\n{} records\n", records.len());

            let store = SnapshotStore::new(&settings.snapshot_path);
            let previous = store.load()?;
            let policy = ciem_watch::diff::RemovalPolicy::from_flag(settings.track_removals);
            let pending = ciem_watch::diff::diff(&previous, &to_snapshot(&records), policy);
            println!("Pending (not committed):");
            print_changes(&pending);
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }
    Ok(())
}

fn print_changes(changes: &ChangeSet) {
    if changes.is_empty() {
        println!("No changes found.\n");
        return;
    }

    println!("Changes detected:");
    for entry in changes {
        let label = match entry.kind() {
            ChangeKind::Added => "new",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        };
        println!("{} ({}):", entry.id, label);
        println!("  Old: {}", entry.previous.as_deref().unwrap_or("-"));
        println!("  New: {}", entry.current.as_deref().unwrap_or("-"));
        println!();
    }
}
