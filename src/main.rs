use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use reposnap::models::SnapshotMetadata;
use reposnap::{
    Collector, CollectorConfig, Config, GitHubClient, ProgressKind, SnapshotStore,
};

#[derive(Parser, Debug)]
#[command(name = "reposnap")]
#[command(version = "0.1.0")]
#[command(about = "Collect commit and pull request history into point-in-time snapshots")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect every configured repository and write one snapshot
    Collect {
        /// Hide the progress bar
        #[arg(long)]
        quiet: bool,
    },
    /// List snapshots, newest first
    List,
    /// Show row counts of a snapshot
    Show {
        /// Snapshot id, or "latest"
        #[arg(default_value = "latest")]
        snapshot: String,
    },
    /// Delete a snapshot
    Delete {
        snapshot: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("reposnap=info".parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = Config::from_env()?;
    let store = Arc::new(SnapshotStore::new(config.storage.build()?));

    match args.command {
        Command::Collect { quiet } => collect(&config, store, quiet).await,
        Command::List => {
            let snapshots = store.list_snapshots().await;
            if snapshots.is_empty() {
                println!("No snapshots in {}", store.backend().describe());
            }
            for meta in &snapshots {
                println!("{}", format_metadata(meta));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { snapshot } => show(&store, &snapshot).await,
        Command::Delete { snapshot } => {
            if store.delete_snapshot(&snapshot).await {
                println!("Deleted {}", snapshot);
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("Snapshot not found: {}", snapshot);
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

async fn collect(config: &Config, store: Arc<SnapshotStore>, quiet: bool) -> anyhow::Result<ExitCode> {
    let github = GitHubClient::new(config.require_github_token()?)?;
    let collector_config = CollectorConfig::from(config);
    let total = collector_config.repositories.len();
    let mut collector = Collector::new(Arc::new(github), store, collector_config);

    let cancel = collector.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing with the data collected so far");
            cancel.cancel();
        }
    });

    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(total as u64)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} repos {msg}")?
            .progress_chars("#>-"),
    );

    let result = collector
        .collect_all(|progress| match progress.kind {
            ProgressKind::Started | ProgressKind::Snapshotting => {
                pb.set_message(progress.message.clone())
            }
            ProgressKind::Finished => pb.set_position(progress.index as u64),
            ProgressKind::Failed => {
                pb.println(progress.to_string());
                pb.set_position(progress.index as u64);
            }
            ProgressKind::Completed => pb.finish_with_message(progress.message.clone()),
            ProgressKind::Aborted => pb.abandon_with_message(progress.message.clone()),
        })
        .await;

    match result? {
        Some(snapshot_id) => {
            println!("{}", snapshot_id);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("No snapshot was created: no repositories configured");
            Ok(ExitCode::from(2))
        }
    }
}

async fn show(store: &SnapshotStore, snapshot: &str) -> anyhow::Result<ExitCode> {
    let (meta, data) = if snapshot == "latest" {
        match store.load_latest().await? {
            Some(found) => found,
            None => {
                eprintln!("No snapshots in {}", store.backend().describe());
                return Ok(ExitCode::FAILURE);
            }
        }
    } else {
        let listed = store.list_snapshots().await;
        let Some(meta) = listed.into_iter().find(|m| m.snapshot_id == snapshot) else {
            eprintln!("Snapshot not found: {}", snapshot);
            return Ok(ExitCode::FAILURE);
        };
        let data = store.load_snapshot(snapshot).await?;
        (meta, data)
    };

    println!("{}", format_metadata(&meta));
    println!("  repositories:  {}", data.repositories_count());
    println!("  commits:       {}", data.commits_count());
    println!("  pull requests: {}", data.pull_requests_count());

    if let Some(repositories) = &data.repositories {
        println!();
        for repo in repositories {
            let commits = data
                .commits
                .iter()
                .flatten()
                .filter(|c| c.repo_name == repo.repo_name)
                .count();
            let pulls = data
                .pull_requests
                .iter()
                .flatten()
                .filter(|p| p.repo_name == repo.repo_name)
                .count();
            println!("  {:<40} {:>6} commits {:>6} PRs", repo.repo_name, commits, pulls);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn format_metadata(meta: &SnapshotMetadata) -> String {
    format!(
        "{}  repos={} commits={} pull_requests={}",
        meta.snapshot_id, meta.repositories_count, meta.commits_count, meta.pull_requests_count
    )
}
