use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use profile_sync::completeness::calculate;
use profile_sync::{
    InMemoryProfileService, MutationOutcome, ProfileChange, ProfilePatch, ProfileService,
    ProfileSnapshot, ProfileSyncStore, ProfileTier, SyncConfig,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "profile-sync")]
#[command(about = "Developer tooling for the profile synchronization core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score a profile stored as JSON
    Completeness {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "basic")]
        tier: ProfileTier,
    },
    /// Run mutations against an in-memory service
    Simulate {
        #[arg(long, default_value_t = 5)]
        mutations: usize,
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
        /// Start with the service unreachable and flush the queue afterwards
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Completeness { file, tier } => score_file(&file, tier),
        Command::Simulate {
            mutations,
            max_retries,
            offline,
        } => simulate(mutations, max_retries, offline).await,
    }
}

fn score_file(path: &Path, tier: ProfileTier) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read profile file {}", path.display()))?;
    let profile: ProfileSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse profile JSON in {}", path.display()))?;

    let result = calculate(&profile, tier);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn simulate(mutations: usize, max_retries: u32, offline: bool) -> Result<()> {
    let user_id = "demo-user";
    let mut seed = ProfileSnapshot::new(user_id);
    seed.first_name = Some("Ada".to_string());
    seed.last_name = Some("Lovelace".to_string());

    let service = Arc::new(InMemoryProfileService::with_profiles([seed]));
    service.set_latency(Duration::from_millis(20));

    let config = SyncConfig::new().queue_max_retries(max_retries);
    let backend: Arc<dyn ProfileService> = service.clone();
    let store = ProfileSyncStore::new(backend, config)?;

    store
        .profile(user_id)
        .await?
        .ok_or_else(|| anyhow!("seeded profile missing"))?;

    if offline {
        service.set_offline(true);
    }

    for revision in 1..=mutations {
        let patch = match revision % 3 {
            0 => ProfilePatch::new().company(format!("Analytical Engines {revision}")),
            1 => ProfilePatch::new().bio(format!(
                "Revision {revision} of a biography that keeps growing."
            )),
            _ => ProfilePatch::new().job_title(format!("Engineer L{revision}")),
        };
        match store.mutate(user_id, ProfileChange::Update(patch)).await {
            Ok(MutationOutcome::Committed(snapshot)) => {
                println!("mutation {revision}: committed at version {}", snapshot.version);
            }
            Ok(MutationOutcome::Queued(id)) => println!("mutation {revision}: queued as {id}"),
            Err(err) => println!("mutation {revision}: failed: {err}"),
        }
    }

    if offline {
        service.set_offline(false);
        let report = store.flush_offline_queue().await;
        println!(
            "queue flush: processed={} succeeded={} requeued={} dropped={}",
            report.processed,
            report.succeeded,
            report.requeued,
            report.exhausted.len()
        );
    }

    if let Some(result) = store.completeness_for(user_id).await? {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    let (profiles, _) = store.cache_stats().await;
    println!(
        "profile cache: hits={} misses={} fetches={} joins={}",
        profiles.hits, profiles.misses, profiles.fetches, profiles.joins
    );
    if let Some(last) = store.last_error() {
        println!("last error on {}: {}", last.key, last.error);
    }

    store.shutdown().await;
    Ok(())
}
