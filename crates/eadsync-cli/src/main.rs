use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use eadsync_client::{AspaceConfig, IndexConfig, ReqwestArchivesSpace, ReqwestIndexClient};
use eadsync_core::digest::DigestEntry;
use eadsync_core::traits::{DigestStore, IndexClient, NullIndex};
use eadsync_core::validate::SchemaRegistry;
use eadsync_core::{
    AppError, ArchivesSpace, ArtifactCache, BibidPolicy, CsvDigestStore, Digester, ExportConfig,
    ExportOutcome, ExportService, RecordValidator, Repository, TracingExportReporter,
    UpdateReport, Watermark, audit_ead_cache,
};
use eadsync_db::{Database, DatabaseConfig, DigestRepository};

#[derive(Parser)]
#[command(
    name = "eadsync",
    version,
    about = "Incremental ArchivesSpace export to the finding-aid site and catalog"
)]
struct Cli {
    /// Parent directory of ead_cache/, pdf_cache/, marc_cache/ and html_cache/
    #[arg(long, global = true, env = "EADSYNC_CACHE_DIR", default_value = ".")]
    cache_dir: PathBuf,

    /// CSV digest log
    #[arg(
        long,
        global = true,
        env = "EADSYNC_DIGEST_CSV",
        default_value = "digest.csv"
    )]
    digest_csv: PathBuf,

    /// Keep the digest log in PostgreSQL instead (requires DATABASE_URL)
    #[arg(long, global = true, default_value_t = false)]
    digest_db: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BatchArgs {
    /// Only records modified since this epoch or RFC 3339 timestamp
    /// (defaults to 24 hours ago)
    #[arg(long, value_parser = parse_watermark)]
    since: Option<Watermark>,

    /// Repository id; defaults to every published repository
    #[arg(short, long)]
    repo: Option<u32>,

    /// Records processed concurrently
    #[arg(short, long, env = "EADSYNC_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Give up on a repository batch after this many seconds
    #[arg(long, env = "EADSYNC_DEADLINE_SECS")]
    deadline_secs: Option<u64>,

    /// Directory of structural schema definitions overriding the built-ins
    #[arg(long, env = "EADSYNC_SCHEMAS_DIR")]
    schemas_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh cached EAD (and optionally PDF) and reindex the finding-aid site
    Export {
        #[command(flatten)]
        batch: BatchArgs,

        /// Also render a PDF through an ArchivesSpace background job
        #[arg(long, default_value_t = false)]
        pdf: bool,

        /// Seconds to wait for each PDF job
        #[arg(long, default_value_t = 900)]
        pdf_timeout_secs: u64,

        /// Prefix for numeric bibids in file names and the index
        #[arg(long, env = "EADSYNC_BIBID_PREFIX", default_value = "cul-")]
        bibid_prefix: BibidPolicy,

        /// Skip the index request (no INDEX_* configuration needed)
        #[arg(long, default_value_t = false)]
        no_reindex: bool,

        /// Leave stale HTML renderings in place
        #[arg(long, default_value_t = false)]
        keep_html: bool,
    },

    /// Refresh cached MARC with the local catalog rules applied
    Marc {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Print the report of updated resource records
    Report {
        #[arg(long, value_parser = parse_watermark)]
        since: Option<Watermark>,
    },

    /// Check every cached EAD and post the counts to the digest
    Validate {
        /// Directory of structural schema definitions overriding the built-ins
        #[arg(long, env = "EADSYNC_SCHEMAS_DIR")]
        schemas_dir: Option<PathBuf>,
    },

    /// Print the 24-hour digest, pruning old entries on the 15th
    Digest,

    /// Add a message to the digest log
    Post {
        #[arg(short, long)]
        script: String,

        #[arg(short, long)]
        message: String,
    },
}

/// Where digest entries are kept.
#[derive(Clone)]
enum DigestBackend {
    Csv(CsvDigestStore),
    Postgres(DigestRepository),
}

impl DigestStore for DigestBackend {
    async fn append(&self, entry: &DigestEntry) -> Result<(), AppError> {
        match self {
            DigestBackend::Csv(store) => store.append(entry).await,
            DigestBackend::Postgres(repo) => DigestStore::append(repo, entry).await,
        }
    }

    async fn entries(&self) -> Result<Vec<DigestEntry>, AppError> {
        match self {
            DigestBackend::Csv(store) => store.entries().await,
            DigestBackend::Postgres(repo) => DigestStore::entries(repo).await,
        }
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        match self {
            DigestBackend::Csv(store) => store.prune_before(cutoff).await,
            DigestBackend::Postgres(repo) => DigestStore::prune_before(repo, cutoff).await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("eadsync=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let digester = Digester::new(open_digest(&cli).await?);

    match cli.command {
        Commands::Export {
            batch,
            pdf,
            pdf_timeout_secs,
            bibid_prefix,
            no_reindex,
            keep_html,
        } => {
            let mut config = export_config(&batch);
            config.with_pdf = pdf;
            config.purge_html = !keep_html;
            config.ead_policy = bibid_prefix;
            config.poll = config
                .poll
                .with_max_wait(Duration::from_secs(pdf_timeout_secs));

            if no_reindex {
                cmd_export(&cli.cache_dir, &batch, config, NullIndex, &digester).await?;
            } else {
                let index_config = IndexConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
                let index = ReqwestIndexClient::new(&index_config)
                    .context("Failed to create index client")?;
                cmd_export(&cli.cache_dir, &batch, config, index, &digester).await?;
            }
        }
        Commands::Marc { batch } => {
            cmd_marc(&cli.cache_dir, &batch, &digester).await?;
        }
        Commands::Report { since } => {
            let client = connect_aspace().await?;
            let report = UpdateReport::build(&client, since.unwrap_or_default())
                .await
                .context("Failed to build update report")?;
            println!("{}\n", report.subject());
            print!("{}", report.body());
        }
        Commands::Validate { schemas_dir } => {
            cmd_validate(&cli.cache_dir, schemas_dir, &digester).await?;
        }
        Commands::Digest => {
            let text = digester
                .run(Utc::now())
                .await
                .context("Failed to compose digest")?;
            print!("{text}");
        }
        Commands::Post { script, message } => {
            digester
                .post(&script, &message)
                .await
                .context("Failed to post digest entry")?;
        }
    }

    Ok(())
}

fn parse_watermark(raw: &str) -> Result<Watermark, String> {
    Watermark::parse(raw).map_err(|e| e.to_string())
}

async fn open_digest(cli: &Cli) -> Result<DigestBackend> {
    if !cli.digest_db {
        return Ok(DigestBackend::Csv(CsvDigestStore::new(&cli.digest_csv)));
    }
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(DigestBackend::Postgres(db.digest_repo()))
}

async fn connect_aspace() -> Result<ReqwestArchivesSpace> {
    let config = AspaceConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    ReqwestArchivesSpace::connect(&config)
        .await
        .context("Failed to log in to ArchivesSpace")
}

fn export_config(batch: &BatchArgs) -> ExportConfig {
    ExportConfig {
        workers: batch.workers.max(1),
        deadline: batch.deadline_secs.map(Duration::from_secs),
        ..ExportConfig::default()
    }
}

fn validator(schemas_dir: Option<&PathBuf>) -> RecordValidator {
    match schemas_dir {
        Some(dir) => RecordValidator::new(SchemaRegistry::with_dir(dir)),
        None => RecordValidator::default(),
    }
}

/// Cancel the returned token on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing records in flight");
            trigger.cancel();
        }
    });
    token
}

/// Repositories selected by `--repo`, or every published one.
async fn target_repositories(
    client: &ReqwestArchivesSpace,
    repo: Option<u32>,
) -> Result<Vec<(u32, String)>> {
    let repositories: Vec<Repository> = client
        .list_repositories()
        .await
        .context("Failed to list repositories")?;

    let selected: Vec<(u32, String)> = repositories
        .into_iter()
        .filter_map(|r| r.id().map(|id| (id, r)))
        .filter(|(id, r)| match repo {
            Some(wanted) => *id == wanted,
            None => r.publish,
        })
        .map(|(id, r)| (id, r.name))
        .collect();

    if selected.is_empty() {
        match repo {
            Some(id) => bail!("Repository {id} not found"),
            None => bail!("No published repositories"),
        }
    }
    Ok(selected)
}

async fn cmd_export<I: IndexClient>(
    cache_dir: &std::path::Path,
    batch: &BatchArgs,
    config: ExportConfig,
    index: I,
    digester: &Digester<DigestBackend>,
) -> Result<()> {
    let client = connect_aspace().await?;
    let repositories = target_repositories(&client, batch.repo).await?;
    let watermark = batch.since.unwrap_or_default();
    let service = ExportService::new(
        client,
        index,
        ArtifactCache::new(cache_dir),
        validator(batch.schemas_dir.as_ref()),
        config,
    );

    let cancel = shutdown_token();
    for (repo_id, name) in repositories {
        let outcome = service
            .run_daily_update(repo_id, watermark, &cancel, &TracingExportReporter)
            .await;
        record_outcome(digester, "eadsync export", &name, &outcome).await?;
        if cancel.is_cancelled() {
            break;
        }
    }
    Ok(())
}

async fn cmd_marc(
    cache_dir: &std::path::Path,
    batch: &BatchArgs,
    digester: &Digester<DigestBackend>,
) -> Result<()> {
    let client = connect_aspace().await?;
    let repositories = target_repositories(&client, batch.repo).await?;
    let watermark = batch.since.unwrap_or_default();
    let service = ExportService::new(
        client,
        NullIndex,
        ArtifactCache::new(cache_dir),
        validator(batch.schemas_dir.as_ref()),
        export_config(batch),
    );

    let cancel = shutdown_token();
    for (repo_id, name) in repositories {
        let outcome = service
            .run_marc_update(repo_id, watermark, &cancel, &TracingExportReporter)
            .await;
        record_outcome(digester, "eadsync marc", &name, &outcome).await?;
        if cancel.is_cancelled() {
            break;
        }
    }
    Ok(())
}

async fn cmd_validate(
    cache_dir: &std::path::Path,
    schemas_dir: Option<PathBuf>,
    digester: &Digester<DigestBackend>,
) -> Result<()> {
    let cache = ArtifactCache::new(cache_dir);
    let audit = audit_ead_cache(&cache, &validator(schemas_dir.as_ref()))
        .context("Failed to audit the EAD cache")?;

    for check in audit.problems() {
        println!("{check}");
    }
    for message in audit.digest_messages() {
        println!("{message}");
        digester
            .post("eadsync validate", &message)
            .await
            .context("Failed to post digest entry")?;
    }
    Ok(())
}

async fn record_outcome(
    digester: &Digester<DigestBackend>,
    script: &str,
    repository: &str,
    outcome: &ExportOutcome,
) -> Result<()> {
    let summary = outcome.summary(repository);
    println!("{summary}");
    digester
        .post(script, &summary)
        .await
        .context("Failed to post digest entry")
}
