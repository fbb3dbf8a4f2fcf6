use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use risk_dashboard_cache::cache::DEFAULT_TTL_SECS;
use risk_dashboard_cache::config::{Settings, StoreBackend, DEFAULT_SERVICE_URL, DEFAULT_STORE_DIR};
use risk_dashboard_cache::db::{self, PgPredictionStore};
use risk_dashboard_cache::report;
use risk_dashboard_cache::sync::{self, DEFAULT_GRACE_DELAY_MS, DEFAULT_POLL_INTERVAL_MS};
use risk_dashboard_cache::views::{self, RiskFilter};
use risk_dashboard_cache::{
    ChangeSignalSource, HttpRiskSummaryService, JsonFileStore, PersistedPredictionStore,
    PredictionCache, SignalBus, StoreMarkerPoller, StudentView, SyncController, SystemClock,
};

#[derive(Parser)]
#[command(name = "risk-dashboard-cache")]
#[command(about = "Student dropout-risk cache for the Group Scholar dashboard", long_about = None)]
struct Cli {
    /// Risk summary endpoint
    #[arg(long, env = "RISK_SERVICE_URL", default_value = DEFAULT_SERVICE_URL, global = true)]
    service_url: String,

    #[arg(long, value_enum, default_value_t = StoreBackend::File, global = true)]
    store: StoreBackend,

    /// Directory holding the persisted predictions of the last upload
    #[arg(long, env = "PREDICTION_STORE_DIR", default_value = DEFAULT_STORE_DIR, global = true)]
    store_dir: PathBuf,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true, global = true)]
    database_url: Option<String>,

    /// Snapshot time-to-live in seconds
    #[arg(long, default_value_t = DEFAULT_TTL_SECS, global = true)]
    ttl_secs: i64,

    /// Delay between an upload signal and the refetch
    #[arg(long, default_value_t = DEFAULT_GRACE_DELAY_MS, global = true)]
    grace_ms: u64,

    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS, global = true)]
    poll_ms: u64,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info", global = true)]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the upload history schema
    InitDb,
    /// Load a realistic demo upload
    Seed,
    /// List students, optionally filtered by tier and search text
    Students {
        #[arg(long, default_value = "Todos")]
        risk: RiskFilter,
        #[arg(long, default_value = "")]
        query: String,
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Show counts and percentages per risk tier
    Summary,
    /// Show one student's reconciled record
    Show { student_id: String },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        risk: Option<RiskFilter>,
        #[arg(long, default_value = "risk-report.md")]
        out: PathBuf,
    },
    /// Keep the cache in sync with the persisted store until Ctrl-C
    Watch,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            service_url: self.service_url.clone(),
            store_backend: self.store,
            store_dir: self.store_dir.clone(),
            database_url: self.database_url.clone(),
            ttl: chrono::Duration::seconds(self.ttl_secs.max(1)),
            grace_delay: Duration::from_millis(self.grace_ms),
            poll_interval: Duration::from_millis(self.poll_ms.max(100)),
        }
    }
}

async fn connect(settings: &Settings) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(settings.database_url()?)
        .await
        .context("failed to connect to Postgres")
}

async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn PersistedPredictionStore>> {
    Ok(match settings.store_backend {
        StoreBackend::File => Arc::new(JsonFileStore::new(&settings.store_dir)),
        StoreBackend::Postgres => Arc::new(PgPredictionStore::new(connect(settings).await?)),
    })
}

fn print_students(students: &[StudentView]) {
    for student in students {
        println!(
            "- {} ({}) {} risk, grade {:.1}, attendance {:.0}%, conduct {}",
            student.name,
            student.student_id,
            student.risk_level,
            student.grade,
            student.attendance_percent,
            student.conduct
        );
    }
}

fn print_summary(students: &[StudentView]) {
    let totals = views::aggregate(students);
    println!(
        "{} students: {} Alto ({:.1}%), {} Medio ({:.1}%), {} Bajo ({:.1}%)",
        totals.total,
        totals.high,
        totals.high_percent,
        totals.medium,
        totals.medium_percent,
        totals.low,
        totals.low_percent
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = cli.settings();

    match &cli.command {
        Commands::InitDb => {
            let pool = connect(&settings).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
            return Ok(());
        }
        Commands::Seed => {
            let pool = connect(&settings).await?;
            let inserted = db::seed(&pool).await?;
            println!("Seeded {inserted} predictions.");
            return Ok(());
        }
        _ => {}
    }

    let store = open_store(&settings).await?;
    let service = Arc::new(HttpRiskSummaryService::new(settings.service_url.clone()));
    let cache = PredictionCache::with_clock(
        service,
        Arc::clone(&store),
        Arc::new(SystemClock),
        settings.ttl,
    );

    match cli.command {
        Commands::InitDb | Commands::Seed => {}
        Commands::Students { risk, query, limit } => {
            let students = cache.get(false).await?;
            let matching = views::search(&views::filter_by_risk(&students, risk), &query);

            if matching.is_empty() {
                println!("No students match.");
                return Ok(());
            }

            println!("{} of {} students:", matching.len().min(limit), matching.len());
            print_students(&matching[..matching.len().min(limit)]);
        }
        Commands::Summary => {
            let students = cache.get(false).await?;
            print_summary(&students);
        }
        Commands::Show { student_id } => {
            let students = cache.get(false).await?;
            let student = views::find_student(&students, &student_id)
                .with_context(|| format!("no student with id {student_id}"))?;
            println!("{}", serde_json::to_string_pretty(student)?);
        }
        Commands::Report { risk, out } => {
            let students = cache.get(false).await?;
            let scope = risk.unwrap_or(RiskFilter::All);
            let selected = views::filter_by_risk(&students, scope);
            let label = match scope {
                RiskFilter::All => None,
                RiskFilter::Level(level) => Some(level.label()),
            };
            let report = report::build_report(label, cache.snapshot().fetched_at, &selected);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Watch => {
            let bus = Arc::new(SignalBus::new());
            let controller = Arc::new(
                SyncController::new(
                    cache.clone(),
                    Arc::clone(&store),
                    tokio::runtime::Handle::current(),
                )
                .with_grace_delay(settings.grace_delay),
            );
            controller.subscribe(bus.clone() as Arc<dyn ChangeSignalSource>);

            let mut poller = StoreMarkerPoller::new(Arc::clone(&store), Arc::clone(&bus));
            let shutdown = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %err, "cannot listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            };

            println!("Watching {} (Ctrl-C to stop).", settings.service_url);
            sync::watch(&cache, &mut poller, settings.poll_interval, shutdown, print_summary).await;

            controller.unsubscribe();
            println!("Stopped.");
        }
    }

    Ok(())
}
