use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod error;
mod flatten;
mod ingest;
mod join;
mod metrics;
mod models;
mod output;
mod report;
mod store;
mod update;
mod views;

use config::{AppConfig, SourceKind};
use output::OutputFormat;
use store::{FileSnapshotSource, RecordStore, SnapshotSource};
use update::{GradeUpdate, GradeWriter};
use views::{Analytics, Role, ViewContext, ViewFilters};

#[derive(Parser)]
#[command(name = "academic-analytics")]
#[command(about = "Grade flattening and aggregation engine for the registrar dashboard", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./academic.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Scope {
    #[arg(long, value_enum, default_value_t = Role::Registrar)]
    role: Role,
    /// Student or teacher id of the caller
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    semester: Option<String>,
    #[arg(long)]
    course: Option<String>,
    #[arg(long)]
    teacher: Option<String>,
    #[arg(long)]
    year_level: Option<u8>,
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    student: Option<String>,
}

impl Scope {
    fn into_context(self) -> ViewContext {
        let filters = ViewFilters {
            semester_id: self.semester,
            course: self.course,
            teacher_id: self.teacher,
            year_level: self.year_level,
            subject_code: self.subject,
            student_id: self.student,
        };
        match self.role {
            Role::Registrar => ViewContext::registrar(filters),
            role => ViewContext {
                role,
                user_id: self.user,
                filters,
            },
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ViewKind {
    PassRates,
    FailureRates,
    YearLevels,
    Semesters,
    Standing,
    Risk,
    Retention,
    Rank,
    Eligibility,
    Curriculum,
    Completeness,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small reference dataset
    Seed,
    /// Load every snapshot and print row counts
    Prime,
    /// Import grades from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record a single grade
    UpdateGrade {
        #[arg(long)]
        student: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        grade: f64,
        #[arg(long)]
        teacher: String,
    },
    /// Render one aggregation view
    View {
        #[arg(value_enum)]
        kind: ViewKind,
        #[command(flatten)]
        scope: Scope,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        scope: Scope,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn render_view(analytics: &Analytics<'_>, kind: ViewKind, ctx: &ViewContext, format: OutputFormat) -> anyhow::Result<String> {
    match kind {
        ViewKind::PassRates => output::render(&analytics.subject_pass_rates(ctx), format),
        ViewKind::FailureRates => output::render(&analytics.failure_rates(ctx), format),
        ViewKind::YearLevels => output::render(&analytics.year_level_summary(ctx), format),
        ViewKind::Semesters => output::render(&analytics.semester_summary(ctx), format),
        ViewKind::Standing => output::render(&analytics.academic_standing(ctx), format),
        ViewKind::Risk => output::render(&analytics.student_risk(ctx), format),
        ViewKind::Retention => output::render(&analytics.retention(ctx), format),
        ViewKind::Rank => output::render(&analytics.class_rank(ctx), format),
        ViewKind::Eligibility => output::render(&analytics.prerequisite_eligibility(ctx), format),
        ViewKind::Curriculum => output::render(&analytics.curriculum_evaluation(ctx), format),
        ViewKind::Completeness => output::render(&analytics.submission_completeness(ctx), format),
    }
}

async fn open_source(config: &AppConfig) -> anyhow::Result<Arc<dyn SnapshotSource>> {
    match config.source.kind {
        SourceKind::File => Ok(Arc::new(FileSnapshotSource::new(&config.source.snapshot_dir))),
        SourceKind::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .context("DATABASE_URL must be set when source.kind = \"postgres\"")?;
            let pool = db::connect(url, config.database.max_connections)
                .await
                .context("failed to connect to Postgres")?;
            Ok(Arc::new(db::PgSnapshotSource::new(pool)))
        }
    }
}

async fn open_store(config: &AppConfig) -> anyhow::Result<RecordStore> {
    let source = open_source(config).await?;
    Ok(RecordStore::new(
        source,
        &config.source.cache_dir,
        Duration::from_secs(config.cache.ttl_secs),
        config.cache.max_capacity,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::InitDb => {
            let url = config
                .database
                .url
                .as_deref()
                .context("DATABASE_URL must be set to a production Postgres instance")?;
            let pool = db::connect(url, config.database.max_connections)
                .await
                .context("failed to connect to Postgres")?;
            db::init_db(&pool).await.context("failed to apply migrations")?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let store = open_store(&config).await?;
            ingest::seed(&store).await?;
            println!("Seed data inserted.");
        }
        Commands::Prime => {
            let store = open_store(&config).await?;
            let dataset = store.load_all().await;
            println!(
                "students {}, enrollments {}, subjects {}, semesters {}, teachers {}, curricula {}",
                dataset.students.len(),
                dataset.grades.len(),
                dataset.subjects.len(),
                dataset.semesters.len(),
                dataset.teachers.len(),
                dataset.curricula.len()
            );
        }
        Commands::Import { csv } => {
            let writer = GradeWriter::new(open_store(&config).await?);
            let summary = ingest::import_csv(&writer, &csv).await?;
            println!("Applied {} grades from {}.", summary.applied, csv.display());
            for (line, reason) in &summary.rejected {
                println!("- line {line}: {reason}");
            }
        }
        Commands::UpdateGrade {
            student,
            subject,
            semester,
            grade,
            teacher,
        } => {
            let writer = GradeWriter::new(open_store(&config).await?);
            let update = GradeUpdate {
                student_id: student,
                subject_code: subject,
                semester_id: semester,
                grade: Some(grade),
                teacher_id: teacher,
            };
            match writer.apply(&update).await {
                Ok(outcome) => println!("Grade recorded ({outcome:?})."),
                Err(err) if err.is_validation() => {
                    eprintln!("Rejected: {err}");
                    std::process::exit(2);
                }
                Err(err) => return Err(err).context("grade update failed"),
            }
        }
        Commands::View {
            kind,
            scope,
            format,
        } => {
            let dataset = open_store(&config).await?.load_all().await;
            let analytics = Analytics::new(&dataset, config.thresholds);
            let ctx = scope.into_context();
            print!("{}", render_view(&analytics, kind, &ctx, format)?);
        }
        Commands::Report { scope, out } => {
            let dataset = open_store(&config).await?.load_all().await;
            let analytics = Analytics::new(&dataset, config.thresholds);
            let label = scope.course.clone().or_else(|| scope.teacher.clone());
            let ctx = scope.into_context();
            let report = report::build_report(
                label.as_deref(),
                chrono::Local::now().date_naive(),
                &analytics,
                &ctx,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
