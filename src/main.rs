use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_adaptive_assessment::{
    assessment::{
        Answer, AnswerParams, AssessmentCore, AssessmentEngine, LangbaseGrader, ScreenerReport,
        SessionParams, SessionType, StartParams,
    },
    config::{Config, LogFormat},
    item_bank::InMemoryItemBank,
    langbase::LangbaseClient,
    server::{AppState, McpServer},
    storage::SqliteStorage,
};

#[derive(Parser)]
#[command(name = "mcp-adaptive-assessment", version, about)]
struct Cli {
    /// Item bank JSON file (overrides ITEM_BANK_PATH)
    #[arg(long, global = true)]
    item_bank: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve MCP over stdio (default)
    Serve,
    /// Delete expired sessions and exit
    PurgeExpired,
    /// Run the screener against a deterministic simulated learner
    Simulate {
        /// True ability of the simulated learner
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        ability: f64,
        /// Run a growth check from this previous ability instead of a starting-point screener
        #[arg(long, allow_negative_numbers = true)]
        previous_theta: Option<f64>,
        #[arg(long)]
        grade: Option<String>,
        #[arg(long)]
        math_course: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(path) = cli.item_bank {
        config.assessment.item_bank_path = path;
    }

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "MCP adaptive assessment starting..."
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::PurgeExpired => {
            let storage = SqliteStorage::new(&config.database).await?;
            let engine = build_engine(&config, storage)?;
            let removed = engine.purge_expired().await?;
            println!("Removed {} expired session(s)", removed);
            Ok(())
        }
        Command::Simulate {
            ability,
            previous_theta,
            grade,
            math_course,
        } => {
            let storage = SqliteStorage::new_in_memory().await?;
            let engine = build_engine(&config, storage)?;
            let report = simulate(&engine, ability, previous_theta, grade, math_course).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    let langbase = LangbaseClient::new(&config.langbase, config.request.clone())?;
    info!("Ensuring grader pipe exists...");
    if let Err(e) = langbase.ensure_grader_pipe(&config.pipes.grader).await {
        error!(error = %e, "Failed to ensure grader pipe exists");
        return Err(e.into());
    }

    let core = build_core(&config, storage, langbase)?;
    let server = McpServer::new(Arc::new(AppState::new(config, core)));

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

fn build_core(
    config: &Config,
    storage: SqliteStorage,
    langbase: LangbaseClient,
) -> anyhow::Result<AssessmentCore> {
    let bank = match InMemoryItemBank::from_json_file(&config.assessment.item_bank_path) {
        Ok(bank) => bank,
        Err(e) => {
            error!(
                error = %e,
                path = %config.assessment.item_bank_path.display(),
                "Failed to load item bank"
            );
            return Err(e.into());
        }
    };
    let grader = LangbaseGrader::new(langbase, config);

    Ok(AssessmentCore::new(
        Arc::new(storage),
        Arc::new(grader),
        Arc::new(bank),
    ))
}

fn build_engine(config: &Config, storage: SqliteStorage) -> anyhow::Result<AssessmentEngine> {
    let langbase = LangbaseClient::new(&config.langbase, config.request.clone())?;
    let core = build_core(config, storage, langbase)?;
    Ok(AssessmentEngine::new(core, config.assessment.clone()))
}

/// Drive the screener with a learner who answers correctly exactly when an
/// item's difficulty is at or below `ability`.
async fn simulate(
    engine: &AssessmentEngine,
    ability: f64,
    previous_theta: Option<f64>,
    grade: Option<String>,
    math_course: Option<String>,
) -> anyhow::Result<ScreenerReport> {
    let learner_id = "simulated-learner".to_string();
    let session_type = if previous_theta.is_some() {
        SessionType::GrowthCheck
    } else {
        SessionType::StartingPoint
    };

    let mut turn = engine
        .start(StartParams {
            learner_id: learner_id.clone(),
            session_type,
            grade,
            math_course,
            previous_theta,
            covered_skills: Vec::new(),
        })
        .await?;

    while let Some(item) = turn.next_item.take() {
        let correct = item.difficulty <= ability;
        turn = engine
            .submit_answer(AnswerParams {
                session_id: turn.session_id.clone(),
                learner_id: learner_id.clone(),
                item_id: item.id.clone(),
                answer: Answer {
                    value: serde_json::Value::Bool(correct),
                    response_time_ms: 20_000,
                },
            })
            .await?;

        info!(
            question = turn.question_count,
            item_id = %item.id,
            difficulty = item.difficulty,
            correct,
            theta = turn.theta,
            standard_error = turn.standard_error,
            status = %turn.status,
            "Simulated answer"
        );
    }

    Ok(engine
        .report(SessionParams {
            session_id: turn.session_id,
            learner_id,
        })
        .await?)
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
