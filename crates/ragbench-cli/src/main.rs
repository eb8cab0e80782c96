mod commands;

use clap::{Parser, Subcommand};
use ragbench_core::config::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ragbench",
    version,
    about = "Benchmark evaluation for retrieval pipeline versions",
    long_about = "ragbench runs a fixed suite of questions with known relevant documents\n\
        against one or more algorithm versions, scores every answer, and ranks\n\
        the versions against each other and the baseline.\n\n\
        Quick start:\n  \
        ragbench init\n  \
        ragbench cases import cases.json\n  \
        ragbench version add --name \"Hybrid\" --code hybrid-v1 --params '{\"strategy\":\"hybrid_weighted\"}'\n  \
        ragbench run"
)]
struct Cli {
    /// Enable verbose logging (debug level, per-case outcomes at info)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config file (default: .ragbench/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and SQLite schema
    Init,
    /// Manage test cases
    #[command(subcommand)]
    Cases(CasesCommand),
    /// Manage algorithm versions
    #[command(subcommand)]
    Version(VersionCommand),
    /// Sweep versions over the test suite and print the ranked comparison
    ///
    /// Examples:
    ///   ragbench run
    ///   ragbench run --versions 1,3 --name "nightly"
    ///   ragbench run --cases 4,5,6 --workers 4 --json
    Run {
        /// Version ids to test (default: all versions)
        #[arg(long, value_delimiter = ',')]
        versions: Option<Vec<i64>>,

        /// Test case ids to run (default: all active cases)
        #[arg(long, value_delimiter = ',')]
        cases: Option<Vec<i64>>,

        /// Batch name (default: "Batch Test <batch id>")
        #[arg(long)]
        name: Option<String>,

        /// Free-form notes stored on every run
        #[arg(long)]
        notes: Option<String>,

        /// Record that a re-test was forced
        #[arg(long)]
        force_retest: bool,

        /// Override runner.workers
        #[arg(long)]
        workers: Option<usize>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one test case against one version
    RunSingle {
        /// Version id
        #[arg(long)]
        version: i64,

        /// Test case id
        #[arg(long = "case")]
        test_case: i64,

        /// Persist the result under this existing run
        #[arg(long)]
        save_to_run: Option<i64>,
    },
    /// Inspect and manage test runs
    #[command(subcommand)]
    Runs(RunsCommand),
    /// Mark runs left `running` by an interrupted process as `stopped`
    Reconcile {
        /// Override runner.stale_run_after_secs
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
enum CasesCommand {
    /// Add one test case
    Add {
        #[arg(long)]
        question: String,

        /// Expected document ids, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        expected: Vec<i64>,

        #[arg(long, default_value = "1")]
        min_matches: u32,

        #[arg(long, default_value = "")]
        category: String,
    },
    /// Import test cases from a JSON array file
    Import { path: PathBuf },
    /// List test cases
    List {
        /// Include inactive cases
        #[arg(long)]
        all: bool,
    },
    /// Activate or deactivate a test case
    SetActive {
        id: i64,
        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },
}

#[derive(Subcommand)]
enum VersionCommand {
    /// Register a new algorithm version
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        code: String,

        #[arg(long)]
        description: Option<String>,

        /// Parameters as a JSON object, e.g. '{"strategy":"section_only"}'
        #[arg(long)]
        params: Option<String>,

        /// Make this the baseline version
        #[arg(long)]
        baseline: bool,

        #[arg(long)]
        created_by: Option<String>,
    },
    /// List versions
    List,
    /// Show one version by id or code
    Show { version: String },
    /// Make a version the single baseline
    SetBaseline { id: i64 },
    /// Replace a version's parameters (only before any run used it)
    SetParams {
        id: i64,
        /// Parameters as a JSON object
        params: String,
    },
}

#[derive(Subcommand)]
enum RunsCommand {
    /// List recent runs
    List {
        #[arg(long)]
        version: Option<i64>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show one run
    Show {
        id: i64,

        /// Include per-case results
        #[arg(long)]
        results: bool,
    },
    /// Force a running run to `stopped`
    Stop {
        id: i64,

        #[arg(long, default_value = "stopped by operator")]
        reason: String,
    },
    /// Delete a run and its results
    Delete { id: i64 },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let project_root = std::env::current_dir()?;
    let config_file = cli.config.as_deref().map(std::path::Path::new);
    let config = Config::load_with_file(Some(&project_root), config_file)?;

    // RUST_LOG wins, then --verbose, then the configured level.
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init => commands::init::run(&config)?,
        Commands::Cases(cmd) => match cmd {
            CasesCommand::Add {
                question,
                expected,
                min_matches,
                category,
            } => commands::cases::add(&config, &question, &expected, min_matches, &category)?,
            CasesCommand::Import { path } => commands::cases::import(&config, &path)?,
            CasesCommand::List { all } => commands::cases::list(&config, all)?,
            CasesCommand::SetActive { id, active } => {
                commands::cases::set_active(&config, id, active)?
            }
        },
        Commands::Version(cmd) => match cmd {
            VersionCommand::Add {
                name,
                code,
                description,
                params,
                baseline,
                created_by,
            } => commands::version::add(
                &config,
                commands::version::AddArgs {
                    name,
                    code,
                    description,
                    params,
                    baseline,
                    created_by,
                },
            )?,
            VersionCommand::List => commands::version::list(&config)?,
            VersionCommand::Show { version } => commands::version::show(&config, &version)?,
            VersionCommand::SetBaseline { id } => commands::version::set_baseline(&config, id)?,
            VersionCommand::SetParams { id, params } => {
                commands::version::set_params(&config, id, &params)?
            }
        },
        Commands::Run {
            versions,
            cases,
            name,
            notes,
            force_retest,
            workers,
            json,
        } => commands::run::run_batch(
            &config,
            commands::run::BatchArgs {
                versions,
                cases,
                name,
                notes,
                force_retest,
                workers,
                json,
                verbose: cli.verbose,
            },
        )?,
        Commands::RunSingle {
            version,
            test_case,
            save_to_run,
        } => commands::run::run_single(&config, version, test_case, save_to_run, cli.verbose)?,
        Commands::Runs(cmd) => match cmd {
            RunsCommand::List { version, limit } => commands::runs::list(&config, version, limit)?,
            RunsCommand::Show { id, results } => commands::runs::show(&config, id, results)?,
            RunsCommand::Stop { id, reason } => commands::runs::stop(&config, id, &reason)?,
            RunsCommand::Delete { id } => commands::runs::delete(&config, id)?,
        },
        Commands::Reconcile { older_than_secs } => {
            commands::runs::reconcile(&config, older_than_secs)?
        }
    }

    Ok(())
}
