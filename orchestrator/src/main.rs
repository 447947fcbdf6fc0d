use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use orchestrator::exit_codes;
use orchestrator::io::config::{OrchestratorConfig, config_path, load_config, state_dir, write_config};
use orchestrator::io::executor::CodexExecutor;
use orchestrator::io::run_log::{RunWriteRequest, write_run};
use orchestrator::logging;
use orchestrator::oracle::CodexOracle;
use orchestrator::orchestrate::Orchestrator;
use orchestrator::report::RunReport;
use orchestrator::tools::builtin_registry;
use orchestrator::tools::shell::ShellTool;

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Run a goal as an adaptive, dependency-ordered task checklist"
)]
struct Cli {
    /// Directory the tools operate in; state lives under `<workdir>/.orchestrator`.
    #[arg(long, global = true, default_value = ".")]
    workdir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.orchestrator/config.toml` with defaults if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Analyze, decompose and execute a goal.
    Run {
        /// The goal, in plain language.
        goal: String,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => {
            cmd_init(&cli.workdir, force)?;
            Ok(exit_codes::OK)
        }
        Command::Run { goal } => cmd_run(&cli.workdir, &goal),
    }
}

fn cmd_init(workdir: &Path, force: bool) -> Result<()> {
    let path = config_path(workdir);
    if !force && path.exists() {
        return Ok(());
    }
    write_config(&path, &OrchestratorConfig::default())
        .with_context(|| format!("write {}", path.display()))
}

fn cmd_run(workdir: &Path, goal: &str) -> Result<i32> {
    let state_dir = state_dir(workdir);
    let config = load_config(&config_path(workdir))?;

    let oracle = CodexOracle::new(
        CodexExecutor::new(config.oracle.command.clone()),
        workdir,
        &state_dir,
        &config.oracle,
    )?;
    let tools = builtin_registry(
        workdir,
        config.tool_timeout().unwrap_or(ShellTool::DEFAULT_TIMEOUT),
        config.oracle.output_limit_bytes,
    );
    let orchestrator = Orchestrator::new(Arc::new(oracle), tools, &config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    let outcome = runtime.block_on(orchestrator.run(goal));

    let (report, result, history) = match &outcome {
        Ok(done) => (RunReport::from_outcome(done), &done.result, &done.history),
        Err(aborted) => (RunReport::from_abort(aborted), &aborted.result, &aborted.history),
    };
    let paths = write_run(&RunWriteRequest {
        state_dir: &state_dir,
        report: &report,
        result,
        history,
    })?;

    print!("{report}");
    println!("report: {}", paths.report_path.display());
    Ok(report.exit_code())
}
