use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use cmdpilot::access::{FileAccessor, LocalFileAccessor, PrivilegedFileAccessor};
use cmdpilot::config::{Settings, StageSettingsMap};
use cmdpilot::docs::DocumentationResolver;
use cmdpilot::executor::{ExecutionEnvironment, ExecutionReport, SessionExecutor};
use cmdpilot::interaction::{TerminalPrompter, UserPrompter};
use cmdpilot::model::{CommandModelService, StageRole};
use cmdpilot::pipeline::{
    extract_commands, CommandSink, PipelineOrchestrator, PipelineOutcome, RetryPolicy,
};
use cmdpilot::subprocess::{ProcessRunner, TokioProcessRunner};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};
use tracing_subscriber::EnvFilter;

/// Turn natural-language requests into verified shell commands
#[derive(Parser)]
#[command(name = "cmdpilot", version)]
#[command(about = "Turn natural-language requests into verified shell commands", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the settings file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a request through the model pipeline
    Ask {
        /// What you want done, in plain language
        query: String,

        /// Run the verified commands
        #[arg(short = 'x', long)]
        execute: bool,

        /// Do not ask for confirmation before executing
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Run a single shell command
    Exec {
        /// Command line to run
        command: String,

        /// Where to run it (defaults to the configured environment)
        #[arg(short, long, value_enum)]
        env: Option<ExecutionEnvironment>,

        /// Run through the privilege program (direct environment only)
        #[arg(long)]
        root: bool,
    },
    /// Print the knowledge-base documentation for tags
    Docs {
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Show the per-stage model settings
    Stages,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(cli.verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(cli.verbose >= 3) // Show line numbers for -vvv
        .init();

    debug!("cmdpilot started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = run(cli).await;

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);

    match cli.command {
        Commands::Ask {
            query,
            execute,
            yes,
        } => run_ask(&settings, runner, &query, execute, yes).await,
        Commands::Exec { command, env, root } => {
            let environment = env.unwrap_or(settings.executor.default_environment);
            run_exec(&settings, runner, &command, environment, root).await
        }
        Commands::Docs { tags } => run_docs(&settings, runner, &tags).await,
        Commands::Stages => run_stages(&settings, runner).await,
    }
}

fn file_accessor(settings: &Settings, runner: Arc<dyn ProcessRunner>) -> Arc<dyn FileAccessor> {
    if settings.privileged_files {
        Arc::new(
            PrivilegedFileAccessor::new(runner, settings.executor.privilege.clone())
                .with_timeout(settings.stage_timeout()),
        )
    } else {
        Arc::new(LocalFileAccessor::new())
    }
}

async fn load_stage_settings(settings: &Settings, accessor: &dyn FileAccessor) -> StageSettingsMap {
    match StageSettingsMap::load(accessor, &settings.model_config).await {
        Ok(stages) => stages,
        Err(e) => {
            warn!(
                "Stage model config {} unavailable ({}), using defaults",
                settings.model_config.display(),
                e
            );
            StageSettingsMap::default()
        }
    }
}

async fn run_ask(
    settings: &Settings,
    runner: Arc<dyn ProcessRunner>,
    query: &str,
    execute: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let accessor = file_accessor(settings, Arc::clone(&runner));
    let service = CommandModelService::new(Arc::clone(&runner), settings.backend_command.clone())
        .with_timeout(settings.stage_timeout());
    let resolver = DocumentationResolver::new(&settings.knowledge_base, Arc::clone(&accessor));
    let policy = RetryPolicy::new(settings.max_verification_retries, settings.retry_backoff());

    let mut pipeline = PipelineOrchestrator::new(Arc::new(service), resolver, policy)
        .with_stage_timeout(settings.stage_timeout());
    let stage_settings = load_stage_settings(settings, accessor.as_ref()).await;
    pipeline.configure(&stage_settings, accessor.as_ref()).await;

    let prompter = TerminalPrompter::new();
    let mut outcome = pipeline.submit(query).await;
    let payload = loop {
        match outcome {
            PipelineOutcome::Done(payload) => break payload,
            PipelineOutcome::AskingUser(question) => {
                let answer = prompter.prompt_text(&question, None).await?;
                outcome = pipeline.submit_user_response(&answer).await;
            }
            PipelineOutcome::Halted { stage, reason } => {
                bail!("Pipeline halted at {}: {}", stage, reason)
            }
            PipelineOutcome::RetriesExhausted { attempts, reason } => {
                bail!(
                    "Verification still failing after {} retries: {}",
                    attempts,
                    reason
                )
            }
        }
    };

    println!("{payload}");
    if !execute {
        return Ok(());
    }

    let commands = extract_commands(&serde_json::from_str(&payload)?);
    if commands.is_empty() {
        println!("No commands to execute.");
        return Ok(());
    }
    if !yes {
        println!("\nCommands:");
        for command in &commands {
            println!("  {command}");
        }
        if !prompter.prompt_yes_no("Execute these commands?").await? {
            println!("Skipped.");
            return Ok(());
        }
    }

    let prepared = prepare_executor(settings, runner, settings.executor.default_environment).await;
    let executor = prepared.executor.clone();
    let reports = CommandSink::new(executor.clone()).run(&payload).await;
    prepared.settle().await;
    print_history(&executor);
    let reports = reports?;

    let failed = reports.iter().filter(|report| !report.success()).count();
    if failed > 0 {
        bail!("{} of {} commands failed", failed, reports.len());
    }
    Ok(())
}

/// Executor plus the boot script it launched, if any.
struct PreparedExecutor {
    executor: SessionExecutor,
    boot: Option<JoinHandle<ExecutionReport>>,
}

impl PreparedExecutor {
    /// Wait for a boot script that is still running, so runtime shutdown does
    /// not kill it half way. The boot timeout bounds the wait.
    async fn settle(self) {
        let Some(boot) = self.boot else {
            return;
        };
        if !boot.is_finished() {
            debug!("Waiting for the isolated environment boot script to finish");
        }
        match boot.await {
            Ok(report) if !report.success() => warn!(
                "Boot script did not succeed: exit {:?}, {:?}",
                report.exit_code, report.outcome
            ),
            Ok(_) => {}
            Err(e) => warn!("Boot task failed: {}", e),
        }
    }
}

/// Build the executor for `environment`, launching the chroot boot script
/// first when it is needed.
async fn prepare_executor(
    settings: &Settings,
    runner: Arc<dyn ProcessRunner>,
    environment: ExecutionEnvironment,
) -> PreparedExecutor {
    let executor = SessionExecutor::new(runner, settings.executor.clone());
    let mut boot = None;

    if environment == ExecutionEnvironment::Isolated {
        // Commands do not wait for the boot script to finish
        boot = executor.boot_isolated_environment();
        executor.set_environment(ExecutionEnvironment::Isolated);
        if let Some(directory) = &settings.executor.initial_directory {
            debug!("Entering initial directory {}", directory);
            executor
                .run(&format!("cd {}", shell_words::quote(directory)), false)
                .await;
        }
    } else {
        executor.set_environment(environment);
    }
    PreparedExecutor { executor, boot }
}

async fn run_exec(
    settings: &Settings,
    runner: Arc<dyn ProcessRunner>,
    command: &str,
    environment: ExecutionEnvironment,
    root: bool,
) -> anyhow::Result<()> {
    let prepared = prepare_executor(settings, runner, environment).await;
    let executor = prepared.executor.clone();
    let report = executor.run(command, root).await;
    prepared.settle().await;
    print_history(&executor);

    if !report.success() {
        match report.exit_code {
            Some(code) => bail!("Command exited with status {}", code),
            None => bail!("Command did not complete: {:?}", report.outcome),
        }
    }
    Ok(())
}

fn print_history(executor: &SessionExecutor) {
    for entry in executor.history().snapshot() {
        if entry.is_error {
            eprintln!("{entry}");
        } else {
            println!("{entry}");
        }
    }
}

async fn run_docs(
    settings: &Settings,
    runner: Arc<dyn ProcessRunner>,
    tags: &[String],
) -> anyhow::Result<()> {
    let resolver = DocumentationResolver::new(&settings.knowledge_base, file_accessor(settings, runner));

    for tag in tags {
        match resolver.resolve(tag).await {
            Some(text) => println!("## {}\n{}\n", tag.to_lowercase(), text.trim_end()),
            None => println!("No documentation found for tag: {tag}\n"),
        }
    }
    Ok(())
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    match chars.len() {
        0 => "(none)".to_string(),
        1..=8 => "****".to_string(),
        n => format!("****{}", chars[n - 4..].iter().collect::<String>()),
    }
}

async fn run_stages(settings: &Settings, runner: Arc<dyn ProcessRunner>) -> anyhow::Result<()> {
    let accessor = file_accessor(settings, runner);
    let stages = StageSettingsMap::load(accessor.as_ref(), &settings.model_config)
        .await
        .with_context(|| {
            format!(
                "Failed to read stage model config {}",
                settings.model_config.display()
            )
        })?;

    println!("Stage model config: {}", settings.model_config.display());
    for role in StageRole::ALL {
        match stages.get(role) {
            Some(stage) => {
                let model_id = if stage.model_id.is_empty() {
                    role.default_model_id()
                } else {
                    stage.model_id.as_str()
                };
                println!("{role}");
                println!("  model:          {model_id}");
                println!("  api key:        {}", mask_key(&stage.api_key));
                println!("  import context: {}", stage.import_context);
                for path in &stage.context_files {
                    println!("  context:        {}", path.display());
                }
            }
            None => println!("{role}\n  (defaults)"),
        }
    }
    Ok(())
}
