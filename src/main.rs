mod check;
mod prompt;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use formflow_core::config::AppConfig;
use formflow_core::event::{EventBus, TracingSink};
use formflow_core::traits::EventSink;
use formflow_core::types::FlowEvent;
use formflow_dispatch::{dry_run_registry, standard_registry};
use formflow_flow::{submit, ActionOrchestrator, Advance, Navigator, SubmissionReport};

use prompt::Step;

#[derive(Parser)]
#[command(name = "formflow", version, about = "Branching questionnaires with pluggable submission actions")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "formflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill in the form interactively and submit it
    Run {
        /// Log what each action would send instead of sending it
        #[arg(long)]
        dry_run: bool,
        /// Run actions concurrently (overrides the config)
        #[arg(long)]
        parallel: bool,
    },
    /// Check the form and actions for structural problems
    Check,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "formflow", &mut std::io::stdout());
        return Ok(());
    }

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        eprintln!(
            "Warning: No config file found at {}. Using defaults.",
            cli.config.display()
        );
        AppConfig::default()
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", config.to_toml()?);
        }
        Some(Commands::Check) => {
            println!("formflow check");
            println!("==============");
            let errors = check::run_check(&config);
            if errors > 0 {
                std::process::exit(1);
            }
        }
        Some(Commands::Run { dry_run, parallel }) => {
            run_form(&config, dry_run, parallel || config.submission.parallel).await?;
        }
        None => {
            run_form(&config, false, config.submission.parallel).await?;
        }
        Some(Commands::Completions { .. }) => unreachable!(),
    }

    Ok(())
}

async fn run_form(config: &AppConfig, dry_run: bool, parallel: bool) -> anyhow::Result<()> {
    let event_bus = Arc::new(EventBus::default());
    let mut events = event_bus.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                FlowEvent::ActionSkipped { action } => {
                    println!("  [--] {} (condition not met)", action);
                }
                FlowEvent::ActionRetrying {
                    action,
                    attempt,
                    backoff_ms,
                    error,
                } => {
                    println!(
                        "  [..] {} attempt {} failed: {} (retrying in {} ms)",
                        action, attempt, error, backoff_ms
                    );
                }
                FlowEvent::ActionSucceeded { action, .. } => {
                    println!("  [OK] {}", action);
                }
                FlowEvent::ActionFailed { action, error, .. } => {
                    println!("  [!!] {}: {}", action, error);
                }
                other => TracingSink.emit(other),
            }
        }
    });

    let mut nav = Navigator::from_fields(config.form.fields.clone(), event_bus.clone())?;
    if let Some(title) = &config.form.title {
        println!("{}", title);
        println!("{}", "=".repeat(title.chars().count()));
    }

    loop {
        let field = nav.current_field().clone();
        let (step, total) = nav.progress();
        println!();
        println!("[{}/{}]", step, total);

        let advance = match prompt::ask(&field, nav.answers().get(&field.id), nav.history().len() > 1)? {
            Step::Back => {
                nav.retreat();
                continue;
            }
            Step::Continue => nav.advance(None),
            Step::Answer(value) => match nav.select(&field.id, value)? {
                Some(advance) => advance,
                None => nav.advance(None),
            },
        };

        match advance {
            Advance::Moved { .. } => {}
            Advance::Rejected { issue, .. } => println!("  {}", issue),
            Advance::Terminal => break,
        }
    }

    let registry = if dry_run {
        dry_run_registry()
    } else {
        standard_registry(&config.http)?
    };
    let orchestrator =
        ActionOrchestrator::from_config(&config.submission, registry, event_bus.clone());
    let actions = &config.submission.actions;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    loop {
        if !prompt::confirm("Submit your answers?")? {
            println!("Not submitted.");
            break;
        }
        println!();
        match submit(&nav, actions, &orchestrator, parallel, &cancel).await {
            Ok(SubmissionReport::NoActions) => {
                println!("Submitted.");
                break;
            }
            Ok(SubmissionReport::Completed(outcome)) => {
                println!();
                println!(
                    "  {} succeeded, {} failed, {} skipped",
                    outcome.success_count, outcome.failure_count, outcome.skipped_count
                );
                match outcome.into_result() {
                    Ok(outcome) if outcome.overall_success => {
                        println!("Submitted.");
                        break;
                    }
                    Ok(_) => {
                        println!("Nothing was submitted: no action ran.");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Submission failed");
                        println!("Could not submit. Your answers are kept.");
                    }
                }
            }
            Err(formflow_core::FormError::Cancelled) => {
                println!("Submission cancelled.");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    printer.abort();
    info!(session_id = %nav.session_id(), "Session finished");
    Ok(())
}
