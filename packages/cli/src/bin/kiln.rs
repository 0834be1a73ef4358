use clap::{Parser, Subcommand};
use colored::*;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::env::EnvCommands;
use cli::projects::ProjectsCommands;
use cli::usage::UsageCommands;
use cli::PlanArg;
use kiln_cli::{App, Generation};
use kiln_config::Settings;
use kiln_storage::UsageError;

/// Exit status for a run that finished without a usable result
const EXIT_RUN_FAILED: i32 = 1;
/// Exit status when the caller has no credits left
const EXIT_QUOTA: i32 = 2;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Kiln CLI - build web apps in a cloud sandbox from a prompt")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a new project from a prompt and run the code agent
    Generate {
        /// User the project belongs to
        #[arg(short, long)]
        user: String,
        #[arg(long, value_enum, default_value = "free")]
        plan: PlanArg,
        /// What to build
        prompt: String,
    },
    /// Continue an existing project with another request
    FollowUp {
        /// Project ID to continue
        #[arg(short, long)]
        project: String,
        #[arg(long, value_enum, default_value = "free")]
        plan: PlanArg,
        prompt: String,
    },
    /// Resume an interrupted run from its step log
    Resume {
        /// Run ID printed by generate or follow-up
        run_id: String,
    },
    /// List projects
    #[command(subcommand)]
    Projects(ProjectsCommands),
    /// Inspect or reset credit usage
    #[command(subcommand)]
    Usage(UsageCommands),
    /// Check the environment configuration
    #[command(subcommand)]
    Env(EnvCommands),
}

#[tokio::main]
async fn main() {
    dotenvy::from_filename(".env.local").ok();
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match handle_command(cli.command).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            if let Some(UsageError::QuotaExceeded { resets_at, .. }) = e.downcast_ref() {
                eprintln!("{} {}", "Error:".red().bold(), e);
                eprintln!("Credits reset at {}", resets_at.to_rfc3339().cyan());
                process::exit(EXIT_QUOTA);
            }
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<i32> {
    // Env checks must work even when settings do not parse
    let command = match command {
        Commands::Env(env_cmd) => return Ok(cli::env::handle_env_command(env_cmd)),
        other => other,
    };

    let settings = Settings::from_env()?;
    let app = App::connect(&settings).await?;

    match command {
        Commands::Generate { user, plan, prompt } => {
            let generation = app.generate(&user, plan.into(), &prompt).await?;
            print_generation(&generation)
        }
        Commands::FollowUp {
            project,
            plan,
            prompt,
        } => {
            let generation = app.follow_up(&project, plan.into(), &prompt).await?;
            print_generation(&generation)
        }
        Commands::Resume { run_id } => {
            let generation = app.resume(&run_id).await?;
            print_generation(&generation)
        }
        Commands::Projects(projects_cmd) => {
            cli::projects::handle_projects_command(&app, projects_cmd).await?;
            Ok(0)
        }
        Commands::Usage(usage_cmd) => {
            cli::usage::handle_usage_command(&app, usage_cmd).await?;
            Ok(0)
        }
        Commands::Env(_) => Ok(0),
    }
}

/// Print the outcome as JSON on stdout and pick the exit status
fn print_generation(generation: &Generation) -> anyhow::Result<i32> {
    println!("{}", serde_json::to_string_pretty(generation)?);

    if generation.outcome.is_success() {
        eprintln!("{} Run {} succeeded", "✓".green(), generation.run_id.cyan());
        Ok(0)
    } else {
        eprintln!(
            "{} Run {} ended with status {}",
            "✗".red(),
            generation.run_id.cyan(),
            generation.outcome.status().as_str().yellow()
        );
        Ok(EXIT_RUN_FAILED)
    }
}
