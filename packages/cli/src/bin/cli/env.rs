use clap::Subcommand;
use colored::*;
use kiln_config::validate_environment;

#[derive(Subcommand)]
pub enum EnvCommands {
    /// Report required and optional variables, masking secrets
    Check,
}

/// Returns the process exit status
pub fn handle_env_command(command: EnvCommands) -> i32 {
    match command {
        EnvCommands::Check => check(),
    }
}

fn check() -> i32 {
    let report = validate_environment();
    print!("{}", report);

    if report.has_errors() {
        eprintln!(
            "{} Missing required environment variables",
            "Error:".red().bold()
        );
        return 1;
    }
    if report.has_warnings() {
        eprintln!(
            "{} Some variables still hold placeholder values",
            "Warning:".yellow().bold()
        );
    }
    println!("{}", "Environment OK".green());
    0
}
