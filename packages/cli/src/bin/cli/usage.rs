use clap::Subcommand;
use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use kiln_cli::App;

use super::PlanArg;

#[derive(Subcommand)]
pub enum UsageCommands {
    /// Show consumed and remaining credits for a user
    Status {
        #[arg(short, long)]
        user: String,
        #[arg(long, value_enum, default_value = "free")]
        plan: PlanArg,
    },
    /// Clear every usage window
    Reset,
}

pub async fn handle_usage_command(app: &App, command: UsageCommands) -> anyhow::Result<()> {
    match command {
        UsageCommands::Status { user, plan } => show_status(app, &user, plan).await,
        UsageCommands::Reset => reset(app).await,
    }
}

async fn show_status(app: &App, user: &str, plan: PlanArg) -> anyhow::Result<()> {
    let status = app.usage_status(user, plan.into()).await?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["User", "Consumed", "Remaining", "Limit", "Resets"]);
    table.add_row(vec![
        user.to_string(),
        status.consumed.to_string(),
        status.remaining.to_string(),
        status.limit.to_string(),
        status
            .resets_at
            .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "—".to_string()),
    ]);

    println!("{}", table);
    if status.remaining == 0 {
        println!("{}", "You have run out of credits".yellow());
    }
    Ok(())
}

async fn reset(app: &App) -> anyhow::Result<()> {
    let cleared = app.reset_usage().await?;
    println!(
        "{} Cleared {} usage window(s)",
        "✓".green(),
        cleared.to_string().cyan()
    );
    Ok(())
}
