use clap::Subcommand;
use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use kiln_cli::App;

use super::truncate;

#[derive(Subcommand)]
pub enum ProjectsCommands {
    /// List a user's projects, most recently active first
    List {
        #[arg(short, long)]
        user: String,
    },
}

pub async fn handle_projects_command(app: &App, command: ProjectsCommands) -> anyhow::Result<()> {
    match command {
        ProjectsCommands::List { user } => list_projects(app, &user).await,
    }
}

async fn list_projects(app: &App, user: &str) -> anyhow::Result<()> {
    let projects = app.list_projects(user).await?;

    if projects.is_empty() {
        println!("{}", "No projects found".yellow());
        println!("{}", "Use 'kiln generate' to start one".dimmed());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "Name", "Created", "Updated"]);

    for project in &projects {
        table.add_row(vec![
            project.id.clone(),
            truncate(&project.name, 30),
            project.created_at.format("%Y-%m-%d %H:%M").to_string(),
            project.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }

    println!("{}", table);
    println!("Total: {} projects", projects.len().to_string().cyan());
    Ok(())
}
