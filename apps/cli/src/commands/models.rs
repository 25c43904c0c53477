//! Model registry commands.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use podium_core::{list_models, Pipeline, PipelineError, Settings, Stage};

#[derive(Subcommand, Debug)]
pub enum ModelsCommand {
    /// List every registered version with its aliases and primary metric
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn execute(settings: &Settings, command: ModelsCommand) -> Result<()> {
    match command {
        ModelsCommand::List { json } => list(settings, json),
    }
}

fn list(settings: &Settings, json_output: bool) -> Result<()> {
    let pipeline = Pipeline::from_settings(settings)?;
    let metric = &settings.promotion.primary_metric;
    let models = list_models(pipeline.tracker(), pipeline.registry(), metric)
        .map_err(|e| PipelineError::new(Stage::Promote, e))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Registered Models ({})", models.len()).bold().cyan());
    println!();

    if models.is_empty() {
        println!("  {}", "No model versions registered yet.".dimmed());
        println!();
        println!("  {}", "Tip: run `podium train` then `podium promote`.".dimmed());
        return Ok(());
    }

    println!("{:<20} {:<8} {:<22} {:<10} {}", "Model", "Version", "Aliases", metric, "Run");
    println!("{}", "─".repeat(90));
    for m in models {
        let aliases = if m.aliases.is_empty() { "-".to_string() } else { m.aliases.join(",") };
        let value = m.metric.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"));
        println!(
            "{:<20} {:<8} {:<22} {:<10} {}",
            m.name.cyan(),
            format!("v{}", m.version),
            aliases.green(),
            value,
            m.run_id.to_string().dimmed()
        );
    }
    println!();
    Ok(())
}
