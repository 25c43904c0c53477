//! Pipeline stage commands: run, fetch, validate, split, train, promote.

use anyhow::Result;
use colored::Colorize;
use podium_core::{Pipeline, PipelineError, Settings, Stage};
use podium_training::{PromotionOutcome, RunRecord, SplitReport};
use std::path::Path;

pub fn load_settings(settings_path: &Path, secrets_path: &Path) -> Result<Settings> {
    Ok(Settings::load_from(settings_path, secrets_path).map_err(|e| PipelineError::new(Stage::Config, e))?)
}

pub async fn run(settings: &Settings) -> Result<()> {
    let report = Pipeline::from_settings(settings)?.run().await?;

    println!();
    println!("{}", "Pipeline complete".bold().green());
    println!(
        "  {} {} images, {} labels",
        "Fetched:".bold(),
        report.fetch.images,
        report.fetch.labels
    );
    println!("  {} {} sample pairs", "Validated:".bold(), report.validation.pairs);
    print_split(&report.split);
    print_run(&report.run, &settings.promotion.primary_metric);
    print_promotion(&report.promotion, &settings.promotion.model_name);
    Ok(())
}

pub async fn fetch(settings: &Settings) -> Result<()> {
    let report = Pipeline::from_settings(settings)?.fetch().await?;
    println!(
        "{} {} images and {} labels into {}",
        "Fetched".bold().green(),
        report.images,
        report.labels,
        settings.data.path.display()
    );
    Ok(())
}

pub fn validate(settings: &Settings) -> Result<()> {
    let summary = Pipeline::from_settings(settings)?.validate()?;
    match summary.boxes {
        Some(boxes) => println!(
            "{} {} sample pairs, {} boxes",
            "Dataset valid:".bold().green(),
            summary.pairs,
            boxes
        ),
        None => println!(
            "{} {} sample pairs {}",
            "Dataset valid:".bold().green(),
            summary.pairs,
            "(no class manifest, labels not linted)".dimmed()
        ),
    }
    Ok(())
}

pub fn split(settings: &Settings) -> Result<()> {
    let report = Pipeline::from_settings(settings)?.split()?;
    print_split(&report);
    Ok(())
}

pub async fn train(settings: &Settings) -> Result<()> {
    let record = Pipeline::from_settings(settings)?.train().await?;
    print_run(&record, &settings.promotion.primary_metric);
    Ok(())
}

pub fn promote(settings: &Settings) -> Result<()> {
    let outcome = Pipeline::from_settings(settings)?.promote()?;
    print_promotion(&outcome, &settings.promotion.model_name);
    Ok(())
}

fn print_split(report: &SplitReport) {
    println!(
        "  {} train {}, val {}, test {} -> {}",
        "Split:".bold(),
        report.train,
        report.val,
        report.test,
        report.config_path.display().to_string().dimmed()
    );
}

fn print_run(record: &RunRecord, metric: &str) {
    let value = record
        .final_metric(metric)
        .map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"));
    println!(
        "  {} {} ({}) {metric} = {}",
        "Trained:".bold(),
        record.run_name.cyan(),
        record.run_id.to_string().dimmed(),
        value
    );
}

fn print_promotion(outcome: &PromotionOutcome, model_name: &str) {
    match outcome {
        PromotionOutcome::Promoted { version, metric, dethroned } => {
            println!(
                "  {} {model_name} v{} is the new Champion ({metric:.4})",
                "Promoted:".bold().green(),
                version.version
            );
            if let Some(old) = dethroned {
                println!("  {} v{} is now Challenger", "Dethroned:".bold(), old.version);
            }
        }
        PromotionOutcome::Retained { version, metric, champion, champion_metric } => {
            println!(
                "  {} {model_name} v{} ({metric:.4}) did not beat Champion v{} ({champion_metric:.4})",
                "Registered:".bold().yellow(),
                version.version,
                champion.version
            );
        }
        PromotionOutcome::AlreadyRegistered { version } => {
            println!(
                "  {} latest run is already {model_name} v{}; nothing to promote",
                "Unchanged:".bold().yellow(),
                version.version
            );
        }
    }
}
