//! The `scrape` command: run one round and print the merged feed.

use std::path::Path;

use chrono::NaiveDate;
use console::style;

use crate::models::{Price, SearchCriteria};
use crate::orchestrator::{PlatformOutcome, ScrapeReport};
use crate::rate_limit::save_rate_limit_state;
use crate::sink::{LogSink, TicketSink};

use super::helpers::{build_stack, load_settings};

#[derive(clap::Args)]
pub struct ScrapeArgs {
    /// Search query (artist, team or event name)
    #[arg(short, long)]
    query: String,

    /// Scrape a single platform instead of fanning out
    #[arg(long)]
    platform: Option<String>,

    /// Restrict results to a city
    #[arg(long)]
    city: Option<String>,

    /// Earliest event date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<String>,

    /// Latest event date (YYYY-MM-DD)
    #[arg(long)]
    to: Option<String>,

    /// Cap candidates per platform
    #[arg(long)]
    limit: Option<usize>,

    /// Treat this as a presale window
    #[arg(long)]
    presale: bool,
}

impl ScrapeArgs {
    fn to_criteria(&self) -> anyhow::Result<SearchCriteria> {
        let parse_date = |raw: &str| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| anyhow::anyhow!("invalid date '{}': {}", raw, e))
        };
        Ok(SearchCriteria {
            query: self.query.clone(),
            city: self.city.clone(),
            date_from: self.from.as_deref().map(parse_date).transpose()?,
            date_to: self.to.as_deref().map(parse_date).transpose()?,
            max_results: self.limit,
            presale: self.presale,
        })
    }
}

fn format_price(price: &Option<Price>) -> String {
    match price {
        Some(p) => format!("{:.2} {}", p.amount_minor as f64 / 100.0, p.currency),
        None => "-".to_string(),
    }
}

fn print_report(report: &ScrapeReport) {
    println!(
        "{} {} canonical records from {} platforms in {:.1}s",
        style("==").bold(),
        report.records.len(),
        report.platforms.len(),
        report.elapsed.as_secs_f64()
    );

    for record in &report.records {
        println!(
            "  {} {} @ {} on {}  {}  [{} sources, confidence {:.2}]",
            style(&record.identity[..12.min(record.identity.len())]).dim(),
            style(&record.name).bold(),
            record.venue,
            record.starts_at.format("%Y-%m-%d %H:%M"),
            format_price(&record.price),
            record.sources.len(),
            record.confidence
        );
    }

    println!();
    for platform in &report.platforms {
        let label = match &platform.outcome {
            PlatformOutcome::Ok => style(platform.outcome.as_str().to_string()).green(),
            PlatformOutcome::NoResults | PlatformOutcome::ParseDegraded => {
                style(platform.outcome.as_str().to_string()).yellow()
            }
            PlatformOutcome::Skipped { reason } => style(format!("skipped ({})", reason)).dim(),
            PlatformOutcome::Failed { error } => style(format!("failed ({})", error)).red(),
            other => style(other.as_str().to_string()).red(),
        };
        println!(
            "  {:20} {}  {} candidates, demand {}, poll again in {}s",
            platform.platform,
            label,
            platform.candidates,
            platform.demand.as_str(),
            platform.poll_again.as_secs()
        );
    }
}

pub async fn run(args: ScrapeArgs, config: Option<&Path>) -> anyhow::Result<()> {
    let settings = load_settings(config)?;
    if settings.platforms.is_empty() {
        anyhow::bail!("no platforms configured; add [platforms.*] entries to the config");
    }
    let state_db = settings.state_db_path();
    let stack = build_stack(settings).await?;

    let criteria = args.to_criteria()?;
    let report = match &args.platform {
        Some(name) => stack.orchestrator.scrape_platform(name, &criteria).await?,
        None => stack.orchestrator.scrape_all(&criteria).await,
    };

    print_report(&report);
    LogSink.deliver(&report.records).await?;

    if let Some(db_path) = state_db {
        save_rate_limit_state(&stack.limiter, &db_path).await?;
    }
    Ok(())
}
