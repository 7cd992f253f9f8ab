//! The `platforms` command: list, enable/disable and inspect plugins.

use std::path::Path;

use clap::Subcommand;
use console::style;

use crate::config::Settings;
use crate::plugins::PluginRegistry;

use super::helpers::load_settings;

#[derive(Subcommand)]
pub enum PlatformsAction {
    /// List registered platforms and their state
    List,
    /// Show accumulated per-plugin statistics
    Stats,
    /// Enable a platform in the config file
    Enable { name: String },
    /// Disable a platform in the config file
    Disable { name: String },
}

fn print_list(settings: &Settings) {
    let registry = PluginRegistry::discover(settings);
    for name in registry.names() {
        let Ok(descriptor) = registry.get(&name) else {
            continue;
        };
        let state = if descriptor.enabled {
            style("enabled").green()
        } else {
            style("disabled").dim()
        };
        let caps = &descriptor.capabilities;
        let mut features = vec!["search"];
        if caps.event_detail {
            features.push("detail");
        }
        if caps.availability {
            features.push("availability");
        }
        if caps.city_filter {
            features.push("city");
        }
        if caps.date_filter {
            features.push("dates");
        }
        println!(
            "  {:20} {:10} {:40} [{}]",
            style(&name).bold(),
            state,
            descriptor.entry.base_url,
            features.join(", ")
        );
    }
}

fn print_stats(settings: &Settings) {
    let registry = PluginRegistry::discover(settings);
    println!(
        "  {:20} {:>8} {:>10} {:>11} {:>12}",
        "platform", "calls", "successes", "detections", "avg latency"
    );
    for name in registry.names() {
        let Ok(stats) = registry.stats(&name) else {
            continue;
        };
        println!(
            "  {:20} {:>8} {:>10} {:>11} {:>9.0} ms",
            name, stats.calls, stats.successes, stats.detections, stats.avg_latency_ms
        );
    }
}

/// Flip a platform's enabled flag in the config file itself, so the change
/// survives across runs.
fn set_enabled(config: Option<&Path>, name: &str, enabled: bool) -> anyhow::Result<()> {
    let path = Settings::resolve_path(config)
        .ok_or_else(|| anyhow::anyhow!("no config file found to update"))?;
    let text = std::fs::read_to_string(&path)?;
    let mut root: toml::Table = toml::from_str(&text)?;

    let platform = root
        .get_mut("platforms")
        .and_then(|v| v.as_table_mut())
        .and_then(|t| t.get_mut(name))
        .and_then(|v| v.as_table_mut())
        .ok_or_else(|| anyhow::anyhow!("platform '{}' not found in {}", name, path.display()))?;
    platform.insert("enabled".to_string(), toml::Value::Boolean(enabled));

    std::fs::write(&path, toml::to_string_pretty(&root)?)?;
    println!(
        "{} platform '{}' in {}",
        if enabled { "enabled" } else { "disabled" },
        name,
        path.display()
    );
    Ok(())
}

pub async fn run(action: PlatformsAction, config: Option<&Path>) -> anyhow::Result<()> {
    match action {
        PlatformsAction::List => {
            let settings = load_settings(config)?;
            print_list(&settings);
            Ok(())
        }
        PlatformsAction::Stats => {
            let settings = load_settings(config)?;
            print_stats(&settings);
            Ok(())
        }
        PlatformsAction::Enable { name } => set_enabled(config, &name, true),
        PlatformsAction::Disable { name } => set_enabled(config, &name, false),
    }
}
