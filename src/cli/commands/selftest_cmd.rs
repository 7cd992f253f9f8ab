//! The `selftest` command: probe plugins against their live platforms.

use std::path::Path;
use std::sync::Arc;

use console::style;

use crate::transport::ReqwestTransport;

use super::helpers::{build_stack, load_settings};

pub async fn run(platform: Option<&str>, config: Option<&Path>) -> anyhow::Result<()> {
    let settings = load_settings(config)?;
    let stack = build_stack(settings).await?;
    let transport = Arc::new(ReqwestTransport::default());

    let names = match platform {
        Some(name) => vec![name.to_string()],
        None => stack
            .registry
            .names()
            .into_iter()
            .filter(|n| stack.registry.is_enabled(n))
            .collect(),
    };
    if names.is_empty() {
        anyhow::bail!("no enabled platforms to probe");
    }

    let mut failures = 0usize;
    for name in names {
        // Probes use a throwaway session like any other request.
        let session = stack.fingerprints.new_session(&name, None);
        match stack
            .registry
            .self_test(&name, transport.as_ref(), &session)
            .await
        {
            Ok(true) => println!("  {:20} {}", name, style("healthy").green()),
            Ok(false) => {
                failures += 1;
                println!("  {:20} {}", name, style("unhealthy").red());
            }
            Err(e) => {
                failures += 1;
                println!("  {:20} {}", name, style(format!("error: {}", e)).red());
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} platform(s) failed the self test", failures);
    }
    Ok(())
}
