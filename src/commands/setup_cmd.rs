use anyhow::{bail, Result};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use std::path::Path;

use crate::agent::AgentKind;
use crate::registry::RegistryKind;
use crate::setup::{setup, SetupOptions};

fn parse_agents(agents: Option<&str>) -> Result<Vec<AgentKind>> {
    let Some(agents) = agents else {
        return Ok(Vec::new());
    };
    agents
        .split(',')
        .filter(|a| !a.is_empty())
        .map(|a| a.trim().parse::<AgentKind>().map_err(anyhow::Error::msg))
        .collect()
}

fn glyph(ok: bool, color: bool) -> String {
    match (ok, color) {
        (true, true) => "ok".green().to_string(),
        (true, false) => "ok".to_string(),
        (false, true) => "!!".red().to_string(),
        (false, false) => "!!".to_string(),
    }
}

pub async fn run(
    home: Option<&Path>,
    agents: Option<String>,
    skip_prebuild: bool,
    registry: Option<String>,
    upload: bool,
) -> Result<()> {
    let agents = parse_agents(agents.as_deref())?;
    let color = std::io::stdout().is_terminal();

    let stack = super::build_stack(home).await?;

    if let Some(registry) = registry {
        let kind: RegistryKind = registry.parse().map_err(anyhow::Error::msg)?;
        stack.registries.set_default(kind);
        stack.config.update(|c| c.registry_kind = kind)?;
        println!("Default registry set to {kind}.");
    }

    let options = SetupOptions {
        agents: agents.clone(),
        skip_prebuild,
    };
    let outcome = match setup(&stack.resolver, options).await {
        Ok(outcome) => outcome,
        Err(missing) => {
            println!("vibekit setup");
            println!("=============");
            for check in &missing.report.checks {
                println!("  [{}] {:<16} {}", glyph(check.ok, color), check.name, check.detail);
            }
            println!();
            for remediation in missing.report.remediations() {
                println!("  -> {remediation}");
            }
            bail!("missing host dependencies: {}", missing.failed.join(", "));
        }
    };

    println!("vibekit setup");
    println!("=============");
    for check in &outcome.report.checks {
        println!("  [{}] {:<16} {}", glyph(check.ok, color), check.name, check.detail);
    }

    if !outcome.prebuilt.is_empty() {
        println!();
        println!("Agent images:");
        for built in &outcome.prebuilt {
            match &built.result {
                Ok(tag) => {
                    println!("  [{}] {:<10} {tag}", glyph(true, color), built.agent)
                }
                Err(e) => println!("  [{}] {:<10} {e}", glyph(false, color), built.agent),
            }
        }
    }

    if upload {
        let agents = if agents.is_empty() {
            AgentKind::ALL.to_vec()
        } else {
            agents
        };
        println!();
        println!("Uploading images to {}:", stack.registries.default_kind());
        let report = stack.registries.setup_registry(None, &agents).await?;
        for entry in &report.per_agent {
            match (&entry.image, &entry.error) {
                (Some(image), None) => {
                    println!("  [{}] {:<10} {image}", glyph(true, color), entry.agent)
                }
                (_, Some(error)) => {
                    println!("  [{}] {:<10} {error}", glyph(false, color), entry.agent)
                }
                _ => {}
            }
        }
        if !report.ok() {
            bail!("some uploads failed");
        }
    }

    Ok(())
}
