use anyhow::{bail, Context, Result};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::agent::AgentKind;
use crate::docker::container::{self, AGENT_LABEL, BRANCH_LABEL, SANDBOX_LABEL};
use crate::sandbox::command::snippet;
use crate::sandbox::{RunOptions, SandboxError};

fn parse_agent(agent: Option<&str>) -> Result<Option<AgentKind>> {
    agent
        .map(|a| a.parse::<AgentKind>().map_err(anyhow::Error::msg))
        .transpose()
}

/// Parse `K=V,K2=V2` into an env map.
fn parse_env(env: Option<&str>) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    let Some(env) = env else {
        return Ok(vars);
    };
    for pair in env.split(',').filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid --env entry '{pair}' (expected K=V)");
        };
        if key.is_empty() {
            bail!("invalid --env entry '{pair}' (empty key)");
        }
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

pub async fn create(
    home: Option<&Path>,
    name: Option<String>,
    agent: Option<String>,
    working_directory: Option<String>,
    env: Option<String>,
) -> Result<()> {
    let agent = parse_agent(agent.as_deref())?;
    let env = parse_env(env.as_deref())?;
    let stack = super::build_stack(home).await?;

    let sandbox = match name {
        Some(name) => {
            stack
                .provider
                .create_with_id(name, env, agent, working_directory)
                .await?
        }
        None => stack.provider.create(env, agent, working_directory).await?,
    };
    sandbox
        .start()
        .await
        .with_context(|| format!("starting sandbox '{}'", sandbox.id()))?;

    println!("{}", sandbox.id());
    Ok(())
}

struct SandboxRow {
    name: String,
    agent: String,
    branch: String,
    status: String,
    image: String,
}

fn running(status: &str) -> bool {
    status.starts_with("Up")
}

pub async fn list(
    home: Option<&Path>,
    status: Option<String>,
    agent: Option<String>,
    branch: Option<String>,
    json: bool,
) -> Result<()> {
    let agent_filter = parse_agent(agent.as_deref())?;
    let stack = super::build_stack(home).await?;
    let containers = container::list_sandbox_containers(stack.client.docker()).await?;

    let mut rows = Vec::new();
    for summary in containers {
        let labels = summary.labels.unwrap_or_default();
        let Some(name) = labels.get(SANDBOX_LABEL).cloned() else {
            continue;
        };
        let row = SandboxRow {
            name,
            agent: labels.get(AGENT_LABEL).cloned().unwrap_or_default(),
            branch: labels.get(BRANCH_LABEL).cloned().unwrap_or_default(),
            status: summary.status.clone().unwrap_or_default(),
            image: summary.image.clone().unwrap_or_default(),
        };

        if let Some(kind) = agent_filter {
            if row.agent != kind.slug() {
                continue;
            }
        }
        if let Some(branch) = &branch {
            if &row.branch != branch {
                continue;
            }
        }
        if let Some(status) = &status {
            let wants_running = matches!(status.as_str(), "running" | "up");
            if running(&row.status) != wants_running {
                continue;
            }
        }
        rows.push(row);
    }
    rows.sort_by(|a, b| a.name.cmp(&b.name));

    if json {
        let entries: Vec<serde_json::Value> = rows
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.name,
                    "agent": r.agent,
                    "branch": r.branch,
                    "status": r.status,
                    "image": r.image,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No sandboxes found.");
        return Ok(());
    }

    let color = std::io::stdout().is_terminal();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["NAME", "AGENT", "BRANCH", "STATUS", "IMAGE"]);
    for row in &rows {
        let status = if color && running(&row.status) {
            row.status.green().to_string()
        } else {
            row.status.clone()
        };
        table.add_row([
            Cell::new(&row.name),
            Cell::new(&row.agent),
            Cell::new(&row.branch),
            Cell::new(status),
            Cell::new(&row.image),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn confirm(prompt: &str) -> bool {
    print!("{prompt} [y/N] ");
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

pub async fn delete(
    home: Option<&Path>,
    names: Vec<String>,
    force: bool,
    all: bool,
    interactive: bool,
) -> Result<()> {
    if names.is_empty() && !all {
        bail!("specify sandbox names to delete, or --all");
    }

    let stack = super::build_stack(home).await?;
    let containers = container::list_sandbox_containers(stack.client.docker()).await?;

    let mut deleted = 0usize;
    let mut known = Vec::new();
    for summary in containers {
        let labels = summary.labels.unwrap_or_default();
        let Some(name) = labels.get(SANDBOX_LABEL).cloned() else {
            continue;
        };
        known.push(name.clone());
        if !all && !names.contains(&name) {
            continue;
        }
        if interactive && !force && !confirm(&format!("Delete sandbox '{name}'?")) {
            continue;
        }

        let Some(id) = summary.id else { continue };
        container::stop_container(stack.client.docker(), &id, 5).await?;
        container::remove_container(stack.client.docker(), &id, true).await?;
        println!("deleted {name}");
        deleted += 1;
    }

    if !all {
        for name in &names {
            if !known.contains(name) {
                eprintln!("sandbox '{name}' not found (check `vibekit local list`)");
            }
        }
    }
    if deleted == 0 && !all {
        bail!("nothing deleted");
    }
    Ok(())
}

pub async fn run(
    home: Option<&Path>,
    sandbox_id: Option<String>,
    command: String,
    agent: Option<String>,
    streaming: bool,
) -> Result<()> {
    let agent = parse_agent(agent.as_deref())?;
    let stack = super::build_stack(home).await?;

    let (sandbox, ephemeral) = match sandbox_id {
        Some(id) => (stack.provider.resume(&id).await?, false),
        None => (
            stack.provider.create(BTreeMap::new(), agent, None).await?,
            true,
        ),
    };

    let options = if streaming {
        RunOptions {
            on_stdout: Some(Box::new(|chunk: &str| {
                print!("{chunk}");
                let _ = std::io::stdout().flush();
            })),
            on_stderr: Some(Box::new(|chunk: &str| {
                eprint!("{chunk}");
                let _ = std::io::stderr().flush();
            })),
            ..Default::default()
        }
    } else {
        RunOptions::default()
    };

    let outcome = sandbox.run(&command, options).await;
    if ephemeral {
        sandbox.kill().await;
    }

    match outcome {
        Ok(result) => {
            if !streaming {
                print!("{}", result.stdout);
                eprint!("{}", result.stderr);
            }
            if result.exit_code != 0 {
                std::process::exit(result.exit_code.clamp(1, 255) as i32);
            }
            Ok(())
        }
        Err(SandboxError::Timeout { timeout_ms, partial, .. }) => {
            if !streaming {
                print!("{}", partial.stdout);
                eprint!("{}", partial.stderr);
            }
            bail!(
                "command '{}' timed out after {}ms in sandbox '{}'",
                snippet(&command),
                timeout_ms,
                sandbox.id()
            );
        }
        Err(e) => Err(e).with_context(|| {
            format!(
                "running '{}' in sandbox '{}'",
                snippet(&command),
                sandbox.id()
            )
        }),
    }
}
