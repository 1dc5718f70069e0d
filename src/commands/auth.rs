use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::auth::{
    AuthError, ExportFormat, FileStorage, HttpTokenEndpoint, ImportSource, OAuthConfig,
    TokenManager,
};

fn tokens_dir(home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) => home.join("tokens"),
        None => crate::config::vibekit_home().join("tokens"),
    }
}

fn manager_for(home: Option<&Path>, provider: &str) -> Result<TokenManager, AuthError> {
    let config = OAuthConfig::for_provider(provider).ok_or_else(|| AuthError::UnknownProvider {
        provider: provider.to_string(),
    })?;
    let storage = Arc::new(FileStorage::new(
        tokens_dir(home).join(format!("{provider}.json")),
    ));
    Ok(TokenManager::new(
        provider,
        storage,
        Arc::new(HttpTokenEndpoint::new(config.clone())),
        &config,
    ))
}

pub async fn login(home: Option<&Path>, provider: &str) -> Result<()> {
    let manager = manager_for(home, provider)?;
    let flow = manager.begin_login();

    println!("Open this URL in your browser to authorize vibekit:\n");
    println!("  {}\n", flow.authorize_url);
    print!("Paste the code shown after approval (code#state): ");
    std::io::stdout().flush().ok();

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("reading the authorization code")?;

    let record = manager.finish_login(flow, line.trim()).await?;
    match record.expires_in {
        Some(secs) => println!("Authenticated with {provider} (token lifetime {secs}s)."),
        None => println!("Authenticated with {provider}."),
    }
    Ok(())
}

pub fn logout(home: Option<&Path>, provider: &str) -> Result<()> {
    let manager = manager_for(home, provider)?;
    manager.logout()?;
    println!("Logged out of {provider}.");
    Ok(())
}

fn describe(provider: &str, manager: &TokenManager) -> Result<()> {
    match manager.status()? {
        Some(record) => {
            let state = if record.is_expired() {
                if record.refresh_token.is_some() {
                    "expired (refreshable)"
                } else {
                    "expired"
                }
            } else {
                "valid"
            };
            let scope = record.scope.as_deref().unwrap_or("-");
            println!("{provider:<12} {state:<22} scope: {scope}");
        }
        None => println!("{provider:<12} not authenticated"),
    }
    Ok(())
}

pub fn status(home: Option<&Path>, provider: Option<String>) -> Result<()> {
    match provider {
        Some(provider) => {
            let manager = manager_for(home, &provider)?;
            describe(&provider, &manager)
        }
        None => {
            // Every provider with a token file, whether or not its OAuth
            // endpoints are still known.
            let dir = tokens_dir(home);
            let mut providers: Vec<String> = std::fs::read_dir(&dir)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .filter_map(|e| {
                            let name = e.file_name().to_string_lossy().to_string();
                            name.strip_suffix(".json").map(str::to_string)
                        })
                        .collect()
                })
                .unwrap_or_default();
            providers.sort();

            if providers.is_empty() {
                println!("No stored credentials. Run `vibekit auth login <provider>`.");
                return Ok(());
            }
            for provider in providers {
                match manager_for(home, &provider) {
                    Ok(manager) => describe(&provider, &manager)?,
                    Err(_) => println!("{provider:<12} stored (endpoints unknown)"),
                }
            }
            Ok(())
        }
    }
}

pub async fn verify(home: Option<&Path>, provider: &str) -> Result<()> {
    let manager = manager_for(home, provider)?;
    match manager.get_valid_token().await? {
        Some(_) => {
            println!("{provider}: token is valid.");
            Ok(())
        }
        None => bail!(
            "{provider}: no usable token -- run `vibekit auth login {provider}` or import one"
        ),
    }
}

pub fn export(home: Option<&Path>, provider: &str, format: &str) -> Result<()> {
    let format: ExportFormat = format.parse().map_err(anyhow::Error::msg)?;
    let manager = manager_for(home, provider)?;
    println!("{}", manager.export(format)?);
    Ok(())
}

pub async fn import(
    home: Option<&Path>,
    provider: &str,
    env: bool,
    token: Option<String>,
    refresh: Option<String>,
    file: Option<PathBuf>,
) -> Result<()> {
    let sources = usize::from(env)
        + usize::from(token.is_some())
        + usize::from(refresh.is_some())
        + usize::from(file.is_some());
    if sources != 1 {
        bail!("pass exactly one of --env, --token, --refresh, or --file");
    }

    let source = if env {
        ImportSource::Env
    } else if let Some(token) = token {
        ImportSource::Token(token)
    } else if let Some(refresh) = refresh {
        ImportSource::Refresh(refresh)
    } else {
        ImportSource::File(file.expect("one source is set"))
    };

    let manager = manager_for(home, provider)?;
    manager.import(source).await?;
    println!("Imported credentials for {provider}.");
    Ok(())
}
