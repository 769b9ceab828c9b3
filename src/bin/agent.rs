use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use marknest::agent_modules::api::{ApiClient, NewBookmark, RemoteCategory, SaveOutcome};
use marknest::agent_modules::config::{self, AgentConfig};
use marknest::agent_modules::crypto;
use marknest::agent_modules::renewal::{self, TokenRenewer};
use marknest::agent_modules::storage::{AgentState, StateStore};
use marknest::agent_modules::AgentError;
use marknest::db::category_tree::{CategoryForest, CategoryRecord};
use marknest::services::token::AuthToken;
use marknest::version::VERSION;

#[derive(Parser, Debug)]
#[command(author, version, about = "marknest quick-save client", long_about = None)]
struct Cli {
    /// Directory for config and session state (default: ~/.marknest)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in to a server and store the session
    Login {
        #[arg(long)]
        server: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// Request a 30-day token instead of a 15-minute one
        #[arg(long)]
        remember: bool,
        /// Store the password (encrypted) and renew the token in the
        /// background
        #[arg(long)]
        auto_renew: bool,
    },
    /// Save a page as a bookmark
    Save {
        url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Target category id (default: first root category)
        #[arg(long)]
        category: Option<i32>,
        /// Ask the server's AI to pick the category
        #[arg(long)]
        suggest: bool,
        #[arg(long)]
        private: bool,
    },
    /// List categories with their full paths
    Categories,
    /// Show the stored session
    Status,
    /// Run the token renewal loop in the foreground
    Renewd,
    /// Forget the stored session and credentials
    Logout,
}

fn state_dir(cli: &Cli) -> PathBuf {
    cli.state_dir
        .clone()
        .unwrap_or_else(config::default_state_dir)
}

fn load_required_config(dir: &PathBuf) -> Result<AgentConfig, AgentError> {
    config::load_config(dir)?.ok_or(AgentError::NotLoggedIn)
}

/// Opportunistic pre-action renewal, then the current token. Shares the
/// renewer's single-flight guard with the background loop.
async fn fresh_token(dir: &PathBuf, cfg: &AgentConfig) -> Result<String, AgentError> {
    let renewer = TokenRenewer::new(cfg.clone(), StateStore::new(dir));
    let _ = renewer.check_and_renew().await;

    let state = StateStore::new(dir).load()?;
    let token = state.auth_token.clone().ok_or(AgentError::NotLoggedIn)?;
    if let Some(expiry) = renewal::effective_expiry(&state) {
        if Utc::now().timestamp_millis() >= expiry {
            return Err(AgentError::NotLoggedIn);
        }
    }
    Ok(token)
}

fn category_paths(categories: &[RemoteCategory]) -> Vec<(i32, String)> {
    let records: Vec<CategoryRecord> = categories.iter().map(CategoryRecord::from).collect();
    let forest = CategoryForest::from_records(records);
    forest
        .flatten()
        .into_iter()
        .filter_map(|id| forest.path_string(id).ok().map(|path| (id, path)))
        .collect()
}

async fn cmd_login(
    dir: PathBuf,
    server: String,
    username: String,
    password: String,
    remember: bool,
    auto_renew: bool,
) -> Result<(), AgentError> {
    let client = ApiClient::new(&server)?;
    let reply = client.login(&username, &password, remember).await?;

    let expiry = AuthToken::decode(&reply.token)
        .ok()
        .map(|token| token.expires_at_ms());
    let encrypted_password = if auto_renew {
        Some(crypto::encrypt_password(&password)?)
    } else {
        None
    };

    config::save_config(
        &dir,
        &AgentConfig {
            server_url: server.trim_end_matches('/').to_string(),
            username: reply.username.clone(),
            auto_renew,
        },
    )?;
    StateStore::new(&dir).save(&AgentState {
        auth_token: Some(reply.token),
        token_expiry: expiry,
        encrypted_password,
    })?;

    println!("Logged in as {}.", reply.username);
    if auto_renew {
        println!("Auto-renew is on; run `agent renewd` to keep the token fresh.");
    }
    Ok(())
}

async fn cmd_save(
    dir: PathBuf,
    url: String,
    name: Option<String>,
    description: Option<String>,
    category: Option<i32>,
    suggest: bool,
    private: bool,
) -> Result<(), AgentError> {
    let cfg = load_required_config(&dir)?;
    let token = fresh_token(&dir, &cfg).await?;
    let client = ApiClient::new(&cfg.server_url)?;

    // Fill gaps from the page itself, like the popup form does.
    let metadata = if name.is_none() || description.is_none() {
        client.fetch_metadata(&url).await?
    } else {
        Default::default()
    };
    let name = name
        .or_else(|| (!metadata.title.is_empty()).then(|| metadata.title.clone()))
        .unwrap_or_else(|| url.clone());
    let description =
        description.or_else(|| (!metadata.description.is_empty()).then(|| metadata.description.clone()));

    let category_id = match category {
        Some(id) => id,
        None => {
            let categories = client.list_categories(Some(&token)).await?;
            if categories.is_empty() {
                return Err(AgentError::Config(
                    "no categories exist yet; create one first".to_string(),
                ));
            }
            let mut chosen = None;
            if suggest {
                let paths = category_paths(&categories);
                if let Some((id, reason)) = client
                    .suggest_category(&token, &name, &url, description.as_deref(), &paths)
                    .await?
                {
                    println!("AI suggests category {id}: {reason}");
                    chosen = Some(id as i32);
                }
            }
            match chosen {
                Some(id) => id,
                // First root category in display order.
                None => {
                    let records: Vec<CategoryRecord> =
                        categories.iter().map(CategoryRecord::from).collect();
                    let forest = CategoryForest::from_records(records);
                    forest
                        .roots()
                        .first()
                        .copied()
                        .ok_or_else(|| AgentError::Protocol("no root category".to_string()))?
                }
            }
        }
    };

    let outcome = client
        .create_bookmark(
            &token,
            &NewBookmark {
                name: name.clone(),
                url: url.clone(),
                description,
                category_id,
                is_private: private,
            },
        )
        .await?;

    match outcome {
        SaveOutcome::Created(id) => println!("Saved \"{name}\" (id {id})."),
        SaveOutcome::Duplicate(existing) => {
            let category = existing
                .category_name
                .unwrap_or_else(|| format!("category {}", existing.category_id));
            println!(
                "Already bookmarked: \"{}\" (id {}) in {category}.",
                existing.name, existing.id
            );
        }
    }
    Ok(())
}

async fn cmd_categories(dir: PathBuf) -> Result<(), AgentError> {
    let cfg = load_required_config(&dir)?;
    // Best-effort auth: without a valid token the public listing still
    // works, just without private categories.
    let token = fresh_token(&dir, &cfg).await.ok();
    let client = ApiClient::new(&cfg.server_url)?;
    let categories = client.list_categories(token.as_deref()).await?;

    if categories.is_empty() {
        println!("No categories.");
        return Ok(());
    }
    for (id, path) in category_paths(&categories) {
        println!("{id:>5}  {path}");
    }
    Ok(())
}

async fn cmd_status(dir: PathBuf) -> Result<(), AgentError> {
    let Some(cfg) = config::load_config(&dir)? else {
        println!("Not logged in.");
        return Ok(());
    };
    println!("Server:     {}", cfg.server_url);
    println!("Username:   {}", cfg.username);
    println!("Auto-renew: {}", if cfg.auto_renew { "on" } else { "off" });

    let state = StateStore::new(&dir).load()?;
    match state.auth_token.as_deref() {
        None => println!("Token:      none"),
        Some(raw) => match AuthToken::decode(raw) {
            Err(_) => println!("Token:      unreadable"),
            Ok(token) => {
                let expiry = state.token_expiry.unwrap_or_else(|| token.expires_at_ms());
                let remaining_ms = expiry - Utc::now().timestamp_millis();
                if remaining_ms <= 0 {
                    println!("Token:      {} (expired)", token.kind.as_str());
                } else {
                    println!(
                        "Token:      {} (expires in {} min)",
                        token.kind.as_str(),
                        remaining_ms / 60_000
                    );
                }
            }
        },
    }
    Ok(())
}

async fn cmd_renewd(dir: PathBuf) -> Result<(), AgentError> {
    let cfg = load_required_config(&dir)?;
    if !cfg.auto_renew {
        return Err(AgentError::Config(
            "auto-renew is off; log in with --auto-renew first".to_string(),
        ));
    }
    let renewer = TokenRenewer::new(cfg, StateStore::new(&dir));
    info!("renewal loop started");
    tokio::select! {
        _ = renewer.run_loop() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("renewal loop stopped");
        }
    }
    Ok(())
}

async fn cmd_logout(dir: PathBuf) -> Result<(), AgentError> {
    StateStore::new(&dir).clear()?;
    if let Some(mut cfg) = config::load_config(&dir)? {
        cfg.auto_renew = false;
        config::save_config(&dir, &cfg)?;
    }
    println!("Logged out.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let dir = state_dir(&cli);
    let result = match cli.command {
        Command::Login {
            server,
            username,
            password,
            remember,
            auto_renew,
        } => cmd_login(dir, server, username, password, remember, auto_renew).await,
        Command::Save {
            url,
            name,
            description,
            category,
            suggest,
            private,
        } => cmd_save(dir, url, name, description, category, suggest, private).await,
        Command::Categories => cmd_categories(dir).await,
        Command::Status => cmd_status(dir).await,
        Command::Renewd => cmd_renewd(dir).await,
        Command::Logout => cmd_logout(dir).await,
    };

    if let Err(err) = result {
        eprintln!("agent {VERSION}: {err}");
        std::process::exit(1);
    }
    Ok(())
}
