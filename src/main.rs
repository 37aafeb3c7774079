mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use ql_core::config::Config;
use ql_pipeline::Catalog;
use serde_json::json;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "quill=trace,ql_server=trace,ql_pipeline=trace,ql_db=debug,tower_http=debug".to_string()
        } else {
            "quill=info,ql_server=info,ql_pipeline=info,ql_db=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = Config::load_or_default(cli.config.as_deref());
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            tracing::info!(
                "Starting quill on {}:{}",
                config.server.host,
                config.server.port
            );
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(ql_server::start(config, cli.config.clone()))?;
            Ok(())
        }
        Commands::Check { json } => check(cli.config.as_deref(), json),
        Commands::CreateUser {
            username,
            password,
            roles,
        } => create_user(cli.config.as_deref(), &username, &password, &roles),
        Commands::HashPassword { password } => {
            println!("{}", bcrypt::hash(&password, bcrypt::DEFAULT_COST)?);
            Ok(())
        }
        Commands::Version => {
            println!("quill {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => {
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("cannot read config {}", p.display()))?;
            Ok(Config::from_json(&contents)?)
        }
        None => Ok(Config::default()),
    }
}

fn check(path: Option<&Path>, as_json: bool) -> Result<()> {
    let config = load_config(path)?;
    let warnings = config.validate();
    let catalog = ql_server::context::load_catalog(&config)?;
    let templates = ql_server::templates::load_templates(config.templates.dir.as_deref())?;

    if as_json {
        let summary = json!({
            "warnings": warnings,
            "templates": templates.len(),
            "content_types": catalog_summary(&catalog),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("✓ Configuration is valid");
    for warning in &warnings {
        println!("  warning: {warning}");
    }
    println!(
        "  Content types: {}",
        catalog.content_types().count()
    );
    println!("  Actions: {}", catalog.action_count());
    println!("  Templates: {}", templates.len());
    for ct in catalog.content_types() {
        println!("\n  {}", ct.name);
        for (id, action) in &ct.actions {
            println!("    {id}: {}", action.pipeline.step_names().join(" -> "));
        }
    }
    Ok(())
}

fn catalog_summary(catalog: &Catalog) -> serde_json::Value {
    catalog
        .content_types()
        .map(|ct| {
            let actions: serde_json::Map<_, _> = ct
                .actions
                .iter()
                .map(|(id, action)| (id.clone(), json!(action.pipeline.step_names())))
                .collect();
            (ct.name.clone(), json!({ "parent": ct.parent, "children": ct.children, "actions": actions }))
        })
        .collect::<serde_json::Map<_, _>>()
        .into()
}

fn create_user(path: Option<&Path>, username: &str, password: &str, roles: &[String]) -> Result<()> {
    let config = load_config(path)?;
    if let Some(parent) = config.server.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = ql_db::pool::init_pool(&config.server.db_path.to_string_lossy())?;
    let conn = ql_db::pool::get_conn(&db)?;
    let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
    let user = ql_db::queries::users::create_user(&conn, username, &hash, roles)?;
    println!("Created user {} ({})", user.username, user.id);
    Ok(())
}
