mod api;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod schema;
mod services;
mod store;

use anyhow::Result;
use axum::Router;
use clap::Parser;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::services::notifier::{self, Notifier};
use crate::store::{MemoryStore, SqliteStore, Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Parser)]
#[command(version, about = "Signboard Server\nResolves which playlist each screen should show", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Generate a default configuration template to stdout
    #[arg(long)]
    generate_config: bool,

    /// Keep everything in memory instead of the configured database
    #[arg(long)]
    memory: bool,
}

const DEFAULT_CONFIG_PATH: &str = "server-config.toml";

fn run_onboarding() -> Result<Config> {
    use dialoguer::{theme::ColorfulTheme, Input};

    println!("Welcome to Signboard Server!");
    println!("It looks like you don't have a configuration file yet.");
    println!("Let's get you set up.\n");

    let host: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Server Host")
        .default("0.0.0.0".to_string())
        .interact_text()?;

    let port: u16 = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Server Port")
        .default(8080)
        .interact_text()?;

    let db_url: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Database URL")
        .default("signboard.db".to_string())
        .interact_text()?;

    let jwt_secret: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("JWT secret shared with the token issuer")
        .interact_text()?;

    let config_content = format!(
        r#"[server]
host = "{}"
port = {}

[server.https]
enabled = false
cert_path = "certs/cert.pem"
key_path = "certs/key.pem"

[database]
url = "{}"

[jwt]
secret = "{}"

[logging]
level = "info"
"#,
        host, port, db_url, jwt_secret
    );

    println!("\nGenerating configuration file: {}", DEFAULT_CONFIG_PATH);
    std::fs::write(DEFAULT_CONFIG_PATH, &config_content)?;
    println!("Configuration saved successfully!");
    println!("----------------------------------------\n");

    let config: Config = toml::from_str(&config_content)?;
    Ok(config)
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    if std::fs::metadata(&config_path).is_ok() {
        return Config::load(&config_path);
    }

    // Only offer onboarding when nothing was asked for explicitly and a
    // person is there to answer.
    if cli.config.is_none() && console::user_attended() {
        return run_onboarding();
    }

    eprintln!("Error: Configuration file '{}' not found.", config_path);
    eprintln!("Run with --generate-config to see a template.");
    std::process::exit(1);
}

fn open_store(config: &Config, in_memory: bool) -> Result<Arc<dyn Store>> {
    if in_memory {
        tracing::warn!("Using the in-memory store; nothing survives a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let db_pool = db::create_pool(&config.database.url)?;
    db::run_migrations(&mut db_pool.get()?)?;
    tracing::info!("Database {} initialized", config.database.url);
    Ok(Arc::new(SqliteStore::new(db_pool)))
}

fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", api::routes(state.clone()))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        println!("{}", Config::default_template());
        return Ok(());
    }

    let config = load_config(&cli)?;

    // Initialize tracing
    let default_filter = format!(
        "signboard_server={},tower_http=debug",
        config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = AppState {
        store: open_store(&config, cli.memory)?,
        notifier: notifier::from_config(config.notifier.as_ref())?,
        config: Arc::new(config.clone()),
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = app(state);

    let listener_address: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid host/port: {}", e))?;

    if let Some(https_config) = &config.server.https {
        if https_config.enabled {
            use axum_server::tls_rustls::RustlsConfig;

            tracing::info!("Starting server in HTTPS mode on {}", addr);

            if !std::path::Path::new(&https_config.cert_path).exists() {
                anyhow::bail!("Certificate file not found: {}", https_config.cert_path);
            }
            if !std::path::Path::new(&https_config.key_path).exists() {
                anyhow::bail!("Key file not found: {}", https_config.key_path);
            }

            let tls_config =
                RustlsConfig::from_pem_file(&https_config.cert_path, &https_config.key_path)
                    .await?;

            axum_server::bind_rustls(listener_address, tls_config)
                .serve(app.into_make_service())
                .await?;

            return Ok(());
        }
    }

    let listener = tokio::net::TcpListener::bind(listener_address).await?;
    tracing::info!("Server listening on {} (HTTP)", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
