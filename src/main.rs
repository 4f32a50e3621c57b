use std::sync::Arc;

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use portico::{
    GatewayService, GracefulShutdown, ServerLifecycle,
    config::{DEFAULT_CONFIG_PATH, GatewayConfig, GatewayConfigValidator, load_config_sync},
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the gateway
    Start {
        /// Configuration file to use
        #[clap(short = 'f', long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short = 'f', long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Commands::Validate { config } => validate_config_command(&config),
        Commands::Start { config } => {
            let config = load_config_sync(&config)
                .with_context(|| format!("Failed to load config from {config}"))?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(config.application.processes.max(1))
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?;

            runtime.block_on(start(config))
        }
    }
}

async fn start(config: GatewayConfig) -> Result<()> {
    tracing_setup::init_from_config(&config.application)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    let gateway = Arc::new(
        GatewayService::from_config(Arc::new(config)).context("Invalid configuration")?,
    );
    tracing::info!(
        listeners = gateway.listeners().len(),
        upstreams = gateway.upstreams().count(),
        backends = gateway.backend_count(),
        "configuration loaded"
    );

    let shutdown = Arc::new(GracefulShutdown::new());
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { shutdown.run_signal_handler().await });
    }

    let lifecycle = ServerLifecycle::new(gateway, Arc::clone(&shutdown));
    if let Err(e) = lifecycle.start().await {
        // stop whatever already bound before reporting
        let _ = lifecycle.shutdown().await;
        return Err(e);
    }
    lifecycle.start_health_monitor();

    lifecycle.wait().await?;
    tracing::info!("portico stopped");
    Ok(())
}

fn validate_config_command(config_path: &str) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    let config = match load_config_sync(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = GatewayConfigValidator::validate(&config) {
        eprintln!("❌ Configuration validation failed:\n{e}");
        std::process::exit(1);
    }

    println!("✅ Configuration is valid!");
    println!("📋 Configuration summary:");
    println!("  Upstreams: {}", config.upstreams.len());
    for upstream in &config.upstreams {
        println!(
            "    {} ({} server(s), balance: {})",
            upstream.id,
            upstream.servers.len(),
            if upstream.balance.is_empty() { "random" } else { upstream.balance.as_str() }
        );
    }
    println!("  HTTP servers: {}", config.http.servers.len());
    for server in &config.http.servers {
        let locations: usize = server.hosts.iter().map(|host| host.locations.len()).sum();
        println!(
            "    {} (tls: {}, hosts: {}, locations: {})",
            server.listen,
            server.ssl,
            server.hosts.len(),
            locations
        );
    }
    println!(
        "  Health checking: {}",
        if config.health_check.enabled { "enabled" } else { "disabled" }
    );

    Ok(())
}
