use std::{net::SocketAddr, path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use modbridge::{
    FileSystemAdapter, GracefulShutdown, HttpHandler, NativeLoader, ShutdownReason, build_router,
    config::{ServerConfig, ServerConfigValidator, loader::load_config},
    core::{Dispatcher, ScopeTree},
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "modbridge.yaml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "modbridge.yaml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "modbridge.yaml")]
        config: String,
    },
    /// Start the server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "modbridge.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn load_validated(config_path: &str) -> Result<ServerConfig> {
    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    ServerConfigValidator::validate(&config)
        .map_err(|e| eyre!("Invalid configuration in {config_path}:\n{e}"))?;
    Ok(config)
}

async fn serve(config_path: &str) -> Result<()> {
    let mut config = load_validated(config_path).await?;

    tracing_setup::init_tracing_with_config(&config.logging.level, config.logging.json, true)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    loop {
        let reason = run_server(&config, &graceful_shutdown).await?;
        if reason != ShutdownReason::Restart {
            break;
        }

        tracing::info!("Restarting; re-reading configuration from {config_path}");
        match load_validated(config_path).await {
            Ok(reloaded) => config = reloaded,
            Err(e) => tracing::error!("Keeping the previous configuration: {:?}", e),
        }
        graceful_shutdown.reset();
    }

    tracing_setup::shutdown_tracing();
    Ok(())
}

/// Serve `config` until a shutdown signal arrives, then unload every handler
/// library the scopes loaded.
async fn run_server(config: &ServerConfig, shutdown: &GracefulShutdown) -> Result<ShutdownReason> {
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;

    let tree = {
        let _span = tracing_setup::configure_component_tracing("scope_tree").entered();
        Arc::new(ScopeTree::from_config(config))
    };
    let dispatcher = Arc::new(Dispatcher::new(
        NativeLoader::global(),
        config.limits.max_response_bytes,
    ));
    let handler = Arc::new(HttpHandler::new(
        tree.clone(),
        dispatcher,
        Arc::new(FileSystemAdapter::new()),
    ));
    let app = build_router(handler);

    for (prefix, location) in &config.locations {
        tracing::info!(
            "Configured location {} -> handler {:?}, {} libraries",
            prefix,
            location.handler,
            location.libraries.len()
        );
    }
    for name in config.virtual_hosts.keys() {
        tracing::info!("Configured virtual host {}", name);
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("modbridge listening on {}", addr);

    let reason = tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>()
        ) => {
            result.context("Server error")?;
            ShutdownReason::Graceful
        },
        reason = shutdown.wait_for_shutdown_signal() => reason,
    };

    let _span = tracing_setup::configure_component_tracing("unload").entered();
    if let Err(e) = tree.unload_all() {
        tracing::error!("Failed to unload handler libraries: {}", e);
    }
    tracing::info!("Server stopped ({:?})", reason);
    Ok(reason)
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Server Libraries: {}", config.libraries.len());
            println!("   • Locations: {}", config.locations.len());
            println!("   • Virtual Hosts: {}", config.virtual_hosts.len());
            println!(
                "   • Response Limit: {} bytes",
                config.limits.max_response_bytes
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Declare at most one soap_library per server, host or location");
            println!("   • Start every location prefix with '/'");
            println!("   • Verify listen address format (e.g., '127.0.0.1:3000')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# modbridge configuration

# The address to listen on
listen_addr: "127.0.0.1:8080"

# Requests no handler serves fall back to files under this directory
# document_root: "./public"

# Libraries every location inherits
libraries:
  - type: support_library
    path: "/usr/local/lib/libxml2.so"

locations:
  # Requests under /soap go to the handler in calc.so
  "/soap":
    handler: "soap-handler"
    libraries:
      - type: soap_library
        path: "/usr/local/lib/modbridge/calc.so"

# virtual_hosts:
#   "api.example.com":
#     locations:
#       "/soap":
#         handler: "soap-handler"
#         libraries:
#           - type: soap_library
#             path: "/usr/local/lib/modbridge/api.so"

limits:
  max_response_bytes: 67108864

logging:
  level: "info"
  json: false
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'modbridge serve --config {config_path}' to start the server");
    Ok(())
}
