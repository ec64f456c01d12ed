use std::{path::Path, sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, Response},
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use tollgate::{
    ConfigProvider, Dispatcher, FileConfigProvider, GatewaySettings, GracefulShutdown,
    HttpClient, HttpClientAdapter, RouteTable,
    config::GATEWAY_CONFIG_FILE,
    core::dispatcher::API_PREFIX,
    tracing_setup,
};
use tower_http::trace::TraceLayer;
use tracing::Span;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Optional settings file (TOML, YAML or JSON); `GATEWAY_*` env vars override it
    #[clap(short, long)]
    settings: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the gateway server (default)
    Serve,
    /// Load the route table and resolve every identity service
    Validate {
        /// Folder holding gateway-config.json (defaults to the configured folder)
        #[clap(short, long)]
        config_folder: Option<String>,
    },
    /// Write an example gateway-config.json
    Init {
        /// Folder to write gateway-config.json into (defaults to the configured folder)
        #[clap(short, long)]
        config_folder: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let settings = GatewaySettings::load(args.settings.as_deref())
        .map_err(|e| eyre!("Failed to load gateway settings: {e:#}"))?;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(settings).await,
        Commands::Validate { config_folder } => {
            validate_config_command(config_folder.as_deref().unwrap_or(&settings.config_folder_path))
                .await
        }
        Commands::Init { config_folder } => {
            init_config_command(config_folder.as_deref().unwrap_or(&settings.config_folder_path))
                .await
        }
    }
}

async fn serve(settings: GatewaySettings) -> Result<()> {
    tracing_setup::init_tracing(settings.log_format, &settings.log_level)
        .map_err(|e| eyre!("Failed to initialize tracing: {e:#}"))?;

    let config_provider = FileConfigProvider::new(&settings.config_folder_path);
    tracing::info!("Loading route table from {}", config_provider.describe());

    let table: RouteTable = config_provider
        .load_config()
        .await
        .with_context(|| format!("Failed to load route table from {}", config_provider.describe()))?;
    tracing::info!(
        "Loaded {} routes ({} protected)",
        table.len(),
        table.protected_count()
    );

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client adapter")?);

    let app = Dispatcher::new(http_client)
        .with_identity_timeout(settings.identity_timeout())
        .router(&table)
        .context("Failed to register routes")?
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<Body>| {
                    tracing_setup::create_request_span(req.method().as_str(), req.uri().path())
                })
                .on_response(|res: &Response<Body>, latency: Duration, span: &Span| {
                    span.record("http.status_code", res.status().as_u16());
                    tracing::info!(
                        "{} in {}ms",
                        res.status(),
                        latency.as_millis()
                    );
                }),
        );

    let graceful_shutdown = GracefulShutdown::new();

    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.listen_addr))?;
    tracing::info!("Tollgate API Gateway listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = graceful_shutdown.wait_for_shutdown_signal().await;
            tracing::info!("Shutdown signal received: {:?}, draining connections", reason);
        })
        .await
        .context("Server error")?;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Load and resolve the route table, print a summary and exit
async fn validate_config_command(config_folder: &str) -> Result<()> {
    let provider = FileConfigProvider::new(config_folder);
    println!("🔍 Validating route table: {}", provider.describe());

    let table = match provider.load_config().await {
        Ok(table) => {
            println!("✅ Route table parsing: OK");
            table
        }
        Err(e) => {
            eprintln!("❌ Route table loading failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client adapter")?);

    match Dispatcher::new(http_client).build(&table) {
        Ok(routes) => {
            println!("✅ Identity service resolution: OK");
            println!();
            println!("📋 Route Summary:");
            for route in &routes {
                match route.identity_service() {
                    Some(service) => println!(
                        "   • {} -> {} (authenticated by '{}')",
                        route.prefix(),
                        route.forwarder().upstream(),
                        service
                    ),
                    None => println!("   • {} -> {}", route.prefix(), route.forwarder().upstream()),
                }
            }
            println!();
            println!("🎉 Route table is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Route table validation failed:");
            eprintln!("   {e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Every authentication.service must name another route in the file");
            println!("   • Route names may only use letters, digits, '-', '_', '.' and '~'");
            println!("   • Upstream urls must be http:// or https:// with a host");
            std::process::exit(1);
        }
    }
}

/// Write an example route table into `config_folder`
async fn init_config_command(config_folder: &str) -> Result<()> {
    let folder = Path::new(config_folder);
    let path = folder.join(GATEWAY_CONFIG_FILE);
    if path.exists() {
        eprintln!("❌ Error: Route table '{}' already exists", path.display());
        std::process::exit(1);
    }

    let default_config = r#"{
  "identity": {
    "url": "http://localhost:5000",
    "timeout": 5000
  },
  "users": {
    "url": "http://localhost:4000",
    "requestSizeLimit": "5mb",
    "timeout": 30000,
    "authentication": {
      "enabled": true,
      "service": "identity"
    }
  },
  "status": {
    "url": "http://localhost:4100",
    "requestSizeLimit": "100kb"
  }
}
"#;

    tokio::fs::create_dir_all(folder)
        .await
        .with_context(|| format!("Failed to create config folder {}", folder.display()))?;
    tokio::fs::write(&path, default_config)
        .await
        .context("Failed to write route table")?;
    println!("✅ Created example route table at: {}", path.display());
    println!(
        "   Routes will be mounted under {API_PREFIX}/<name>; run 'tollgate serve' to start the server"
    );
    Ok(())
}
