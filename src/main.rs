//! authwired - serves the authenticated request protocol over TCP or TLS.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use authwire::auth::StaticTokens;
use authwire::config::Settings;
use authwire::handler::{builtin, ActionRegistry};
use authwire::server::{ConnectionMetrics, Server};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = "authwired";

fn main() -> ExitCode {
    // Parse command line arguments (simple std::env approach)
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{} {}", NAME, VERSION);
        return ExitCode::SUCCESS;
    }

    let config_path = get_config_path(&args);

    let settings = match Settings::load(&config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&settings) {
        eprintln!("Error initializing logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting {} v{}", NAME, VERSION);
    info!("Configuration loaded from: {}", config_path);
    info!("Listen address: {}", settings.bind_address());
    info!("Log level: {}", settings.logging.level);

    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let drain_timeout = settings.limits.drain_timeout();
    let result = runtime.block_on(async_main(settings));
    shutdown_runtime(runtime, drain_timeout);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Daemon failed");
            ExitCode::FAILURE
        }
    }
}

async fn async_main(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let tokens = StaticTokens::from_config(&settings.security)?;
    info!(tokens = tokens.len(), "Tokens loaded");

    let metrics = Arc::new(ConnectionMetrics::new());
    let mut registry = ActionRegistry::new();
    builtin::register(&mut registry, Some(Arc::clone(&metrics)));

    let server = Server::bind_with_metrics(settings, Arc::new(tokens), registry, metrics).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, initiating graceful shutdown...");
        shutdown.trigger();
    });

    server.run().await?;

    info!("Daemon stopped");
    Ok(())
}

/// Shut the runtime down without waiting on stalled handlers.
///
/// Handlers run on blocking threads that cannot be aborted. Dropping the
/// runtime would wait for every one of them, so the wait is capped at the
/// drain timeout instead.
fn shutdown_runtime(runtime: Runtime, drain_timeout: Duration) {
    runtime.shutdown_timeout(drain_timeout);
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print help message.
fn print_help() {
    println!(
        r#"{} {}
Serves authenticated JSON requests over TCP or TLS.

USAGE:
    {} [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file
                           [default: /etc/authwire/authwired.toml]
    -h, --help             Print help information
    -V, --version          Print version information
"#,
        NAME, VERSION, NAME
    );
}

/// Get configuration file path from command line arguments.
fn get_config_path(args: &[String]) -> String {
    for (i, arg) in args.iter().enumerate() {
        if (arg == "--config" || arg == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    "/etc/authwire/authwired.toml".to_string()
}

/// Initialize logging based on settings.
fn init_logging(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    match settings.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use authwire::auth::TokenValidator;
    use authwire::client::Client;
    use authwire::config::ClientConfig;
    use authwire::handler::Reply;
    use authwire::protocol::Body;

    #[test]
    fn test_get_config_path() {
        let args = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(
            get_config_path(&args(&["authwired", "-c", "/tmp/a.toml"])),
            "/tmp/a.toml"
        );
        assert_eq!(
            get_config_path(&args(&["authwired", "--config=/tmp/b.toml"])),
            "/tmp/b.toml"
        );
        assert_eq!(
            get_config_path(&args(&["authwired"])),
            "/etc/authwire/authwired.toml"
        );
    }

    #[test]
    fn test_shutdown_does_not_wait_for_stalled_handler() {
        let runtime = Runtime::new().unwrap();

        let drain_timeout = runtime.block_on(async {
            let mut settings = Settings::new("127.0.0.1", 0);
            settings.limits.drain_timeout_seconds = 0;
            let drain_timeout = settings.limits.drain_timeout();

            let mut registry = ActionRegistry::new();
            registry.register_fn("stall", |_body| {
                std::thread::sleep(Duration::from_secs(4));
                Ok(Reply::success_empty())
            });

            let validator: Arc<dyn TokenValidator> = Arc::new(|_: &str| true);
            let handle = Server::bind(settings, validator, registry)
                .await
                .unwrap()
                .spawn();

            let config = ClientConfig::new("127.0.0.1", handle.local_addr().port(), "token");
            let client = Client::new(config).unwrap();
            tokio::spawn(async move {
                let _ = client.request("stall", Body::new()).await;
            });

            // Let the handler start
            tokio::time::sleep(Duration::from_millis(300)).await;
            handle.stop().await.unwrap();
            drain_timeout
        });

        let start = Instant::now();
        shutdown_runtime(runtime, drain_timeout);
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "runtime shutdown took {:?}",
            start.elapsed()
        );
    }
}
