use std::env;

use cellar_server::ServerBuilder;
use cellar_server::config::loader::{DEFAULT_CONFIG_FILE, load_config};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From CELLAR_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (cellar.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (CELLAR_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.iter().any(|a| a == "--generate-token-key") {
        println!("{}", hex::encode(cellar_auth::store::generate_key()));
        return;
    }

    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    // Initialize tracing early with the default level
    cellar_server::observability::init_tracing();

    let (config_path, source) = resolve_config_path(&args);

    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    if args.iter().any(|a| a == "--print-config") {
        let mut printable = cfg.clone();
        if !printable.zoho.client_secret.is_empty() {
            printable.zoho.client_secret = "<redacted>".into();
        }
        match toml::to_string_pretty(&printable) {
            Ok(rendered) => print!("{rendered}"),
            Err(e) => {
                eprintln!("Failed to render configuration: {e}");
                std::process::exit(2);
            }
        }
        return;
    }

    if let Err(e) = cfg.zoho.validate() {
        eprintln!("Configuration error: {e}");
        std::process::exit(2);
    }

    tracing::info!(
        path = %config_path,
        source = %source,
        region = %cfg.zoho.region,
        "Configuration loaded"
    );

    cellar_server::observability::apply_logging_level(&cfg.logging.level);

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Server initialization failed: {e:#}");
            std::process::exit(2);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("Server error: {err:#}");
        std::process::exit(1);
    }
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: CELLAR_CONFIG
/// 3. Default: cellar.toml
fn resolve_config_path(args: &[String]) -> (String, ConfigSource) {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config"
            && let Some(path) = iter.next()
        {
            return (path.clone(), ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var("CELLAR_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    (DEFAULT_CONFIG_FILE.to_string(), ConfigSource::Default)
}
