use std::process::ExitCode;

use clap::Parser;
use keeper_app::{app::AppConfig, cli};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";

/// Filter from `RUST_LOG` when it parses, `info` otherwise.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();
    let config = AppConfig::from_env();
    if let Err(err) = cli::run(cli, config).await {
        eprintln!("keeper: {err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_defaults_to_info() {
        assert_eq!(log_filter(None).to_string(), "info");
    }

    #[test]
    fn log_filter_uses_given_directives() {
        assert_eq!(
            log_filter(Some("keeper_core=debug".into())).to_string(),
            "keeper_core=debug"
        );
    }
}
