use std::process::ExitCode;

use incident_scanner::config::ScannerConfig;
use incident_scanner::error::ScanError;
use incident_scanner::incident::pipeline::ERROR_PREFIX;
use incident_scanner::incident::{output_line, run};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries only the result line.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match ScannerConfig::from_env() {
        Ok(config) => {
            tracing::info!(
                server = %config.server,
                port = config.port,
                sender = %config.sender_filter,
                days_back = config.days_back,
                "Incident scanner v{}",
                env!("CARGO_PKG_VERSION")
            );
            match tokio::task::spawn_blocking(move || run(&config)).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("Scan task panicked: {e}");
                    println!("{ERROR_PREFIX}scan task failed: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        Err(e) => Err(ScanError::from(e)),
    };

    println!("{}", output_line(&result));
    if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
