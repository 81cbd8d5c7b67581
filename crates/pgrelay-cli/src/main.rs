use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use pgrelay_core::Config;
use pgrelay_proxy::Listener;

#[derive(Parser, Debug)]
#[command(name = "pgrelay", version, about = "PostgreSQL wire protocol gateway")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway with all configured listeners.
    Serve {
        /// Path to the YAML configuration file.
        #[arg(short, long, env = "PGRELAY_CONFIG", default_value = "pgrelay.yaml")]
        config: PathBuf,
    },

    /// Validate the configuration, build every listener's plugins and
    /// TLS setup, and exit.
    Check {
        /// Path to the YAML configuration file.
        #[arg(short, long, env = "PGRELAY_CONFIG", default_value = "pgrelay.yaml")]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Serve { config } => {
            let config = load(&config)?;
            // The runtime is built after the config so `procs` can size
            // the worker pool.
            let runtime = build_runtime(config.procs)?;
            runtime.block_on(serve(config))
        }
        Command::Check { config } => check(&config),
    }
}

fn load(path: &Path) -> anyhow::Result<Config> {
    Config::from_path(path).with_context(|| format!("loading {}", path.display()))
}

fn build_runtime(procs: Option<usize>) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(procs) = procs {
        builder.worker_threads(procs);
    }
    builder.build().context("building the tokio runtime")
}

/// Start every configured listener and run until the first listener
/// fails or a shutdown signal arrives.
async fn serve(config: Config) -> anyhow::Result<()> {
    let mut listeners = JoinSet::new();
    for listener_config in config.listeners.values() {
        let logging = config.logging_for(listener_config);
        let listener = Listener::new(listener_config.clone(), &logging)
            .with_context(|| format!("listener {}", listener_config.bind))?;
        listeners.spawn(listener.run());
    }
    tracing::info!(listeners = config.listeners.len(), "Gateway started");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            Ok(())
        }
        Some(result) = listeners.join_next() => {
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(error.into()),
                Err(join_error) => Err(join_error.into()),
            }
        }
    }
}

/// Dry-run the configuration: parse and validate it, then build each
/// listener's plugin registry and TLS acceptor the way `serve` would.
fn check(path: &Path) -> anyhow::Result<()> {
    let config = load(path)?;
    let mut binds: Vec<&String> = config.listeners.keys().collect();
    binds.sort();
    for bind in binds {
        let listener_config = &config.listeners[bind];
        let logging = config.logging_for(listener_config);
        let listener = Listener::new(listener_config.clone(), &logging)
            .with_context(|| format!("listener {bind}"))?;
        println!(
            "listener {bind}: target {} authentication {} ssl {}",
            listener_config.target.address(),
            listener.authenticator_name(),
            if listener_config.ssl.enabled { "on" } else { "off" },
        );
    }
    println!("configuration ok ({} listeners)", config.listeners.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_check_accepts_minimal_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "listeners:").unwrap();
        writeln!(file, "  \"127.0.0.1:5433\": {{}}").unwrap();
        check(file.path()).unwrap();
    }

    #[test]
    fn test_check_rejects_unknown_plugin() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "listeners:").unwrap();
        writeln!(file, "  \"127.0.0.1:5433\":").unwrap();
        writeln!(file, "    authentication:").unwrap();
        writeln!(file, "      kerberos: {{}}").unwrap();
        assert!(check(file.path()).is_err());
    }

    #[test]
    fn test_check_reports_missing_file() {
        let err = check(Path::new("definitely-not-here.yaml")).unwrap_err();
        assert!(err.to_string().contains("definitely-not-here.yaml"));
    }

    #[test]
    fn test_build_runtime_with_explicit_procs() {
        build_runtime(Some(1)).unwrap();
        build_runtime(None).unwrap();
    }
}
