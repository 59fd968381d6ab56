use clap::Parser;
use gitlab_relay::config::Config;
use gitlab_relay::runtime;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "gitlab-relay", version, about)]
struct Args {
    /// Path of the TOML configuration file.
    #[arg(long, env = "GITLAB_RELAY_CONFIG", default_value = "gitlab-relay.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("[main] {}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("[main] Shutting down");
        }
        shutdown.cancel();
    });

    if let Err(e) = runtime::run(config, cancel).await {
        log::error!("[main] {}", e);
        std::process::exit(1);
    }
}
