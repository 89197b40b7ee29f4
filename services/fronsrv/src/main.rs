//! fronsrv - Fronius SunSpec Modbus/TCP bridge

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use common::{LogConfig, PidGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fronsrv::{AppConfig, Bridge, DeviceFilter};

#[derive(Parser, Debug)]
#[command(
    name = "fronsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Fronius SunSpec Modbus/TCP to MQTT and InfluxDB bridge",
    long_about = None
)]
struct Args {
    /// Configuration file (YAML)
    #[arg(short = 'c', long, env = "FRONSRV_CONFIG")]
    config: Option<PathBuf>,

    /// Take over the PID file even if another instance holds it
    #[arg(short = 'f', long)]
    force: bool,

    /// Device kinds to discover and poll
    #[arg(short = 'd', long, value_enum, default_value_t = DeviceFilter::All)]
    device: DeviceFilter,

    /// Log level, overrides general.log_level
    #[arg(short = 'l', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("fronsrv: {e:#}");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(level) = args.log_level {
        config.general.log_level = level;
    }
    config.validate()?;

    let _log_guard = common::logging::init(&LogConfig {
        service_name: "fronsrv".to_string(),
        level: config.general.log_level.clone(),
        file: config.general.log_file.clone(),
        json: false,
        ansi: std::io::stdout().is_terminal(),
    })?;
    info!(
        "fronsrv {} starting, gateway {}",
        env!("CARGO_PKG_VERSION"),
        config.modbus.endpoint()
    );

    let _pid_guard = config
        .general
        .pid_file
        .as_ref()
        .map(|path| PidGuard::acquire(path, args.force))
        .transpose()?;

    let token = CancellationToken::new();
    let listener = common::shutdown::spawn_shutdown_listener(token.clone());

    let bridge = Bridge::new(config, args.device)?;
    let result = bridge.run(token.clone()).await;

    token.cancel();
    common::shutdown::join_shutdown_listener(listener).await;
    info!("fronsrv stopped");
    Ok(result?)
}
