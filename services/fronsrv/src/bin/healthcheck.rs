//! Container health probe: exit 0 when the fronsrv health file is fresh and healthy

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;

use fronsrv::health::check_health_file;

#[derive(Parser, Debug)]
#[command(name = "fronsrv-healthcheck", version, about = "Check the fronsrv health file")]
struct Args {
    /// Health file written by fronsrv
    #[arg(
        short = 'f',
        long,
        env = "FRONSRV_HEALTH_FILE",
        default_value = "/tmp/fronius_health"
    )]
    file: PathBuf,

    /// Print nothing, only set the exit code
    #[arg(short = 'q', long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match check_health_file(&args.file, Utc::now().timestamp()) {
        Ok(()) => {
            if !args.quiet {
                println!("healthy");
            }
            ExitCode::SUCCESS
        },
        Err(e) => {
            if !args.quiet {
                println!("unhealthy: {e}");
            }
            ExitCode::FAILURE
        },
    }
}
