use std::process::ExitCode;

use fsmonitor_daemon::{cli, telemetry};

fn main() -> ExitCode {
    let cli = cli::parse_from(std::env::args_os());
    telemetry::init(cli.verbose);

    match cli::run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
