use std::process::ExitCode;

use register_mutex::bench::{self, BenchConfig};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = match BenchConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    log::debug!("{:?}", config);
    match bench::run_all(&config) {
        Ok(reports) if reports.iter().all(|report| report.passed()) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
