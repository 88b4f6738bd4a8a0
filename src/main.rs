use std::path::PathBuf;
use std::process::ExitCode;

use barcore::config::default_config_path;
use barcore::modules::BuiltinModules;
use barcore::RunOptions;

/// Usage: `barcore [CONFIG] [OUTPUT]`
///
/// Bar text goes to stdout, or to OUTPUT when given. Logs go to stderr.
fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args_os().skip(1);
    let options = RunOptions {
        config_path: args.next().map(PathBuf::from).unwrap_or_else(default_config_path),
        writeback: true,
        snapshot_dst: args.next().map(PathBuf::from),
    };

    match barcore::run(&options, &BuiltinModules) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("{}", e.recovery_suggestion());
            ExitCode::FAILURE
        }
    }
}
