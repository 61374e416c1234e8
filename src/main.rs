mod cancel;
mod cli;
mod config;
mod device;
mod event;
mod expr;
mod interpret;
mod locate;
mod scenario;
mod screencast;
mod substitute;

use std::io::Write;
use std::process;

use clap::Parser;
use log::LevelFilter;

use cli::Cli;
use config::Config;

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    match cli::run(cli, &config) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

/// `[LEVEL] message` on stderr. `RUST_LOG` wins over `-v`.
fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();
}
