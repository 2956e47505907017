use clap::Parser;
use log::error;

use osprey_prepare::Cli;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(err) = cli.run() {
        error!("exception occured: {err:#}");
        std::process::exit(-1);
    }
}
