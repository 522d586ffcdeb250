use clap::Parser;
use tryon_training::cli::{run, TrainArgs};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(TrainArgs::parse()) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
