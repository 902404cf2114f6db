use std::path::Path;

use clap::Parser;
use training::util::{init_logging, run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    let args = TrainArgs::parse();
    init_logging(Path::new(&args.log_file))?;
    run_train(args)
}
