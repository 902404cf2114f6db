use std::path::Path;

use burn::data::dataloader::DataLoaderBuilder;
use clap::Parser;
use training::util::{parse_device_ids, select_device, validate};
use training::{checkpoint, PfldConfig, TrainBackend, WlfwBatcher, WlfwDataset};

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a landmark checkpoint on a validation list (mean squared landmark error)"
)]
struct Args {
    /// Checkpoint meta JSON written by the trainer.
    #[arg(long)]
    checkpoint: String,
    /// Validation list file (WLFW format).
    #[arg(long, default_value = "data/test_data/list.txt")]
    val_dataroot: String,
    #[arg(long, default_value_t = 8)]
    batch_size: usize,
    #[arg(short = 'j', long, default_value_t = 4)]
    workers: usize,
    /// Comma-separated accelerator device ids; the first is used.
    #[arg(long, default_value = "0")]
    device_ids: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let ids = parse_device_ids(&args.device_ids)?;
    let device = select_device(&ids);
    let (epoch, model) =
        checkpoint::load::<TrainBackend>(Path::new(&args.checkpoint), &PfldConfig::default(), &device)?;

    let dataset = WlfwDataset::from_list_file(Path::new(&args.val_dataroot))?;
    if dataset.is_empty() {
        anyhow::bail!("validation list {} contains no samples", args.val_dataroot);
    }

    let loader = DataLoaderBuilder::new(WlfwBatcher::<TrainBackend>::new(device))
        .batch_size(args.batch_size)
        .num_workers(args.workers.max(1))
        .build(dataset);

    let val_loss = validate(loader.as_ref(), &model);
    println!("epoch {epoch}: mean squared landmark error {val_loss:.6}");
    Ok(())
}
