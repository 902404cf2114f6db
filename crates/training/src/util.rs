use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::tensor::{backend::Backend, Tensor};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::checkpoint;
use crate::dataset::{WlfwBatch, WlfwBatcher, WlfwDataset};
use crate::loss::PfldLoss;
use crate::meter::AverageMeter;
use crate::metrics::{EpochScalars, ScalarLog};
use crate::sched::ReduceOnPlateau;
use crate::{ADBackend, TrainBackend};
use models::{Pfld, PfldConfig};

/// Boolean CLI values the way the flag has always been spelled: yes/true/t/y/1
/// and no/false/f/n/0, case-insensitive. Anything else is rejected.
pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "t" | "y" | "1" => Ok(true),
        "no" | "false" | "f" | "n" | "0" => Ok(false),
        other => Err(format!("boolean value expected, got {other:?}")),
    }
}

/// Parse a comma-separated accelerator id list, e.g. "0,1".
pub fn parse_device_ids(value: &str) -> anyhow::Result<Vec<usize>> {
    let mut ids = Vec::new();
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        ids.push(
            part.parse::<usize>()
                .map_err(|e| anyhow::anyhow!("invalid device id {part:?}: {e}"))?,
        );
    }
    Ok(ids)
}

/// Pick the training device from the id list. Meaningful under the WGPU
/// backend; the ndarray backend has a single CPU device.
pub fn select_device(ids: &[usize]) -> <TrainBackend as Backend>::Device {
    #[cfg(feature = "backend-wgpu")]
    {
        ids.first()
            .map(|id| burn::backend::wgpu::WgpuDevice::DiscreteGpu(*id))
            .unwrap_or_default()
    }
    #[cfg(not(feature = "backend-wgpu"))]
    {
        let _ = ids;
        Default::default()
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train the facial landmark backbone with its auxiliary pose head"
)]
pub struct TrainArgs {
    /// Dataloader worker count.
    #[arg(short = 'j', long, default_value_t = 8)]
    pub workers: usize,
    /// Comma-separated accelerator device ids; the first is used.
    #[arg(long, default_value = "0")]
    pub device_ids: String,
    /// Run a validation pass before the first training epoch.
    #[arg(long, default_value = "false", value_parser = parse_bool)]
    pub test_initial: bool,
    /// Initial learning rate.
    #[arg(long, default_value_t = 1e-4)]
    pub base_lr: f64,
    /// AdamW weight decay.
    #[arg(long, default_value_t = 1e-6)]
    pub weight_decay: f32,
    /// Epochs without validation improvement before the learning rate drops.
    #[arg(long, default_value_t = 40)]
    pub lr_patience: usize,
    /// First epoch index (inclusive).
    #[arg(long, default_value_t = 1)]
    pub start_epoch: usize,
    /// Last epoch index (inclusive).
    #[arg(long, default_value_t = 1000)]
    pub end_epoch: usize,
    /// Checkpoint output directory.
    #[arg(long, default_value = "checkpoint/snapshot")]
    pub snapshot: String,
    /// Log file path; logs also go to stdout.
    #[arg(long, default_value = "checkpoint/train.log")]
    pub log_file: String,
    /// Scalar metrics output directory (JSONL).
    #[arg(long, default_value = "checkpoint/scalars")]
    pub scalar_dir: String,
    /// Checkpoint meta JSON to resume weights from.
    #[arg(long)]
    pub resume: Option<String>,
    /// Training list file (WLFW format).
    #[arg(long, default_value = "data/train_data/list.txt")]
    pub dataroot: String,
    /// Validation list file (WLFW format).
    #[arg(long, default_value = "data/test_data/list.txt")]
    pub val_dataroot: String,
    #[arg(long, default_value_t = 128)]
    pub train_batch_size: usize,
    #[arg(long, default_value_t = 8)]
    pub val_batch_size: usize,
    /// Shuffle seed for the training loader.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

/// Install the global subscriber: one fmt layer to stdout, one to the log
/// file. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging(log_file: &Path) -> anyhow::Result<()> {
    if let Some(parent) = log_file.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(log_file)
        .with_context(|| format!("failed to create log file {}", log_file.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .with_writer(Mutex::new(file)),
        )
        .init();
    tracing::info!(
        pid = std::process::id(),
        log_file = %log_file.display(),
        "logging initialized"
    );
    Ok(())
}

fn scalar_value<B: Backend>(tensor: &Tensor<B, 1>) -> f64 {
    tensor
        .clone()
        .into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .first()
        .copied()
        .unwrap_or(0.0) as f64
}

/// One full pass over the training loader: forward both networks, backward
/// the weighted loss, step the optimizer at `lr`, and average both loss
/// terms across steps. Returns the updated model with the two means.
pub fn train_one_epoch<O>(
    loader: &dyn DataLoader<WlfwBatch<ADBackend>>,
    mut model: Pfld<ADBackend>,
    optim: &mut O,
    criterion: &PfldLoss,
    lr: f64,
) -> (Pfld<ADBackend>, f64, f64)
where
    O: Optimizer<Pfld<ADBackend>, ADBackend>,
{
    let mut weighted_meter = AverageMeter::new();
    let mut reference_meter = AverageMeter::new();
    for batch in loader.iter() {
        let (landmarks, angles) = model.forward(batch.images.clone());
        let loss = criterion.forward(&batch, landmarks, angles);

        let weighted_detached = loss.weighted.clone().detach();
        let reference_detached = loss.reference.detach();
        let grads = GradientsParams::from_grads(loss.weighted.backward(), &model);
        model = optim.step(lr, model, grads);

        weighted_meter.update(scalar_value(&weighted_detached));
        reference_meter.update(scalar_value(&reference_detached));
    }
    (model, weighted_meter.mean(), reference_meter.mean())
}

/// One pass over the validation loader on the inner backend: mean over
/// batches of the mean summed squared landmark error. No gradient graph, no
/// parameter mutation.
pub fn validate(
    loader: &dyn DataLoader<WlfwBatch<TrainBackend>>,
    model: &Pfld<TrainBackend>,
) -> f64 {
    let mut meter = AverageMeter::new();
    for batch in loader.iter() {
        let (_features, landmarks) = model.backbone.forward(batch.images.clone());
        let diff = batch.landmarks.clone() - landmarks;
        let error = diff.powf_scalar(2.0).sum_dim(1).mean();
        meter.update(scalar_value(&error));
    }
    meter.mean()
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    tracing::info!(?args, "training configuration");

    let device_ids = parse_device_ids(&args.device_ids)?;
    let device = select_device(&device_ids);
    tracing::info!(?device, workers = args.workers, "selected device");

    let train_dataset = WlfwDataset::from_list_file(Path::new(&args.dataroot))?;
    if train_dataset.is_empty() {
        anyhow::bail!("training list {} contains no samples", args.dataroot);
    }
    let val_dataset = WlfwDataset::from_list_file(Path::new(&args.val_dataroot))?;
    if val_dataset.is_empty() {
        anyhow::bail!("validation list {} contains no samples", args.val_dataroot);
    }
    tracing::info!(
        train_samples = train_dataset.len(),
        val_samples = val_dataset.len(),
        "loaded datasets"
    );

    let cfg = PfldConfig::default();
    let mut model = Pfld::<ADBackend>::new(&cfg, &device);
    if let Some(resume) = &args.resume {
        let (epoch, restored) = checkpoint::load::<ADBackend>(Path::new(resume), &cfg, &device)?;
        tracing::info!(epoch, path = %resume, "restored checkpoint weights");
        model = restored;
    }

    let mut optim = AdamWConfig::new()
        .with_weight_decay(args.weight_decay)
        .init();
    let mut scheduler = ReduceOnPlateau::new(args.base_lr, args.lr_patience);
    let criterion = PfldLoss;
    let scalars = ScalarLog::create(Path::new(&args.scalar_dir))?;

    let train_loader = DataLoaderBuilder::new(WlfwBatcher::<ADBackend>::new(device.clone()))
        .batch_size(args.train_batch_size)
        .shuffle(args.seed)
        .num_workers(args.workers.max(1))
        .build(train_dataset);
    let val_loader = DataLoaderBuilder::new(WlfwBatcher::<TrainBackend>::new(device.clone()))
        .batch_size(args.val_batch_size)
        .num_workers(args.workers.max(1))
        .build(val_dataset);

    if args.test_initial {
        let val_loss = validate(val_loader.as_ref(), &model.valid());
        tracing::info!(val_loss, "initial validation before training");
    }

    for epoch in args.start_epoch..=args.end_epoch {
        let lr = scheduler.lr();
        let (trained, weighted_train_loss, train_loss) =
            train_one_epoch(train_loader.as_ref(), model, &mut optim, &criterion, lr);
        model = trained;
        tracing::info!(
            epoch,
            lr,
            weighted_train_loss,
            train_loss,
            "finished training epoch"
        );

        let paths = checkpoint::save(Path::new(&args.snapshot), epoch, &model)?;
        tracing::info!(epoch, meta = %paths.meta.display(), "saved checkpoint");

        let val_loss = validate(val_loader.as_ref(), &model.valid());
        tracing::info!(epoch, val_loss, "validation");

        let lr = scheduler.observe(val_loss);
        scalars.append(&EpochScalars {
            epoch,
            weighted_train_loss,
            train_loss,
            val_loss,
            lr,
        })?;
    }

    Ok(())
}
