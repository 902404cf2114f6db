#![recursion_limit = "256"]

pub mod checkpoint;
pub mod dataset;
pub mod loss;
pub mod meter;
pub mod metrics;
pub mod sched;
pub mod util;

pub use dataset::{
    parse_list_line, WlfwBatch, WlfwBatcher, WlfwDataset, WlfwItem, WlfwRecord, INPUT_SIZE,
    LANDMARK_DIM, NUM_ATTRIBUTES, NUM_EULER_ANGLES, NUM_LANDMARKS,
};
pub use loss::{LossOutput, PfldLoss};
pub use meter::AverageMeter;
pub use metrics::{EpochScalars, ScalarLog};
pub use models::{
    AuxiliaryNet, AuxiliaryNetConfig, Pfld, PfldBackbone, PfldBackboneConfig, PfldConfig,
};
pub use sched::ReduceOnPlateau;
pub use util::{init_logging, run_train, train_one_epoch, validate, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn::backend::NdArray<f32>;

/// Autodiff wrapper used for the training pass.
pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
