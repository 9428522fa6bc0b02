//! Command line configuration
//!
//! A single [`Config`] is parsed from the command line and then split into the smaller
//! configs each component is built from.

use std::{
    fmt::{self, Display},
    path::PathBuf,
};

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::{datasets::Dataset, optim::OptimizerKind, tensor::DataFormat};

/// Errors for invalid configurations
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error(
        "piecewise schedule needs one more decay than boundaries, \
         got {boundaries} boundaries and {decays} decays"
    )]
    PiecewiseMismatch { boundaries: usize, decays: usize },
    #[error("tuning grid {0} is empty")]
    EmptyGrid(&'static str),
    #[error("{0} is required for {1}")]
    Missing(&'static str, String),
}

/// What the job does
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Train,
    Infer,
    Tune,
}

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Train => write!(f, "train"),
            Mode::Infer => write!(f, "infer"),
            Mode::Tune => write!(f, "tune"),
        }
    }
}

/// Modular deep learning jobs assembled from named components
#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
pub struct Config {
    #[clap(long, value_enum, default_value_t = Mode::Train)]
    pub mode: Mode,

    // components
    #[clap(long, default_value = "basic")]
    pub runner: String,
    #[clap(long, default_value = "style_transfer_image")]
    pub inputter: String,
    #[clap(long, default_value = "style_transfer")]
    pub modeler: String,
    #[clap(long, default_value = "transform_net")]
    pub network: String,
    /// Pretrained network evaluated inside the loss
    #[clap(long, default_value = "vgg_19_mini")]
    pub feature_net: String,
    /// Defaults to `vgg_preprocessing` for the `style_transfer_image` inputter
    #[clap(long)]
    pub augmenter: Option<String>,
    #[clap(long, value_delimiter = ',', default_value = "train_basic,train_loss")]
    pub callbacks: Vec<String>,

    // paths
    #[clap(long, default_value = "model")]
    pub model_dir: PathBuf,
    #[clap(long)]
    pub feature_net_path: Option<PathBuf>,
    #[clap(long)]
    pub style_image_path: Option<PathBuf>,
    #[clap(long, default_value = "data")]
    pub dataset_dir: PathBuf,
    #[clap(long, default_value = "output")]
    pub output_dir: PathBuf,

    // images
    #[clap(long, value_enum, default_value_t = DataFormat::ChannelsLast)]
    pub data_format: DataFormat,
    #[clap(long, default_value_t = 16)]
    pub image_height: usize,
    #[clap(long, default_value_t = 16)]
    pub image_width: usize,
    #[clap(long, default_value_t = 3)]
    pub image_depth: usize,

    // schedule
    #[clap(long, alias = "batch-size-per-gpu", default_value_t = 2)]
    pub batch_size_per_replica: usize,
    #[clap(long, alias = "num-gpu", default_value_t = 1)]
    pub num_replicas: usize,
    #[clap(long, default_value_t = 1)]
    pub epochs: usize,
    #[clap(long)]
    pub max_steps: Option<usize>,
    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub shuffle: bool,
    #[clap(long, default_value_t = 0)]
    pub seed: u64,

    // optimization
    #[clap(long, value_enum, default_value_t = OptimizerKind::Momentum)]
    pub optimizer: OptimizerKind,
    #[clap(long, default_value_t = 0.001)]
    pub learning_rate: f32,
    #[clap(long, default_value_t = 0.9)]
    pub momentum: f32,
    #[clap(long, value_delimiter = ',')]
    pub piecewise_boundaries: Vec<usize>,
    #[clap(long, value_delimiter = ',')]
    pub piecewise_lr_decay: Vec<f32>,
    #[clap(long, default_value_t = 0.0)]
    pub l2_weight_decay: f32,

    // perceptual loss weights
    #[clap(long, default_value_t = 15.0)]
    pub content_weight: f32,
    #[clap(long, default_value_t = 100.0)]
    pub style_weight: f32,
    #[clap(long, default_value_t = 200.0)]
    pub tv_weight: f32,

    // networks
    #[clap(long, default_value_t = 4)]
    pub base_width: usize,
    // Note that when increasing the hidden size, activation values may explode if
    // the weights are not initialized properly
    #[clap(long, default_value_t = 10)]
    pub hidden_units: usize,

    // toy classification data
    #[clap(long, value_enum, default_value_t = Dataset::XOR)]
    pub dataset: Dataset,
    #[clap(long, default_value_t = 100)]
    pub class_size: usize,

    // callbacks
    #[clap(long, default_value_t = 10)]
    pub log_every_n_iter: usize,
    #[clap(long, default_value_t = 100)]
    pub save_checkpoint_steps: usize,
    #[clap(long, default_value_t = 5)]
    pub keep_checkpoint_max: usize,

    // tuning grids
    #[clap(long, value_delimiter = ',', default_value = "0.1,0.01,0.001")]
    pub tune_learning_rates: Vec<f32>,
    #[clap(long, value_delimiter = ',', default_value = "0.0,0.0001")]
    pub tune_l2_weight_decays: Vec<f32>,
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["modular-dl"])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub mode: Mode,
    pub epochs: usize,
    pub max_steps: Option<usize>,
    pub num_replicas: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputterConfig {
    pub mode: Mode,
    pub dataset_dir: PathBuf,
    pub data_format: DataFormat,
    pub image_height: usize,
    pub image_width: usize,
    pub image_depth: usize,
    /// samples per step across all replicas
    pub batch_size: usize,
    pub shuffle: bool,
    pub seed: u64,
    pub dataset: Dataset,
    pub class_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelerConfig {
    pub mode: Mode,
    pub feature_net: String,
    pub feature_net_path: Option<PathBuf>,
    pub style_image_path: Option<PathBuf>,
    pub data_format: DataFormat,
    pub image_depth: usize,
    pub batch_size_per_replica: usize,
    pub optimizer: OptimizerKind,
    pub learning_rate: f32,
    pub momentum: f32,
    pub piecewise_boundaries: Vec<usize>,
    pub piecewise_lr_decay: Vec<f32>,
    pub l2_weight_decay: f32,
    pub content_weight: f32,
    pub style_weight: f32,
    pub tv_weight: f32,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub image_depth: usize,
    pub base_width: usize,
    pub hidden_units: usize,
    pub num_classes: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallbackConfig {
    pub mode: Mode,
    pub model_dir: PathBuf,
    pub output_dir: PathBuf,
    pub data_format: DataFormat,
    pub dataset: Dataset,
    pub class_size: usize,
    pub seed: u64,
    pub log_every_n_iter: usize,
    pub save_checkpoint_steps: usize,
    pub keep_checkpoint_max: usize,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("batch_size_per_replica", self.batch_size_per_replica),
            ("num_replicas", self.num_replicas),
            ("epochs", self.epochs),
            ("image_height", self.image_height),
            ("image_width", self.image_width),
            ("base_width", self.base_width),
            ("log_every_n_iter", self.log_every_n_iter),
            ("save_checkpoint_steps", self.save_checkpoint_steps),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::NotPositive(name));
        }

        let (boundaries, decays) = (
            self.piecewise_boundaries.len(),
            self.piecewise_lr_decay.len(),
        );
        if (boundaries, decays) != (0, 0) && decays != boundaries + 1 {
            return Err(ConfigError::PiecewiseMismatch { boundaries, decays });
        }

        if self.mode == Mode::Tune {
            if self.tune_learning_rates.is_empty() {
                return Err(ConfigError::EmptyGrid("tune_learning_rates"));
            }
            if self.tune_l2_weight_decays.is_empty() {
                return Err(ConfigError::EmptyGrid("tune_l2_weight_decays"));
            }
        }

        if self.modeler == "style_transfer" && self.mode != Mode::Infer {
            if self.style_image_path.is_none() {
                return Err(ConfigError::Missing("style_image_path", self.modeler.clone()));
            }
            if self.feature_net_path.is_none() {
                return Err(ConfigError::Missing("feature_net_path", self.modeler.clone()));
            }
        }
        Ok(())
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            mode: self.mode,
            epochs: self.epochs,
            max_steps: self.max_steps,
            num_replicas: self.num_replicas,
        }
    }

    /// The augmenter to build. Style transfer images are mean centred unless another
    /// augmenter (e.g. `identity`) is named.
    pub fn augmenter_name(&self) -> Option<&str> {
        match (&self.augmenter, self.inputter.as_str()) {
            (Some(name), _) => Some(name.as_str()),
            (None, "style_transfer_image") => Some("vgg_preprocessing"),
            (None, _) => None,
        }
    }

    pub fn inputter_config(&self) -> InputterConfig {
        InputterConfig {
            mode: self.mode,
            dataset_dir: self.dataset_dir.clone(),
            data_format: self.data_format,
            image_height: self.image_height,
            image_width: self.image_width,
            image_depth: self.image_depth,
            batch_size: self.batch_size_per_replica * self.num_replicas,
            // inference keeps the dataset order so outputs line up with inputs
            shuffle: self.shuffle && self.mode != Mode::Infer,
            seed: self.seed,
            dataset: self.dataset,
            class_size: self.class_size,
        }
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            image_depth: self.image_depth,
            base_width: self.base_width,
            hidden_units: self.hidden_units,
            num_classes: 2,
            seed: self.seed,
        }
    }

    pub fn modeler_config(&self) -> ModelerConfig {
        ModelerConfig {
            mode: self.mode,
            feature_net: self.feature_net.clone(),
            feature_net_path: self.feature_net_path.clone(),
            style_image_path: self.style_image_path.clone(),
            data_format: self.data_format,
            image_depth: self.image_depth,
            batch_size_per_replica: self.batch_size_per_replica,
            optimizer: self.optimizer,
            learning_rate: self.learning_rate,
            momentum: self.momentum,
            piecewise_boundaries: self.piecewise_boundaries.clone(),
            piecewise_lr_decay: self.piecewise_lr_decay.clone(),
            l2_weight_decay: self.l2_weight_decay,
            content_weight: self.content_weight,
            style_weight: self.style_weight,
            tv_weight: self.tv_weight,
            network: self.network_config(),
        }
    }

    pub fn callback_config(&self) -> CallbackConfig {
        CallbackConfig {
            mode: self.mode,
            model_dir: self.model_dir.clone(),
            output_dir: self.output_dir.clone(),
            data_format: self.data_format,
            dataset: self.dataset,
            class_size: self.class_size,
            seed: self.seed,
            log_every_n_iter: self.log_every_n_iter,
            save_checkpoint_steps: self.save_checkpoint_steps,
            keep_checkpoint_max: self.keep_checkpoint_max,
        }
    }
}
