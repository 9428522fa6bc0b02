//! Name based component selection
//!
//! Every pluggable component (network, augmenter, inputter, modeler, runner, callback) is
//! looked up by name in a [`Registry`] of builder functions. [`Components::default`]
//! registers the built-ins; callers may register their own before building a job.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    augmenter::{self, Augmenter},
    callback::{self, Callback},
    config::{CallbackConfig, InputterConfig, ModelerConfig, NetworkConfig, RunnerConfig},
    error::Error,
    inputter::{self, Inputter},
    modeler::{self, Modeler},
    network::{self, Network},
    runner::{self, Runner},
};

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("unknown {kind} '{name}', known: {}", known.join(", "))]
    Unknown {
        kind: &'static str,
        name: String,
        known: Vec<String>,
    },
}

pub type NetworkBuilder = fn(&NetworkConfig) -> Result<Box<dyn Network>, Error>;
pub type AugmenterBuilder = fn(&InputterConfig) -> Result<Box<dyn Augmenter>, Error>;
pub type InputterBuilder =
    fn(&InputterConfig, Option<Box<dyn Augmenter>>) -> Result<Box<dyn Inputter>, Error>;
pub type ModelerBuilder =
    fn(&ModelerConfig, Box<dyn Network>, &Components) -> Result<Box<dyn Modeler>, Error>;
pub type RunnerBuilder = fn(
    &RunnerConfig,
    Box<dyn Inputter>,
    Box<dyn Modeler>,
    Vec<Box<dyn Callback>>,
) -> Result<Box<dyn Runner>, Error>;
pub type CallbackBuilder = fn(&CallbackConfig) -> Result<Box<dyn Callback>, Error>;

/// Builders of one kind of component, keyed by name
#[derive(Debug, Clone)]
pub struct Registry<B> {
    kind: &'static str,
    builders: BTreeMap<String, B>,
}

impl<B: Copy> Registry<B> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            builders: BTreeMap::new(),
        }
    }

    /// Adds a builder, returning the one it replaced
    pub fn register(&mut self, name: impl Into<String>, builder: B) -> Option<B> {
        self.builders.insert(name.into(), builder)
    }

    pub fn get(&self, name: &str) -> Result<B, RegistryError> {
        self.builders
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::Unknown {
                kind: self.kind,
                name: name.to_string(),
                known: self.builders.keys().cloned().collect(),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.builders.keys().map(String::as_str).collect()
    }
}

pub struct Components {
    pub networks: Registry<NetworkBuilder>,
    pub augmenters: Registry<AugmenterBuilder>,
    pub inputters: Registry<InputterBuilder>,
    pub modelers: Registry<ModelerBuilder>,
    pub runners: Registry<RunnerBuilder>,
    pub callbacks: Registry<CallbackBuilder>,
}

impl Components {
    /// Registries without any builder
    pub fn empty() -> Self {
        Self {
            networks: Registry::new("network"),
            augmenters: Registry::new("augmenter"),
            inputters: Registry::new("inputter"),
            modelers: Registry::new("modeler"),
            runners: Registry::new("runner"),
            callbacks: Registry::new("callback"),
        }
    }
}

impl Default for Components {
    fn default() -> Self {
        let mut components = Self::empty();

        components
            .networks
            .register("transform_net", network::transform_net::build);
        components
            .networks
            .register("vgg_19_mini", network::vgg::build);
        components.networks.register("mlp", network::mlp::build);

        components
            .augmenters
            .register("vgg_preprocessing", augmenter::vgg_preprocessing::build);
        components
            .augmenters
            .register("identity", augmenter::identity::build);

        components
            .inputters
            .register("style_transfer_image", inputter::style_transfer_image::build);
        components
            .inputters
            .register("toy2d", inputter::toy2d::build);

        components
            .modelers
            .register("style_transfer", modeler::style_transfer::build);
        components
            .modelers
            .register("classification", modeler::classification::build);

        components.runners.register("basic", runner::basic::build);

        components
            .callbacks
            .register("train_basic", callback::train_basic::build);
        components
            .callbacks
            .register("train_loss", callback::train_loss::build);
        components
            .callbacks
            .register("train_speed", callback::train_speed::build);
        components
            .callbacks
            .register("infer_basic", callback::infer_basic::build);
        components
            .callbacks
            .register("infer_style_transfer", callback::infer_style_transfer::build);
        components
            .callbacks
            .register("infer_decision_boundary", callback::infer_decision_boundary::build);

        components
    }
}
