//! Modular deep learning jobs built on a small scalar autograd engine.
//!
//! A job is assembled from named components: an inputter feeding batches (optionally through
//! an augmenter), a modeler wrapping a network with its loss, a runner driving the steps and
//! callbacks hooked around them. See [`registry::Components`] for the built-ins.

pub mod app;
pub mod augmenter;
pub mod backprop_fns;
pub mod callback;
pub mod checkpoint;
pub mod config;
pub mod dataloader;
pub mod datasets;
pub mod error;
pub mod image_io;
pub mod inputter;
pub mod loss;
pub mod modeler;
pub mod network;
pub mod nn;
pub mod optim;
pub mod registry;
pub mod runner;
pub mod tensor;
pub mod tuner;
pub mod values;
