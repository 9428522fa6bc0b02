//! Crate level error type

use std::path::PathBuf;

use thiserror::Error;

use crate::{
    checkpoint::CheckpointError, config::ConfigError, dataloader::DataLoaderError,
    image_io::ImageIoError, network::NetworkError, nn::NNError, registry::RegistryError,
    tensor::TensorError,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    NN(#[from] NNError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    DataLoader(#[from] DataLoaderError),
    #[error(transparent)]
    ImageIo(#[from] ImageIoError),
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("plotting failed: {0}")]
    Plot(String),
    #[error("{0}")]
    InvalidState(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.into();
        move |source| Error::Io { path, source }
    }
}
