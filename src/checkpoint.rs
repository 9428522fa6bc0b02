//! JSON checkpoints of named variables
//!
//! A checkpoint maps variable names to their shape and values. Restoring is scoped: only
//! variables whose names start with one of the requested scopes are overwritten, which is
//! how a pretrained feature extractor is loaded into a larger model.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::nn::Variable;

pub const CHECKPOINT_VERSION: u32 = 1;
const CHECKPOINT_PREFIX: &str = "ckpt-";
const CHECKPOINT_EXTENSION: &str = "json";

/// Errors for checkpoint I/O
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed checkpoint {path:?}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported checkpoint version {0}")]
    Version(u32),
    #[error("variable {0} not found in checkpoint")]
    MissingVariable(String),
    #[error("variable {name} has shape {expected:?} in the model but {got:?} in the checkpoint")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("variable {name} has shape {shape:?} but {len} stored values")]
    DataLengthMismatch {
        name: String,
        shape: Vec<usize>,
        len: usize,
    },
    #[error("no model variable matches scopes {0:?}")]
    NothingToRestore(Vec<String>),
    #[error("no checkpoint found in {0:?}")]
    NotFound(PathBuf),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl StoredTensor {
    fn check_len(&self, name: &str) -> Result<(), CheckpointError> {
        if self.data.len() != self.shape.iter().product::<usize>() {
            return Err(CheckpointError::DataLengthMismatch {
                name: name.to_string(),
                shape: self.shape.clone(),
                len: self.data.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub global_step: usize,
    pub variables: BTreeMap<String, StoredTensor>,
}

impl Checkpoint {
    pub fn from_variables(variables: &[Variable], global_step: usize) -> Self {
        let variables = variables
            .iter()
            .map(|v| {
                (
                    v.name.clone(),
                    StoredTensor {
                        shape: v.tensor.shape().to_vec(),
                        data: v.tensor.to_vec(),
                    },
                )
            })
            .collect();
        Self {
            version: CHECKPOINT_VERSION,
            global_step,
            variables,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let data = serde_json::to_vec(self).map_err(|source| CheckpointError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        let mut file = File::create(path).map_err(io_error(path))?;
        file.write_all(&data).map_err(io_error(path))?;
        file.flush().map_err(io_error(path))
    }

    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let file = File::open(path).map_err(io_error(path))?;
        let checkpoint: Checkpoint =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| {
                CheckpointError::Format {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::Version(checkpoint.version));
        }
        for (name, stored) in &checkpoint.variables {
            stored.check_len(name)?;
        }
        Ok(checkpoint)
    }

    /// Copies stored values into every variable within `scopes` (all variables when empty).
    /// Returns the number of variables restored.
    pub fn restore_into<S: AsRef<str>>(
        &self,
        variables: &[Variable],
        scopes: &[S],
    ) -> Result<usize, CheckpointError> {
        let selected = variables
            .iter()
            .filter(|v| scopes.is_empty() || v.in_scope(scopes))
            .collect::<Vec<_>>();
        if selected.is_empty() {
            return Err(CheckpointError::NothingToRestore(
                scopes.iter().map(|s| s.as_ref().to_string()).collect(),
            ));
        }

        // validate everything before touching any value
        for variable in &selected {
            let stored = self
                .variables
                .get(&variable.name)
                .ok_or_else(|| CheckpointError::MissingVariable(variable.name.clone()))?;
            if stored.shape != variable.tensor.shape() {
                return Err(CheckpointError::ShapeMismatch {
                    name: variable.name.clone(),
                    expected: variable.tensor.shape().to_vec(),
                    got: stored.shape.clone(),
                });
            }
            stored.check_len(&variable.name)?;
        }

        for variable in &selected {
            let stored = &self.variables[&variable.name];
            for (value, data) in variable.tensor.values().iter().zip(&stored.data) {
                value.clone().set_data(*data);
            }
            log::debug!("restored {}", variable.name);
        }
        Ok(selected.len())
    }

    /// Writes `ckpt-<global_step>.json` into `dir`, keeping at most `keep_max` checkpoints
    pub fn save_in_dir(&self, dir: &Path, keep_max: usize) -> Result<PathBuf, CheckpointError> {
        let path = dir.join(format!(
            "{}{}.{}",
            CHECKPOINT_PREFIX, self.global_step, CHECKPOINT_EXTENSION
        ));
        self.save(&path)?;

        let existing = list(dir)?;
        let keep_max = keep_max.max(1);
        if existing.len() > keep_max {
            for (_, stale) in &existing[..existing.len() - keep_max] {
                fs::remove_file(stale).map_err(io_error(stale))?;
                log::debug!("removed old checkpoint {}", stale.display());
            }
        }
        Ok(path)
    }
}

/// Checkpoints in `dir` ordered by global step
pub fn list(dir: &Path) -> Result<Vec<(usize, PathBuf)>, CheckpointError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut found = vec![];
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let path = entry.map_err(io_error(dir))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXTENSION) {
            continue;
        }
        let step = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix(CHECKPOINT_PREFIX))
            .and_then(|s| s.parse::<usize>().ok());
        if let Some(step) = step {
            found.push((step, path));
        }
    }
    found.sort();
    Ok(found)
}

/// Most recent checkpoint in `dir`, if any
pub fn latest(dir: &Path) -> Result<Option<PathBuf>, CheckpointError> {
    Ok(list(dir)?.pop().map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    fn variables() -> Vec<Variable> {
        vec![
            Variable::new(
                "vgg_19/conv1/weights",
                Tensor::from_f32(vec![2], &[1.0, 2.0]).unwrap(),
            ),
            Variable::new("transform/weights", Tensor::from_f32(vec![1], &[3.0]).unwrap()),
        ]
    }

    #[test]
    fn test_save_load_restore_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        Checkpoint::from_variables(&variables(), 7).save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.global_step, 7);

        let fresh = vec![
            Variable::new("vgg_19/conv1/weights", Tensor::zeros(vec![2])),
            Variable::new("transform/weights", Tensor::zeros(vec![1])),
        ];
        assert_eq!(loaded.restore_into(&fresh, &["vgg_19"]).unwrap(), 1);
        assert_eq!(fresh[0].tensor.to_vec(), vec![1.0, 2.0]);
        // outside the scope, untouched
        assert_eq!(fresh[1].tensor.to_vec(), vec![0.0]);

        assert_eq!(loaded.restore_into::<&str>(&fresh, &[]).unwrap(), 2);
        assert_eq!(fresh[1].tensor.to_vec(), vec![3.0]);
    }

    #[test]
    fn test_restore_errors() {
        let checkpoint = Checkpoint::from_variables(&variables(), 0);
        let wrong_shape = vec![Variable::new("vgg_19/conv1/weights", Tensor::zeros(vec![3]))];
        assert!(matches!(
            checkpoint.restore_into(&wrong_shape, &["vgg_19"]),
            Err(CheckpointError::ShapeMismatch { .. })
        ));
        let missing = vec![Variable::new("vgg_19/conv2/weights", Tensor::zeros(vec![2]))];
        assert!(matches!(
            checkpoint.restore_into(&missing, &["vgg_19"]),
            Err(CheckpointError::MissingVariable(name)) if name == "vgg_19/conv2/weights"
        ));
        assert!(matches!(
            checkpoint.restore_into(&missing, &["resnet"]),
            Err(CheckpointError::NothingToRestore(_))
        ));
    }

    #[test]
    fn test_short_data_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.json");
        let mut checkpoint = Checkpoint::from_variables(&variables(), 0);
        checkpoint.variables.insert(
            "vgg_19/conv1/weights".into(),
            StoredTensor {
                shape: vec![4],
                data: vec![1.0, 2.0],
            },
        );

        let fresh = vec![Variable::new("vgg_19/conv1/weights", Tensor::zeros(vec![4]))];
        assert!(matches!(
            checkpoint.restore_into(&fresh, &["vgg_19"]),
            Err(CheckpointError::DataLengthMismatch { len: 2, .. })
        ));
        assert_eq!(fresh[0].tensor.to_vec(), vec![0.0; 4]);

        checkpoint.save(&path).unwrap();
        assert!(matches!(
            Checkpoint::load(&path),
            Err(CheckpointError::DataLengthMismatch { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_write_is_an_error() {
        let checkpoint = Checkpoint::from_variables(&variables(), 0);
        assert!(matches!(
            checkpoint.save(Path::new("/dev/full")),
            Err(CheckpointError::Io { .. })
        ));
    }

    #[test]
    fn test_save_in_dir_keeps_latest() {
        let dir = tempfile::tempdir().unwrap();
        let vars = variables();
        for step in [5, 10, 15] {
            Checkpoint::from_variables(&vars, step)
                .save_in_dir(dir.path(), 2)
                .unwrap();
        }
        let steps = list(dir.path())
            .unwrap()
            .into_iter()
            .map(|(s, _)| s)
            .collect::<Vec<_>>();
        assert_eq!(steps, vec![10, 15]);
        assert_eq!(
            latest(dir.path()).unwrap().unwrap(),
            dir.path().join("ckpt-15.json")
        );
        assert_eq!(latest(&dir.path().join("absent")).unwrap(), None);
    }

    #[test]
    fn test_version_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");
        let mut checkpoint = Checkpoint::from_variables(&variables(), 0);
        checkpoint.version = 99;
        checkpoint.save(&path).unwrap();
        assert!(matches!(
            Checkpoint::load(&path),
            Err(CheckpointError::Version(99))
        ));
    }
}
