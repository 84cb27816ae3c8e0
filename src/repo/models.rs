//! Model artifact stores

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ModelStore;
use crate::domain::EntityId;
use crate::error::{ForecastError, ForecastResult};
use crate::ml::GradientBoostedTrees;

/// Writes `<dir>/<entity key>.bin` using bincode
#[derive(Debug, Clone)]
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    /// Create the store, creating `dir` if needed
    pub fn new(dir: impl Into<PathBuf>) -> ForecastResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ForecastError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifact path for an entity
    pub fn path_for(&self, entity_id: &EntityId) -> PathBuf {
        self.dir.join(format!("{}.bin", storage_key(entity_id)))
    }
}

/// Entity id with anything outside `[A-Za-z0-9_.-]` replaced by `_`
pub fn storage_key(entity_id: &EntityId) -> String {
    entity_id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl ModelStore for FileModelStore {
    fn save(&self, entity_id: &EntityId, model: &GradientBoostedTrees) -> ForecastResult<PathBuf> {
        let path = self.path_for(entity_id);
        let persistence = |source: io::Error| ForecastError::Persistence {
            entity_id: entity_id.to_string(),
            path: path.clone(),
            source,
        };

        let bytes = bincode::serialize(model)
            .map_err(|e| persistence(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        // Rename over the target so readers never see a partial artifact
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, &bytes).map_err(persistence)?;
        fs::rename(&tmp, &path).map_err(persistence)?;

        debug!(entity = %entity_id, path = %path.display(), bytes = bytes.len(), "model persisted");
        Ok(path)
    }

    fn load(&self, entity_id: &EntityId) -> ForecastResult<GradientBoostedTrees> {
        let path = self.path_for(entity_id);
        let persistence = |source: io::Error| ForecastError::Persistence {
            entity_id: entity_id.to_string(),
            path: path.clone(),
            source,
        };

        let bytes = fs::read(&path).map_err(persistence)?;
        bincode::deserialize(&bytes)
            .map_err(|e| persistence(io::Error::new(io::ErrorKind::InvalidData, e)))
    }
}

/// Keeps serialized artifacts in memory
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    artifacts: Mutex<HashMap<EntityId, Vec<u8>>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.lock().is_empty()
    }

    pub fn contains(&self, entity_id: &EntityId) -> bool {
        self.artifacts.lock().contains_key(entity_id)
    }
}

impl ModelStore for InMemoryModelStore {
    fn save(&self, entity_id: &EntityId, model: &GradientBoostedTrees) -> ForecastResult<PathBuf> {
        let path = PathBuf::from(format!("memory://{}", storage_key(entity_id)));
        let bytes = bincode::serialize(model).map_err(|e| ForecastError::Persistence {
            entity_id: entity_id.to_string(),
            path: path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        self.artifacts.lock().insert(entity_id.clone(), bytes);
        Ok(path)
    }

    fn load(&self, entity_id: &EntityId) -> ForecastResult<GradientBoostedTrees> {
        let path = PathBuf::from(format!("memory://{}", storage_key(entity_id)));
        let artifacts = self.artifacts.lock();
        let bytes = artifacts.get(entity_id).ok_or_else(|| ForecastError::Persistence {
            entity_id: entity_id.to_string(),
            path: path.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "no model stored"),
        })?;
        bincode::deserialize(bytes).map_err(|e| ForecastError::Persistence {
            entity_id: entity_id.to_string(),
            path,
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })
    }
}
