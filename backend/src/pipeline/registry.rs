use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tch::{CModule, Device, Tensor};

/// A loaded TorchScript module shared across request workers. libtorch
/// permits concurrent read-only forward passes on a loaded script module;
/// tch's raw-pointer wrapper does not declare that, so it is asserted once
/// here.
pub struct SharedModule(CModule);

unsafe impl Send for SharedModule {}
unsafe impl Sync for SharedModule {}

impl SharedModule {
    pub fn forward(&self, input: &Tensor) -> Result<Tensor, tch::TchError> {
        tch::no_grad(|| self.0.forward_ts(&[input]))
    }
}

/// Identity of the deployed artifact, stamped onto every prediction and
/// registered as the active model version at startup.
#[derive(Debug, Clone)]
pub struct ModelMeta {
    pub name: String,
    pub version: String,
    pub input_size: String,
}

impl ModelMeta {
    pub fn tag(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("model file not found at {}", .0.display())]
    Missing(PathBuf),
    #[error("failed to deserialize model artifact {}: {}", .path.display(), .source)]
    Deserialize {
        path: PathBuf,
        source: tch::TchError,
    },
    #[error("no model loaded")]
    Unavailable,
}

/// Process-wide holder of the TorchScript module. The artifact is read from
/// disk exactly once (`load`), after which every caller shares the same
/// handle. `reload` deserializes the replacement outside the lock and only
/// holds the write lock for the pointer swap, so concurrent inference never
/// waits on disk I/O.
pub struct ModelRegistry {
    path: PathBuf,
    device: Device,
    meta: ModelMeta,
    handle: RwLock<Option<Arc<SharedModule>>>,
}

impl ModelRegistry {
    pub fn new(path: impl Into<PathBuf>, meta: ModelMeta) -> Self {
        Self {
            path: path.into(),
            device: Device::cuda_if_available(),
            meta,
            handle: RwLock::new(None),
        }
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    /// Cold load. Called once at startup; the server refuses to start
    /// without a usable artifact.
    pub fn load(&self) -> Result<(), ModelLoadError> {
        let module = self.load_module()?;
        *self.handle.write().unwrap() = Some(Arc::new(SharedModule(module)));
        log::info!(
            "Loaded model {} from {}",
            self.meta.tag(),
            self.path.display()
        );
        Ok(())
    }

    /// Operator-triggered replacement of the artifact. On failure the
    /// previous handle stays in place untouched.
    pub fn reload(&self) -> Result<(), ModelLoadError> {
        let module = self.load_module()?;
        *self.handle.write().unwrap() = Some(Arc::new(SharedModule(module)));
        log::info!(
            "Reloaded model {} from {}",
            self.meta.tag(),
            self.path.display()
        );
        Ok(())
    }

    /// Cheap shared handle for one forward pass. Never blocks on anything
    /// longer than the pointer read.
    pub fn current(&self) -> Result<Arc<SharedModule>, ModelLoadError> {
        self.handle
            .read()
            .unwrap()
            .clone()
            .ok_or(ModelLoadError::Unavailable)
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.read().unwrap().is_some()
    }

    fn load_module(&self) -> Result<CModule, ModelLoadError> {
        if !self.path.exists() {
            return Err(ModelLoadError::Missing(self.path.clone()));
        }
        CModule::load_on_device(&self.path, self.device).map_err(|source| {
            ModelLoadError::Deserialize {
                path: self.path.clone(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(path: &str) -> ModelRegistry {
        ModelRegistry::new(
            path,
            ModelMeta {
                name: "pneumonia-mobilenetv2".to_string(),
                version: "1.0".to_string(),
                input_size: "224x224".to_string(),
            },
        )
    }

    #[test]
    fn missing_artifact_is_reported_with_its_path() {
        let reg = registry("/nonexistent/model.pt");
        match reg.load() {
            Err(ModelLoadError::Missing(path)) => {
                assert_eq!(path, PathBuf::from("/nonexistent/model.pt"));
            }
            other => panic!("expected Missing, got {:?}", other),
        }
        assert!(!reg.is_loaded());
    }

    #[test]
    fn current_before_load_is_unavailable() {
        let reg = registry("/nonexistent/model.pt");
        assert!(matches!(reg.current(), Err(ModelLoadError::Unavailable)));
    }

    #[test]
    fn failed_reload_keeps_nothing_fabricated() {
        // a failed load must leave the registry empty, not degraded into
        // some substitute handle
        let reg = registry("/nonexistent/model.pt");
        let _ = reg.reload();
        assert!(matches!(reg.current(), Err(ModelLoadError::Unavailable)));
    }

    #[test]
    fn meta_tag_combines_name_and_version() {
        let reg = registry("/tmp/model.pt");
        assert_eq!(reg.meta().tag(), "pneumonia-mobilenetv2 v1.0");
    }
}
