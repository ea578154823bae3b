//! Settings management

use ripple_core::glam::Vec3;
use ripple_core::orchestrator::{Readback, SolverConfig};
use ripple_core::{scene, ParamError, SimParams};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which backend executes the kernels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Host, one thread
    #[default]
    Cpu,
    /// Host, rayon thread pool
    Rayon,
    /// wgpu compute
    Gpu,
}

/// Initial particle layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SceneKind {
    GaussianCloud { count: usize, std_dev: f32, seed: u64 },
    DamBlock { spacing: f32, half_width: f32, seed: u64 },
    Lattice { min: Vec3, max: Vec3, spacing: f32 },
}

impl Default for SceneKind {
    fn default() -> Self {
        SceneKind::GaussianCloud {
            count: 3500,
            std_dev: 0.3,
            seed: 42,
        }
    }
}

impl SceneKind {
    pub fn seed_positions(&self, params: &SimParams) -> Vec<Vec3> {
        match *self {
            SceneKind::GaussianCloud { count, std_dev, seed } => {
                scene::gaussian_cloud(count, std_dev, &params.domain, seed)
            }
            SceneKind::DamBlock {
                spacing,
                half_width,
                seed,
            } => scene::dam_block(&params.domain, params.smoothing_radius, spacing, half_width, seed),
            SceneKind::Lattice { min, max, spacing } => scene::lattice(min, max, spacing),
        }
    }
}

/// Everything one headless run needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub params: SimParams,
    pub scene: SceneKind,
    pub backend: BackendKind,
    /// Frames to step, warm-up included.
    pub frames: u64,
    pub warmup_frames: u64,
    /// Log a stats line every this many frames; 0 disables it.
    pub log_every: u64,
    /// CSV file receiving per-frame densities.
    pub density_log: Option<PathBuf>,
    pub readback: Readback,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            params: SimParams::default(),
            scene: SceneKind::default(),
            backend: BackendKind::default(),
            frames: 600,
            warmup_frames: 50,
            log_every: 60,
            density_log: None,
            readback: Readback::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot serialize settings: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error(transparent)]
    Params(#[from] ParamError),
}

impl RunSettings {
    /// Read and validate a JSON settings file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: RunSettings = serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.params.validate()?;
        tracing::debug!("loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).map_err(SettingsError::Serialize)?;
        fs::write(path, text).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Solver configuration for this run. A density log forces density readback.
    pub fn solver_config(&self) -> SolverConfig {
        let mut readback = self.readback;
        readback.densities |= self.density_log.is_some();
        SolverConfig {
            warmup_frames: self.warmup_frames,
            readback,
            ..SolverConfig::default()
        }
    }
}
