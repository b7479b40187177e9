//! Error types shared across the crate.
//!
//! Errors are split by who reports them:
//!
//! - [`DeviceError`] comes from a [`GraphicsDevice`](crate::device::GraphicsDevice) implementation
//! - [`ModelError`] comes from the character engine behind [`CharacterModel`](crate::model::CharacterModel)
//! - [`LifecycleError`] is raised when a device notification arrives out of order
//! - [`CrowdError`] is the crate level taxonomy every public operation returns

use std::path::PathBuf;

use thiserror::Error;

use crate::lifecycle::{DeviceLifecyclePhase, LifecycleOp};

/// A failure reported by the graphics device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to create {kind}: {details}")]
    Creation { kind: &'static str, details: String },
    #[error("failed to load asset '{path}': {details}")]
    Asset { path: PathBuf, details: String },
    #[error("shader effect '{path}' failed to compile: {details}")]
    EffectCompile { path: PathBuf, details: String },
    #[error("unknown resource handle {0:?}")]
    UnknownHandle(crate::device::ResourceHandle),
    #[error("technique '{0}' is not defined by the effect")]
    UnknownTechnique(String),
    #[error("effect parameter '{0}' is not defined by the effect")]
    UnknownParameter(String),
    #[error("draw issued outside of a scene or effect pass")]
    NotRecording,
    #[error("a scene is already being recorded")]
    SceneInProgress,
    #[error("resource {0:?} is invalidated until the device is reset")]
    Invalidated(crate::device::ResourceHandle),
    #[error("write of {len} bytes exceeds vertex buffer of {size} bytes")]
    BufferOverflow { size: u64, len: usize },
    #[error("presentation surface error: {0}")]
    Surface(String),
    #[error("text overlay error: {0}")]
    Text(String),
}

/// A failure reported by the character engine.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to load character model '{path}': {details}")]
    Load { path: PathBuf, details: String },
    #[error("model has no part named '{0}'")]
    PartNotFound(String),
    #[error("model has no animation clip named '{0}'")]
    ClipNotFound(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// A device notification was delivered while the tracker was in a phase that
/// does not accept it.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{operation:?} is not valid while the device is {phase:?}")]
pub struct LifecycleError {
    pub operation: LifecycleOp,
    pub phase: DeviceLifecyclePhase,
}

#[derive(Debug, Error)]
pub enum CrowdError {
    /// The device does not meet the minimum capabilities.
    #[error("device rejected: {0}")]
    DeviceRejected(String),
    /// The shader effect could not be loaded or compiled. Never retried.
    #[error("effect '{path}' could not be loaded: {source}")]
    EffectLoad {
        path: PathBuf,
        #[source]
        source: DeviceError,
    },
    /// A device resource could not be created during create/reset.
    #[error("could not create {resource}: {source}")]
    ResourceCreation {
        resource: &'static str,
        #[source]
        source: DeviceError,
    },
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("instance count per axis must be at least 1, got {0}")]
    InvalidInstanceCount(u32),
    /// Construction of one crowd member failed and the whole rebuild was aborted.
    #[error("crowd rebuild aborted at instance {index}: {source}")]
    ModelConstruction {
        index: usize,
        #[source]
        source: ModelError,
    },
    #[error("crowd member {index} failed to draw: {source}")]
    ModelDraw {
        index: usize,
        #[source]
        source: ModelError,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("streaming subsystem failed: {0}")]
    Streaming(String),
}

pub type Result<T, E = CrowdError> = std::result::Result<T, E>;
