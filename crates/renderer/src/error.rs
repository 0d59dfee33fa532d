use thiserror::Error;

use crate::types::{DisplayId, RenderSize, UniformKind};

/// Failure to turn fragment source into a renderable program.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to parse shader: {0}")]
    Parse(String),
    #[error("shader failed validation: {0}")]
    Validation(String),
    #[error("device rejected shader program: {0}")]
    Device(String),
}

/// Failure to (re)allocate a display's off-screen targets.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("render target {requested} exceeds the device limit of {limit} pixels per side")]
    TooLarge { requested: RenderSize, limit: u32 },
    #[error("device failed to allocate render targets: {0}")]
    Device(String),
}

/// Problems binding a display's uniform values to the active program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("uniform '{name}' is set on {display} but not declared by the active shader")]
    MissingUniform { display: DisplayId, name: String },
    #[error("uniform '{name}' is declared as {declared} but was given a {given}")]
    TypeMismatch {
        name: String,
        declared: UniformKind,
        given: UniformKind,
    },
}

/// Malformed uniform input from the control plane.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UniformError {
    #[error("unknown display '{0}'")]
    UnknownDisplay(String),
    #[error("unknown uniform type '{0}'")]
    UnknownType(String),
    #[error("{kind} expects {expected} components, got {actual}")]
    ComponentCount {
        kind: UniformKind,
        expected: usize,
        actual: usize,
    },
    #[error("could not parse '{0}' as a number")]
    Number(String),
}

/// The render thread has gone away; commands can no longer be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("render engine command channel is closed")]
pub struct ChannelClosed;
