// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("pipeline graph error: {0}")]
    Graph(String),

    #[error("stage `{stage}` failed: {reason}")]
    Stage { stage: String, reason: String },

    #[error("wrong pipeline state: expected {expected}, was {actual}")]
    WrongState { expected: String, actual: String },

    #[error("drain timed out after {0:?}")]
    DrainTimeout(Duration),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Convenience constructor for fatal per-stage failures.
    pub fn stage(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
