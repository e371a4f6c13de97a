#![doc = include_str!("../README.md")]

pub use pixpipe_core as core;
pub use pixpipe_transform as transform;

pub use thiserror;

pub mod config;
pub mod pipeline;
pub mod planner;
pub mod request;

pub use config::PixpipeConfig;
pub use pipeline::{ExecutionError, FrameBuffer, Pipeline, Stage};
pub use planner::{Plan, PlannedStage, Planner, PlanningError};
pub use request::{CanonicalRequest, ConversionRequest, OpSet};

/// Plan and bind `request` against the built-in registry with default tuning.
///
/// # Example
/// ```rust
/// use pixpipe::prelude::*;
///
/// let request = ConversionRequest::new(PixelFormat::Uyvy, 4, 2, PixelFormat::Bgr24, 4, 2);
/// let pipeline = pixpipe::compile(&request).unwrap();
/// assert_eq!(pipeline.dst_len(), 4 * 2 * 3);
/// ```
pub fn compile(request: &ConversionRequest) -> Result<Pipeline, PlanningError> {
    Planner::builtin().plan(request)
}

pub mod prelude {
    pub use crate::compile;
    pub use crate::config::{
        DEFAULT_CANARY_BYTES, DEFAULT_MAX_EXPANSIONS, DEFAULT_QUALITY_WEIGHT, ExecutorConfig,
        PixpipeConfig, PlannerConfig,
    };
    pub use crate::pipeline::{ExecutionError, FrameBuffer, Pipeline, Stage};
    pub use crate::planner::{Plan, PlannedStage, Planner, PlanningError};
    pub use crate::request::{CanonicalRequest, ConversionRequest, OpSet};
    #[allow(unused_imports)]
    pub use pixpipe_transform::prelude::*;
}
