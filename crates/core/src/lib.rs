#![doc = include_str!("../README.md")]

pub mod buffer;
pub mod format;
pub mod metrics;

pub mod prelude {
    pub use crate::{
        buffer::{PlaneLayout, ScratchBuffer, plane_layout_from_dims, plane_layouts},
        format::{
            COMPRESSED_HEADER_ALLOWANCE, FourCc, Layout, PixelFormat, PlaneSpec, Resolution,
            buffer_size, checked_buffer_size,
        },
        metrics::PipelineCounters,
    };
}
