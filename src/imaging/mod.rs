//! Image transform in pure Rust, no system libraries.
//!
//! | Step | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` |
//! | **Fit** | [`plan_resize`] + Lanczos3 resize, optional center crop |
//! | **Encode** | per-format `image` encoders, quality where the format has one |
//! | **Place** | [`fsops::write_atomically`](crate::fsops::write_atomically) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for fit geometry (unit testable)
//! - **Parameters**: Data structures describing a transform
//! - **Backend**: [`Transformer`] trait + [`RustBackend`]

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;

pub use backend::{TransformError, TransformOutput, Transformer};
pub use calculations::{ResizePlan, plan_resize};
pub use params::{Fit, OutputFormat, Quality, TransformParams};
pub use rust_backend::RustBackend;
