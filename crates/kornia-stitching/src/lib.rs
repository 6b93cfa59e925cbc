#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Overview
//!
//! `kornia-stitching` exposes the motion estimation and feature matching
//! stages of a native image stitching library. The numerical work happens on
//! the native side; this crate converts collections of owned records into
//! fixed-layout interop records, manages the lifetime of every native handle
//! involved and turns native exception statuses into typed errors.
//!
//! # Architecture
//!
//! - **NativeBackend**: trait over the native entry points. [`MemoryBackend`]
//!   simulates the library in process; `OpenCvSharpBackend` (feature
//!   `opencvsharp`) links against `OpenCvSharpExtern`.
//! - **Mat**: reference-counted native matrix with explicit release.
//! - **StdVector**: transient native vectors released on drop.
//! - **Estimator** / **FeaturesMatcher**: marshal the inputs, call the
//!   native algorithm and read the results back into owned records.
//!
//! # Quick Start
//!
//! ```rust
//! use kornia_stitching::{
//!     CameraParams, Estimator, HomographyBasedEstimator, ImageFeatures, ImageSize, Mat,
//!     MatchesInfo, MemoryBackend, StitchingError,
//! };
//!
//! let backend = MemoryBackend::new();
//! let estimator = HomographyBasedEstimator::new(&backend, Default::default())?;
//!
//! let features = vec![
//!     ImageFeatures::new(0, ImageSize { width: 640, height: 480 }, vec![], Mat::new(&backend)?),
//!     ImageFeatures::new(1, ImageSize { width: 640, height: 480 }, vec![], Mat::new(&backend)?),
//! ];
//! let matches = vec![MatchesInfo::new(0, 1, vec![], vec![], 0, Mat::eye(&backend, 3)?, 1.0)?];
//!
//! let mut cameras: Vec<CameraParams<MemoryBackend>> = Vec::new();
//! assert!(estimator.apply(&features, &matches, &mut cameras)?);
//! assert_eq!(cameras.len(), 2);
//! # Ok::<(), StitchingError>(())
//! ```

/// native backends.
pub mod backend;

/// camera parameters.
pub mod camera;

/// error types for the crate.
pub mod error;

/// rotation estimators.
pub mod estimator;

/// image features.
pub mod features;

/// interop records crossing the native boundary.
pub mod ffi;

mod marshal;

/// native matrices.
pub mod mat;

/// features matchers.
pub mod matcher;

/// pairwise matches.
pub mod matches;

/// plain value types shared with the native library.
pub mod types;

/// native vectors.
pub mod vector;

pub use crate::backend::{MemoryBackend, NativeBackend};
pub use crate::camera::CameraParams;
pub use crate::error::{NativeError, StitchingError};
pub use crate::estimator::{Estimator, HomographyBasedEstimator, HomographyBasedEstimatorConfig};
pub use crate::features::ImageFeatures;
pub use crate::mat::{Mat, MatData};
pub use crate::matcher::{BestOf2NearestMatcher, BestOf2NearestMatcherConfig, FeaturesMatcher};
pub use crate::matches::MatchesInfo;
pub use crate::types::{DMatch, ImageSize, KeyPoint, Point2f};

#[cfg(feature = "opencvsharp")]
pub use crate::backend::OpenCvSharpBackend;
