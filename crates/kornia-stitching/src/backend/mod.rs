//! The seam between the bindings and the native stitching library.
//!
//! All native work goes through a [`NativeBackend`]. The bindings never
//! compute anything themselves: they allocate proxies, build interop records,
//! call into the backend and translate what comes back.

use crate::{
    error::NativeError,
    ffi::{RawHandle, WCameraParams, WImageFeatures, WMatchesInfo},
    mat::MatData,
    matcher::BestOf2NearestMatcherConfig,
    types::{DMatch, KeyPoint},
};

/// In-process backend simulating the native library with a handle table.
pub mod memory;

/// Backend linking against the `OpenCvSharpExtern` shared library.
#[cfg(feature = "opencvsharp")]
pub mod opencvsharp;

pub use memory::MemoryBackend;
#[cfg(feature = "opencvsharp")]
pub use opencvsharp::OpenCvSharpBackend;

/// A trait for the entry points of a native stitching library.
///
/// # Safety
///
/// Handles passed to a backend must have been produced by the same backend
/// and must not have been deleted. The bindings uphold this through the
/// owning wrappers in [`crate::mat`] and [`crate::vector`]; calling these
/// methods directly with arbitrary handles is undefined behaviour for native
/// backends.
///
/// Delete methods must be called exactly once per handle.
pub trait NativeBackend: Clone {
    /// Allocates an empty matrix.
    fn mat_new(&self) -> Result<RawHandle, NativeError>;

    /// Allocates a matrix holding a copy of `data`.
    fn mat_from_data(&self, data: &MatData) -> Result<RawHandle, NativeError>;

    /// Copies the contents of a matrix out of the native domain.
    fn mat_data(&self, mat: RawHandle) -> Result<MatData, NativeError>;

    /// Releases a matrix.
    fn mat_delete(&self, mat: RawHandle) -> Result<(), NativeError>;

    /// Allocates a `std::vector<KeyPoint>` holding a copy of `data`.
    fn vector_keypoint_new(&self, data: &[KeyPoint]) -> Result<RawHandle, NativeError>;

    /// Copies the contents of a `std::vector<KeyPoint>`.
    fn vector_keypoint_to_vec(&self, vec: RawHandle) -> Result<Vec<KeyPoint>, NativeError>;

    /// Releases a `std::vector<KeyPoint>`.
    fn vector_keypoint_delete(&self, vec: RawHandle) -> Result<(), NativeError>;

    /// Allocates a `std::vector<DMatch>` holding a copy of `data`.
    fn vector_dmatch_new(&self, data: &[DMatch]) -> Result<RawHandle, NativeError>;

    /// Copies the contents of a `std::vector<DMatch>`.
    fn vector_dmatch_to_vec(&self, vec: RawHandle) -> Result<Vec<DMatch>, NativeError>;

    /// Releases a `std::vector<DMatch>`.
    fn vector_dmatch_delete(&self, vec: RawHandle) -> Result<(), NativeError>;

    /// Allocates a `std::vector<uchar>` holding a copy of `data`.
    fn vector_uchar_new(&self, data: &[u8]) -> Result<RawHandle, NativeError>;

    /// Copies the contents of a `std::vector<uchar>`.
    fn vector_uchar_to_vec(&self, vec: RawHandle) -> Result<Vec<u8>, NativeError>;

    /// Releases a `std::vector<uchar>`.
    fn vector_uchar_delete(&self, vec: RawHandle) -> Result<(), NativeError>;

    /// Allocates an empty `std::vector<CameraParams>`.
    fn vector_camera_params_new(&self) -> Result<RawHandle, NativeError>;

    /// Number of elements of a `std::vector<CameraParams>`.
    fn vector_camera_params_size(&self, vec: RawHandle) -> Result<usize, NativeError>;

    /// Copies every element into `dst`, whose `r` and `t` handles must point
    /// at caller-allocated matrices. `dst.len()` must equal the vector size.
    fn vector_camera_params_get_elements(
        &self,
        vec: RawHandle,
        dst: &mut [WCameraParams],
    ) -> Result<(), NativeError>;

    /// Releases a `std::vector<CameraParams>`.
    fn vector_camera_params_delete(&self, vec: RawHandle) -> Result<(), NativeError>;

    /// Allocates an empty `std::vector<MatchesInfo>`.
    fn vector_matches_info_new(&self) -> Result<RawHandle, NativeError>;

    /// Number of elements of a `std::vector<MatchesInfo>`.
    fn vector_matches_info_size(&self, vec: RawHandle) -> Result<usize, NativeError>;

    /// Copies every element into `dst`, whose `matches`, `inliers_mask` and
    /// `h` handles must point at caller-allocated objects.
    fn vector_matches_info_get_elements(
        &self,
        vec: RawHandle,
        dst: &mut [WMatchesInfo],
    ) -> Result<(), NativeError>;

    /// Releases a `std::vector<MatchesInfo>`.
    fn vector_matches_info_delete(&self, vec: RawHandle) -> Result<(), NativeError>;

    /// Creates a homography based rotation estimator.
    fn homography_based_estimator_new(
        &self,
        is_focals_estimated: bool,
    ) -> Result<RawHandle, NativeError>;

    /// Destroys a homography based rotation estimator.
    fn homography_based_estimator_delete(&self, obj: RawHandle) -> Result<(), NativeError>;

    /// Estimates camera parameters.
    ///
    /// `cameras` is the (possibly empty) seed; the estimated cameras are
    /// written into the `std::vector<CameraParams>` behind `out_cameras`.
    /// Returns the estimator's own success flag.
    fn estimator_apply(
        &self,
        obj: RawHandle,
        features: &[WImageFeatures],
        pairwise_matches: &[WMatchesInfo],
        cameras: &[WCameraParams],
        out_cameras: RawHandle,
    ) -> Result<bool, NativeError>;

    /// Creates a best-of-2-nearest features matcher.
    fn best_of2_nearest_matcher_new(
        &self,
        config: &BestOf2NearestMatcherConfig,
    ) -> Result<RawHandle, NativeError>;

    /// Destroys a best-of-2-nearest features matcher.
    fn best_of2_nearest_matcher_delete(&self, obj: RawHandle) -> Result<(), NativeError>;

    /// Matches two feature sets.
    ///
    /// The scalars of `out` are overwritten; its `matches`, `inliers_mask`
    /// and `h` handles must point at caller-allocated objects that receive
    /// the results.
    fn features_matcher_apply(
        &self,
        obj: RawHandle,
        features1: &WImageFeatures,
        features2: &WImageFeatures,
        out: &mut WMatchesInfo,
    ) -> Result<(), NativeError>;

    /// Matches every pair of feature sets into the `std::vector<MatchesInfo>`
    /// behind `out_matches`.
    fn features_matcher_apply2(
        &self,
        obj: RawHandle,
        features: &[WImageFeatures],
        out_matches: RawHandle,
    ) -> Result<(), NativeError>;

    /// Frees unused memory allocated by the matcher.
    fn features_matcher_collect_garbage(&self, obj: RawHandle) -> Result<(), NativeError>;
}
