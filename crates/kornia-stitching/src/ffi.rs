//! Fixed-layout records crossing the native call boundary.
//!
//! The records are transient views: they carry raw handles but own none of
//! them. Which side owns a handle depends on the call, and is stated on each
//! field. Field order and size must match the native ABI byte for byte.

use std::ffi::c_void;
use std::ptr;

use crate::error::NativeError;
use crate::types::ImageSize;

/// Opaque pointer-sized handle to a native object.
pub type RawHandle = *mut c_void;

/// Status returned by every native entry point that may raise.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionStatus(pub i32);

impl ExceptionStatus {
    /// No exception occurred.
    pub const NOT_OCCURRED: Self = Self(0);
    /// An exception was raised and caught inside the native wrapper.
    pub const OCCURRED: Self = Self(1);

    /// Converts the status into a result, naming the entry point on failure.
    pub fn into_result(self, call: &'static str) -> Result<(), NativeError> {
        if self == Self::NOT_OCCURRED {
            Ok(())
        } else {
            Err(NativeError::new(
                call,
                self.0,
                "an exception was raised in the native library",
            ))
        }
    }
}

/// Interop view of an image features record.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WImageFeatures {
    /// Index of the image.
    pub img_idx: i32,
    /// Size of the image.
    pub img_size: ImageSize,
    /// `std::vector<KeyPoint>*`, a transient proxy released at the end of the call.
    pub keypoints: RawHandle,
    /// `cv::Mat*`, borrowed from the caller's descriptors.
    pub descriptors: RawHandle,
}

/// Interop view of a pairwise matches record.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WMatchesInfo {
    /// Index of the source image.
    pub src_img_idx: i32,
    /// Index of the destination image.
    pub dst_img_idx: i32,
    /// `std::vector<DMatch>*`, a transient proxy.
    pub matches: RawHandle,
    /// `std::vector<uchar>*`, a transient proxy.
    pub inliers_mask: RawHandle,
    /// Number of geometrically consistent matches.
    pub num_inliers: i32,
    /// `cv::Mat*`, borrowed on input and caller-allocated on output.
    pub h: RawHandle,
    /// Confidence that the two images are from the same panorama.
    pub confidence: f64,
}

impl WMatchesInfo {
    /// A record with zeroed scalars pointing at the given destination handles.
    pub fn with_outputs(matches: RawHandle, inliers_mask: RawHandle, h: RawHandle) -> Self {
        Self {
            src_img_idx: 0,
            dst_img_idx: 0,
            matches,
            inliers_mask,
            num_inliers: 0,
            h,
            confidence: 0.0,
        }
    }
}

/// Interop view of a camera parameters record.
///
/// Scalars first, handles last.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WCameraParams {
    /// Focal length.
    pub focal: f64,
    /// Aspect ratio.
    pub aspect: f64,
    /// Principal point x.
    pub ppx: f64,
    /// Principal point y.
    pub ppy: f64,
    /// `cv::Mat*` rotation. Borrowed on input, caller-allocated on output.
    pub r: RawHandle,
    /// `cv::Mat*` translation. Borrowed on input, caller-allocated on output.
    pub t: RawHandle,
}

impl WCameraParams {
    /// A record with zeroed scalars pointing at the given destination matrices.
    pub fn with_outputs(r: RawHandle, t: RawHandle) -> Self {
        Self {
            focal: 0.0,
            aspect: 0.0,
            ppx: 0.0,
            ppy: 0.0,
            r,
            t,
        }
    }
}

impl Default for WCameraParams {
    fn default() -> Self {
        Self::with_outputs(ptr::null_mut(), ptr::null_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_status_into_result() {
        assert!(ExceptionStatus::NOT_OCCURRED.into_result("f").is_ok());
        let err = ExceptionStatus::OCCURRED.into_result("f").unwrap_err();
        assert_eq!(err.code, 1);
        assert_eq!(err.call, "f");
        let err = ExceptionStatus(3).into_result("g").unwrap_err();
        assert_eq!(err.code, 3);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn interop_layouts() {
        use std::mem::{offset_of, size_of};

        assert_eq!(size_of::<WImageFeatures>(), 32);
        assert_eq!(offset_of!(WImageFeatures, img_size), 4);
        assert_eq!(offset_of!(WImageFeatures, keypoints), 16);
        assert_eq!(offset_of!(WImageFeatures, descriptors), 24);

        assert_eq!(size_of::<WMatchesInfo>(), 48);
        assert_eq!(offset_of!(WMatchesInfo, matches), 8);
        assert_eq!(offset_of!(WMatchesInfo, inliers_mask), 16);
        assert_eq!(offset_of!(WMatchesInfo, num_inliers), 24);
        assert_eq!(offset_of!(WMatchesInfo, h), 32);
        assert_eq!(offset_of!(WMatchesInfo, confidence), 40);

        assert_eq!(size_of::<WCameraParams>(), 48);
        assert_eq!(offset_of!(WCameraParams, r), 32);
        assert_eq!(offset_of!(WCameraParams, t), 40);
    }
}
