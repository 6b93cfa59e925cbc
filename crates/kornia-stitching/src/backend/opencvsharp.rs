//! Bindings to the `OpenCvSharpExtern` C ABI.

use std::ptr;

use crate::{
    backend::NativeBackend,
    error::NativeError,
    ffi::{ExceptionStatus, RawHandle, WCameraParams, WImageFeatures, WMatchesInfo},
    mat::MatData,
    matcher::BestOf2NearestMatcherConfig,
    types::{DMatch, KeyPoint},
};

const CV_32FC1: i32 = 5;
const CV_64FC1: i32 = 6;

/// Status used when an entry point without exception status returns null.
const STATUS_NULL_HANDLE: i32 = -1;
/// Status used for arguments rejected before reaching the library.
const STATUS_INVALID_ARGUMENT: i32 = -5;

#[link(name = "OpenCvSharpExtern")]
extern "C" {
    fn core_Mat_new1(out: *mut RawHandle) -> ExceptionStatus;
    fn core_Mat_new2(rows: i32, cols: i32, mat_type: i32, out: *mut RawHandle) -> ExceptionStatus;
    fn core_Mat_delete(mat: RawHandle) -> ExceptionStatus;
    fn core_Mat_rows(mat: RawHandle, out: *mut i32) -> ExceptionStatus;
    fn core_Mat_cols(mat: RawHandle, out: *mut i32) -> ExceptionStatus;
    fn core_Mat_type(mat: RawHandle, out: *mut i32) -> ExceptionStatus;
    fn core_Mat_ptr1d(mat: RawHandle, i0: i32, out: *mut *mut u8) -> ExceptionStatus;

    fn vector_KeyPoint_new3(data: *const KeyPoint, len: usize) -> RawHandle;
    fn vector_KeyPoint_getSize(vec: RawHandle) -> usize;
    fn vector_KeyPoint_getPointer(vec: RawHandle) -> *const KeyPoint;
    fn vector_KeyPoint_delete(vec: RawHandle);

    fn vector_DMatch_new3(data: *const DMatch, len: usize) -> RawHandle;
    fn vector_DMatch_getSize(vec: RawHandle) -> usize;
    fn vector_DMatch_getPointer(vec: RawHandle) -> *const DMatch;
    fn vector_DMatch_delete(vec: RawHandle);

    fn vector_uchar_new3(data: *const u8, len: usize) -> RawHandle;
    fn vector_uchar_getSize(vec: RawHandle) -> usize;
    fn vector_uchar_getPointer(vec: RawHandle) -> *const u8;
    fn vector_uchar_delete(vec: RawHandle);

    fn vector_CameraParams_new1() -> RawHandle;
    fn vector_CameraParams_getSize(vec: RawHandle) -> usize;
    fn vector_CameraParams_getElements(vec: RawHandle, dst: *mut WCameraParams) -> ExceptionStatus;
    fn vector_CameraParams_delete(vec: RawHandle);

    fn vector_MatchesInfo_new1() -> RawHandle;
    fn vector_MatchesInfo_getSize(vec: RawHandle) -> usize;
    fn vector_MatchesInfo_getElements(vec: RawHandle, dst: *mut WMatchesInfo) -> ExceptionStatus;
    fn vector_MatchesInfo_delete(vec: RawHandle);

    fn stitching_HomographyBasedEstimator_new(
        is_focals_estimated: bool,
        out: *mut RawHandle,
    ) -> ExceptionStatus;
    fn stitching_HomographyBasedEstimator_delete(obj: RawHandle) -> ExceptionStatus;
    #[allow(clippy::too_many_arguments)]
    fn stitching_Estimator_apply(
        obj: RawHandle,
        features: *const WImageFeatures,
        features_size: i32,
        pairwise_matches: *const WMatchesInfo,
        pairwise_matches_size: i32,
        cameras: *const WCameraParams,
        cameras_size: i32,
        out_cameras: RawHandle,
        out_ret: *mut bool,
    ) -> ExceptionStatus;

    fn stitching_BestOf2NearestMatcher_new(
        try_use_gpu: bool,
        match_conf: f32,
        num_matches_thresh1: i32,
        num_matches_thresh2: i32,
        out: *mut RawHandle,
    ) -> ExceptionStatus;
    fn stitching_BestOf2NearestMatcher_delete(obj: RawHandle) -> ExceptionStatus;
    #[allow(clippy::too_many_arguments)]
    fn stitching_FeaturesMatcher_apply(
        obj: RawHandle,
        features1: *const WImageFeatures,
        features2: *const WImageFeatures,
        out_src_img_idx: *mut i32,
        out_dst_img_idx: *mut i32,
        out_matches: RawHandle,
        out_inliers_mask: RawHandle,
        out_num_inliers: *mut i32,
        out_h: RawHandle,
        out_confidence: *mut f64,
    ) -> ExceptionStatus;
    fn stitching_FeaturesMatcher_apply2(
        obj: RawHandle,
        features: *const WImageFeatures,
        features_size: i32,
        out_matches: RawHandle,
    ) -> ExceptionStatus;
    fn stitching_FeaturesMatcher_collectGarbage(obj: RawHandle) -> ExceptionStatus;
}

fn non_null(call: &'static str, handle: RawHandle) -> Result<RawHandle, NativeError> {
    if handle.is_null() {
        Err(NativeError::new(
            call,
            STATUS_NULL_HANDLE,
            "the native library returned a null handle",
        ))
    } else {
        Ok(handle)
    }
}

fn array_len(call: &'static str, len: usize) -> Result<i32, NativeError> {
    i32::try_from(len).map_err(|_| {
        NativeError::new(
            call,
            STATUS_INVALID_ARGUMENT,
            format!("array of {len} elements is too large"),
        )
    })
}

/// Copies `len` elements starting at `data`.
///
/// # Safety
///
/// `data` must point at `len` initialized elements when `len > 0`.
unsafe fn copy_elements<T: Copy>(data: *const T, len: usize) -> Vec<T> {
    if len == 0 || data.is_null() {
        return Vec::new();
    }
    std::slice::from_raw_parts(data, len).to_vec()
}

/// A [`NativeBackend`] calling into the `OpenCvSharpExtern` shared library.
///
/// Matrices are created as single channel `CV_64F`; `CV_32F` matrices
/// produced by the library are widened when read back.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCvSharpBackend;

impl OpenCvSharpBackend {
    /// Creates a new backend.
    pub fn new() -> Self {
        Self
    }
}

impl NativeBackend for OpenCvSharpBackend {
    fn mat_new(&self) -> Result<RawHandle, NativeError> {
        let mut out = ptr::null_mut();
        unsafe { core_Mat_new1(&mut out) }.into_result("core_Mat_new1")?;
        non_null("core_Mat_new1", out)
    }

    fn mat_from_data(&self, data: &MatData) -> Result<RawHandle, NativeError> {
        // the row copies below trust the shape
        if !data.is_consistent() {
            return Err(NativeError::new(
                "core_Mat_new2",
                STATUS_INVALID_ARGUMENT,
                format!(
                    "{} elements do not fill a {}x{} matrix",
                    data.data.len(),
                    data.rows,
                    data.cols
                ),
            ));
        }
        let rows = array_len("core_Mat_new2", data.rows)?;
        let cols = array_len("core_Mat_new2", data.cols)?;
        let mut out = ptr::null_mut();
        unsafe { core_Mat_new2(rows, cols, CV_64FC1, &mut out) }.into_result("core_Mat_new2")?;
        let mat = non_null("core_Mat_new2", out)?;

        for (i, row) in data.data.chunks_exact(data.cols.max(1)).enumerate() {
            let mut dst = ptr::null_mut();
            let status = unsafe { core_Mat_ptr1d(mat, i as i32, &mut dst) };
            if let Err(e) = status.into_result("core_Mat_ptr1d") {
                let _ = unsafe { core_Mat_delete(mat) };
                return Err(e);
            }
            // SAFETY: each row of a CV_64FC1 matrix holds `cols` f64 values.
            unsafe { ptr::copy_nonoverlapping(row.as_ptr(), dst as *mut f64, row.len()) };
        }
        Ok(mat)
    }

    fn mat_data(&self, mat: RawHandle) -> Result<MatData, NativeError> {
        let (mut rows, mut cols, mut mat_type) = (0, 0, 0);
        unsafe {
            core_Mat_rows(mat, &mut rows).into_result("core_Mat_rows")?;
            core_Mat_cols(mat, &mut cols).into_result("core_Mat_cols")?;
            core_Mat_type(mat, &mut mat_type).into_result("core_Mat_type")?;
        }
        let (rows, cols) = (rows.max(0) as usize, cols.max(0) as usize);

        let len = rows.checked_mul(cols).ok_or_else(|| {
            NativeError::new(
                "core_Mat_data",
                STATUS_INVALID_ARGUMENT,
                format!("matrix shape {rows}x{cols} is too large"),
            )
        })?;
        let mut data = Vec::with_capacity(len);
        for i in 0..rows {
            let mut src = ptr::null_mut();
            unsafe { core_Mat_ptr1d(mat, i as i32, &mut src) }.into_result("core_Mat_ptr1d")?;
            // SAFETY: the row holds `cols` elements of the matrix type.
            match mat_type {
                CV_64FC1 => data.extend(unsafe { copy_elements(src as *const f64, cols) }),
                CV_32FC1 => data.extend(
                    unsafe { copy_elements(src as *const f32, cols) }
                        .into_iter()
                        .map(f64::from),
                ),
                other => {
                    return Err(NativeError::new(
                        "core_Mat_type",
                        STATUS_INVALID_ARGUMENT,
                        format!("unsupported matrix type {other}"),
                    ))
                }
            }
        }
        Ok(MatData { rows, cols, data })
    }

    fn mat_delete(&self, mat: RawHandle) -> Result<(), NativeError> {
        unsafe { core_Mat_delete(mat) }.into_result("core_Mat_delete")
    }

    fn vector_keypoint_new(&self, data: &[KeyPoint]) -> Result<RawHandle, NativeError> {
        non_null("vector_KeyPoint_new3", unsafe {
            vector_KeyPoint_new3(data.as_ptr(), data.len())
        })
    }

    fn vector_keypoint_to_vec(&self, vec: RawHandle) -> Result<Vec<KeyPoint>, NativeError> {
        Ok(unsafe { copy_elements(vector_KeyPoint_getPointer(vec), vector_KeyPoint_getSize(vec)) })
    }

    fn vector_keypoint_delete(&self, vec: RawHandle) -> Result<(), NativeError> {
        unsafe { vector_KeyPoint_delete(vec) };
        Ok(())
    }

    fn vector_dmatch_new(&self, data: &[DMatch]) -> Result<RawHandle, NativeError> {
        non_null("vector_DMatch_new3", unsafe {
            vector_DMatch_new3(data.as_ptr(), data.len())
        })
    }

    fn vector_dmatch_to_vec(&self, vec: RawHandle) -> Result<Vec<DMatch>, NativeError> {
        Ok(unsafe { copy_elements(vector_DMatch_getPointer(vec), vector_DMatch_getSize(vec)) })
    }

    fn vector_dmatch_delete(&self, vec: RawHandle) -> Result<(), NativeError> {
        unsafe { vector_DMatch_delete(vec) };
        Ok(())
    }

    fn vector_uchar_new(&self, data: &[u8]) -> Result<RawHandle, NativeError> {
        non_null("vector_uchar_new3", unsafe {
            vector_uchar_new3(data.as_ptr(), data.len())
        })
    }

    fn vector_uchar_to_vec(&self, vec: RawHandle) -> Result<Vec<u8>, NativeError> {
        Ok(unsafe { copy_elements(vector_uchar_getPointer(vec), vector_uchar_getSize(vec)) })
    }

    fn vector_uchar_delete(&self, vec: RawHandle) -> Result<(), NativeError> {
        unsafe { vector_uchar_delete(vec) };
        Ok(())
    }

    fn vector_camera_params_new(&self) -> Result<RawHandle, NativeError> {
        non_null("vector_CameraParams_new1", unsafe { vector_CameraParams_new1() })
    }

    fn vector_camera_params_size(&self, vec: RawHandle) -> Result<usize, NativeError> {
        Ok(unsafe { vector_CameraParams_getSize(vec) })
    }

    fn vector_camera_params_get_elements(
        &self,
        vec: RawHandle,
        dst: &mut [WCameraParams],
    ) -> Result<(), NativeError> {
        const CALL: &str = "vector_CameraParams_getElements";
        let size = unsafe { vector_CameraParams_getSize(vec) };
        if size != dst.len() {
            return Err(NativeError::new(
                CALL,
                STATUS_INVALID_ARGUMENT,
                format!("vector holds {size} cameras, destination has {}", dst.len()),
            ));
        }
        unsafe { vector_CameraParams_getElements(vec, dst.as_mut_ptr()) }.into_result(CALL)
    }

    fn vector_camera_params_delete(&self, vec: RawHandle) -> Result<(), NativeError> {
        unsafe { vector_CameraParams_delete(vec) };
        Ok(())
    }

    fn vector_matches_info_new(&self) -> Result<RawHandle, NativeError> {
        non_null("vector_MatchesInfo_new1", unsafe { vector_MatchesInfo_new1() })
    }

    fn vector_matches_info_size(&self, vec: RawHandle) -> Result<usize, NativeError> {
        Ok(unsafe { vector_MatchesInfo_getSize(vec) })
    }

    fn vector_matches_info_get_elements(
        &self,
        vec: RawHandle,
        dst: &mut [WMatchesInfo],
    ) -> Result<(), NativeError> {
        const CALL: &str = "vector_MatchesInfo_getElements";
        let size = unsafe { vector_MatchesInfo_getSize(vec) };
        if size != dst.len() {
            return Err(NativeError::new(
                CALL,
                STATUS_INVALID_ARGUMENT,
                format!("vector holds {size} records, destination has {}", dst.len()),
            ));
        }
        unsafe { vector_MatchesInfo_getElements(vec, dst.as_mut_ptr()) }.into_result(CALL)
    }

    fn vector_matches_info_delete(&self, vec: RawHandle) -> Result<(), NativeError> {
        unsafe { vector_MatchesInfo_delete(vec) };
        Ok(())
    }

    fn homography_based_estimator_new(
        &self,
        is_focals_estimated: bool,
    ) -> Result<RawHandle, NativeError> {
        const CALL: &str = "stitching_HomographyBasedEstimator_new";
        let mut out = ptr::null_mut();
        unsafe { stitching_HomographyBasedEstimator_new(is_focals_estimated, &mut out) }
            .into_result(CALL)?;
        non_null(CALL, out)
    }

    fn homography_based_estimator_delete(&self, obj: RawHandle) -> Result<(), NativeError> {
        unsafe { stitching_HomographyBasedEstimator_delete(obj) }
            .into_result("stitching_HomographyBasedEstimator_delete")
    }

    fn estimator_apply(
        &self,
        obj: RawHandle,
        features: &[WImageFeatures],
        pairwise_matches: &[WMatchesInfo],
        cameras: &[WCameraParams],
        out_cameras: RawHandle,
    ) -> Result<bool, NativeError> {
        const CALL: &str = "stitching_Estimator_apply";
        let mut ret = false;
        unsafe {
            stitching_Estimator_apply(
                obj,
                features.as_ptr(),
                array_len(CALL, features.len())?,
                pairwise_matches.as_ptr(),
                array_len(CALL, pairwise_matches.len())?,
                cameras.as_ptr(),
                array_len(CALL, cameras.len())?,
                out_cameras,
                &mut ret,
            )
        }
        .into_result(CALL)?;
        Ok(ret)
    }

    fn best_of2_nearest_matcher_new(
        &self,
        config: &BestOf2NearestMatcherConfig,
    ) -> Result<RawHandle, NativeError> {
        const CALL: &str = "stitching_BestOf2NearestMatcher_new";
        let mut out = ptr::null_mut();
        unsafe {
            stitching_BestOf2NearestMatcher_new(
                config.try_use_gpu,
                config.match_conf,
                config.num_matches_thresh1,
                config.num_matches_thresh2,
                &mut out,
            )
        }
        .into_result(CALL)?;
        non_null(CALL, out)
    }

    fn best_of2_nearest_matcher_delete(&self, obj: RawHandle) -> Result<(), NativeError> {
        unsafe { stitching_BestOf2NearestMatcher_delete(obj) }
            .into_result("stitching_BestOf2NearestMatcher_delete")
    }

    fn features_matcher_apply(
        &self,
        obj: RawHandle,
        features1: &WImageFeatures,
        features2: &WImageFeatures,
        out: &mut WMatchesInfo,
    ) -> Result<(), NativeError> {
        unsafe {
            stitching_FeaturesMatcher_apply(
                obj,
                features1,
                features2,
                &mut out.src_img_idx,
                &mut out.dst_img_idx,
                out.matches,
                out.inliers_mask,
                &mut out.num_inliers,
                out.h,
                &mut out.confidence,
            )
        }
        .into_result("stitching_FeaturesMatcher_apply")
    }

    fn features_matcher_apply2(
        &self,
        obj: RawHandle,
        features: &[WImageFeatures],
        out_matches: RawHandle,
    ) -> Result<(), NativeError> {
        const CALL: &str = "stitching_FeaturesMatcher_apply2";
        unsafe {
            stitching_FeaturesMatcher_apply2(
                obj,
                features.as_ptr(),
                array_len(CALL, features.len())?,
                out_matches,
            )
        }
        .into_result(CALL)
    }

    fn features_matcher_collect_garbage(&self, obj: RawHandle) -> Result<(), NativeError> {
        unsafe { stitching_FeaturesMatcher_collectGarbage(obj) }
            .into_result("stitching_FeaturesMatcher_collectGarbage")
    }
}
