//! A native backend living entirely in process memory.
//!
//! Every native object is an entry of a handle table. The backend keeps
//! allocation and release counters per resource kind, remembers released
//! handles to detect double releases and use-after-release, and can be told
//! to fail allocations. The estimation and matching entry points run
//! user-provided callbacks on copies of the marshalled inputs; without a
//! callback they echo their inputs.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};

use crate::{
    backend::NativeBackend,
    error::NativeError,
    ffi::{RawHandle, WCameraParams, WImageFeatures, WMatchesInfo},
    mat::MatData,
    matcher::BestOf2NearestMatcherConfig,
    types::{DMatch, ImageSize, KeyPoint},
};

/// Status code for a handle that does not name a live object of the expected kind.
pub const STATUS_INVALID_HANDLE: i32 = -2;
/// Status code for a handle released twice.
pub const STATUS_DOUBLE_RELEASE: i32 = -3;
/// Status code for a failed allocation.
pub const STATUS_OUT_OF_MEMORY: i32 = -4;
/// Status code for a destination array whose length does not match the source.
pub const STATUS_SIZE_MISMATCH: i32 = -5;

/// Kinds of native objects tracked by the [`MemoryBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `cv::Mat`
    Mat,
    /// `std::vector<KeyPoint>`
    KeyPointVector,
    /// `std::vector<DMatch>`
    DMatchVector,
    /// `std::vector<uchar>`
    ByteVector,
    /// `std::vector<CameraParams>`
    CameraParamsVector,
    /// `std::vector<MatchesInfo>`
    MatchesInfoVector,
    /// Rotation estimator
    Estimator,
    /// Features matcher
    Matcher,
}

/// Allocation and release counters of a [`MemoryBackend`].
#[derive(Debug, Clone, Default)]
pub struct ResourceStats {
    allocated: HashMap<ResourceKind, usize>,
    released: HashMap<ResourceKind, usize>,
    double_releases: usize,
}

impl ResourceStats {
    /// Number of objects of `kind` allocated so far.
    pub fn allocated(&self, kind: ResourceKind) -> usize {
        self.allocated.get(&kind).copied().unwrap_or(0)
    }

    /// Number of objects of `kind` released so far.
    pub fn released(&self, kind: ResourceKind) -> usize {
        self.released.get(&kind).copied().unwrap_or(0)
    }

    /// Number of objects of `kind` currently alive.
    pub fn live(&self, kind: ResourceKind) -> usize {
        self.allocated(kind) - self.released(kind)
    }

    /// Number of objects of any kind currently alive.
    pub fn total_live(&self) -> usize {
        self.allocated.values().sum::<usize>() - self.released.values().sum::<usize>()
    }

    /// Number of attempts to release an already released handle.
    pub fn double_releases(&self) -> usize {
        self.double_releases
    }
}

/// Copy of a marshalled features record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturesData {
    /// Index of the image.
    pub img_idx: i32,
    /// Size of the image.
    pub img_size: ImageSize,
    /// Keypoints read from the keypoint proxy.
    pub keypoints: Vec<KeyPoint>,
    /// Contents of the descriptor matrix.
    pub descriptors: MatData,
}

/// Copy of a marshalled matches record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchesData {
    /// Index of the source image.
    pub src_img_idx: i32,
    /// Index of the destination image.
    pub dst_img_idx: i32,
    /// Correspondences.
    pub matches: Vec<DMatch>,
    /// Inliers mask.
    pub inliers_mask: Vec<u8>,
    /// Number of inliers.
    pub num_inliers: i32,
    /// Contents of the homography matrix.
    pub h: MatData,
    /// Confidence.
    pub confidence: f64,
}

impl MatchesData {
    /// A record with no matches between unknown images.
    pub fn empty() -> Self {
        Self {
            src_img_idx: -1,
            dst_img_idx: -1,
            matches: Vec::new(),
            inliers_mask: Vec::new(),
            num_inliers: 0,
            h: MatData::empty(),
            confidence: 0.0,
        }
    }
}

/// Copy of a camera parameters record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraData {
    /// Focal length.
    pub focal: f64,
    /// Aspect ratio.
    pub aspect: f64,
    /// Principal point x.
    pub ppx: f64,
    /// Principal point y.
    pub ppy: f64,
    /// Rotation.
    pub r: MatData,
    /// Translation.
    pub t: MatData,
}

fn eye3() -> MatData {
    MatData {
        rows: 3,
        cols: 3,
        data: vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    }
}

impl CameraData {
    /// Unit focal and aspect, identity rotation and zero translation.
    pub fn identity() -> Self {
        Self {
            focal: 1.0,
            aspect: 1.0,
            ppx: 0.0,
            ppy: 0.0,
            r: eye3(),
            t: MatData {
                rows: 3,
                cols: 1,
                data: vec![0.0; 3],
            },
        }
    }
}

/// Inputs of one estimation call, as seen by the native side.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateRequest {
    /// Configuration of the estimator.
    pub is_focals_estimated: bool,
    /// Features of the images.
    pub features: Vec<FeaturesData>,
    /// Pairwise matches.
    pub pairwise_matches: Vec<MatchesData>,
    /// Seed cameras.
    pub cameras: Vec<CameraData>,
}

/// Outputs of one estimation call.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateResponse {
    /// Success flag returned to the caller.
    pub success: bool,
    /// Cameras written into the output vector.
    pub cameras: Vec<CameraData>,
}

/// Callback standing in for the native estimation algorithm.
pub type EstimateFn =
    Arc<dyn Fn(&EstimateRequest) -> Result<EstimateResponse, NativeError> + Send + Sync>;

/// Callback standing in for the native matching algorithm.
pub type MatchFn =
    Arc<dyn Fn(&FeaturesData, &FeaturesData) -> Result<MatchesData, NativeError> + Send + Sync>;

enum Object {
    Mat(MatData),
    KeyPoints(Vec<KeyPoint>),
    DMatches(Vec<DMatch>),
    Bytes(Vec<u8>),
    CameraParams(Vec<CameraData>),
    MatchesInfo(Vec<MatchesData>),
    Estimator { is_focals_estimated: bool },
    Matcher,
}

impl Object {
    fn kind(&self) -> ResourceKind {
        match self {
            Object::Mat(_) => ResourceKind::Mat,
            Object::KeyPoints(_) => ResourceKind::KeyPointVector,
            Object::DMatches(_) => ResourceKind::DMatchVector,
            Object::Bytes(_) => ResourceKind::ByteVector,
            Object::CameraParams(_) => ResourceKind::CameraParamsVector,
            Object::MatchesInfo(_) => ResourceKind::MatchesInfoVector,
            Object::Estimator { .. } => ResourceKind::Estimator,
            Object::Matcher => ResourceKind::Matcher,
        }
    }
}

#[derive(Default)]
struct State {
    next_id: usize,
    objects: HashMap<usize, Object>,
    released: HashSet<usize>,
    stats: ResourceStats,
    allocations_left: Option<usize>,
    estimate_fn: Option<EstimateFn>,
    match_fn: Option<MatchFn>,
}

fn handle_id(handle: RawHandle) -> usize {
    handle as usize
}

fn kind_mismatch(
    call: &'static str,
    id: usize,
    found: ResourceKind,
    expected: ResourceKind,
) -> NativeError {
    NativeError::new(
        call,
        STATUS_INVALID_HANDLE,
        format!("handle {id} is a {found:?}, expected a {expected:?}"),
    )
}

impl State {
    fn alloc(&mut self, call: &'static str, object: Object) -> Result<RawHandle, NativeError> {
        if let Some(left) = self.allocations_left.as_mut() {
            if *left == 0 {
                return Err(NativeError::new(
                    call,
                    STATUS_OUT_OF_MEMORY,
                    "insufficient memory",
                ));
            }
            *left -= 1;
        }
        self.next_id += 1;
        let id = self.next_id;
        *self.stats.allocated.entry(object.kind()).or_default() += 1;
        self.objects.insert(id, object);
        Ok(id as RawHandle)
    }

    fn release(
        &mut self,
        call: &'static str,
        handle: RawHandle,
        kind: ResourceKind,
    ) -> Result<(), NativeError> {
        let id = handle_id(handle);
        match self.objects.get(&id).map(Object::kind) {
            Some(found) if found == kind => {
                self.objects.remove(&id);
                self.released.insert(id);
                *self.stats.released.entry(kind).or_default() += 1;
                Ok(())
            }
            Some(found) => Err(kind_mismatch(call, id, found, kind)),
            None if self.released.contains(&id) => {
                self.stats.double_releases += 1;
                Err(NativeError::new(
                    call,
                    STATUS_DOUBLE_RELEASE,
                    format!("handle {id} was already released"),
                ))
            }
            None => Err(NativeError::new(
                call,
                STATUS_INVALID_HANDLE,
                format!("unknown handle {id}"),
            )),
        }
    }

    fn get(&self, call: &'static str, handle: RawHandle) -> Result<&Object, NativeError> {
        let id = handle_id(handle);
        self.objects.get(&id).ok_or_else(|| {
            let reason = if self.released.contains(&id) {
                "use of released handle"
            } else {
                "unknown handle"
            };
            NativeError::new(call, STATUS_INVALID_HANDLE, format!("{reason} {id}"))
        })
    }

    fn get_mut(
        &mut self,
        call: &'static str,
        handle: RawHandle,
    ) -> Result<&mut Object, NativeError> {
        let id = handle_id(handle);
        let released = self.released.contains(&id);
        self.objects.get_mut(&id).ok_or_else(|| {
            let reason = if released {
                "use of released handle"
            } else {
                "unknown handle"
            };
            NativeError::new(call, STATUS_INVALID_HANDLE, format!("{reason} {id}"))
        })
    }

    fn mat(&self, call: &'static str, handle: RawHandle) -> Result<&MatData, NativeError> {
        match self.get(call, handle)? {
            Object::Mat(m) => Ok(m),
            other => Err(kind_mismatch(call, handle_id(handle), other.kind(), ResourceKind::Mat)),
        }
    }

    fn mat_mut(
        &mut self,
        call: &'static str,
        handle: RawHandle,
    ) -> Result<&mut MatData, NativeError> {
        match self.get_mut(call, handle)? {
            Object::Mat(m) => Ok(m),
            other => Err(kind_mismatch(call, handle_id(handle), other.kind(), ResourceKind::Mat)),
        }
    }

    fn keypoints(
        &self,
        call: &'static str,
        handle: RawHandle,
    ) -> Result<&Vec<KeyPoint>, NativeError> {
        match self.get(call, handle)? {
            Object::KeyPoints(v) => Ok(v),
            other => Err(kind_mismatch(
                call,
                handle_id(handle),
                other.kind(),
                ResourceKind::KeyPointVector,
            )),
        }
    }

    fn dmatches(&self, call: &'static str, handle: RawHandle) -> Result<&Vec<DMatch>, NativeError> {
        match self.get(call, handle)? {
            Object::DMatches(v) => Ok(v),
            other => Err(kind_mismatch(
                call,
                handle_id(handle),
                other.kind(),
                ResourceKind::DMatchVector,
            )),
        }
    }

    fn dmatches_mut(
        &mut self,
        call: &'static str,
        handle: RawHandle,
    ) -> Result<&mut Vec<DMatch>, NativeError> {
        match self.get_mut(call, handle)? {
            Object::DMatches(v) => Ok(v),
            other => Err(kind_mismatch(
                call,
                handle_id(handle),
                other.kind(),
                ResourceKind::DMatchVector,
            )),
        }
    }

    fn bytes(&self, call: &'static str, handle: RawHandle) -> Result<&Vec<u8>, NativeError> {
        match self.get(call, handle)? {
            Object::Bytes(v) => Ok(v),
            other => Err(kind_mismatch(
                call,
                handle_id(handle),
                other.kind(),
                ResourceKind::ByteVector,
            )),
        }
    }

    fn bytes_mut(
        &mut self,
        call: &'static str,
        handle: RawHandle,
    ) -> Result<&mut Vec<u8>, NativeError> {
        match self.get_mut(call, handle)? {
            Object::Bytes(v) => Ok(v),
            other => Err(kind_mismatch(
                call,
                handle_id(handle),
                other.kind(),
                ResourceKind::ByteVector,
            )),
        }
    }

    fn camera_params_mut(
        &mut self,
        call: &'static str,
        handle: RawHandle,
    ) -> Result<&mut Vec<CameraData>, NativeError> {
        match self.get_mut(call, handle)? {
            Object::CameraParams(v) => Ok(v),
            other => Err(kind_mismatch(
                call,
                handle_id(handle),
                other.kind(),
                ResourceKind::CameraParamsVector,
            )),
        }
    }

    fn matches_info_mut(
        &mut self,
        call: &'static str,
        handle: RawHandle,
    ) -> Result<&mut Vec<MatchesData>, NativeError> {
        match self.get_mut(call, handle)? {
            Object::MatchesInfo(v) => Ok(v),
            other => Err(kind_mismatch(
                call,
                handle_id(handle),
                other.kind(),
                ResourceKind::MatchesInfoVector,
            )),
        }
    }

    fn check_matcher(&self, call: &'static str, handle: RawHandle) -> Result<(), NativeError> {
        match self.get(call, handle)? {
            Object::Matcher => Ok(()),
            other => Err(kind_mismatch(
                call,
                handle_id(handle),
                other.kind(),
                ResourceKind::Matcher,
            )),
        }
    }

    fn features_data(
        &self,
        call: &'static str,
        record: &WImageFeatures,
    ) -> Result<FeaturesData, NativeError> {
        Ok(FeaturesData {
            img_idx: record.img_idx,
            img_size: record.img_size,
            keypoints: self.keypoints(call, record.keypoints)?.clone(),
            descriptors: self.mat(call, record.descriptors)?.clone(),
        })
    }

    fn matches_data(
        &self,
        call: &'static str,
        record: &WMatchesInfo,
    ) -> Result<MatchesData, NativeError> {
        Ok(MatchesData {
            src_img_idx: record.src_img_idx,
            dst_img_idx: record.dst_img_idx,
            matches: self.dmatches(call, record.matches)?.clone(),
            inliers_mask: self.bytes(call, record.inliers_mask)?.clone(),
            num_inliers: record.num_inliers,
            h: self.mat(call, record.h)?.clone(),
            confidence: record.confidence,
        })
    }

    fn camera_data(
        &self,
        call: &'static str,
        record: &WCameraParams,
    ) -> Result<CameraData, NativeError> {
        Ok(CameraData {
            focal: record.focal,
            aspect: record.aspect,
            ppx: record.ppx,
            ppy: record.ppy,
            r: self.mat(call, record.r)?.clone(),
            t: self.mat(call, record.t)?.clone(),
        })
    }

    /// Writes `data` into the caller-allocated destinations of `out`.
    fn write_matches(
        &mut self,
        call: &'static str,
        data: MatchesData,
        out: &mut WMatchesInfo,
    ) -> Result<(), NativeError> {
        *self.dmatches_mut(call, out.matches)? = data.matches;
        *self.bytes_mut(call, out.inliers_mask)? = data.inliers_mask;
        *self.mat_mut(call, out.h)? = data.h;
        out.src_img_idx = data.src_img_idx;
        out.dst_img_idx = data.dst_img_idx;
        out.num_inliers = data.num_inliers;
        out.confidence = data.confidence;
        Ok(())
    }
}

fn echo_estimate(request: &EstimateRequest) -> EstimateResponse {
    let cameras = if request.cameras.is_empty() {
        vec![CameraData::identity(); request.features.len()]
    } else {
        request.cameras.clone()
    };
    EstimateResponse {
        success: true,
        cameras,
    }
}

fn empty_match(features1: &FeaturesData, features2: &FeaturesData) -> MatchesData {
    MatchesData {
        src_img_idx: features1.img_idx,
        dst_img_idx: features2.img_idx,
        h: eye3(),
        ..MatchesData::empty()
    }
}

/// An in-process [`NativeBackend`] backed by a handle table.
///
/// Clones share the same table.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the callback run by [`NativeBackend::estimator_apply`].
    pub fn with_estimate_fn<F>(self, f: F) -> Self
    where
        F: Fn(&EstimateRequest) -> Result<EstimateResponse, NativeError> + Send + Sync + 'static,
    {
        self.lock().estimate_fn = Some(Arc::new(f));
        self
    }

    /// Sets the callback run by the features matcher entry points.
    pub fn with_match_fn<F>(self, f: F) -> Self
    where
        F: Fn(&FeaturesData, &FeaturesData) -> Result<MatchesData, NativeError>
            + Send
            + Sync
            + 'static,
    {
        self.lock().match_fn = Some(Arc::new(f));
        self
    }

    /// Lets the next `n` allocations succeed and fails every allocation after them.
    pub fn fail_allocations_after(&self, n: usize) {
        self.lock().allocations_left = Some(n);
    }

    /// Stops failing allocations.
    pub fn clear_allocation_failure(&self) {
        self.lock().allocations_left = None;
    }

    /// Returns a snapshot of the allocation counters.
    pub fn stats(&self) -> ResourceStats {
        self.lock().stats.clone()
    }

    /// Returns true if `handle` was allocated by this backend and has been released.
    pub fn is_released(&self, handle: RawHandle) -> bool {
        self.lock().released.contains(&handle_id(handle))
    }

    /// Returns true if `handle` names a live object.
    pub fn is_live(&self, handle: RawHandle) -> bool {
        self.lock().objects.contains_key(&handle_id(handle))
    }

    /// Appends cameras to a native `std::vector<CameraParams>`.
    pub fn push_camera_params(
        &self,
        vec: RawHandle,
        cameras: Vec<CameraData>,
    ) -> Result<(), NativeError> {
        self.lock()
            .camera_params_mut("vector_CameraParams_push", vec)?
            .extend(cameras);
        Ok(())
    }

    /// Appends records to a native `std::vector<MatchesInfo>`.
    pub fn push_matches_info(
        &self,
        vec: RawHandle,
        matches: Vec<MatchesData>,
    ) -> Result<(), NativeError> {
        self.lock()
            .matches_info_mut("vector_MatchesInfo_push", vec)?
            .extend(matches);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryBackend")
            .field("live", &state.objects.len())
            .field("released", &state.released.len())
            .finish()
    }
}

impl NativeBackend for MemoryBackend {
    fn mat_new(&self) -> Result<RawHandle, NativeError> {
        self.lock().alloc("core_Mat_new1", Object::Mat(MatData::empty()))
    }

    fn mat_from_data(&self, data: &MatData) -> Result<RawHandle, NativeError> {
        if !data.is_consistent() {
            return Err(NativeError::new(
                "core_Mat_new8",
                STATUS_SIZE_MISMATCH,
                "data length does not match the matrix shape",
            ));
        }
        self.lock().alloc("core_Mat_new8", Object::Mat(data.clone()))
    }

    fn mat_data(&self, mat: RawHandle) -> Result<MatData, NativeError> {
        self.lock().mat("core_Mat_data", mat).cloned()
    }

    fn mat_delete(&self, mat: RawHandle) -> Result<(), NativeError> {
        self.lock().release("core_Mat_delete", mat, ResourceKind::Mat)
    }

    fn vector_keypoint_new(&self, data: &[KeyPoint]) -> Result<RawHandle, NativeError> {
        self.lock()
            .alloc("vector_KeyPoint_new3", Object::KeyPoints(data.to_vec()))
    }

    fn vector_keypoint_to_vec(&self, vec: RawHandle) -> Result<Vec<KeyPoint>, NativeError> {
        self.lock().keypoints("vector_KeyPoint_getPointer", vec).cloned()
    }

    fn vector_keypoint_delete(&self, vec: RawHandle) -> Result<(), NativeError> {
        self.lock()
            .release("vector_KeyPoint_delete", vec, ResourceKind::KeyPointVector)
    }

    fn vector_dmatch_new(&self, data: &[DMatch]) -> Result<RawHandle, NativeError> {
        self.lock()
            .alloc("vector_DMatch_new3", Object::DMatches(data.to_vec()))
    }

    fn vector_dmatch_to_vec(&self, vec: RawHandle) -> Result<Vec<DMatch>, NativeError> {
        self.lock().dmatches("vector_DMatch_getPointer", vec).cloned()
    }

    fn vector_dmatch_delete(&self, vec: RawHandle) -> Result<(), NativeError> {
        self.lock()
            .release("vector_DMatch_delete", vec, ResourceKind::DMatchVector)
    }

    fn vector_uchar_new(&self, data: &[u8]) -> Result<RawHandle, NativeError> {
        self.lock()
            .alloc("vector_uchar_new3", Object::Bytes(data.to_vec()))
    }

    fn vector_uchar_to_vec(&self, vec: RawHandle) -> Result<Vec<u8>, NativeError> {
        self.lock().bytes("vector_uchar_getPointer", vec).cloned()
    }

    fn vector_uchar_delete(&self, vec: RawHandle) -> Result<(), NativeError> {
        self.lock()
            .release("vector_uchar_delete", vec, ResourceKind::ByteVector)
    }

    fn vector_camera_params_new(&self) -> Result<RawHandle, NativeError> {
        self.lock()
            .alloc("vector_CameraParams_new1", Object::CameraParams(Vec::new()))
    }

    fn vector_camera_params_size(&self, vec: RawHandle) -> Result<usize, NativeError> {
        Ok(self
            .lock()
            .camera_params_mut("vector_CameraParams_getSize", vec)?
            .len())
    }

    fn vector_camera_params_get_elements(
        &self,
        vec: RawHandle,
        dst: &mut [WCameraParams],
    ) -> Result<(), NativeError> {
        const CALL: &str = "vector_CameraParams_getElements";
        let mut state = self.lock();
        let cameras = state.camera_params_mut(CALL, vec)?.clone();
        if cameras.len() != dst.len() {
            return Err(NativeError::new(
                CALL,
                STATUS_SIZE_MISMATCH,
                format!("vector holds {} cameras, destination has {}", cameras.len(), dst.len()),
            ));
        }
        for (record, camera) in dst.iter_mut().zip(cameras) {
            *state.mat_mut(CALL, record.r)? = camera.r;
            *state.mat_mut(CALL, record.t)? = camera.t;
            record.focal = camera.focal;
            record.aspect = camera.aspect;
            record.ppx = camera.ppx;
            record.ppy = camera.ppy;
        }
        Ok(())
    }

    fn vector_camera_params_delete(&self, vec: RawHandle) -> Result<(), NativeError> {
        self.lock().release(
            "vector_CameraParams_delete",
            vec,
            ResourceKind::CameraParamsVector,
        )
    }

    fn vector_matches_info_new(&self) -> Result<RawHandle, NativeError> {
        self.lock()
            .alloc("vector_MatchesInfo_new1", Object::MatchesInfo(Vec::new()))
    }

    fn vector_matches_info_size(&self, vec: RawHandle) -> Result<usize, NativeError> {
        Ok(self
            .lock()
            .matches_info_mut("vector_MatchesInfo_getSize", vec)?
            .len())
    }

    fn vector_matches_info_get_elements(
        &self,
        vec: RawHandle,
        dst: &mut [WMatchesInfo],
    ) -> Result<(), NativeError> {
        const CALL: &str = "vector_MatchesInfo_getElements";
        let mut state = self.lock();
        let matches = state.matches_info_mut(CALL, vec)?.clone();
        if matches.len() != dst.len() {
            return Err(NativeError::new(
                CALL,
                STATUS_SIZE_MISMATCH,
                format!("vector holds {} records, destination has {}", matches.len(), dst.len()),
            ));
        }
        for (record, data) in dst.iter_mut().zip(matches) {
            state.write_matches(CALL, data, record)?;
        }
        Ok(())
    }

    fn vector_matches_info_delete(&self, vec: RawHandle) -> Result<(), NativeError> {
        self.lock().release(
            "vector_MatchesInfo_delete",
            vec,
            ResourceKind::MatchesInfoVector,
        )
    }

    fn homography_based_estimator_new(
        &self,
        is_focals_estimated: bool,
    ) -> Result<RawHandle, NativeError> {
        self.lock().alloc(
            "stitching_HomographyBasedEstimator_new",
            Object::Estimator {
                is_focals_estimated,
            },
        )
    }

    fn homography_based_estimator_delete(&self, obj: RawHandle) -> Result<(), NativeError> {
        self.lock().release(
            "stitching_HomographyBasedEstimator_delete",
            obj,
            ResourceKind::Estimator,
        )
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

        // copy the inputs out so the callback runs without holding the lock
        let (request, estimate_fn) = {
            let mut state = self.lock();
            let is_focals_estimated = match state.get(CALL, obj)? {
                Object::Estimator {
                    is_focals_estimated,
                } => *is_focals_estimated,
                other => {
                    return Err(kind_mismatch(
                        CALL,
                        handle_id(obj),
                        other.kind(),
                        ResourceKind::Estimator,
                    ))
                }
            };
            let request = EstimateRequest {
                is_focals_estimated,
                features: features
                    .iter()
                    .map(|f| state.features_data(CALL, f))
                    .collect::<Result<_, _>>()?,
                pairwise_matches: pairwise_matches
                    .iter()
                    .map(|m| state.matches_data(CALL, m))
                    .collect::<Result<_, _>>()?,
                cameras: cameras
                    .iter()
                    .map(|c| state.camera_data(CALL, c))
                    .collect::<Result<_, _>>()?,
            };
            state.camera_params_mut(CALL, out_cameras)?;
            (request, state.estimate_fn.clone())
        };

        let response = match estimate_fn {
            Some(f) => f(&request)?,
            None => echo_estimate(&request),
        };

        let mut state = self.lock();
        *state.camera_params_mut(CALL, out_cameras)? = response.cameras;
        Ok(response.success)
    }

    fn best_of2_nearest_matcher_new(
        &self,
        _config: &BestOf2NearestMatcherConfig,
    ) -> Result<RawHandle, NativeError> {
        self.lock()
            .alloc("stitching_BestOf2NearestMatcher_new", Object::Matcher)
    }

    fn best_of2_nearest_matcher_delete(&self, obj: RawHandle) -> Result<(), NativeError> {
        self.lock().release(
            "stitching_BestOf2NearestMatcher_delete",
            obj,
            ResourceKind::Matcher,
        )
    }

    fn features_matcher_apply(
        &self,
        obj: RawHandle,
        features1: &WImageFeatures,
        features2: &WImageFeatures,
        out: &mut WMatchesInfo,
    ) -> Result<(), NativeError> {
        const CALL: &str = "stitching_FeaturesMatcher_apply";
        let (f1, f2, match_fn) = {
            let state = self.lock();
            state.check_matcher(CALL, obj)?;
            (
                state.features_data(CALL, features1)?,
                state.features_data(CALL, features2)?,
                state.match_fn.clone(),
            )
        };

        let result = match match_fn {
            Some(f) => f(&f1, &f2)?,
            None => empty_match(&f1, &f2),
        };

        self.lock().write_matches(CALL, result, out)
    }

    fn features_matcher_apply2(
        &self,
        obj: RawHandle,
        features: &[WImageFeatures],
        out_matches: RawHandle,
    ) -> Result<(), NativeError> {
        const CALL: &str = "stitching_FeaturesMatcher_apply2";
        let (data, match_fn) = {
            let mut state = self.lock();
            state.check_matcher(CALL, obj)?;
            let data = features
                .iter()
                .map(|f| state.features_data(CALL, f))
                .collect::<Result<Vec<_>, _>>()?;
            state.matches_info_mut(CALL, out_matches)?;
            (data, state.match_fn.clone())
        };

        // one record per ordered pair, the diagonal left empty
        let mut pairwise = Vec::with_capacity(data.len() * data.len());
        for (i, f1) in data.iter().enumerate() {
            for (j, f2) in data.iter().enumerate() {
                let m = if i == j {
                    MatchesData::empty()
                } else if let Some(f) = &match_fn {
                    f(f1, f2)?
                } else {
                    empty_match(f1, f2)
                };
                pairwise.push(m);
            }
        }

        *self.lock().matches_info_mut(CALL, out_matches)? = pairwise;
        Ok(())
    }

    fn features_matcher_collect_garbage(&self, obj: RawHandle) -> Result<(), NativeError> {
        self.lock()
            .check_matcher("stitching_FeaturesMatcher_collectGarbage", obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_release_counters() -> Result<(), NativeError> {
        let backend = MemoryBackend::new();
        let m = backend.mat_new()?;
        let v = backend.vector_uchar_new(&[1, 2, 3])?;
        assert!(backend.is_live(m));
        assert_eq!(backend.stats().total_live(), 2);

        backend.mat_delete(m)?;
        backend.vector_uchar_delete(v)?;
        let stats = backend.stats();
        assert_eq!(stats.total_live(), 0);
        assert_eq!(stats.released(ResourceKind::Mat), 1);
        assert_eq!(stats.released(ResourceKind::ByteVector), 1);
        assert!(backend.is_released(m));
        Ok(())
    }

    #[test]
    fn test_double_release_detected() -> Result<(), NativeError> {
        let backend = MemoryBackend::new();
        let m = backend.mat_new()?;
        backend.mat_delete(m)?;
        let err = backend.mat_delete(m).unwrap_err();
        assert_eq!(err.code, STATUS_DOUBLE_RELEASE);
        assert_eq!(backend.stats().double_releases(), 1);
        Ok(())
    }

    #[test]
    fn test_kind_mismatch_does_not_release() -> Result<(), NativeError> {
        let backend = MemoryBackend::new();
        let v = backend.vector_keypoint_new(&[])?;
        let err = backend.mat_delete(v).unwrap_err();
        assert_eq!(err.code, STATUS_INVALID_HANDLE);
        assert!(backend.is_live(v));
        Ok(())
    }

    #[test]
    fn test_use_after_release() -> Result<(), NativeError> {
        let backend = MemoryBackend::new();
        let m = backend.mat_from_data(&MatData {
            rows: 2,
            cols: 2,
            data: vec![1.0, 0.0, 0.0, 1.0],
        })?;
        backend.mat_delete(m)?;
        let err = backend.mat_data(m).unwrap_err();
        assert_eq!(err.code, STATUS_INVALID_HANDLE);
        assert!(err.message.contains("released"));
        Ok(())
    }

    #[test]
    fn test_fail_allocations_after() -> Result<(), NativeError> {
        let backend = MemoryBackend::new();
        backend.fail_allocations_after(1);
        backend.mat_new()?;
        let err = backend.mat_new().unwrap_err();
        assert_eq!(err.code, STATUS_OUT_OF_MEMORY);
        assert_eq!(backend.stats().allocated(ResourceKind::Mat), 1);

        backend.clear_allocation_failure();
        backend.mat_new()?;
        Ok(())
    }
}
