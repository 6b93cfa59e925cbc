//! Bulk marshalling of records into contiguous interop arrays.
//!
//! A call moves through `Validating -> MarshallingInputs -> Invoking ->
//! (Failed | MarshallingOutputs -> Committed)`. Validation allocates nothing.
//! Transient proxies are owned by the batches below and deleted when the
//! batches drop, whichever way the call exits. Descriptors, homographies and
//! seed camera matrices are only borrowed.

use crate::{
    backend::NativeBackend,
    camera::CameraParams,
    error::StitchingError,
    features::ImageFeatures,
    ffi::{RawHandle, WCameraParams, WImageFeatures, WMatchesInfo},
    mat::Mat,
    matches::MatchesInfo,
    vector::{
        VectorOfByte, VectorOfCameraParams, VectorOfDMatch, VectorOfKeyPoint, VectorOfMatchesInfo,
    },
};

/// Interop records for a features collection plus the keypoint proxies they point at.
pub(crate) struct FeaturesBatch<B: NativeBackend> {
    // kept alive until the batch drops
    _keypoints: Vec<VectorOfKeyPoint<B>>,
    records: Vec<WImageFeatures>,
}

impl<B: NativeBackend> FeaturesBatch<B> {
    pub(crate) fn marshal<'a, I>(backend: &B, features: I) -> Result<Self, StitchingError>
    where
        I: IntoIterator<Item = &'a ImageFeatures<B>>,
        B: 'a,
    {
        let mut keypoints = Vec::new();
        let mut records = Vec::new();
        for f in features {
            let proxy = VectorOfKeyPoint::from_slice(backend, &f.keypoints)?;
            records.push(f.to_interop(&proxy)?);
            keypoints.push(proxy);
        }
        Ok(Self {
            _keypoints: keypoints,
            records,
        })
    }

    pub(crate) fn records(&self) -> &[WImageFeatures] {
        &self.records
    }
}

/// Interop records for a matches collection plus the correspondence and mask proxies.
pub(crate) struct MatchesBatch<B: NativeBackend> {
    _matches: Vec<VectorOfDMatch<B>>,
    _masks: Vec<VectorOfByte<B>>,
    records: Vec<WMatchesInfo>,
}

impl<B: NativeBackend> MatchesBatch<B> {
    pub(crate) fn marshal(
        backend: &B,
        pairwise_matches: &[MatchesInfo<B>],
    ) -> Result<Self, StitchingError> {
        let n = pairwise_matches.len();
        let mut matches = Vec::with_capacity(n);
        let mut masks = Vec::with_capacity(n);
        let mut records = Vec::with_capacity(n);
        for m in pairwise_matches {
            let matches_proxy = VectorOfDMatch::from_slice(backend, &m.matches)?;
            let mask_proxy = VectorOfByte::from_slice(backend, &m.inliers_mask)?;
            records.push(m.to_interop(&matches_proxy, &mask_proxy)?);
            matches.push(matches_proxy);
            masks.push(mask_proxy);
        }
        Ok(Self {
            _matches: matches,
            _masks: masks,
            records,
        })
    }

    pub(crate) fn records(&self) -> &[WMatchesInfo] {
        &self.records
    }
}

fn check_descriptors<B: NativeBackend>(f: &ImageFeatures<B>) -> Result<(), StitchingError> {
    if f.descriptors.is_released() {
        return Err(StitchingError::InvalidArgument(format!(
            "features of image {} contain a released descriptor matrix",
            f.img_idx
        )));
    }
    Ok(())
}

pub(crate) fn validate_features<B: NativeBackend>(
    features: &[ImageFeatures<B>],
) -> Result<(), StitchingError> {
    if features.is_empty() {
        return Err(StitchingError::InvalidArgument(
            "empty features array".to_string(),
        ));
    }
    features.iter().try_for_each(check_descriptors)
}

pub(crate) fn validate_matches<B: NativeBackend>(
    pairwise_matches: &[MatchesInfo<B>],
) -> Result<(), StitchingError> {
    if pairwise_matches.is_empty() {
        return Err(StitchingError::InvalidArgument(
            "empty matches array".to_string(),
        ));
    }
    for m in pairwise_matches {
        m.check_inliers_mask()?;
        if m.h.is_released() {
            return Err(StitchingError::InvalidArgument(format!(
                "matches {}->{} contain a released homography matrix",
                m.src_img_idx, m.dst_img_idx
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_cameras<B: NativeBackend>(
    cameras: &[CameraParams<B>],
) -> Result<(), StitchingError> {
    for (i, c) in cameras.iter().enumerate() {
        if c.r.is_released() || c.t.is_released() {
            return Err(StitchingError::InvalidArgument(format!(
                "camera {i} contains a released rotation or translation matrix"
            )));
        }
    }
    Ok(())
}

/// Runs one estimation call of the native estimator `obj`.
///
/// On a `true` result `cameras` is replaced by the estimated cameras. On a
/// `false` result or on any error `cameras` is left untouched.
pub(crate) fn estimate_cameras<B: NativeBackend>(
    backend: &B,
    obj: RawHandle,
    features: &[ImageFeatures<B>],
    pairwise_matches: &[MatchesInfo<B>],
    cameras: &mut Vec<CameraParams<B>>,
) -> Result<bool, StitchingError> {
    validate_features(features)?;
    validate_matches(pairwise_matches)?;
    validate_cameras(cameras)?;

    log::trace!(
        "marshalling {} features, {} matches, {} cameras",
        features.len(),
        pairwise_matches.len(),
        cameras.len()
    );
    let features_batch = FeaturesBatch::marshal(backend, features)?;
    let matches_batch = MatchesBatch::marshal(backend, pairwise_matches)?;
    let camera_records = cameras
        .iter()
        .map(CameraParams::to_interop)
        .collect::<Result<Vec<WCameraParams>, _>>()?;
    let out_cameras = VectorOfCameraParams::new(backend)?;

    let success = backend
        .estimator_apply(
            obj,
            features_batch.records(),
            matches_batch.records(),
            &camera_records,
            out_cameras.as_raw(),
        )
        .map_err(|e| {
            log::warn!("camera estimation failed: {e}");
            StitchingError::from(e)
        })?;

    if !success {
        log::debug!("native estimator reported an unsuccessful estimation");
        return Ok(false);
    }

    let estimated = out_cameras.to_vec()?;
    log::debug!(
        "estimated {} cameras (seed had {})",
        estimated.len(),
        cameras.len()
    );
    cameras.clear();
    cameras.extend(estimated);
    Ok(true)
}

/// Matches two feature sets with the native matcher `obj`.
pub(crate) fn match_pair<B: NativeBackend>(
    backend: &B,
    obj: RawHandle,
    features1: &ImageFeatures<B>,
    features2: &ImageFeatures<B>,
) -> Result<MatchesInfo<B>, StitchingError> {
    check_descriptors(features1)?;
    check_descriptors(features2)?;

    let batch = FeaturesBatch::marshal(backend, [features1, features2])?;
    let matches = VectorOfDMatch::new(backend)?;
    let mask = VectorOfByte::new(backend)?;
    let h = Mat::new(backend)?;
    let mut record = WMatchesInfo::with_outputs(matches.as_raw(), mask.as_raw(), h.handle()?);

    let [r1, r2] = batch.records() else {
        return Err(StitchingError::InvalidArgument(
            "expected exactly two feature records".to_string(),
        ));
    };
    backend.features_matcher_apply(obj, r1, r2, &mut record)?;

    MatchesInfo::from_interop(&record, matches.to_vec()?, mask.to_vec()?, h)
}

/// Matches every pair of feature sets with the native matcher `obj`.
pub(crate) fn match_all<B: NativeBackend>(
    backend: &B,
    obj: RawHandle,
    features: &[ImageFeatures<B>],
) -> Result<Vec<MatchesInfo<B>>, StitchingError> {
    validate_features(features)?;

    let batch = FeaturesBatch::marshal(backend, features)?;
    let out = VectorOfMatchesInfo::new(backend)?;
    backend.features_matcher_apply2(obj, batch.records(), out.as_raw())?;
    let pairwise = out.to_vec()?;
    log::debug!(
        "matched {} images into {} pairwise records",
        features.len(),
        pairwise.len()
    );
    Ok(pairwise)
}
