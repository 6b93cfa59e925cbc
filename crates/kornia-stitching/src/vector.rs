//! Owning wrappers for native `std::vector` objects.
//!
//! [`StdVector`] is used for the transient proxies the marshaller builds for
//! every call; they are deleted when dropped, on every exit path.
//! [`VectorOfCameraParams`] and [`VectorOfMatchesInfo`] receive results
//! written by the native library and convert them into owned records.

use std::marker::PhantomData;

use crate::{
    backend::NativeBackend,
    camera::CameraParams,
    error::{NativeError, StitchingError},
    ffi::{RawHandle, WCameraParams, WMatchesInfo},
    mat::Mat,
    matches::MatchesInfo,
    types::{DMatch, KeyPoint},
};

/// An element type with a native `std::vector` counterpart.
pub trait VectorElement: Copy {
    /// Name of the native element type, used in log messages.
    const NAME: &'static str;

    /// Allocates a native vector holding a copy of `data`.
    fn native_new<B: NativeBackend>(backend: &B, data: &[Self]) -> Result<RawHandle, NativeError>;

    /// Copies the contents of a native vector.
    fn native_to_vec<B: NativeBackend>(backend: &B, vec: RawHandle)
        -> Result<Vec<Self>, NativeError>;

    /// Deletes a native vector.
    fn native_delete<B: NativeBackend>(backend: &B, vec: RawHandle) -> Result<(), NativeError>;
}

impl VectorElement for KeyPoint {
    const NAME: &'static str = "KeyPoint";

    fn native_new<B: NativeBackend>(backend: &B, data: &[Self]) -> Result<RawHandle, NativeError> {
        backend.vector_keypoint_new(data)
    }

    fn native_to_vec<B: NativeBackend>(
        backend: &B,
        vec: RawHandle,
    ) -> Result<Vec<Self>, NativeError> {
        backend.vector_keypoint_to_vec(vec)
    }

    fn native_delete<B: NativeBackend>(backend: &B, vec: RawHandle) -> Result<(), NativeError> {
        backend.vector_keypoint_delete(vec)
    }
}

impl VectorElement for DMatch {
    const NAME: &'static str = "DMatch";

    fn native_new<B: NativeBackend>(backend: &B, data: &[Self]) -> Result<RawHandle, NativeError> {
        backend.vector_dmatch_new(data)
    }

    fn native_to_vec<B: NativeBackend>(
        backend: &B,
        vec: RawHandle,
    ) -> Result<Vec<Self>, NativeError> {
        backend.vector_dmatch_to_vec(vec)
    }

    fn native_delete<B: NativeBackend>(backend: &B, vec: RawHandle) -> Result<(), NativeError> {
        backend.vector_dmatch_delete(vec)
    }
}

impl VectorElement for u8 {
    const NAME: &'static str = "uchar";

    fn native_new<B: NativeBackend>(backend: &B, data: &[Self]) -> Result<RawHandle, NativeError> {
        backend.vector_uchar_new(data)
    }

    fn native_to_vec<B: NativeBackend>(
        backend: &B,
        vec: RawHandle,
    ) -> Result<Vec<Self>, NativeError> {
        backend.vector_uchar_to_vec(vec)
    }

    fn native_delete<B: NativeBackend>(backend: &B, vec: RawHandle) -> Result<(), NativeError> {
        backend.vector_uchar_delete(vec)
    }
}

/// An owned native `std::vector<T>`.
pub struct StdVector<T: VectorElement, B: NativeBackend> {
    handle: RawHandle,
    backend: B,
    _marker: PhantomData<T>,
}

/// Native `std::vector<KeyPoint>`.
pub type VectorOfKeyPoint<B> = StdVector<KeyPoint, B>;

/// Native `std::vector<DMatch>`.
pub type VectorOfDMatch<B> = StdVector<DMatch, B>;

/// Native `std::vector<uchar>`.
pub type VectorOfByte<B> = StdVector<u8, B>;

impl<T: VectorElement, B: NativeBackend> StdVector<T, B> {
    /// Allocates an empty native vector.
    pub fn new(backend: &B) -> Result<Self, StitchingError> {
        Self::from_slice(backend, &[])
    }

    /// Allocates a native vector holding a copy of `data`.
    pub fn from_slice(backend: &B, data: &[T]) -> Result<Self, StitchingError> {
        let handle = T::native_new(backend, data)?;
        log::trace!("allocated vector<{}> {:?} ({} elements)", T::NAME, handle, data.len());
        Ok(Self {
            handle,
            backend: backend.clone(),
            _marker: PhantomData,
        })
    }

    /// Returns the native handle, valid while `self` is alive.
    #[inline]
    pub fn as_raw(&self) -> RawHandle {
        self.handle
    }

    /// Copies the contents of the native vector.
    pub fn to_vec(&self) -> Result<Vec<T>, StitchingError> {
        Ok(T::native_to_vec(&self.backend, self.handle)?)
    }
}

impl<T: VectorElement, B: NativeBackend> Drop for StdVector<T, B> {
    fn drop(&mut self) {
        if let Err(e) = T::native_delete(&self.backend, self.handle) {
            log::warn!("failed to release vector<{}> {:?}: {e}", T::NAME, self.handle);
        }
    }
}

/// An owned native `std::vector<CameraParams>` receiving estimated cameras.
pub struct VectorOfCameraParams<B: NativeBackend> {
    handle: RawHandle,
    backend: B,
}

impl<B: NativeBackend> VectorOfCameraParams<B> {
    /// Allocates an empty native vector.
    pub fn new(backend: &B) -> Result<Self, StitchingError> {
        let handle = backend.vector_camera_params_new()?;
        Ok(Self {
            handle,
            backend: backend.clone(),
        })
    }

    /// Returns the native handle, valid while `self` is alive.
    #[inline]
    pub fn as_raw(&self) -> RawHandle {
        self.handle
    }

    /// Number of cameras held by the native vector.
    pub fn size(&self) -> Result<usize, StitchingError> {
        Ok(self.backend.vector_camera_params_size(self.handle)?)
    }

    /// Converts the native vector into owned camera parameters.
    ///
    /// Each output camera receives freshly allocated rotation and translation
    /// matrices. If the conversion fails, the matrices allocated so far are
    /// released before returning.
    pub fn to_vec(&self) -> Result<Vec<CameraParams<B>>, StitchingError> {
        let size = self.size()?;
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut rs = Vec::with_capacity(size);
        let mut ts = Vec::with_capacity(size);
        let mut records = Vec::with_capacity(size);
        for _ in 0..size {
            let r = Mat::new(&self.backend)?;
            let t = Mat::new(&self.backend)?;
            records.push(WCameraParams::with_outputs(r.handle()?, t.handle()?));
            rs.push(r);
            ts.push(t);
        }

        self.backend
            .vector_camera_params_get_elements(self.handle, &mut records)?;

        records
            .iter()
            .zip(rs.into_iter().zip(ts))
            .map(|(record, (r, t))| CameraParams::from_interop(record, r, t))
            .collect()
    }
}

impl<B: NativeBackend> Drop for VectorOfCameraParams<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.vector_camera_params_delete(self.handle) {
            log::warn!("failed to release vector<CameraParams> {:?}: {e}", self.handle);
        }
    }
}

/// An owned native `std::vector<MatchesInfo>` receiving pairwise matches.
pub struct VectorOfMatchesInfo<B: NativeBackend> {
    handle: RawHandle,
    backend: B,
}

impl<B: NativeBackend> VectorOfMatchesInfo<B> {
    /// Allocates an empty native vector.
    pub fn new(backend: &B) -> Result<Self, StitchingError> {
        let handle = backend.vector_matches_info_new()?;
        Ok(Self {
            handle,
            backend: backend.clone(),
        })
    }

    /// Returns the native handle, valid while `self` is alive.
    #[inline]
    pub fn as_raw(&self) -> RawHandle {
        self.handle
    }

    /// Number of records held by the native vector.
    pub fn size(&self) -> Result<usize, StitchingError> {
        Ok(self.backend.vector_matches_info_size(self.handle)?)
    }

    /// Converts the native vector into owned matches records.
    ///
    /// The correspondence and mask vectors are read through temporary native
    /// vectors that are always released; the homography matrices are handed
    /// over to the returned records.
    pub fn to_vec(&self) -> Result<Vec<MatchesInfo<B>>, StitchingError> {
        let size = self.size()?;
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut matches_vecs = Vec::with_capacity(size);
        let mut masks = Vec::with_capacity(size);
        let mut homographies = Vec::with_capacity(size);
        let mut records = Vec::with_capacity(size);
        for _ in 0..size {
            let matches = VectorOfDMatch::new(&self.backend)?;
            let mask = VectorOfByte::new(&self.backend)?;
            let h = Mat::new(&self.backend)?;
            records.push(WMatchesInfo::with_outputs(
                matches.as_raw(),
                mask.as_raw(),
                h.handle()?,
            ));
            matches_vecs.push(matches);
            masks.push(mask);
            homographies.push(h);
        }

        self.backend
            .vector_matches_info_get_elements(self.handle, &mut records)?;

        let mut result = Vec::with_capacity(size);
        for (((record, matches), mask), h) in records
            .iter()
            .zip(&matches_vecs)
            .zip(&masks)
            .zip(homographies)
        {
            result.push(MatchesInfo::from_interop(
                record,
                matches.to_vec()?,
                mask.to_vec()?,
                h,
            )?);
        }
        Ok(result)
    }
}

impl<B: NativeBackend> Drop for VectorOfMatchesInfo<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.vector_matches_info_delete(self.handle) {
            log::warn!("failed to release vector<MatchesInfo> {:?}: {e}", self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MatchesData, MemoryBackend, ResourceKind};
    use crate::mat::MatData;
    use crate::types::Point2f;

    #[test]
    fn test_vector_keypoint_roundtrip() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let kps = vec![
            KeyPoint::new(Point2f::new(1.0, 2.0), 3.0),
            KeyPoint::new(Point2f::new(4.0, 5.0), 6.0),
        ];
        let vec = VectorOfKeyPoint::from_slice(&backend, &kps)?;
        assert_eq!(vec.to_vec()?, kps);
        drop(vec);
        let stats = backend.stats();
        assert_eq!(stats.allocated(ResourceKind::KeyPointVector), 1);
        assert_eq!(stats.released(ResourceKind::KeyPointVector), 1);
        Ok(())
    }

    #[test]
    fn test_vector_byte_empty() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let vec = VectorOfByte::new(&backend)?;
        assert!(vec.to_vec()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_camera_params_vector() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let vec = VectorOfCameraParams::new(&backend)?;
        assert_eq!(vec.size()?, 0);
        assert!(vec.to_vec()?.is_empty());
        assert_eq!(backend.stats().allocated(ResourceKind::Mat), 0);
        Ok(())
    }

    #[test]
    fn test_camera_params_readback_failure_releases_matrices() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let vec = VectorOfCameraParams::new(&backend)?;
        backend.push_camera_params(
            vec.as_raw(),
            vec![
                crate::backend::memory::CameraData::identity(),
                crate::backend::memory::CameraData::identity(),
            ],
        )?;

        // two camera slots need four matrices; the third allocation fails
        backend.fail_allocations_after(2);
        assert!(matches!(
            vec.to_vec(),
            Err(StitchingError::NativeFailure { .. })
        ));
        let stats = backend.stats();
        assert_eq!(stats.allocated(ResourceKind::Mat), 2);
        assert_eq!(stats.live(ResourceKind::Mat), 0);
        Ok(())
    }

    #[test]
    fn test_matches_info_readback() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let vec = VectorOfMatchesInfo::new(&backend)?;
        let data = MatchesData {
            src_img_idx: 0,
            dst_img_idx: 1,
            matches: vec![DMatch::new(0, 2, 0.5), DMatch::new(1, 3, 0.25)],
            inliers_mask: vec![1, 0],
            num_inliers: 1,
            h: MatData::eye(3)?,
            confidence: 0.8,
        };
        backend.push_matches_info(vec.as_raw(), vec![MatchesData::empty(), data.clone()])?;
        assert_eq!(vec.size()?, 2);

        let infos = vec.to_vec()?;
        assert_eq!(infos[0].src_img_idx, -1);
        assert_eq!(infos[1].matches, data.matches);
        assert_eq!(infos[1].inliers().count(), 1);
        assert_eq!(infos[1].h.data()?, data.h);

        let stats = backend.stats();
        assert_eq!(stats.live(ResourceKind::Mat), 2);
        assert_eq!(stats.live(ResourceKind::DMatchVector), 0);
        assert_eq!(stats.live(ResourceKind::ByteVector), 0);
        Ok(())
    }

    #[test]
    fn test_matches_info_readback_failure_releases_outputs() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let vec = VectorOfMatchesInfo::new(&backend)?;
        backend.push_matches_info(
            vec.as_raw(),
            vec![MatchesData::empty(), MatchesData::empty()],
        )?;

        // each slot needs a correspondence vector, a mask and a homography
        backend.fail_allocations_after(4);
        assert!(matches!(
            vec.to_vec(),
            Err(StitchingError::NativeFailure { .. })
        ));
        let stats = backend.stats();
        assert_eq!(stats.allocated(ResourceKind::Mat), 1);
        assert_eq!(stats.live(ResourceKind::Mat), 0);
        assert_eq!(stats.live(ResourceKind::DMatchVector), 0);
        assert_eq!(stats.live(ResourceKind::ByteVector), 0);
        assert_eq!(stats.double_releases(), 0);
        Ok(())
    }
}
