use crate::{
    backend::NativeBackend,
    error::StitchingError,
    ffi::WCameraParams,
    mat::{Mat, MatData},
};

/// Describes camera parameters.
///
/// Cloning shares the rotation and translation matrices with the original
/// record (see [`Mat`]); use [`CameraParams::deep_clone`] for independent
/// copies.
#[derive(Debug, Clone)]
pub struct CameraParams<B: NativeBackend> {
    /// Focal length.
    pub focal: f64,
    /// Aspect ratio.
    pub aspect: f64,
    /// Principal point x.
    pub ppx: f64,
    /// Principal point y.
    pub ppy: f64,
    /// Rotation.
    pub r: Mat<B>,
    /// Translation.
    pub t: Mat<B>,
}

impl<B: NativeBackend> CameraParams<B> {
    /// Creates a new camera parameters record taking ownership of `r` and `t`.
    pub fn new(focal: f64, aspect: f64, ppx: f64, ppy: f64, r: Mat<B>, t: Mat<B>) -> Self {
        Self {
            focal,
            aspect,
            ppx,
            ppy,
            r,
            t,
        }
    }

    /// Unit focal and aspect, principal point at the origin, identity
    /// rotation and zero translation.
    pub fn identity(backend: &B) -> Result<Self, StitchingError> {
        Ok(Self::new(
            1.0,
            1.0,
            0.0,
            0.0,
            Mat::from_data(backend, &MatData::eye(3)?)?,
            Mat::from_data(backend, &MatData::zeros(3, 1)?)?,
        ))
    }

    /// Returns the 3x3 intrinsic matrix.
    pub fn k(&self) -> [[f64; 3]; 3] {
        [
            [self.focal, 0.0, self.ppx],
            [0.0, self.focal * self.aspect, self.ppy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Copies the record, including its matrices, into new native resources.
    pub fn deep_clone(&self) -> Result<Self, StitchingError> {
        Ok(Self::new(
            self.focal,
            self.aspect,
            self.ppx,
            self.ppy,
            self.r.deep_clone()?,
            self.t.deep_clone()?,
        ))
    }

    /// Builds the interop view of this record. The matrices are borrowed.
    pub fn to_interop(&self) -> Result<WCameraParams, StitchingError> {
        Ok(WCameraParams {
            focal: self.focal,
            aspect: self.aspect,
            ppx: self.ppx,
            ppy: self.ppy,
            r: self.r.handle()?,
            t: self.t.handle()?,
        })
    }

    /// Builds a record from an interop view, taking ownership of `r` and `t`.
    ///
    /// # Errors
    ///
    /// `r` and `t` must be the matrices referenced by `record`, otherwise an
    /// [`StitchingError::InvalidArgument`] is returned.
    pub fn from_interop(
        record: &WCameraParams,
        r: Mat<B>,
        t: Mat<B>,
    ) -> Result<Self, StitchingError> {
        if r.handle()? != record.r || t.handle()? != record.t {
            return Err(StitchingError::InvalidArgument(
                "camera matrices do not belong to the interop record".to_string(),
            ));
        }
        Ok(Self::new(
            record.focal,
            record.aspect,
            record.ppx,
            record.ppy,
            r,
            t,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, ResourceKind};
    use approx::assert_relative_eq;

    #[test]
    fn test_k() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let mut cam = CameraParams::identity(&backend)?;
        cam.focal = 800.0;
        cam.aspect = 0.5;
        cam.ppx = 320.0;
        cam.ppy = 240.0;
        let k = cam.k();
        assert_relative_eq!(k[0][0], 800.0);
        assert_relative_eq!(k[1][1], 400.0);
        assert_relative_eq!(k[0][2], 320.0);
        assert_relative_eq!(k[1][2], 240.0);
        assert_relative_eq!(k[2][2], 1.0);
        Ok(())
    }

    #[test]
    fn test_interop_roundtrip_preserves_identity() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let r = Mat::from_data(&backend, &MatData::new(3, 3, (0..9).map(f64::from).collect())?)?;
        let t = Mat::from_data(&backend, &MatData::new(3, 1, vec![0.1, 0.2, 0.3])?)?;
        let cam = CameraParams::new(523.25, 1.125, 319.5, 239.75, r, t);

        let record = cam.to_interop()?;
        let back = CameraParams::from_interop(&record, cam.r.clone(), cam.t.clone())?;

        assert_eq!(back.focal.to_bits(), cam.focal.to_bits());
        assert_eq!(back.aspect.to_bits(), cam.aspect.to_bits());
        assert_eq!(back.ppx.to_bits(), cam.ppx.to_bits());
        assert_eq!(back.ppy.to_bits(), cam.ppy.to_bits());
        assert!(back.r.ptr_eq(&cam.r));
        assert!(back.t.ptr_eq(&cam.t));
        assert_eq!(backend.stats().allocated(ResourceKind::Mat), 2);
        Ok(())
    }

    #[test]
    fn test_from_interop_rejects_foreign_matrices() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let cam = CameraParams::identity(&backend)?;
        let record = cam.to_interop()?;
        let other = Mat::eye(&backend, 3)?;
        let res = CameraParams::from_interop(&record, other, cam.t.clone());
        assert!(matches!(res, Err(StitchingError::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn test_clone_shares_deep_clone_copies() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let cam = CameraParams::identity(&backend)?;
        let shared = cam.clone();
        assert!(shared.r.ptr_eq(&cam.r));

        let copy = cam.deep_clone()?;
        assert!(!copy.r.ptr_eq(&cam.r));
        assert_eq!(copy.r.data()?, cam.r.data()?);

        let r_handle = cam.r.handle()?;
        drop(cam);
        assert!(!backend.is_released(r_handle));
        drop(shared);
        assert!(backend.is_released(r_handle));
        Ok(())
    }
}
