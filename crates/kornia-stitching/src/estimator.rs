//! Rotation estimators.
//!
//! An estimator takes the features of all images and the pairwise matches
//! between them and estimates the parameters of every camera. The origin of
//! the resulting coordinate system is implementation dependent; normalize
//! the rotations against one camera if needed.

use serde::{Deserialize, Serialize};

use crate::{
    backend::NativeBackend, camera::CameraParams, error::StitchingError, features::ImageFeatures,
    ffi::RawHandle, marshal, matches::MatchesInfo,
};

mod private {
    pub trait Sealed {}
}

/// A native camera parameters estimator.
///
/// The trait is sealed: the handle returned by [`Estimator::as_raw`] is passed
/// to the backend unchecked, so only estimators owning a live native object
/// implement it.
///
/// ```compile_fail
/// use kornia_stitching::{ffi::RawHandle, Estimator, MemoryBackend};
///
/// struct Dangling(MemoryBackend);
///
/// impl Estimator<MemoryBackend> for Dangling {
///     fn backend(&self) -> &MemoryBackend {
///         &self.0
///     }
///
///     fn as_raw(&self) -> RawHandle {
///         0xdead as RawHandle
///     }
/// }
/// ```
pub trait Estimator<B: NativeBackend>: private::Sealed {
    /// The backend owning the native estimator.
    fn backend(&self) -> &B;

    /// The native estimator handle.
    fn as_raw(&self) -> RawHandle;

    /// Estimates camera parameters.
    ///
    /// # Arguments
    ///
    /// * `features` - Features of the images, must not be empty.
    /// * `pairwise_matches` - Pairwise matches of the images, must not be empty.
    /// * `cameras` - Seed cameras, possibly empty. Replaced by the estimated
    ///   cameras when the estimation succeeds.
    ///
    /// # Returns
    ///
    /// `true` if the estimation succeeded. A `false` result is not an error
    /// and leaves `cameras` unchanged.
    ///
    /// # Errors
    ///
    /// * [`StitchingError::InvalidArgument`] if an input collection is empty or
    ///   references a released matrix.
    /// * [`StitchingError::NativeFailure`] if the native library reports an error.
    fn apply(
        &self,
        features: &[ImageFeatures<B>],
        pairwise_matches: &[MatchesInfo<B>],
        cameras: &mut Vec<CameraParams<B>>,
    ) -> Result<bool, StitchingError> {
        marshal::estimate_cameras(
            self.backend(),
            self.as_raw(),
            features,
            pairwise_matches,
            cameras,
        )
    }
}

/// Configuration of a [`HomographyBasedEstimator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomographyBasedEstimatorConfig {
    /// Whether the focal lengths were already estimated and should be kept.
    pub is_focals_estimated: bool,
}

/// Homography based rotation estimator.
pub struct HomographyBasedEstimator<B: NativeBackend> {
    handle: RawHandle,
    backend: B,
    config: HomographyBasedEstimatorConfig,
}

impl<B: NativeBackend> HomographyBasedEstimator<B> {
    /// Creates a homography based rotation estimator.
    ///
    /// The configuration is fixed for the lifetime of the estimator.
    pub fn new(
        backend: &B,
        config: HomographyBasedEstimatorConfig,
    ) -> Result<Self, StitchingError> {
        let handle = backend.homography_based_estimator_new(config.is_focals_estimated)?;
        log::debug!("created homography based estimator {handle:?} with {config:?}");
        Ok(Self {
            handle,
            backend: backend.clone(),
            config,
        })
    }

    /// Returns the configuration the estimator was created with.
    pub fn config(&self) -> &HomographyBasedEstimatorConfig {
        &self.config
    }
}

impl<B: NativeBackend> private::Sealed for HomographyBasedEstimator<B> {}

impl<B: NativeBackend> Estimator<B> for HomographyBasedEstimator<B> {
    fn backend(&self) -> &B {
        &self.backend
    }

    fn as_raw(&self) -> RawHandle {
        self.handle
    }
}

impl<B: NativeBackend> Drop for HomographyBasedEstimator<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.homography_based_estimator_delete(self.handle) {
            log::warn!("failed to release estimator {:?}: {e}", self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, ResourceKind};

    #[test]
    fn test_config_default() -> Result<(), serde_json::Error> {
        let config: HomographyBasedEstimatorConfig = serde_json::from_str("{}")?;
        assert_eq!(config, HomographyBasedEstimatorConfig::default());
        assert!(!config.is_focals_estimated);

        let config: HomographyBasedEstimatorConfig =
            serde_json::from_str(r#"{"is_focals_estimated": true}"#)?;
        assert!(config.is_focals_estimated);
        Ok(())
    }

    #[test]
    fn test_estimator_lifecycle() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let config = HomographyBasedEstimatorConfig {
            is_focals_estimated: true,
        };
        let estimator = HomographyBasedEstimator::new(&backend, config)?;
        assert!(estimator.config().is_focals_estimated);
        assert_eq!(backend.stats().live(ResourceKind::Estimator), 1);
        drop(estimator);
        let stats = backend.stats();
        assert_eq!(stats.live(ResourceKind::Estimator), 0);
        assert_eq!(stats.double_releases(), 0);
        Ok(())
    }
}
