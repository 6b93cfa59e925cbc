//! Pairwise feature matchers.

use serde::{Deserialize, Serialize};

use crate::{
    backend::NativeBackend, error::StitchingError, features::ImageFeatures, ffi::RawHandle,
    marshal, matches::MatchesInfo,
};

mod private {
    pub trait Sealed {}
}

/// A native features matcher.
///
/// Sealed for the same reason as [`crate::estimator::Estimator`]: the handle
/// returned by [`FeaturesMatcher::as_raw`] reaches the backend unchecked.
///
/// ```compile_fail
/// use kornia_stitching::{ffi::RawHandle, FeaturesMatcher, MemoryBackend};
///
/// struct Dangling(MemoryBackend);
///
/// impl FeaturesMatcher<MemoryBackend> for Dangling {
///     fn backend(&self) -> &MemoryBackend {
///         &self.0
///     }
///
///     fn as_raw(&self) -> RawHandle {
///         0xdead as RawHandle
///     }
/// }
/// ```
pub trait FeaturesMatcher<B: NativeBackend>: private::Sealed {
    /// The backend owning the native matcher.
    fn backend(&self) -> &B;

    /// The native matcher handle.
    fn as_raw(&self) -> RawHandle;

    /// Matches the features of two images.
    ///
    /// The returned record owns a freshly allocated homography matrix.
    fn apply(
        &self,
        features1: &ImageFeatures<B>,
        features2: &ImageFeatures<B>,
    ) -> Result<MatchesInfo<B>, StitchingError> {
        marshal::match_pair(self.backend(), self.as_raw(), features1, features2)
    }

    /// Matches the features of every pair of images.
    ///
    /// # Errors
    ///
    /// Returns [`StitchingError::InvalidArgument`] if `features` is empty.
    fn apply2(&self, features: &[ImageFeatures<B>]) -> Result<Vec<MatchesInfo<B>>, StitchingError> {
        marshal::match_all(self.backend(), self.as_raw(), features)
    }

    /// Frees unused memory allocated by the matcher.
    fn collect_garbage(&self) -> Result<(), StitchingError> {
        Ok(self
            .backend()
            .features_matcher_collect_garbage(self.as_raw())?)
    }
}

/// Configuration of a [`BestOf2NearestMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BestOf2NearestMatcherConfig {
    /// Try to use the GPU if available.
    pub try_use_gpu: bool,
    /// Confidence for the two nearest neighbors ratio test.
    pub match_conf: f32,
    /// Minimum number of matches required for the 2d projective transform estimation.
    pub num_matches_thresh1: i32,
    /// Minimum number of matches required for the 2d projective transform re-estimation on inliers.
    pub num_matches_thresh2: i32,
}

impl Default for BestOf2NearestMatcherConfig {
    fn default() -> Self {
        Self {
            try_use_gpu: false,
            match_conf: 0.3,
            num_matches_thresh1: 6,
            num_matches_thresh2: 6,
        }
    }
}

/// Features matcher which finds the two best matches for each feature and
/// keeps the best one only if the ratio between the descriptor distances is
/// greater than the threshold `match_conf`.
pub struct BestOf2NearestMatcher<B: NativeBackend> {
    handle: RawHandle,
    backend: B,
    config: BestOf2NearestMatcherConfig,
}

impl<B: NativeBackend> BestOf2NearestMatcher<B> {
    /// Creates a best-of-2-nearest matcher.
    pub fn new(backend: &B, config: BestOf2NearestMatcherConfig) -> Result<Self, StitchingError> {
        if !(config.match_conf > 0.0 && config.match_conf < 1.0) {
            return Err(StitchingError::InvalidArgument(format!(
                "match_conf must be in (0, 1), got {}",
                config.match_conf
            )));
        }
        let handle = backend.best_of2_nearest_matcher_new(&config)?;
        log::debug!("created best-of-2-nearest matcher {handle:?} with {config:?}");
        Ok(Self {
            handle,
            backend: backend.clone(),
            config,
        })
    }

    /// Returns the configuration the matcher was created with.
    pub fn config(&self) -> &BestOf2NearestMatcherConfig {
        &self.config
    }
}

impl<B: NativeBackend> private::Sealed for BestOf2NearestMatcher<B> {}

impl<B: NativeBackend> FeaturesMatcher<B> for BestOf2NearestMatcher<B> {
    fn backend(&self) -> &B {
        &self.backend
    }

    fn as_raw(&self) -> RawHandle {
        self.handle
    }
}

impl<B: NativeBackend> Drop for BestOf2NearestMatcher<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.best_of2_nearest_matcher_delete(self.handle) {
            log::warn!("failed to release matcher {:?}: {e}", self.handle);
        }
    }
}
