use crate::{
    backend::NativeBackend,
    error::StitchingError,
    ffi::WImageFeatures,
    mat::Mat,
    types::{ImageSize, KeyPoint},
    vector::VectorOfKeyPoint,
};

/// Features of one image: keypoints and their descriptors.
#[derive(Debug, Clone)]
pub struct ImageFeatures<B: NativeBackend> {
    /// Index of the image.
    pub img_idx: i32,
    /// Size of the image.
    pub img_size: ImageSize,
    /// Detected keypoints.
    pub keypoints: Vec<KeyPoint>,
    /// Descriptor matrix, one row per keypoint.
    pub descriptors: Mat<B>,
}

impl<B: NativeBackend> ImageFeatures<B> {
    /// Creates a new features record.
    pub fn new(
        img_idx: i32,
        img_size: ImageSize,
        keypoints: Vec<KeyPoint>,
        descriptors: Mat<B>,
    ) -> Self {
        Self {
            img_idx,
            img_size,
            keypoints,
            descriptors,
        }
    }

    /// Builds the interop view of this record.
    ///
    /// `keypoints` is the proxy holding a copy of [`ImageFeatures::keypoints`];
    /// the descriptors are borrowed.
    pub(crate) fn to_interop(
        &self,
        keypoints: &VectorOfKeyPoint<B>,
    ) -> Result<WImageFeatures, StitchingError> {
        Ok(WImageFeatures {
            img_idx: self.img_idx,
            img_size: self.img_size,
            keypoints: keypoints.as_raw(),
            descriptors: self.descriptors.handle()?,
        })
    }
}
