use crate::{
    backend::NativeBackend,
    error::StitchingError,
    ffi::WMatchesInfo,
    mat::Mat,
    types::DMatch,
    vector::{VectorOfByte, VectorOfDMatch},
};

/// Matches between a pair of images.
///
/// `inliers_mask` is either empty (no geometric verification was run) or
/// holds one entry per element of `matches`, non-zero for inliers.
#[derive(Debug, Clone)]
pub struct MatchesInfo<B: NativeBackend> {
    /// Index of the source image.
    pub src_img_idx: i32,
    /// Index of the destination image.
    pub dst_img_idx: i32,
    /// Descriptor correspondences.
    pub matches: Vec<DMatch>,
    /// Geometrically consistent matches mask.
    pub inliers_mask: Vec<u8>,
    /// Number of geometrically consistent matches.
    pub num_inliers: i32,
    /// Estimated transformation.
    pub h: Mat<B>,
    /// Confidence that the two images are from the same panorama.
    pub confidence: f64,
}

impl<B: NativeBackend> MatchesInfo<B> {
    /// Creates a new matches record.
    ///
    /// # Errors
    ///
    /// Returns an error if the inliers mask is neither empty nor as long as `matches`.
    pub fn new(
        src_img_idx: i32,
        dst_img_idx: i32,
        matches: Vec<DMatch>,
        inliers_mask: Vec<u8>,
        num_inliers: i32,
        h: Mat<B>,
        confidence: f64,
    ) -> Result<Self, StitchingError> {
        let info = Self {
            src_img_idx,
            dst_img_idx,
            matches,
            inliers_mask,
            num_inliers,
            h,
            confidence,
        };
        info.check_inliers_mask()?;
        Ok(info)
    }

    /// Checks that the inliers mask is empty or parallel to the matches.
    pub fn check_inliers_mask(&self) -> Result<(), StitchingError> {
        if !self.inliers_mask.is_empty() && self.inliers_mask.len() != self.matches.len() {
            return Err(StitchingError::InvalidArgument(format!(
                "inliers mask length ({}) does not match the number of matches ({}) for pair {}->{}",
                self.inliers_mask.len(),
                self.matches.len(),
                self.src_img_idx,
                self.dst_img_idx
            )));
        }
        Ok(())
    }

    /// Iterates over the matches flagged as inliers.
    pub fn inliers(&self) -> impl Iterator<Item = &DMatch> + '_ {
        self.matches
            .iter()
            .zip(&self.inliers_mask)
            .filter(|(_, m)| **m != 0)
            .map(|(d, _)| d)
    }

    /// Builds the interop view of this record from its proxies.
    ///
    /// The homography matrix is borrowed.
    pub(crate) fn to_interop(
        &self,
        matches: &VectorOfDMatch<B>,
        inliers_mask: &VectorOfByte<B>,
    ) -> Result<WMatchesInfo, StitchingError> {
        Ok(WMatchesInfo {
            src_img_idx: self.src_img_idx,
            dst_img_idx: self.dst_img_idx,
            matches: matches.as_raw(),
            inliers_mask: inliers_mask.as_raw(),
            num_inliers: self.num_inliers,
            h: self.h.handle()?,
            confidence: self.confidence,
        })
    }

    /// Builds a record from an interop view filled by the native library.
    ///
    /// `h` must be the matrix whose handle was placed into `record.h`.
    pub(crate) fn from_interop(
        record: &WMatchesInfo,
        matches: Vec<DMatch>,
        inliers_mask: Vec<u8>,
        h: Mat<B>,
    ) -> Result<Self, StitchingError> {
        if h.handle()? != record.h {
            return Err(StitchingError::InvalidArgument(
                "homography handle does not belong to the interop record".to_string(),
            ));
        }
        Self::new(
            record.src_img_idx,
            record.dst_img_idx,
            matches,
            inliers_mask,
            record.num_inliers,
            h,
            record.confidence,
        )
    }
}
