use kornia_stitching::backend::memory::{MatchesData, MemoryBackend, ResourceKind};
use kornia_stitching::{
    BestOf2NearestMatcher, BestOf2NearestMatcherConfig, DMatch, FeaturesMatcher, ImageFeatures,
    ImageSize, KeyPoint, Mat, MatData, NativeError, Point2f, StitchingError,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn make_features(
    backend: &MemoryBackend,
    n: usize,
) -> Result<Vec<ImageFeatures<MemoryBackend>>, StitchingError> {
    (0..n)
        .map(|i| {
            let keypoints = (0..=i)
                .map(|k| KeyPoint::new(Point2f::new(k as f32, 0.0), 1.0))
                .collect();
            Ok(ImageFeatures::new(
                i as i32,
                ImageSize::new(320, 240),
                keypoints,
                Mat::from_data(backend, &MatData::zeros(i + 1, 32)?)?,
            ))
        })
        .collect()
}

/// Matches keypoint `k` of the first image with keypoint `k` of the second.
fn match_by_index() -> MemoryBackend {
    MemoryBackend::new().with_match_fn(|f1, f2| {
        let n = f1.keypoints.len().min(f2.keypoints.len());
        let matches = (0..n as i32).map(|k| DMatch::new(k, k, 0.1)).collect();
        Ok(MatchesData {
            src_img_idx: f1.img_idx,
            dst_img_idx: f2.img_idx,
            matches,
            inliers_mask: vec![1; n],
            num_inliers: n as i32,
            h: MatData::new(3, 3, vec![1.0, 0.0, 5.0, 0.0, 1.0, -3.0, 0.0, 0.0, 1.0])
                .map_err(|e| NativeError::new("test", -1, e.to_string()))?,
            confidence: n as f64 / 10.0,
        })
    })
}

#[test]
fn apply_reads_back_pairwise_result() -> Result<(), StitchingError> {
    init_logger();
    let backend = match_by_index();
    let matcher = BestOf2NearestMatcher::new(&backend, Default::default())?;
    let features = make_features(&backend, 3)?;
    let live_mats = backend.stats().live(ResourceKind::Mat);

    let info = matcher.apply(&features[1], &features[2])?;
    assert_eq!(info.src_img_idx, 1);
    assert_eq!(info.dst_img_idx, 2);
    assert_eq!(info.matches.len(), 2);
    assert_eq!(info.inliers().count(), 2);
    assert_eq!(info.num_inliers, 2);
    approx::assert_relative_eq!(info.confidence, 0.2);
    assert_eq!(info.h.data()?.get(0, 2), Some(5.0));

    let stats = backend.stats();
    // the homography is the only new resource still alive
    assert_eq!(stats.live(ResourceKind::Mat), live_mats + 1);
    assert_eq!(stats.live(ResourceKind::KeyPointVector), 0);
    assert_eq!(stats.live(ResourceKind::DMatchVector), 0);
    assert_eq!(stats.live(ResourceKind::ByteVector), 0);
    Ok(())
}

#[test]
fn apply_native_failure_releases_everything() -> Result<(), StitchingError> {
    init_logger();
    let backend = MemoryBackend::new().with_match_fn(|_, _| {
        Err(NativeError::new(
            "stitching_FeaturesMatcher_apply",
            2,
            "descriptor type mismatch",
        ))
    });
    let matcher = BestOf2NearestMatcher::new(&backend, Default::default())?;
    let features = make_features(&backend, 2)?;
    let live_mats = backend.stats().live(ResourceKind::Mat);

    let res = matcher.apply(&features[0], &features[1]);
    assert!(matches!(
        res,
        Err(StitchingError::NativeFailure { code: 2, .. })
    ));

    let stats = backend.stats();
    assert_eq!(stats.live(ResourceKind::Mat), live_mats);
    assert_eq!(stats.live(ResourceKind::KeyPointVector), 0);
    assert_eq!(stats.live(ResourceKind::DMatchVector), 0);
    assert_eq!(stats.live(ResourceKind::ByteVector), 0);
    assert_eq!(stats.double_releases(), 0);
    Ok(())
}

#[test]
fn apply2_matches_every_ordered_pair() -> Result<(), StitchingError> {
    init_logger();
    let backend = match_by_index();
    let matcher = BestOf2NearestMatcher::new(&backend, Default::default())?;
    let features = make_features(&backend, 3)?;

    let pairwise = matcher.apply2(&features)?;
    assert_eq!(pairwise.len(), 9);
    for (idx, info) in pairwise.iter().enumerate() {
        let (i, j) = (idx / 3, idx % 3);
        if i == j {
            assert_eq!(info.src_img_idx, -1);
            assert!(info.matches.is_empty());
        } else {
            assert_eq!(info.src_img_idx, i as i32);
            assert_eq!(info.dst_img_idx, j as i32);
            assert_eq!(info.matches.len(), i.min(j) + 1);
        }
    }

    let stats = backend.stats();
    assert_eq!(stats.live(ResourceKind::MatchesInfoVector), 0);
    assert_eq!(stats.live(ResourceKind::DMatchVector), 0);
    assert_eq!(stats.live(ResourceKind::ByteVector), 0);
    Ok(())
}

#[test]
fn apply2_without_match_fn_returns_empty_matches() -> Result<(), StitchingError> {
    let backend = MemoryBackend::new();
    let matcher = BestOf2NearestMatcher::new(&backend, Default::default())?;
    let features = make_features(&backend, 2)?;

    let pairwise = matcher.apply2(&features)?;
    assert_eq!(pairwise.len(), 4);
    assert_eq!(pairwise[1].src_img_idx, 0);
    assert_eq!(pairwise[1].dst_img_idx, 1);
    assert_eq!(pairwise[1].confidence, 0.0);
    assert_eq!(pairwise[1].h.data()?, MatData::eye(3)?);
    Ok(())
}

#[test]
fn apply2_rejects_empty_features() -> Result<(), StitchingError> {
    let backend = MemoryBackend::new();
    let matcher = BestOf2NearestMatcher::new(&backend, Default::default())?;
    assert!(matches!(
        matcher.apply2(&[]),
        Err(StitchingError::InvalidArgument(_))
    ));
    assert_eq!(backend.stats().allocated(ResourceKind::MatchesInfoVector), 0);
    Ok(())
}

#[test]
fn collect_garbage_and_drop() -> Result<(), StitchingError> {
    let backend = MemoryBackend::new();
    let config = BestOf2NearestMatcherConfig {
        match_conf: 0.65,
        ..Default::default()
    };
    let matcher = BestOf2NearestMatcher::new(&backend, config)?;
    matcher.collect_garbage()?;
    assert_eq!(matcher.config().match_conf, 0.65);
    drop(matcher);
    assert_eq!(backend.stats().live(ResourceKind::Matcher), 0);
    Ok(())
}
