//! Plain value types shared by the records and the native layouts.
//!
//! Every type here is `#[repr(C)]` and laid out exactly as its native
//! counterpart, so slices of them can be handed to the native vectors
//! without conversion.

use serde::{Deserialize, Serialize};

/// A 2d point with single precision coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2f {
    /// x coordinate
    pub x: f32,
    /// y coordinate
    pub y: f32,
}

impl Point2f {
    /// Creates a new point.
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Image size in pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: i32,
    /// Height of the image in pixels
    pub height: i32,
}

impl ImageSize {
    /// Creates a new image size.
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

/// A salient point detected by a feature detector.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    /// Coordinates of the keypoint.
    pub pt: Point2f,
    /// Diameter of the meaningful keypoint neighborhood.
    pub size: f32,
    /// Orientation in degrees, or -1 if not applicable.
    pub angle: f32,
    /// Detector response.
    pub response: f32,
    /// Pyramid octave in which the keypoint was detected.
    pub octave: i32,
    /// Object class, or -1 if not applicable.
    pub class_id: i32,
}

impl KeyPoint {
    /// Creates a keypoint at `pt` with the given size and no orientation.
    pub fn new(pt: Point2f, size: f32) -> Self {
        Self {
            pt,
            size,
            angle: -1.0,
            response: 0.0,
            octave: 0,
            class_id: -1,
        }
    }
}

/// A correspondence between a query descriptor and a train descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DMatch {
    /// Index of the query descriptor.
    pub query_idx: i32,
    /// Index of the train descriptor.
    pub train_idx: i32,
    /// Index of the train image.
    pub img_idx: i32,
    /// Distance between the two descriptors.
    pub distance: f32,
}

impl DMatch {
    /// Creates a correspondence between `query_idx` and `train_idx` of image 0.
    pub fn new(query_idx: i32, train_idx: i32, distance: f32) -> Self {
        Self {
            query_idx,
            train_idx,
            img_idx: -1,
            distance,
        }
    }
}
