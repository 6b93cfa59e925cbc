//! Reference-counted ownership of native matrices.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{backend::NativeBackend, error::StitchingError, ffi::RawHandle};

/// Row-major contents of a matrix, copied out of the native domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatData {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// Row-major elements, `rows * cols` long.
    pub data: Vec<f64>,
}

impl MatData {
    /// Creates matrix contents from row-major data.
    ///
    /// # Errors
    ///
    /// Returns an error if `rows * cols` overflows or differs from `data.len()`.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, StitchingError> {
        if element_count(rows, cols)? != data.len() {
            return Err(StitchingError::InvalidArgument(format!(
                "matrix data length ({}) does not match the shape {}x{}",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// An empty matrix, as produced by a default constructed native matrix.
    pub fn empty() -> Self {
        Self {
            rows: 0,
            cols: 0,
            data: Vec::new(),
        }
    }

    /// A `rows x cols` matrix of zeros.
    ///
    /// # Errors
    ///
    /// Returns an error if `rows * cols` overflows.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self, StitchingError> {
        Ok(Self {
            rows,
            cols,
            data: vec![0.0; element_count(rows, cols)?],
        })
    }

    /// The `n x n` identity matrix.
    ///
    /// # Errors
    ///
    /// Returns an error if `n * n` overflows.
    pub fn eye(n: usize) -> Result<Self, StitchingError> {
        let mut m = Self::zeros(n, n)?;
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        Ok(m)
    }

    /// Returns true if `data` holds exactly `rows * cols` elements.
    ///
    /// The fields are public, so backends check this before trusting the shape.
    pub fn is_consistent(&self) -> bool {
        self.rows.checked_mul(self.cols) == Some(self.data.len())
    }

    /// Returns true if the matrix has no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the element at `(row, col)`, if in bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        row.checked_mul(self.cols)
            .and_then(|i| i.checked_add(col))
            .and_then(|i| self.data.get(i))
            .copied()
    }
}

fn element_count(rows: usize, cols: usize) -> Result<usize, StitchingError> {
    rows.checked_mul(cols).ok_or_else(|| {
        StitchingError::InvalidArgument(format!("matrix shape {rows}x{cols} is too large"))
    })
}

/// Native matrix handle together with the backend that deletes it.
struct MatImpl<B: NativeBackend> {
    handle: RawHandle,
    backend: B,
}

impl<B: NativeBackend> Drop for MatImpl<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.mat_delete(self.handle) {
            log::warn!("failed to release matrix {:?}: {e}", self.handle);
        }
    }
}

// SAFETY: the handle is only dereferenced by the native library, which does
// not tie matrices to the thread that created them. The backend must itself
// be Send/Sync for the impls to apply.
unsafe impl<B: NativeBackend + Send> Send for MatImpl<B> {}

// SAFETY: shared access never mutates the matrix through `&self`.
unsafe impl<B: NativeBackend + Sync> Sync for MatImpl<B> {}

/// An owned native matrix.
///
/// Cloning a `Mat` shares the underlying native matrix: the native resource
/// is deleted when the last clone is dropped or released. Use
/// [`Mat::deep_clone`] to copy the contents into a new native matrix.
pub struct Mat<B: NativeBackend> {
    inner: Option<Arc<MatImpl<B>>>,
}

impl<B: NativeBackend> Mat<B> {
    /// Allocates an empty native matrix.
    pub fn new(backend: &B) -> Result<Self, StitchingError> {
        let handle = backend.mat_new()?;
        // SAFETY: the handle was just allocated by this backend and is owned by nobody else.
        Ok(unsafe { Self::from_raw(backend.clone(), handle) })
    }

    /// Allocates a native matrix holding a copy of `data`.
    pub fn from_data(backend: &B, data: &MatData) -> Result<Self, StitchingError> {
        let handle = backend.mat_from_data(data)?;
        // SAFETY: the handle was just allocated by this backend and is owned by nobody else.
        Ok(unsafe { Self::from_raw(backend.clone(), handle) })
    }

    /// Allocates the `n x n` identity matrix.
    pub fn eye(backend: &B, n: usize) -> Result<Self, StitchingError> {
        Self::from_data(backend, &MatData::eye(n)?)
    }

    /// Allocates a `rows x cols` matrix of zeros.
    pub fn zeros(backend: &B, rows: usize, cols: usize) -> Result<Self, StitchingError> {
        Self::from_data(backend, &MatData::zeros(rows, cols)?)
    }

    /// Takes ownership of a raw native matrix handle.
    ///
    /// # Safety
    ///
    /// `handle` must be a live matrix allocated by `backend` and must not be
    /// owned by any other wrapper.
    pub(crate) unsafe fn from_raw(backend: B, handle: RawHandle) -> Self {
        Self {
            inner: Some(Arc::new(MatImpl { handle, backend })),
        }
    }

    /// Returns the native handle of the matrix.
    ///
    /// # Errors
    ///
    /// Returns [`StitchingError::ResourceAlreadyReleased`] if this matrix was released.
    pub fn handle(&self) -> Result<RawHandle, StitchingError> {
        self.inner
            .as_ref()
            .map(|inner| inner.handle)
            .ok_or(StitchingError::ResourceAlreadyReleased("matrix"))
    }

    /// Copies the contents of the matrix.
    pub fn data(&self) -> Result<MatData, StitchingError> {
        let inner = self
            .inner
            .as_ref()
            .ok_or(StitchingError::ResourceAlreadyReleased("matrix"))?;
        Ok(inner.backend.mat_data(inner.handle)?)
    }

    /// Returns true if this matrix was released.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Returns true if no other clone shares the native matrix.
    #[inline]
    pub fn is_unique(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| Arc::strong_count(inner) == 1)
    }

    /// Returns true if both wrappers refer to the same live native matrix.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Gives up this wrapper's ownership of the native matrix.
    ///
    /// The native matrix is deleted once no clone refers to it anymore.
    ///
    /// # Errors
    ///
    /// Returns [`StitchingError::ResourceAlreadyReleased`] if called twice.
    pub fn release(&mut self) -> Result<(), StitchingError> {
        match self.inner.take() {
            Some(inner) => {
                drop(inner);
                Ok(())
            }
            None => Err(StitchingError::ResourceAlreadyReleased("matrix")),
        }
    }

    /// Copies the matrix into a new, independently owned native matrix.
    pub fn deep_clone(&self) -> Result<Self, StitchingError> {
        let inner = self
            .inner
            .as_ref()
            .ok_or(StitchingError::ResourceAlreadyReleased("matrix"))?;
        let data = inner.backend.mat_data(inner.handle)?;
        Self::from_data(&inner.backend, &data)
    }
}

impl<B: NativeBackend> Clone for Mat<B> {
    /// Shares the native matrix by incrementing the reference count.
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: NativeBackend> std::fmt::Debug for Mat<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("Mat")
                .field("handle", &inner.handle)
                .field("refs", &Arc::strong_count(inner))
                .finish(),
            None => f.write_str("Mat(released)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, ResourceKind};

    #[test]
    fn test_mat_data_shape_mismatch() {
        let res = MatData::new(2, 2, vec![1.0; 3]);
        assert!(matches!(res, Err(StitchingError::InvalidArgument(_))));
    }

    #[test]
    fn test_mat_data_shape_overflow() {
        let res = MatData::new(usize::MAX, 2, vec![]);
        assert!(matches!(res, Err(StitchingError::InvalidArgument(_))));
        assert!(MatData::zeros(usize::MAX, 2).is_err());
        assert!(MatData::eye(usize::MAX).is_err());

        let data = MatData {
            rows: usize::MAX,
            cols: 2,
            data: vec![1.0],
        };
        assert!(!data.is_consistent());
        assert_eq!(data.get(usize::MAX - 1, 1), None);
    }

    #[test]
    fn test_mat_from_inconsistent_data() {
        let backend = MemoryBackend::new();
        let data = MatData {
            rows: 1,
            cols: 1,
            data: vec![0.0; 64],
        };
        assert!(matches!(
            Mat::from_data(&backend, &data),
            Err(StitchingError::NativeFailure { .. })
        ));
        assert_eq!(backend.stats().allocated(ResourceKind::Mat), 0);
    }

    #[test]
    fn test_mat_roundtrip() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let data = MatData::new(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;
        let mat = Mat::from_data(&backend, &data)?;
        assert_eq!(mat.data()?, data);
        assert_eq!(mat.data()?.get(1, 2), Some(6.0));
        Ok(())
    }

    #[test]
    fn test_mat_release_twice() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let mut mat = Mat::eye(&backend, 3)?;
        mat.release()?;
        assert!(mat.is_released());
        assert_eq!(
            mat.release(),
            Err(StitchingError::ResourceAlreadyReleased("matrix"))
        );
        assert!(matches!(
            mat.handle(),
            Err(StitchingError::ResourceAlreadyReleased(_))
        ));
        let stats = backend.stats();
        assert_eq!(stats.released(ResourceKind::Mat), 1);
        assert_eq!(stats.double_releases(), 0);
        Ok(())
    }

    #[test]
    fn test_mat_shared_clone_deletes_once() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let mat = Mat::eye(&backend, 3)?;
        let handle = mat.handle()?;
        let mut shared = mat.clone();
        assert!(shared.ptr_eq(&mat));
        assert!(!mat.is_unique());

        shared.release()?;
        assert!(!backend.is_released(handle));
        assert!(mat.is_unique());

        drop(mat);
        assert!(backend.is_released(handle));
        assert_eq!(backend.stats().released(ResourceKind::Mat), 1);
        Ok(())
    }

    #[test]
    fn test_mat_deep_clone() -> Result<(), StitchingError> {
        let backend = MemoryBackend::new();
        let mat = Mat::eye(&backend, 3)?;
        let copy = mat.deep_clone()?;
        assert!(!copy.ptr_eq(&mat));
        assert_ne!(copy.handle()?, mat.handle()?);
        assert_eq!(copy.data()?, mat.data()?);
        Ok(())
    }
}
