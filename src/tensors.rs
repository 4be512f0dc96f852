//! Core tensor data structures.
//!
//! # Device-Backed Tensors
//!
//! This module defines the typed, shaped array abstraction every operator
//! runs against, regardless of which backend executes it.
//!
//! It supports:
//! - Construction of N-dimensional tensors with shape and row-major data layout
//! - Backend-opaque backing storage: a linear host buffer, a device-side
//!   linear buffer, or a device-side 2-D image
//! - In-place repopulation between graph runs when the shape is unchanged
//! - Compile-time tensor literals via the `tensor!` macro
//!
//! ## Design Highlights
//! - Shape is stored as a `Vec<usize>` and immutable once bound to a buffer
//!   of matching element count
//! - The element data type is fixed at construction
//! - Operator logic above this module never inspects the concrete storage;
//!   each backend matches [`TensorStorage`] against the one representation
//!   it knows how to drive, and that match is a caller invariant
//!
//! ## Limitations
//! - Row-major only
//! - No broadcasting, slicing, or shape inference
//!
//! ## Example
//!
//! ```rust
//! use corten::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape(), &[2, 3]);
//! assert_eq!(t.dim(1).unwrap(), 3);
//! ```

use crate::error::{EngineError, Result};

/// Element data types a tensor can carry.
///
/// Kernel build signatures include the data type, so it must stay cheap to
/// hash and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// 32-bit IEEE float (the only type the kernels currently ship for).
    #[default]
    F32,
}

impl DataType {
    /// Size in bytes of one element.
    pub fn size_of(self) -> usize {
        match self {
            DataType::F32 => 4,
        }
    }
}

/// The opaque backing handle behind a tensor.
///
/// Backend code casts this to the one representation it expects; the
/// type-safety of that expectation is the caller's invariant, which is why
/// the accessors return `Option` rather than panicking.
#[derive(Debug)]
pub enum TensorStorage {
    /// Linear host memory, row-major (CPU and SIMD backends).
    Host(Vec<f32>),
    /// Device-resident linear buffer (GPU backend).
    #[cfg(feature = "wgpu")]
    DeviceBuffer(std::sync::Arc<wgpu::Buffer>),
    /// Device-resident 2-D image (GPU backend, image-layout operators).
    #[cfg(feature = "wgpu")]
    DeviceImage {
        /// The backing texture.
        texture: std::sync::Arc<wgpu::Texture>,
        /// Image width in texels.
        width: u32,
        /// Image height in texels.
        height: u32,
    },
}

/// An N-dimensional tensor: element type, shape, and backend-opaque storage.
///
/// The shape is immutable once the tensor is bound to a buffer of matching
/// total element count; repopulation between runs happens in place.
#[derive(Debug)]
pub struct Tensor {
    dtype: DataType,
    shape: Vec<usize>,
    storage: TensorStorage,
}

impl Tensor {
    /// Creates a host-resident `F32` tensor with the given shape and data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape
    /// product. Mismatched construction is a programmer error, not a
    /// runtime condition.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<f32>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self {
            dtype: DataType::F32,
            shape,
            storage: TensorStorage::Host(data),
        }
    }

    /// Creates a zero-filled host tensor, typically as an operator output
    /// slot sized by shape inference.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Tensor::new(shape, vec![0.0; len])
    }

    /// Wraps an existing storage handle. Used by layout-conversion helpers
    /// that materialize device-resident tensors.
    ///
    /// # Panics
    /// Panics if `storage` is host-backed and its length does not match
    /// the shape product.
    pub fn from_storage(
        shape: impl Into<Vec<usize>>,
        dtype: DataType,
        storage: TensorStorage,
    ) -> Self {
        let shape = shape.into();
        match &storage {
            TensorStorage::Host(data) => assert_eq!(
                shape.iter().product::<usize>(),
                data.len(),
                "shape/buffer mismatch"
            ),
            #[cfg(feature = "wgpu")]
            _ => {}
        }
        Self { dtype, shape, storage }
    }

    /// The element data type.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// The full shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Whether the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of dimension `i`.
    pub fn dim(&self, i: usize) -> Result<usize> {
        self.shape.get(i).copied().ok_or(EngineError::DimOutOfRange {
            index: i,
            rank: self.shape.len(),
        })
    }

    /// The opaque backing handle.
    pub fn storage(&self) -> &TensorStorage {
        &self.storage
    }

    /// Host-side view of the data, if host-resident.
    pub fn host_data(&self) -> Option<&[f32]> {
        match &self.storage {
            TensorStorage::Host(data) => Some(data),
            #[cfg(feature = "wgpu")]
            _ => None,
        }
    }

    /// Mutable host-side view of the data, if host-resident.
    pub fn host_data_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.storage {
            TensorStorage::Host(data) => Some(data),
            #[cfg(feature = "wgpu")]
            _ => None,
        }
    }

    /// Repopulates this tensor in place from another tensor of identical
    /// shape. Reallocation only ever happens on shape change, which is the
    /// graph's responsibility, so a mismatch here is a graph bug.
    pub fn update(&mut self, mut other: Tensor) -> Result<()> {
        if self.shape != other.shape {
            return Err(EngineError::ShapeMismatch(format!(
                "cannot repopulate {:?} from {:?}",
                self.shape, other.shape
            )));
        }
        std::mem::swap(&mut self.storage, &mut other.storage);
        Ok(())
    }
}

/// Defines a host tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in
/// shape.
///
/// # Example
/// ```
/// use corten::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape(), &[2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = children[0].shape().to_vec();
        assert!(children.iter().all(|c| c.shape() == first_shape.as_slice()),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(&first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].len());
        for c in &children { data.extend_from_slice(c.host_data().unwrap()); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}
