use std::fmt;

use crate::error::{Error, Result};

// Shape — N-dimensional shape representation
//
//   - Scalar: Shape([])          — 0 dimensions, 1 element
//   - Vector: Shape([5])         — 1 dimension, 5 elements
//   - Matrix: Shape([3, 4])      — 2 dimensions, 12 elements
//
// Unlike a scalar, a shape containing a zero-sized dimension has no elements.

/// N-dimensional shape of an array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions (0 for scalar, 1 for vector, 2 for matrix, etc.).
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements. A scalar shape [] has 1 element.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product::<usize>()
    }

    /// Contiguous (row-major / C-order) strides for this shape.
    ///
    /// For shape [2, 3, 4], strides are [12, 4, 1].
    pub fn stride_contiguous(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.rank()];
        if self.rank() > 0 {
            strides[self.rank() - 1] = 1;
            for i in (0..self.rank() - 1).rev() {
                strides[i] = strides[i + 1] * self.0[i + 1];
            }
        }
        strides
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> Result<usize> {
        self.0.get(d).copied().ok_or(Error::DimOutOfRange {
            dim: d,
            rank: self.rank(),
        })
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<()> for Shape {
    /// Scalar shape (0 dimensions).
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize,)> for Shape {
    fn from((d0,): (usize,)) -> Self {
        Shape(vec![d0])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(s: [usize; N]) -> Self {
        Shape(s.to_vec())
    }
}

// Axes — the dimensions collapsed by a reduction
//
// Axes are kept sorted ascending: the reduction engine enumerates reduced
// positions row-major over the reduced dimensions in their original order,
// whatever order the caller listed them in.

/// An ordered set of distinct dimension indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Axes(Vec<usize>);

impl Axes {
    /// Validate `axes` against an array of rank `rank`.
    pub fn new(axes: &[usize], rank: usize) -> Result<Self> {
        let mut sorted = axes.to_vec();
        sorted.sort_unstable();
        for w in sorted.windows(2) {
            if w[0] == w[1] {
                return Err(Error::DuplicateAxis { axis: w[0] });
            }
        }
        if let Some(&dim) = sorted.iter().find(|&&a| a >= rank) {
            return Err(Error::DimOutOfRange { dim, rank });
        }
        Ok(Axes(sorted))
    }

    /// Every axis of a rank-`rank` array.
    pub fn all(rank: usize) -> Self {
        Axes((0..rank).collect())
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, axis: usize) -> bool {
        self.0.binary_search(&axis).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Output shape of reducing `shape` over these axes.
    ///
    /// With `keepdims` the reduced dimensions stay as size 1, otherwise they
    /// are dropped.
    pub fn reduced_shape(&self, shape: &Shape, keepdims: bool) -> Shape {
        let dims = shape
            .dims()
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| match (self.contains(i), keepdims) {
                (false, _) => Some(d),
                (true, true) => Some(1),
                (true, false) => None,
            })
            .collect();
        Shape::new(dims)
    }
}

/// Whether `out_shape` is what reducing `in_shape` over `axes` produces,
/// either with reduced dimensions dropped or (if allowed) kept as size 1.
pub fn is_valid_reduction_shape(
    in_shape: &Shape,
    axes: &Axes,
    out_shape: &Shape,
    allow_keepdims: bool,
) -> bool {
    if axes.iter().any(|a| a >= in_shape.rank()) {
        return false;
    }
    if *out_shape == axes.reduced_shape(in_shape, false) {
        return true;
    }
    allow_keepdims && *out_shape == axes.reduced_shape(in_shape, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::from(());
        assert_eq!(s.rank(), 0);
        assert_eq!(s.elem_count(), 1);
        assert_eq!(s.stride_contiguous(), Vec::<usize>::new());
    }

    #[test]
    fn test_empty_shape_has_no_elements() {
        assert_eq!(Shape::from((3, 0)).elem_count(), 0);
    }

    #[test]
    fn test_3d_strides() {
        let s = Shape::from((2, 3, 4));
        assert_eq!(s.stride_contiguous(), vec![12, 4, 1]);
        assert_eq!(s.elem_count(), 24);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Shape::from((3, 4))), "[3, 4]");
    }

    #[test]
    fn test_axes_sorted_and_validated() {
        let axes = Axes::new(&[2, 0], 3).unwrap();
        assert_eq!(axes.as_slice(), &[0, 2]);
        assert!(matches!(
            Axes::new(&[1, 1], 3),
            Err(Error::DuplicateAxis { axis: 1 })
        ));
        assert!(matches!(
            Axes::new(&[3], 3),
            Err(Error::DimOutOfRange { dim: 3, rank: 3 })
        ));
    }

    #[test]
    fn test_reduced_shape() {
        let s = Shape::from((2, 3, 4));
        let axes = Axes::new(&[0, 2], 3).unwrap();
        assert_eq!(axes.reduced_shape(&s, false).dims(), &[3]);
        assert_eq!(axes.reduced_shape(&s, true).dims(), &[1, 3, 1]);
    }

    #[test]
    fn test_valid_reduction_shape() {
        let s = Shape::from((3, 2));
        let axes = Axes::new(&[0], 2).unwrap();
        assert!(is_valid_reduction_shape(&s, &axes, &Shape::from(2), false));
        assert!(!is_valid_reduction_shape(&s, &axes, &Shape::from((1, 2)), false));
        assert!(is_valid_reduction_shape(&s, &axes, &Shape::from((1, 2)), true));
        assert!(!is_valid_reduction_shape(&s, &axes, &Shape::from(3), true));
    }
}
