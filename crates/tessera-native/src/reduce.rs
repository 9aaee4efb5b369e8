use rayon::prelude::*;

use tessera_core::shape::is_valid_reduction_shape;
use tessera_core::{Array, Axes, Device, Result, WithDType};

use crate::config::NativeConfig;

// Reduction engine
//
// Every native reduction is described by four hooks and run by `reduce`:
//
//   out[o] = map_out( fold(reduce, identity, map_in(a[i], j) for each i in group(o)) )
//
// where group(o) is the set of input positions that collapse onto output
// position o, enumerated row-major over the reduced axes (ascending), and j is
// the position within that enumeration. For a (3, 2) input reduced over axis
// 0, j is the row number.
//
// The input layout is split into two products of axes: the kept axes (one
// element per output position) and the reduced axes (one element per group
// member). Neither is materialized. An output position's base offset is
// computed from its linear index, and its group is walked with an odometer
// over the reduced axes, so the engine holds O(rank) state per fold. Output
// positions are independent folds, which lets large reductions fan out across
// the rayon pool without changing the fold order inside a group.

/// The four hooks of a reduction.
pub trait ReductionImpl: Sync {
    type In: WithDType;
    type Out: WithDType;
    type Accum: Copy + Send;

    /// Whether reduced dimensions may be kept as size 1 in the output.
    const ALLOW_KEEPDIMS: bool = true;

    /// Whether a reduced axis may have size 0 (the output is then `identity`).
    const ALLOW_EMPTY: bool = true;

    fn identity(&self) -> Self::Accum;

    fn map_in(&self, value: Self::In, index: i64) -> Self::Accum;

    fn reduce(&self, next: Self::Accum, accum: &mut Self::Accum);

    fn map_out(&self, accum: Self::Accum) -> Self::Out;
}

/// The Cartesian product of some axes of a layout, row-major.
#[derive(Debug, Clone)]
struct AxisProduct {
    dims: Vec<usize>,
    strides: Vec<usize>,
}

impl AxisProduct {
    fn len(&self) -> usize {
        self.dims.iter().product()
    }

    /// Storage offset (relative to the layout offset) of element `index`.
    fn offset_of(&self, mut index: usize) -> usize {
        let mut offset = 0;
        for (&dim, &stride) in self.dims.iter().zip(&self.strides).rev() {
            offset += (index % dim) * stride;
            index /= dim;
        }
        offset
    }

    fn offsets(&self) -> ProductOffsets<'_> {
        ProductOffsets {
            product: self,
            current: vec![0; self.dims.len()],
            offset: 0,
            remaining: self.len(),
            started: false,
        }
    }
}

/// Odometer over an [`AxisProduct`], yielding relative storage offsets.
struct ProductOffsets<'a> {
    product: &'a AxisProduct,
    current: Vec<usize>,
    offset: usize,
    remaining: usize,
    started: bool,
}

impl ProductOffsets<'_> {
    /// Advance by one element (rightmost axis first), updating the offset in place.
    fn advance(&mut self) {
        let product = self.product;
        let (dims, strides) = (&product.dims, &product.strides);
        for i in (0..dims.len()).rev() {
            self.current[i] += 1;
            if self.current[i] < dims[i] {
                self.offset += strides[i];
                return;
            }
            self.current[i] = 0;
            self.offset -= (dims[i] - 1) * strides[i];
        }
    }
}

impl Iterator for ProductOffsets<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        if self.started {
            self.advance();
        }
        self.started = true;
        self.remaining -= 1;
        Some(self.offset)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

/// Run `imp` over `a`, reducing `axes`, into the preallocated `out`.
///
/// # Panics
/// On programming errors: an axis out of range, an output shape that is not
/// the reduced shape, dtypes that do not match the hooks, an empty reduced
/// axis where `ALLOW_EMPTY` is false, or `out` sharing its buffer with `a`.
pub fn reduce<R: ReductionImpl>(
    a: &Array,
    axes: &Axes,
    out: &Array,
    imp: &R,
    config: &NativeConfig,
) -> Result<()> {
    Device::Native.check_compatible(&[a, out])?;

    assert!(
        is_valid_reduction_shape(a.shape(), axes, out.shape(), R::ALLOW_KEEPDIMS),
        "invalid reduction: {} over axes {:?} into {}",
        a.shape(),
        axes.as_slice(),
        out.shape()
    );
    assert_eq!(a.dtype(), R::In::DTYPE, "input dtype");
    assert_eq!(out.dtype(), R::Out::DTYPE, "output dtype");
    assert!(!a.shares_storage(out), "reduction output aliases its input");
    if !R::ALLOW_EMPTY {
        for axis in axes.iter() {
            assert!(a.dims()[axis] > 0, "cannot reduce over zero-sized axis {axis}");
        }
    }

    let layout = a.layout();
    let mut kept = AxisProduct { dims: Vec::new(), strides: Vec::new() };
    let mut reduced = AxisProduct { dims: Vec::new(), strides: Vec::new() };
    for (i, (&dim, &stride)) in layout.dims().iter().zip(layout.strides()).enumerate() {
        let part = if axes.contains(i) { &mut reduced } else { &mut kept };
        part.dims.push(dim);
        part.strides.push(stride);
    }
    let (outputs, group) = (kept.len(), reduced.len());
    debug_assert_eq!(outputs, out.elem_count());

    let storage = a.storage();
    let input = storage.as_host()?.as_slice::<R::In>()?;
    let base = layout.offset();

    let fold = |k: usize| -> R::Out {
        let start = base + kept.offset_of(k);
        let mut accum = imp.identity();
        for (j, r) in reduced.offsets().enumerate() {
            imp.reduce(imp.map_in(input[start + r], j as i64), &mut accum);
        }
        imp.map_out(accum)
    };

    let work = outputs.saturating_mul(group);
    let results: Vec<R::Out> = if outputs > 1 && work >= config.parallel_threshold {
        log::trace!("parallel reduction: {outputs} outputs x {group} elements");
        (0..outputs).into_par_iter().map(fold).collect()
    } else {
        (0..outputs).map(fold).collect()
    };
    drop(storage);

    write_logical(out, &results)
}

/// Write `values` into `out` in logical (row-major) order.
pub(crate) fn write_logical<T: WithDType>(out: &Array, values: &[T]) -> Result<()> {
    assert_eq!(values.len(), out.elem_count());
    let mut storage = out.storage_mut();
    let data = storage.as_host_mut()?.as_mut_slice::<T>()?;
    for (idx, &v) in out.layout().strided_indices().zip(values) {
        data[idx] = v;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::marker::PhantomData;
    use tessera_core::DType;

    /// Records `index * 10 + value` sums so the enumeration order is visible.
    struct IndexProbe<T>(PhantomData<T>);

    impl ReductionImpl for IndexProbe<i64> {
        type In = i64;
        type Out = i64;
        type Accum = i64;

        fn identity(&self) -> i64 {
            0
        }

        fn map_in(&self, value: i64, index: i64) -> i64 {
            value * 10i64.pow(index as u32)
        }

        fn reduce(&self, next: i64, accum: &mut i64) {
            *accum += next;
        }

        fn map_out(&self, accum: i64) -> i64 {
            accum
        }
    }

    fn probe() -> IndexProbe<i64> {
        IndexProbe(PhantomData)
    }

    fn product(dims: &[usize], strides: &[usize]) -> AxisProduct {
        AxisProduct {
            dims: dims.to_vec(),
            strides: strides.to_vec(),
        }
    }

    #[test]
    fn test_product_offsets_row_major() {
        let walk = |p: AxisProduct| p.offsets().collect::<Vec<_>>();
        assert_eq!(walk(product(&[2, 3], &[3, 1])), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(walk(product(&[2, 2], &[1, 2])), vec![0, 2, 1, 3]);
        assert_eq!(walk(product(&[], &[])), vec![0]);
        assert!(walk(product(&[2, 0], &[0, 1])).is_empty());
    }

    #[test]
    fn test_offset_of_matches_walk() {
        // (2, 3, 4) with the strides of a (4, 3, 2) array transposed (0, 2).
        let p = product(&[2, 3, 4], &[1, 2, 6]);
        assert_eq!(p.len(), 24);
        let walked: Vec<usize> = p.offsets().collect();
        let indexed: Vec<usize> = (0..p.len()).map(|k| p.offset_of(k)).collect();
        assert_eq!(walked, indexed);
        let mut sorted = walked.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..24).collect::<Vec<_>>());
    }

    /// Plain i64 total.
    struct Total;

    impl ReductionImpl for Total {
        type In = i64;
        type Out = i64;
        type Accum = i64;

        fn identity(&self) -> i64 {
            0
        }

        fn map_in(&self, value: i64, _index: i64) -> i64 {
            value
        }

        fn reduce(&self, next: i64, accum: &mut i64) {
            *accum += next;
        }

        fn map_out(&self, accum: i64) -> i64 {
            accum
        }
    }

    #[test]
    fn test_full_and_partial_reductions_of_large_input() {
        let n = 1 << 16;
        let a = Array::from_vec((0..n as i64).collect::<Vec<i64>>(), (16, 64, 64), &Device::Native).unwrap();
        let all = Array::zeros((), DType::I64, &Device::Native).unwrap();
        reduce(&a, &Axes::all(3), &all, &Total, &NativeConfig::default()).unwrap();
        assert_eq!(all.to_vec::<i64>().unwrap(), vec![(n as i64) * (n as i64 - 1) / 2]);

        // Over the trailing axes, on the parallel path: block k sums 4096k .. 4096k + 4095.
        let per_block = Array::zeros(16, DType::I64, &Device::Native).unwrap();
        let config = NativeConfig::default().with_parallel_threshold(0);
        reduce(&a, &Axes::new(&[1, 2], 3).unwrap(), &per_block, &Total, &config).unwrap();
        let expected: Vec<i64> = (0..16i64).map(|k| 4096 * 4096 * k + 4096 * 4095 / 2).collect();
        assert_eq!(per_block.to_vec::<i64>().unwrap(), expected);
    }

    #[test]
    fn test_index_counts_rows_for_axis_zero() {
        // Column 0 holds 1, 2, 3 at rows 0, 1, 2 → 1 + 20 + 300.
        let a = Array::from_vec(vec![1i64, 4, 2, 5, 3, 6], (3, 2), &Device::Native).unwrap();
        let out = Array::zeros(2, DType::I64, &Device::Native).unwrap();
        let axes = Axes::new(&[0], 2).unwrap();
        reduce(&a, &axes, &out, &probe(), &NativeConfig::default()).unwrap();
        assert_eq!(out.to_vec::<i64>().unwrap(), vec![321, 654]);
    }

    #[test]
    fn test_index_is_row_major_over_reduced_axes() {
        // Shape (2, 1, 2) reduced over {0, 2}: group order is a[0,0,0], a[0,0,1], a[1,0,0], a[1,0,1].
        let a = Array::from_vec(vec![1i64, 2, 3, 4], (2, 1, 2), &Device::Native).unwrap();
        let out = Array::zeros(1, DType::I64, &Device::Native).unwrap();
        let axes = Axes::new(&[2, 0], 3).unwrap();
        reduce(&a, &axes, &out, &probe(), &NativeConfig::default()).unwrap();
        assert_eq!(out.to_vec::<i64>().unwrap(), vec![4321]);
    }

    #[test]
    fn test_strided_input_and_parallel_path_agree() {
        let data: Vec<i64> = (0..6).collect();
        let a = Array::from_vec(data, (2, 3), &Device::Native).unwrap();
        let t = a.t().unwrap(); // (3, 2), non-contiguous
        let axes = Axes::new(&[1], 2).unwrap();

        let serial = Array::zeros(3, DType::I64, &Device::Native).unwrap();
        reduce(&t, &axes, &serial, &probe(), &NativeConfig::default()).unwrap();

        let parallel = Array::zeros(3, DType::I64, &Device::Native).unwrap();
        let config = NativeConfig::default().with_parallel_threshold(0);
        reduce(&t, &axes, &parallel, &probe(), &config).unwrap();

        // t = [[0, 3], [1, 4], [2, 5]]
        assert_eq!(serial.to_vec::<i64>().unwrap(), vec![30, 41, 52]);
        assert_eq!(parallel.to_vec::<i64>().unwrap(), vec![30, 41, 52]);
    }

    #[test]
    #[should_panic(expected = "invalid reduction")]
    fn test_wrong_output_shape_panics() {
        let a = Array::zeros((3, 2), DType::I64, &Device::Native).unwrap();
        let out = Array::zeros(3, DType::I64, &Device::Native).unwrap();
        let axes = Axes::new(&[0], 2).unwrap();
        let _ = reduce(&a, &axes, &out, &probe(), &NativeConfig::default());
    }

    #[test]
    #[should_panic(expected = "aliases")]
    fn test_aliased_output_panics() {
        let a = Array::zeros((3,), DType::I64, &Device::Native).unwrap();
        let axes = Axes::new(&[], 1).unwrap();
        let _ = reduce(&a, &axes, &a, &probe(), &NativeConfig::default());
    }
}
