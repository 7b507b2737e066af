//! Named parameter-tensor collections and submatrix geometry
//!
//! All cross-model weight transfer in this crate is keyed by parameter name
//! against an explicit layer manifest, never by bare position in an iteration
//! order. The helpers here implement the two directions of that transfer:
//! embedding a smaller tensor into the top-left region of a larger one
//! (expansion) and narrowing a larger tensor down to a smaller shape
//! (historical-size reconstruction).

use candle_core::Tensor;

use crate::error::{Error, Result};

/// Ordered collection of named tensors.
///
/// The carrier type for parameter snapshots, Fisher diagonals, and
/// consolidated running sums. Order is the network's manifest order
/// (input to output), which makes iteration deterministic; lookup is by name.
#[derive(Debug, Clone)]
pub struct NamedTensors {
    entries: Vec<(String, Tensor)>,
}

impl NamedTensors {
    /// Create an empty collection
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Create from an ordered list of `(name, tensor)` entries
    pub fn from_entries(entries: Vec<(String, Tensor)>) -> Self {
        Self { entries }
    }

    /// Append an entry, preserving insertion order
    pub fn push(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.entries.push((name.into(), tensor));
    }

    /// Look up a tensor by name
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// Iterate over entries in manifest order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the collection is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names in manifest order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Shapes in manifest order
    pub fn shapes(&self) -> Vec<(String, Vec<usize>)> {
        self.entries
            .iter()
            .map(|(n, t)| (n.clone(), t.dims().to_vec()))
            .collect()
    }

    /// Total number of scalar values across all entries
    pub fn value_count(&self) -> usize {
        self.entries.iter().map(|(_, t)| t.elem_count()).sum()
    }

    /// Zero-valued collection with the same names and shapes as `other`
    pub fn zeros_like(other: &NamedTensors) -> Result<Self> {
        let mut entries = Vec::with_capacity(other.len());
        for (name, tensor) in other.iter() {
            entries.push((name.to_string(), tensor.zeros_like()?));
        }
        Ok(Self { entries })
    }
}

impl Default for NamedTensors {
    fn default() -> Self {
        Self::new()
    }
}

/// Deep copy of a tensor into fresh, contiguous storage.
///
/// `Tensor::clone` shares storage and a detached view still aliases the
/// variable it came from, so snapshots taken with either would silently track
/// later in-place updates. Round-tripping through a host vector guarantees an
/// independent copy with exactly the same values.
pub fn deep_copy(tensor: &Tensor) -> Result<Tensor> {
    let values = tensor.flatten_all()?.to_vec1::<f32>()?;
    Ok(Tensor::from_vec(values, tensor.dims(), tensor.device())?)
}

/// Check that `small` fits inside `large` with equal rank, returning the
/// ranges of the top-left region `small` occupies.
fn containment_ranges(
    name: &str,
    small: &[usize],
    large: &[usize],
) -> Result<Vec<std::ops::Range<usize>>> {
    if small.len() != large.len() {
        return Err(Error::shape_mismatch(name, large, small));
    }
    if small.iter().zip(large.iter()).any(|(s, l)| s > l) {
        return Err(Error::shape_mismatch(name, large, small));
    }
    Ok(small.iter().map(|&n| 0..n).collect())
}

/// Write `small` into the top-left region of `base`, leaving the remainder of
/// `base` untouched. Returns a fresh tensor; neither input is mutated.
///
/// Rank or containment disagreement is a fatal [`Error::ShapeMismatch`];
/// values are never truncated or wrapped.
pub fn embed_top_left(base: &Tensor, small: &Tensor, name: &str) -> Result<Tensor> {
    let ranges = containment_ranges(name, small.dims(), base.dims())?;
    let src = deep_copy(small)?;
    Ok(base.slice_assign(&ranges, &src)?)
}

/// Extract the top-left region of `large` matching `target_shape`.
///
/// The inverse copy direction of [`embed_top_left`]. The result stays in the
/// autograd graph of `large`, which is what keeps the EWC penalty
/// differentiable when it restricts grown parameters to a snapshot's shape.
pub fn narrow_to(large: &Tensor, target_shape: &[usize], name: &str) -> Result<Tensor> {
    let ranges = containment_ranges(name, target_shape, large.dims())?;
    let mut out = large.clone();
    for (dim, range) in ranges.iter().enumerate() {
        out = out.narrow(dim, range.start, range.end - range.start)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn tensor_2x3() -> Tensor {
        Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), &Device::Cpu).unwrap()
    }

    #[test]
    fn embed_then_narrow_roundtrips() {
        let small = tensor_2x3();
        let base = Tensor::zeros((4, 5), candle_core::DType::F32, &Device::Cpu).unwrap();

        let embedded = embed_top_left(&base, &small, "w").unwrap();
        let recovered = narrow_to(&embedded, &[2, 3], "w").unwrap();

        assert_eq!(
            recovered.to_vec2::<f32>().unwrap(),
            small.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn embed_leaves_remainder_untouched() {
        let small = tensor_2x3();
        let base = Tensor::ones((4, 5), candle_core::DType::F32, &Device::Cpu).unwrap();

        let embedded = embed_top_left(&base, &small, "w").unwrap();
        let values = embedded.to_vec2::<f32>().unwrap();

        assert_eq!(values[0][3], 1.0);
        assert_eq!(values[2][0], 1.0);
        assert_eq!(values[3][4], 1.0);
    }

    #[test]
    fn rank_mismatch_is_fatal() {
        let small = Tensor::zeros(3usize, candle_core::DType::F32, &Device::Cpu).unwrap();
        let base = Tensor::zeros((4, 5), candle_core::DType::F32, &Device::Cpu).unwrap();

        let err = embed_top_left(&base, &small, "w").unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn oversized_source_is_fatal() {
        let small = tensor_2x3();
        let base = Tensor::zeros((2, 2), candle_core::DType::F32, &Device::Cpu).unwrap();

        let err = embed_top_left(&base, &small, "w").unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));

        let err = narrow_to(&small, &[3, 3], "w").unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn deep_copy_survives_in_place_updates() {
        let var = candle_core::Var::from_tensor(&tensor_2x3()).unwrap();
        let copy = deep_copy(var.as_tensor()).unwrap();

        var.set(&var.as_tensor().zeros_like().unwrap()).unwrap();

        assert_eq!(copy.to_vec2::<f32>().unwrap()[0][0], 1.0);
        assert_eq!(var.as_tensor().to_vec2::<f32>().unwrap()[0][0], 0.0);
    }
}
