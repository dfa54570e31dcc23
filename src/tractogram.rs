//
// tractogram.rs
// neuro-tools
//
// Canonical in-memory form of a tractogram: one flat point buffer partitioned
// into streamlines, plus named per-point attribute arrays aligned with them.
//

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

/// Errors shared by every tractogram reader and writer.
#[derive(Debug, Error)]
pub enum TractError {
    #[error("unsupported tractogram format: {path:?} (expected .tck, .trk, .vtk, .xml or .vtp)")]
    UnsupportedFormat { path: PathBuf },
    #[error("malformed container: {0}")]
    MalformedContainer(String),
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Names of the arrays holding the active scalar/vector/tensor roles.
///
/// Recorded by name only; the arrays themselves live in the attribute map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveArrays {
    pub scalars: Option<String>,
    pub vectors: Option<String>,
    pub tensors: Option<String>,
}

impl ActiveArrays {
    pub fn is_empty(&self) -> bool {
        self.scalars.is_none() && self.vectors.is_none() && self.tensors.is_none()
    }
}

/// Per-point data for one attribute: one row-major `rows x components` array
/// per streamline, where `rows` equals that streamline's point count.
#[derive(Debug, Clone, PartialEq)]
pub struct PointAttribute {
    components: usize,
    arrays: Vec<Vec<f64>>,
}

impl PointAttribute {
    pub fn new(components: usize, arrays: Vec<Vec<f64>>) -> Self {
        Self { components, arrays }
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn arrays(&self) -> &[Vec<f64>] {
        &self.arrays
    }

    pub fn array(&self, streamline: usize) -> &[f64] {
        &self.arrays[streamline]
    }

    /// All per-streamline arrays concatenated in streamline order, i.e. the
    /// flat point-aligned layout the polydata containers store.
    pub fn flattened(&self) -> Vec<f64> {
        let total = self.arrays.iter().map(Vec::len).sum();
        let mut values = Vec::with_capacity(total);
        for array in &self.arrays {
            values.extend_from_slice(array);
        }
        values
    }
}

/// A parsed tractogram: every reader produces one, every writer consumes one.
///
/// The collection owns all of its buffers exclusively; nothing is shared with
/// the source container after parsing. Geometry invariants hold by
/// construction (streamlines are contiguous slices of `points`), and
/// attribute alignment is validated once, on insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct TractCollection {
    points: Vec<[f64; 3]>,
    offsets: Vec<usize>,
    attributes: BTreeMap<String, PointAttribute>,
    active: ActiveArrays,
}

impl Default for TractCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl TractCollection {
    /// An empty collection: zero streamlines, zero points.
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            offsets: vec![0],
            attributes: BTreeMap::new(),
            active: ActiveArrays::default(),
        }
    }

    /// Build a collection from per-streamline point runs, preserving order.
    pub fn from_streamlines(streamlines: Vec<Vec<[f64; 3]>>) -> Self {
        let total = streamlines.iter().map(Vec::len).sum();
        let mut points = Vec::with_capacity(total);
        let mut offsets = Vec::with_capacity(streamlines.len() + 1);
        offsets.push(0);
        for streamline in streamlines {
            points.extend_from_slice(&streamline);
            offsets.push(points.len());
        }
        Self {
            points,
            offsets,
            attributes: BTreeMap::new(),
            active: ActiveArrays::default(),
        }
    }

    /// Attach a named per-point attribute, validating its alignment: one
    /// array per streamline, each with `point count x components` values.
    pub fn insert_attribute(
        &mut self,
        name: impl Into<String>,
        attribute: PointAttribute,
    ) -> Result<(), TractError> {
        let name = name.into();
        if attribute.components == 0 {
            return Err(TractError::ShapeMismatch(format!(
                "attribute {name:?} has zero components"
            )));
        }
        if attribute.arrays.len() != self.len() {
            return Err(TractError::ShapeMismatch(format!(
                "attribute {name:?} has {} arrays for {} streamlines",
                attribute.arrays.len(),
                self.len()
            )));
        }
        for (index, array) in attribute.arrays.iter().enumerate() {
            let expected = self.length_of(index) * attribute.components;
            if array.len() != expected {
                return Err(TractError::ShapeMismatch(format!(
                    "attribute {name:?}, streamline {index}: {} values, expected {expected}",
                    array.len()
                )));
            }
        }
        self.attributes.insert(name, attribute);
        Ok(())
    }

    pub fn set_active(&mut self, active: ActiveArrays) {
        self.active = active;
    }

    pub fn active(&self) -> &ActiveArrays {
        &self.active
    }

    /// Number of streamlines.
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total point count across all streamlines.
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn length_of(&self, index: usize) -> usize {
        self.offsets[index + 1] - self.offsets[index]
    }

    pub fn lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.offsets.windows(2).map(|pair| pair[1] - pair[0])
    }

    pub fn streamline(&self, index: usize) -> &[[f64; 3]] {
        &self.points[self.offsets[index]..self.offsets[index + 1]]
    }

    pub fn streamlines(&self) -> impl Iterator<Item = &[[f64; 3]]> {
        (0..self.len()).map(move |index| self.streamline(index))
    }

    /// The flat point buffer, streamline-major.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    pub fn attributes(&self) -> &BTreeMap<String, PointAttribute> {
        &self.attributes
    }
}
