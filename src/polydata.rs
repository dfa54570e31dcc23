//
// polydata.rs
// neuro-tools
//
// Geometry shared by the two polydata containers (.vtk legacy and .vtp/.xml):
// one flat point array plus one flat cell array in which every streamline is
// a length-prefixed run of global point indices. Packing and unpacking live
// here so both containers validate framing the same way.
//

use crate::tractogram::{ActiveArrays, PointAttribute, TractCollection, TractError};

/// One named per-point data array as stored in the container, aligned with
/// the container's flat point array (`values.len() == points * components`).
#[derive(Debug, Clone, PartialEq)]
pub struct PointDataArray {
    pub name: String,
    pub components: usize,
    pub values: Vec<f64>,
}

/// Flat polydata content: the common ground between container and collection.
#[derive(Debug, Clone, PartialEq)]
pub struct PolyData {
    /// Legacy header title line; empty when the container has none.
    pub title: String,
    pub points: Vec<[f64; 3]>,
    /// Flat cell array: `[count, idx0, .., idx(count-1)]` per streamline.
    pub cells: Vec<i64>,
    pub number_of_lines: usize,
    pub point_data: Vec<PointDataArray>,
    pub active: ActiveArrays,
}

fn malformed(detail: String) -> TractError {
    TractError::MalformedContainer(detail)
}

/// Walk the flat cell array sequentially and materialize each streamline by
/// slicing the point array with its index run; per-point data arrays are
/// re-indexed with the same runs. Any framing violation is an error, never a
/// silent truncation.
pub fn unpack(poly: PolyData) -> Result<TractCollection, TractError> {
    let PolyData {
        points,
        cells,
        number_of_lines,
        point_data,
        active,
        ..
    } = poly;

    // Each streamline consumes at least its count prefix.
    if number_of_lines > cells.len() {
        return Err(malformed(format!(
            "{number_of_lines} streamlines cannot be framed by {} cell entries",
            cells.len()
        )));
    }

    let mut streamlines = Vec::with_capacity(number_of_lines);
    let mut index_runs: Vec<Vec<usize>> = Vec::with_capacity(number_of_lines);
    let mut cursor = 0usize;

    for line in 0..number_of_lines {
        let count = *cells
            .get(cursor)
            .ok_or_else(|| malformed(format!("cell array ends before streamline {line}")))?;
        if count < 0 {
            return Err(malformed(format!(
                "streamline {line} has negative point count {count}"
            )));
        }
        let count = count as usize;
        let end = cursor + 1 + count;
        if end > cells.len() {
            return Err(malformed(format!(
                "length prefix of streamline {line} overruns the cell array"
            )));
        }

        let mut run = Vec::with_capacity(count);
        let mut gathered = Vec::with_capacity(count);
        for &index in &cells[cursor + 1..end] {
            let index = usize::try_from(index).map_err(|_| {
                malformed(format!("streamline {line} references negative index {index}"))
            })?;
            let point = points.get(index).ok_or_else(|| {
                malformed(format!(
                    "streamline {line} references point {index} of {}",
                    points.len()
                ))
            })?;
            gathered.push(*point);
            run.push(index);
        }
        streamlines.push(gathered);
        index_runs.push(run);
        cursor = end;
    }

    if cursor != cells.len() {
        return Err(malformed(format!(
            "{} trailing cell entries after {number_of_lines} streamlines",
            cells.len() - cursor
        )));
    }

    let mut tracts = TractCollection::from_streamlines(streamlines);
    for array in point_data {
        if array.components == 0 {
            return Err(malformed(format!(
                "point data array {:?} has zero components",
                array.name
            )));
        }
        let expected = points.len().checked_mul(array.components).ok_or_else(|| {
            malformed(format!(
                "point data array {:?} size overflows: {} points x {} components",
                array.name,
                points.len(),
                array.components
            ))
        })?;
        if array.values.len() != expected {
            return Err(malformed(format!(
                "point data array {:?} holds {} values for {} points x {} components",
                array.name,
                array.values.len(),
                points.len(),
                array.components
            )));
        }
        // One row per point, exact by the size check above.
        let rows: Vec<&[f64]> = array.values.chunks_exact(array.components).collect();
        let per_streamline = index_runs
            .iter()
            .map(|run| {
                let mut gathered = Vec::with_capacity(run.len());
                for &index in run {
                    gathered.extend_from_slice(rows[index]);
                }
                gathered
            })
            .collect();
        tracts.insert_attribute(array.name, PointAttribute::new(array.components, per_streamline))?;
    }
    // Active roles naming an array the container never defined are dropped.
    let mut active = active;
    for role in [&mut active.scalars, &mut active.vectors, &mut active.tensors] {
        if role
            .as_ref()
            .is_some_and(|name| !tracts.attributes().contains_key(name))
        {
            *role = None;
        }
    }
    tracts.set_active(active);
    Ok(tracts)
}

/// Inverse packing: per-streamline lengths become cumulative start offsets,
/// each index range defaults to `[start, start + length)`, and the cell
/// array is the concatenation of `[length, idx..]` tuples.
pub fn pack(tracts: &TractCollection) -> PolyData {
    let lengths: Vec<usize> = tracts.lengths().collect();
    let total: usize = lengths.iter().map(|len| len + 1).sum();

    let mut cells = Vec::with_capacity(total);
    let mut start = 0usize;
    for &length in &lengths {
        cells.push(length as i64);
        cells.extend((start..start + length).map(|index| index as i64));
        start += length;
    }

    let point_data = tracts
        .attributes()
        .iter()
        .map(|(name, attribute)| PointDataArray {
            name: name.clone(),
            components: attribute.components(),
            values: attribute.flattened(),
        })
        .collect();

    PolyData {
        title: String::new(),
        points: tracts.points().to_vec(),
        cells,
        number_of_lines: tracts.len(),
        point_data,
        active: tracts.active().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_poly() -> PolyData {
        PolyData {
            title: String::new(),
            points: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [2.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 2.0, 0.0],
            ],
            cells: vec![3, 0, 1, 2, 2, 3, 4],
            number_of_lines: 2,
            point_data: vec![PointDataArray {
                name: "fa".into(),
                components: 1,
                values: vec![0.1, 0.2, 0.3, 0.4, 0.5],
            }],
            active: ActiveArrays::default(),
        }
    }

    #[test]
    fn unpack_walks_length_prefixed_runs() {
        let tracts = unpack(sample_poly()).unwrap();
        assert_eq!(tracts.len(), 2);
        assert_eq!(tracts.streamline(0).len(), 3);
        assert_eq!(tracts.streamline(1).len(), 2);
        assert_eq!(tracts.attributes()["fa"].array(1), [0.4, 0.5]);
    }

    #[test]
    fn pack_then_unpack_is_identity() {
        let tracts = unpack(sample_poly()).unwrap();
        let repacked = pack(&tracts);
        assert_eq!(repacked.cells, vec![3, 0, 1, 2, 2, 3, 4]);
        assert_eq!(unpack(repacked).unwrap(), tracts);
    }

    #[test]
    fn framing_violations_are_rejected() {
        let mut poly = sample_poly();
        poly.cells = vec![3, 0, 1, 2, 9, 3, 4]; // prefix overruns the array
        assert!(matches!(
            unpack(poly),
            Err(TractError::MalformedContainer(_))
        ));

        let mut poly = sample_poly();
        poly.cells = vec![3, 0, 1, 2, 2, 3, 7]; // index out of range
        assert!(matches!(
            unpack(poly),
            Err(TractError::MalformedContainer(_))
        ));

        let mut poly = sample_poly();
        poly.number_of_lines = 1; // leaves trailing cells behind
        assert!(matches!(
            unpack(poly),
            Err(TractError::MalformedContainer(_))
        ));

        let mut poly = sample_poly();
        poly.number_of_lines = usize::MAX; // more lines than cell entries
        assert!(matches!(
            unpack(poly),
            Err(TractError::MalformedContainer(_))
        ));
    }

    #[test]
    fn misaligned_point_data_is_rejected() {
        let mut poly = sample_poly();
        poly.point_data[0].values.pop();
        assert!(matches!(
            unpack(poly),
            Err(TractError::MalformedContainer(_))
        ));
    }

    #[test]
    fn oversized_component_declarations_are_rejected() {
        // 2 * (usize::MAX / 2 + 2) wraps around to 2, the payload length.
        let mut poly = sample_poly();
        poly.points.truncate(2);
        poly.cells = vec![2, 0, 1];
        poly.number_of_lines = 1;
        poly.point_data[0].components = usize::MAX / 2 + 2;
        poly.point_data[0].values = vec![0.1, 0.2];
        assert!(matches!(
            unpack(poly),
            Err(TractError::MalformedContainer(_))
        ));

        let mut poly = sample_poly();
        poly.point_data[0].components = 0;
        poly.point_data[0].values = Vec::new();
        assert!(matches!(
            unpack(poly),
            Err(TractError::MalformedContainer(_))
        ));
    }
}
