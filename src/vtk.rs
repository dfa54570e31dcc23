//
// vtk.rs
// neuro-tools
//
// Legacy VTK polydata container, BINARY mode only: line-oriented ASCII
// keywords interleaved with big-endian value blocks. Geometry and point data
// funnel through the shared polydata packing, so framing checks match the
// XML container exactly.
//

use std::io::Write;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::polydata::{self, PointDataArray, PolyData};
use crate::tractogram::{ActiveArrays, TractCollection, TractError};

/// Title emitted when the output has no legacy VTK source to inherit from,
/// matching what the VTK library writes.
pub const DEFAULT_TITLE: &str = "vtk output";

fn malformed(detail: impl Into<String>) -> TractError {
    TractError::MalformedContainer(detail.into())
}

/// Cursor over the raw file: text lines and binary blocks take turns.
struct Scanner<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn next_line(&mut self) -> Result<Option<&'a str>, TractError> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let rest = self.rest();
        let (raw, advance) = match rest.iter().position(|&byte| byte == b'\n') {
            Some(at) => (&rest[..at], at + 1),
            None => (rest, rest.len()),
        };
        self.pos += advance;
        let line = std::str::from_utf8(raw)
            .map_err(|_| malformed("binary bytes where a text line was expected"))?;
        Ok(Some(line.trim_end_matches('\r')))
    }

    fn require_line(&mut self, missing: &str) -> Result<&'a str, TractError> {
        self.next_line()?.ok_or_else(|| malformed(missing))
    }

    fn next_nonblank(&mut self) -> Result<Option<&'a str>, TractError> {
        loop {
            match self.next_line()? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(line.trim())),
            }
        }
    }

    fn require_nonblank(&mut self, missing: &str) -> Result<&'a str, TractError> {
        self.next_nonblank()?.ok_or_else(|| malformed(missing))
    }

    fn block(&mut self, bytes: usize) -> Result<&'a [u8], TractError> {
        let rest = self.rest();
        if rest.len() < bytes {
            return Err(malformed(format!(
                "binary block needs {bytes} bytes, {} remain",
                rest.len()
            )));
        }
        self.pos += bytes;
        Ok(&rest[..bytes])
    }

    /// The next whitespace-delimited word, without consuming it.
    fn peek_word(&self) -> &'a [u8] {
        let rest = self.rest();
        let start = rest
            .iter()
            .position(|byte| !byte.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let tail = &rest[start..];
        let end = tail
            .iter()
            .position(|byte| byte.is_ascii_whitespace())
            .unwrap_or(tail.len());
        &tail[..end]
    }
}

#[derive(Debug, Clone, Copy)]
enum ValueKind {
    Float,
    Double,
}

impl ValueKind {
    fn parse(word: Option<&str>, section: &str) -> Result<Self, TractError> {
        match word {
            Some("float") => Ok(Self::Float),
            Some("double") => Ok(Self::Double),
            Some(other) => Err(malformed(format!(
                "unsupported {section} data type {other:?}"
            ))),
            None => Err(malformed(format!("{section} section without a data type"))),
        }
    }
}

fn parse_count(word: Option<&str>, what: &str) -> Result<usize, TractError> {
    word.and_then(|word| word.parse().ok())
        .ok_or_else(|| malformed(format!("unreadable {what}")))
}

fn element_total(tuples: usize, components: usize) -> Result<usize, TractError> {
    tuples
        .checked_mul(components)
        .ok_or_else(|| malformed("data array size overflows"))
}

fn read_values(
    scanner: &mut Scanner<'_>,
    count: usize,
    kind: ValueKind,
) -> Result<Vec<f64>, TractError> {
    let width = match kind {
        ValueKind::Float => 4,
        ValueKind::Double => 8,
    };
    let bytes = count
        .checked_mul(width)
        .ok_or_else(|| malformed("data array size overflows"))?;
    let chunk = scanner.block(bytes)?;
    let mut values = Vec::with_capacity(count);
    match kind {
        ValueKind::Float => {
            for quad in chunk.chunks_exact(4) {
                values.push(f64::from(BigEndian::read_f32(quad)));
            }
        }
        ValueKind::Double => {
            for oct in chunk.chunks_exact(8) {
                values.push(BigEndian::read_f64(oct));
            }
        }
    }
    Ok(values)
}

pub fn read(data: &[u8]) -> Result<(TractCollection, String), TractError> {
    let mut scanner = Scanner::new(data);
    let signature = scanner.require_line("empty file")?;
    if !signature.starts_with("# vtk DataFile Version") {
        return Err(malformed("missing legacy VTK signature"));
    }
    let title = scanner
        .require_line("file ends before the title line")?
        .to_string();
    match scanner.require_nonblank("file ends before the data mode line")? {
        "BINARY" => {}
        "ASCII" => return Err(malformed("ASCII legacy VTK files are not supported")),
        other => return Err(malformed(format!("unknown data mode {other:?}"))),
    }
    let dataset = scanner.require_nonblank("file ends before the DATASET line")?;
    let mut dataset_words = dataset.split_whitespace();
    if dataset_words.next() != Some("DATASET") || dataset_words.next() != Some("POLYDATA") {
        return Err(malformed(format!("not a polydata dataset: {dataset:?}")));
    }

    let mut points: Vec<[f64; 3]> = Vec::new();
    let mut cells: Vec<i64> = Vec::new();
    let mut number_of_lines = 0usize;
    let mut point_data: Vec<PointDataArray> = Vec::new();
    let mut active = ActiveArrays::default();
    let mut seen_points = false;
    let mut seen_lines = false;
    // POINT_DATA keeps its arrays, CELL_DATA is parsed and discarded.
    let mut attachment: Option<(bool, usize)> = None;

    while let Some(line) = scanner.next_nonblank()? {
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else { continue };
        match keyword {
            "POINTS" => {
                let count = parse_count(words.next(), "POINTS count")?;
                let kind = ValueKind::parse(words.next(), "POINTS")?;
                let values = read_values(&mut scanner, element_total(count, 3)?, kind)?;
                points = values
                    .chunks_exact(3)
                    .map(|triple| [triple[0], triple[1], triple[2]])
                    .collect();
                seen_points = true;
            }
            "LINES" => {
                number_of_lines = parse_count(words.next(), "LINES count")?;
                let size = parse_count(words.next(), "LINES size")?;
                if scanner.peek_word() == b"OFFSETS".as_slice() {
                    return Err(malformed(
                        "the VTK 5.1 OFFSETS cell layout is not supported",
                    ));
                }
                let bytes = size
                    .checked_mul(4)
                    .ok_or_else(|| malformed("cell array size overflows"))?;
                cells = scanner
                    .block(bytes)?
                    .chunks_exact(4)
                    .map(|quad| i64::from(BigEndian::read_i32(quad)))
                    .collect();
                seen_lines = true;
            }
            "POINT_DATA" => {
                let count = parse_count(words.next(), "POINT_DATA count")?;
                if count != points.len() {
                    return Err(malformed(format!(
                        "POINT_DATA covers {count} points, geometry has {}",
                        points.len()
                    )));
                }
                attachment = Some((true, count));
            }
            "CELL_DATA" => {
                let count = parse_count(words.next(), "CELL_DATA count")?;
                attachment = Some((false, count));
            }
            "SCALARS" | "VECTORS" | "TENSORS" => {
                let Some((keep, tuples)) = attachment else {
                    return Err(malformed(format!(
                        "{keyword} section before POINT_DATA or CELL_DATA"
                    )));
                };
                let name = words
                    .next()
                    .ok_or_else(|| malformed(format!("{keyword} section without a name")))?
                    .to_string();
                let kind = ValueKind::parse(words.next(), keyword)?;
                let components = match keyword {
                    "SCALARS" => match words.next() {
                        Some(word) => word.parse().map_err(|_| {
                            malformed(format!("unreadable component count in SCALARS {name:?}"))
                        })?,
                        None => 1,
                    },
                    "VECTORS" => 3,
                    _ => 9,
                };
                if keyword == "SCALARS" && scanner.peek_word() == b"LOOKUP_TABLE".as_slice() {
                    scanner.require_nonblank("file ends inside a SCALARS section")?;
                }
                let values =
                    read_values(&mut scanner, element_total(tuples, components)?, kind)?;
                if keep {
                    let role = match keyword {
                        "SCALARS" => &mut active.scalars,
                        "VECTORS" => &mut active.vectors,
                        _ => &mut active.tensors,
                    };
                    if role.is_none() {
                        *role = Some(name.clone());
                    }
                    point_data.push(PointDataArray {
                        name,
                        components,
                        values,
                    });
                }
            }
            "FIELD" => {
                words.next(); // field name, unused
                let arrays = parse_count(words.next(), "FIELD array count")?;
                for _ in 0..arrays {
                    let declaration =
                        scanner.require_nonblank("file ends inside a FIELD section")?;
                    let mut parts = declaration.split_whitespace();
                    let name = parts
                        .next()
                        .ok_or_else(|| malformed("FIELD array without a name"))?
                        .to_string();
                    let components = parse_count(parts.next(), "FIELD array components")?;
                    let tuples = parse_count(parts.next(), "FIELD array tuple count")?;
                    let kind = ValueKind::parse(parts.next(), "FIELD array")?;
                    let values =
                        read_values(&mut scanner, element_total(tuples, components)?, kind)?;
                    if matches!(attachment, Some((true, _))) {
                        point_data.push(PointDataArray {
                            name,
                            components,
                            values,
                        });
                    }
                }
            }
            other => {
                return Err(malformed(format!(
                    "unsupported legacy VTK section {other:?}"
                )))
            }
        }
    }

    if !seen_points {
        return Err(malformed("missing POINTS section"));
    }
    if !seen_lines {
        return Err(malformed("missing LINES section"));
    }

    let tracts = polydata::unpack(PolyData {
        title: title.clone(),
        points,
        cells,
        number_of_lines,
        point_data,
        active,
    })?;
    Ok((tracts, title))
}

/// Legacy array names are whitespace-delimited, so embedded whitespace cannot
/// survive; substitute underscores rather than corrupt the section framing.
fn legacy_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        tracing::warn!("unnamed point data array stored as \"unnamed\"");
        return "unnamed".to_string();
    }
    if cleaned != name {
        tracing::warn!("attribute name {name:?} contains whitespace, stored as {cleaned:?}");
    }
    cleaned
}

fn write_doubles<W: Write>(writer: &mut W, values: &[f64]) -> Result<(), TractError> {
    for value in values {
        writer.write_f64::<BigEndian>(*value)?;
    }
    writer.write_all(b"\n")?;
    Ok(())
}

pub fn write<W: Write>(
    mut writer: W,
    tracts: &TractCollection,
    title: Option<&str>,
) -> Result<(), TractError> {
    let poly = polydata::pack(tracts);
    let title = title.unwrap_or(DEFAULT_TITLE);

    writeln!(writer, "# vtk DataFile Version 3.0")?;
    writeln!(writer, "{title}")?;
    writeln!(writer, "BINARY")?;
    writeln!(writer, "DATASET POLYDATA")?;

    writeln!(writer, "POINTS {} double", poly.points.len())?;
    for point in &poly.points {
        for coordinate in point {
            writer.write_f64::<BigEndian>(*coordinate)?;
        }
    }
    writer.write_all(b"\n")?;

    writeln!(writer, "LINES {} {}", poly.number_of_lines, poly.cells.len())?;
    for entry in &poly.cells {
        let value = i32::try_from(*entry).map_err(|_| {
            TractError::ShapeMismatch(format!(
                "cell entry {entry} does not fit the 32-bit legacy cell array"
            ))
        })?;
        writer.write_i32::<BigEndian>(value)?;
    }
    writer.write_all(b"\n")?;

    if poly.point_data.is_empty() {
        return Ok(());
    }
    writeln!(writer, "POINT_DATA {}", poly.points.len())?;
    // Active roles get their dedicated sections where the section shape
    // allows; everything else lands in one FIELD block.
    let mut field_arrays: Vec<(String, &PointDataArray)> = Vec::new();
    for array in &poly.point_data {
        let name = legacy_name(&array.name);
        if poly.active.scalars.as_deref() == Some(array.name.as_str())
            && (1..=4).contains(&array.components)
        {
            writeln!(writer, "SCALARS {name} double {}", array.components)?;
            writeln!(writer, "LOOKUP_TABLE default")?;
            write_doubles(&mut writer, &array.values)?;
        } else if poly.active.vectors.as_deref() == Some(array.name.as_str())
            && array.components == 3
        {
            writeln!(writer, "VECTORS {name} double")?;
            write_doubles(&mut writer, &array.values)?;
        } else if poly.active.tensors.as_deref() == Some(array.name.as_str())
            && array.components == 9
        {
            writeln!(writer, "TENSORS {name} double")?;
            write_doubles(&mut writer, &array.values)?;
        } else {
            field_arrays.push((name, array));
        }
    }
    if !field_arrays.is_empty() {
        writeln!(writer, "FIELD FieldData {}", field_arrays.len())?;
        for (name, array) in field_arrays {
            writeln!(
                writer,
                "{name} {} {} double",
                array.components,
                poly.points.len()
            )?;
            write_doubles(&mut writer, &array.values)?;
        }
    }
    Ok(())
}
