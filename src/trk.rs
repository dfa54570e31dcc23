//
// trk.rs
// neuro-tools
//
// TrackVis track container: a fixed 1000-byte little-endian header followed by
// length-prefixed streamline records. Per-point scalars ride along with each
// point; scalar name slots may bundle several columns into one named array
// using the `name\0<count>` convention.
//

use std::io::{Read, Write};
use std::ops::Range;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::tractogram::{PointAttribute, TractCollection, TractError};

const MAX_NAME_SLOTS: usize = 10;
const NAME_SLOT_LEN: usize = 20;
// Upper bound on buffer reservations taken from file-declared counts.
const RESERVE_LIMIT: usize = 4096;

fn malformed(detail: impl Into<String>) -> TractError {
    TractError::MalformedContainer(detail.into())
}

/// The TrackVis file header, carried verbatim for same-format round trips.
///
/// The count fields, the scalar and property name tables and the version are
/// recomputed on write; everything else passes through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct TrkHeader {
    pub dim: [i16; 3],
    pub voxel_size: [f32; 3],
    pub origin: [f32; 3],
    pub n_scalars: i16,
    pub scalar_names: [[u8; NAME_SLOT_LEN]; MAX_NAME_SLOTS],
    pub n_properties: i16,
    pub property_names: [[u8; NAME_SLOT_LEN]; MAX_NAME_SLOTS],
    pub vox_to_ras: [[f32; 4]; 4],
    pub reserved: [u8; 444],
    pub voxel_order: [u8; 4],
    pub pad2: [u8; 4],
    pub image_orientation_patient: [f32; 6],
    pub pad1: [u8; 2],
    pub invert: [u8; 3],
    pub swap: [u8; 3],
    pub n_count: i32,
    pub version: i32,
}

impl TrkHeader {
    pub const SIZE: usize = 1000;

    /// Header for a file written without a TrackVis source: identity affine,
    /// unit voxels, RAS voxel order.
    pub fn fresh() -> Self {
        let mut vox_to_ras = [[0f32; 4]; 4];
        for axis in 0..4 {
            vox_to_ras[axis][axis] = 1.0;
        }
        Self {
            dim: [1, 1, 1],
            voxel_size: [1.0, 1.0, 1.0],
            origin: [0.0; 3],
            n_scalars: 0,
            scalar_names: [[0; NAME_SLOT_LEN]; MAX_NAME_SLOTS],
            n_properties: 0,
            property_names: [[0; NAME_SLOT_LEN]; MAX_NAME_SLOTS],
            vox_to_ras,
            reserved: [0; 444],
            voxel_order: *b"RAS\0",
            pad2: [0; 4],
            image_orientation_patient: [0.0; 6],
            pad1: [0; 2],
            invert: [0; 3],
            swap: [0; 3],
            n_count: 0,
            version: 2,
        }
    }

    fn parse(data: &[u8]) -> Result<Self, TractError> {
        let mut cursor = data;
        let mut id_string = [0u8; 6];
        cursor.read_exact(&mut id_string)?;
        if &id_string[..5] != b"TRACK" {
            return Err(malformed("missing TRACK signature"));
        }
        let mut dim = [0i16; 3];
        cursor.read_i16_into::<LittleEndian>(&mut dim)?;
        let mut voxel_size = [0f32; 3];
        cursor.read_f32_into::<LittleEndian>(&mut voxel_size)?;
        let mut origin = [0f32; 3];
        cursor.read_f32_into::<LittleEndian>(&mut origin)?;
        let n_scalars = cursor.read_i16::<LittleEndian>()?;
        let mut scalar_names = [[0u8; NAME_SLOT_LEN]; MAX_NAME_SLOTS];
        for slot in &mut scalar_names {
            cursor.read_exact(slot)?;
        }
        let n_properties = cursor.read_i16::<LittleEndian>()?;
        let mut property_names = [[0u8; NAME_SLOT_LEN]; MAX_NAME_SLOTS];
        for slot in &mut property_names {
            cursor.read_exact(slot)?;
        }
        let mut vox_to_ras = [[0f32; 4]; 4];
        for row in &mut vox_to_ras {
            cursor.read_f32_into::<LittleEndian>(row)?;
        }
        let mut reserved = [0u8; 444];
        cursor.read_exact(&mut reserved)?;
        let mut voxel_order = [0u8; 4];
        cursor.read_exact(&mut voxel_order)?;
        let mut pad2 = [0u8; 4];
        cursor.read_exact(&mut pad2)?;
        let mut image_orientation_patient = [0f32; 6];
        cursor.read_f32_into::<LittleEndian>(&mut image_orientation_patient)?;
        let mut pad1 = [0u8; 2];
        cursor.read_exact(&mut pad1)?;
        let mut invert = [0u8; 3];
        cursor.read_exact(&mut invert)?;
        let mut swap = [0u8; 3];
        cursor.read_exact(&mut swap)?;
        let n_count = cursor.read_i32::<LittleEndian>()?;
        let version = cursor.read_i32::<LittleEndian>()?;
        let hdr_size = cursor.read_i32::<LittleEndian>()?;

        if hdr_size != Self::SIZE as i32 {
            return Err(malformed(format!(
                "header size field is {hdr_size}, expected 1000 \
                 (big-endian TrackVis files are not supported)"
            )));
        }
        if !matches!(version, 1 | 2) {
            return Err(malformed(format!("unsupported TrackVis version {version}")));
        }
        if n_scalars < 0 || n_properties < 0 || n_count < 0 {
            return Err(malformed("negative count field in TrackVis header"));
        }

        Ok(Self {
            dim,
            voxel_size,
            origin,
            n_scalars,
            scalar_names,
            n_properties,
            property_names,
            vox_to_ras,
            reserved,
            voxel_order,
            pad2,
            image_orientation_patient,
            pad1,
            invert,
            swap,
            n_count,
            version,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), TractError> {
        writer.write_all(b"TRACK\0")?;
        for value in self.dim {
            writer.write_i16::<LittleEndian>(value)?;
        }
        for value in self.voxel_size {
            writer.write_f32::<LittleEndian>(value)?;
        }
        for value in self.origin {
            writer.write_f32::<LittleEndian>(value)?;
        }
        writer.write_i16::<LittleEndian>(self.n_scalars)?;
        for slot in &self.scalar_names {
            writer.write_all(slot)?;
        }
        writer.write_i16::<LittleEndian>(self.n_properties)?;
        for slot in &self.property_names {
            writer.write_all(slot)?;
        }
        for row in &self.vox_to_ras {
            for value in row {
                writer.write_f32::<LittleEndian>(*value)?;
            }
        }
        writer.write_all(&self.reserved)?;
        writer.write_all(&self.voxel_order)?;
        writer.write_all(&self.pad2)?;
        for value in self.image_orientation_patient {
            writer.write_f32::<LittleEndian>(value)?;
        }
        writer.write_all(&self.pad1)?;
        writer.write_all(&self.invert)?;
        writer.write_all(&self.swap)?;
        writer.write_i32::<LittleEndian>(self.n_count)?;
        writer.write_i32::<LittleEndian>(self.version)?;
        writer.write_i32::<LittleEndian>(Self::SIZE as i32)?;
        Ok(())
    }

    /// Map the scalar name table onto column ranges of the per-point scalar
    /// row. Columns left unclaimed by any name slot become one array named
    /// `scalars`.
    fn scalar_groups(&self) -> Result<Vec<(String, Range<usize>)>, TractError> {
        let total = self.n_scalars as usize;
        let mut groups = Vec::new();
        let mut consumed = 0usize;
        for slot in &self.scalar_names {
            if consumed == total {
                break;
            }
            let (name, columns) = decode_slot_name(slot)?;
            if columns == 0 {
                continue;
            }
            if consumed + columns > total {
                return Err(malformed(format!(
                    "scalar name {name:?} claims {columns} columns but only {} remain",
                    total - consumed
                )));
            }
            groups.push((name, consumed..consumed + columns));
            consumed += columns;
        }
        if consumed < total {
            groups.push(("scalars".to_string(), consumed..total));
        }
        Ok(groups)
    }
}

fn decode_slot_name(slot: &[u8; NAME_SLOT_LEN]) -> Result<(String, usize), TractError> {
    let end = slot.iter().rposition(|&byte| byte != 0).map_or(0, |at| at + 1);
    let body = &slot[..end];
    if body.is_empty() {
        return Ok((String::new(), 0));
    }
    let mut parts = body.split(|&byte| byte == 0);
    let name = std::str::from_utf8(parts.next().unwrap_or(&[]))
        .map_err(|_| malformed("scalar name is not UTF-8"))?
        .to_string();
    let columns = match parts.next() {
        None => 1,
        Some(digits) => {
            if parts.next().is_some() {
                return Err(malformed(format!("unreadable scalar name slot {body:?}")));
            }
            std::str::from_utf8(digits)
                .ok()
                .and_then(|text| text.parse().ok())
                .ok_or_else(|| {
                    malformed(format!("unreadable column count in scalar name {name:?}"))
                })?
        }
    };
    Ok((name, columns))
}

fn encode_slot_name(name: &str, components: usize) -> Result<[u8; NAME_SLOT_LEN], TractError> {
    let suffix = if components > 1 {
        format!("\0{components}")
    } else {
        String::new()
    };
    if suffix.len() >= NAME_SLOT_LEN {
        return Err(TractError::ShapeMismatch(format!(
            "attribute {name:?} has too many components for a TrackVis scalar slot"
        )));
    }
    let budget = NAME_SLOT_LEN - suffix.len();
    let clean: String = name.chars().filter(|&c| c != '\0').collect();
    let mut kept = clean.as_str();
    while kept.len() > budget {
        let mut chars = kept.chars();
        chars.next_back();
        kept = chars.as_str();
    }
    if kept.len() != clean.len() || clean.len() != name.len() {
        tracing::warn!(
            "attribute name {name:?} does not fit a TrackVis scalar name slot, storing {kept:?}"
        );
    }

    let mut slot = [0u8; NAME_SLOT_LEN];
    slot[..kept.len()].copy_from_slice(kept.as_bytes());
    slot[kept.len()..kept.len() + suffix.len()].copy_from_slice(suffix.as_bytes());
    Ok(slot)
}

pub fn read(data: &[u8]) -> Result<(TractCollection, TrkHeader), TractError> {
    if data.len() < TrkHeader::SIZE {
        return Err(malformed(format!(
            "file is {} bytes, shorter than the 1000-byte TrackVis header",
            data.len()
        )));
    }
    let header = TrkHeader::parse(&data[..TrkHeader::SIZE])?;
    let groups = header.scalar_groups()?;
    let n_scalars = header.n_scalars as usize;
    let declared = header.n_count as usize;

    let mut cursor = &data[TrkHeader::SIZE..];
    let mut streamlines: Vec<Vec<[f64; 3]>> = Vec::new();
    let mut group_arrays: Vec<Vec<Vec<f64>>> = vec![Vec::new(); groups.len()];
    loop {
        // n_count == 0 means the writer did not know the total; read to EOF.
        if header.n_count > 0 && streamlines.len() == declared {
            break;
        }
        if header.n_count == 0 && cursor.is_empty() {
            break;
        }
        let n_points = cursor
            .read_i32::<LittleEndian>()
            .map_err(|_| malformed("truncated streamline record"))?;
        let n_points = usize::try_from(n_points)
            .map_err(|_| malformed(format!("negative streamline point count {n_points}")))?;

        // The declared count is not yet verified against the remaining bytes.
        let reserve = n_points.min(RESERVE_LIMIT);
        let mut points = Vec::with_capacity(reserve);
        let mut rows: Vec<Vec<f64>> = groups
            .iter()
            .map(|(_, span)| Vec::with_capacity((reserve * span.len()).min(RESERVE_LIMIT)))
            .collect();
        let mut record = vec![0f32; 3 + n_scalars];
        for _ in 0..n_points {
            cursor
                .read_f32_into::<LittleEndian>(&mut record)
                .map_err(|_| malformed("truncated point record"))?;
            points.push([
                f64::from(record[0]),
                f64::from(record[1]),
                f64::from(record[2]),
            ]);
            for (index, (_, span)) in groups.iter().enumerate() {
                for column in span.clone() {
                    rows[index].push(f64::from(record[3 + column]));
                }
            }
        }
        // Per-streamline properties have no counterpart in the collection;
        // parse them to stay aligned and drop the values.
        for _ in 0..header.n_properties {
            cursor
                .read_f32::<LittleEndian>()
                .map_err(|_| malformed("truncated property record"))?;
        }

        streamlines.push(points);
        for (index, row) in rows.into_iter().enumerate() {
            group_arrays[index].push(row);
        }
    }

    let mut tracts = TractCollection::from_streamlines(streamlines);
    for ((name, span), arrays) in groups.into_iter().zip(group_arrays) {
        tracts.insert_attribute(name, PointAttribute::new(span.len(), arrays))?;
    }
    Ok((tracts, header))
}

pub fn write<W: Write>(
    mut writer: W,
    tracts: &TractCollection,
    header: Option<&TrkHeader>,
) -> Result<(), TractError> {
    let attributes: Vec<(&String, &PointAttribute)> = tracts.attributes().iter().collect();
    if attributes.len() > MAX_NAME_SLOTS {
        return Err(TractError::ShapeMismatch(format!(
            "TrackVis headers hold at most {MAX_NAME_SLOTS} point attribute arrays, \
             collection has {}",
            attributes.len()
        )));
    }
    let total_columns: usize = attributes
        .iter()
        .map(|(_, attribute)| attribute.components())
        .sum();
    let n_scalars = i16::try_from(total_columns).map_err(|_| {
        TractError::ShapeMismatch(format!(
            "{total_columns} scalar columns exceed the TrackVis per-point limit"
        ))
    })?;
    let n_count = i32::try_from(tracts.len()).map_err(|_| {
        TractError::ShapeMismatch(format!(
            "{} streamlines exceed the TrackVis count field",
            tracts.len()
        ))
    })?;

    let mut head = header.cloned().unwrap_or_else(TrkHeader::fresh);
    head.n_count = n_count;
    head.n_scalars = n_scalars;
    head.scalar_names = [[0u8; NAME_SLOT_LEN]; MAX_NAME_SLOTS];
    for (index, (name, attribute)) in attributes.iter().enumerate() {
        head.scalar_names[index] = encode_slot_name(name, attribute.components())?;
    }
    head.n_properties = 0;
    head.property_names = [[0u8; NAME_SLOT_LEN]; MAX_NAME_SLOTS];
    head.version = 2;
    head.write_to(&mut writer)?;

    for (index, streamline) in tracts.streamlines().enumerate() {
        let n_points = i32::try_from(streamline.len()).map_err(|_| {
            TractError::ShapeMismatch(format!(
                "streamline {index} has {} points, too many for a TrackVis record",
                streamline.len()
            ))
        })?;
        writer.write_i32::<LittleEndian>(n_points)?;
        for (row, point) in streamline.iter().enumerate() {
            for coordinate in point {
                writer.write_f32::<LittleEndian>(*coordinate as f32)?;
            }
            for (_, attribute) in &attributes {
                let components = attribute.components();
                let values = &attribute.array(index)[row * components..(row + 1) * components];
                for value in values {
                    writer.write_f32::<LittleEndian>(*value as f32)?;
                }
            }
        }
    }
    Ok(())
}
