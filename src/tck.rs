//
// tck.rs
// neuro-tools
//
// MRtrix track container: a `key: value` text header terminated by END, then
// coordinate triplets in the declared datatype. A NaN triplet closes each
// streamline and an infinity triplet closes the stream.
//

use std::collections::BTreeMap;
use std::io::Write;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::tractogram::{TractCollection, TractError};

pub const MAGIC: &str = "mrtrix tracks";

/// Header key/value pairs, preserved opaquely for same-format round trips.
/// The structural keys (`file`, `datatype`, `count`) are recomputed on write.
pub type TckHeader = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Datatype {
    Float32Le,
    Float32Be,
    Float64Le,
    Float64Be,
}

impl Datatype {
    fn parse(name: &str) -> Result<Self, TractError> {
        match name {
            "Float32LE" => Ok(Datatype::Float32Le),
            "Float32BE" => Ok(Datatype::Float32Be),
            "Float64LE" => Ok(Datatype::Float64Le),
            "Float64BE" => Ok(Datatype::Float64Be),
            other => Err(TractError::MalformedContainer(format!(
                "unsupported track datatype {other:?}"
            ))),
        }
    }
}

fn malformed(detail: impl Into<String>) -> TractError {
    TractError::MalformedContainer(detail.into())
}

fn next_line<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a str, TractError> {
    let rest = &data[*pos..];
    let end = rest
        .iter()
        .position(|&byte| byte == b'\n')
        .ok_or_else(|| malformed("header ends without END line"))?;
    let line = std::str::from_utf8(&rest[..end])
        .map_err(|_| malformed("header contains non-UTF-8 bytes"))?;
    *pos += end + 1;
    Ok(line.trim_end_matches('\r'))
}

pub fn read(data: &[u8]) -> Result<(TractCollection, TckHeader), TractError> {
    let mut pos = 0usize;
    if next_line(data, &mut pos)? != MAGIC {
        return Err(malformed("missing mrtrix tracks signature"));
    }

    let mut header = TckHeader::new();
    loop {
        let line = next_line(data, &mut pos)?;
        if line.trim() == "END" {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(format!("header line without separator: {line:?}")))?;
        header.insert(key.trim().to_string(), value.trim().to_string());
    }

    let datatype = Datatype::parse(
        header
            .get("datatype")
            .ok_or_else(|| malformed("header is missing the datatype key"))?,
    )?;
    let file_value = header
        .get("file")
        .ok_or_else(|| malformed("header is missing the file key"))?;
    let offset: usize = file_value
        .strip_prefix('.')
        .map(str::trim)
        .ok_or_else(|| malformed("track data stored outside the file is not supported"))?
        .parse()
        .map_err(|_| malformed(format!("unreadable data offset {file_value:?}")))?;
    if offset < pos || offset > data.len() {
        return Err(malformed(format!("data offset {offset} outside the file")));
    }

    let mut body = &data[offset..];
    let mut streamlines = Vec::new();
    let mut current: Vec<[f64; 3]> = Vec::new();
    loop {
        if body.is_empty() {
            return Err(malformed("track data ends without end-of-stream marker"));
        }
        let triplet = read_triplet(&mut body, datatype)?;
        if triplet.iter().all(|value| value.is_nan()) {
            streamlines.push(std::mem::take(&mut current));
        } else if triplet.iter().all(|value| value.is_infinite()) {
            // Tolerate a final streamline not closed by a NaN triplet.
            if !current.is_empty() {
                streamlines.push(current);
            }
            break;
        } else {
            current.push(triplet);
        }
    }

    Ok((TractCollection::from_streamlines(streamlines), header))
}

fn read_triplet(body: &mut &[u8], datatype: Datatype) -> Result<[f64; 3], TractError> {
    let mut triplet = [0f64; 3];
    for value in &mut triplet {
        *value = match datatype {
            Datatype::Float32Le => f64::from(
                body.read_f32::<LittleEndian>()
                    .map_err(|_| malformed("truncated coordinate triplet"))?,
            ),
            Datatype::Float32Be => f64::from(
                body.read_f32::<BigEndian>()
                    .map_err(|_| malformed("truncated coordinate triplet"))?,
            ),
            Datatype::Float64Le => body
                .read_f64::<LittleEndian>()
                .map_err(|_| malformed("truncated coordinate triplet"))?,
            Datatype::Float64Be => body
                .read_f64::<BigEndian>()
                .map_err(|_| malformed("truncated coordinate triplet"))?,
        };
    }
    Ok(triplet)
}

/// Serialize the collection as Float32LE track data. Per-point attributes are
/// not representable in this container and are dropped.
pub fn write<W: Write>(
    mut writer: W,
    tracts: &TractCollection,
    header: Option<&TckHeader>,
) -> Result<(), TractError> {
    let mut head = String::new();
    head.push_str(MAGIC);
    head.push('\n');
    if let Some(header) = header {
        for (key, value) in header {
            if matches!(key.as_str(), "file" | "datatype" | "count") {
                continue;
            }
            head.push_str(key);
            head.push_str(": ");
            head.push_str(value);
            head.push('\n');
        }
    }
    head.push_str(&format!("count: {}\n", tracts.len()));
    head.push_str("datatype: Float32LE\n");

    // The offset names the first body byte, but writing it changes the header
    // length; iterate until the digit count settles so output is stable.
    let base = head.len() + "file: . ".len() + "\nEND\n".len();
    let mut offset = base + 1;
    loop {
        let next = base + decimal_digits(offset);
        if next == offset {
            break;
        }
        offset = next;
    }
    head.push_str(&format!("file: . {offset}\nEND\n"));
    debug_assert_eq!(head.len(), offset);

    writer.write_all(head.as_bytes())?;
    for streamline in tracts.streamlines() {
        for point in streamline {
            for coordinate in point {
                writer.write_f32::<LittleEndian>(*coordinate as f32)?;
            }
        }
        write_marker(&mut writer, f32::NAN)?;
    }
    write_marker(&mut writer, f32::INFINITY)?;
    Ok(())
}

fn write_marker<W: Write>(writer: &mut W, value: f32) -> Result<(), TractError> {
    let mut marker = [0u8; 12];
    for slot in 0..3 {
        LittleEndian::write_f32(&mut marker[slot * 4..slot * 4 + 4], value);
    }
    writer.write_all(&marker)?;
    Ok(())
}

fn decimal_digits(value: usize) -> usize {
    value.to_string().len()
}
