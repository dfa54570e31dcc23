//
// vtp.rs
// neuro-tools
//
// XML polydata container (.vtp/.xml): a VTKFile document holding one Piece
// with inline binary DataArrays. Connectivity and offsets are converted to
// and from the flat length-prefixed cell array, so framing validation is
// shared with the legacy container.
//

use std::fmt::Write as _;
use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::polydata::{self, PointDataArray, PolyData};
use crate::tractogram::{ActiveArrays, TractCollection, TractError};

fn malformed(detail: impl Into<String>) -> TractError {
    TractError::MalformedContainer(detail.into())
}

/// One parsed XML element; `text` keeps the last non-blank character run,
/// which for a DataArray is its base64 block.
#[derive(Debug)]
struct Element<'a> {
    name: &'a str,
    attributes: Vec<(&'a str, String)>,
    children: Vec<Element<'a>>,
    text: Option<&'a str>,
}

impl<'a> Element<'a> {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element<'a>> {
        self.children.iter().find(|child| child.name == name)
    }

    fn children_named<'e>(&'e self, name: &'e str) -> impl Iterator<Item = &'e Element<'a>> {
        self.children.iter().filter(move |child| child.name == name)
    }
}

/// Recursion bound for nested elements; a VTKFile polydata document is five
/// levels deep.
const MAX_ELEMENT_DEPTH: usize = 32;

/// Minimal scanner for the VTKFile subset: elements, attributes and text.
/// Declarations are skipped; comments, CDATA and DTDs are rejected.
struct Scanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_spaces(&mut self) {
        let rest = self.rest().trim_start();
        self.pos = self.text.len() - rest.len();
    }

    fn parse_document(mut self) -> Result<Element<'a>, TractError> {
        loop {
            self.skip_spaces();
            if let Some(tail) = self.rest().strip_prefix("<?") {
                let end = tail
                    .find("?>")
                    .ok_or_else(|| malformed("unterminated XML declaration"))?;
                self.pos += 2 + end + 2;
            } else {
                break;
            }
        }
        if self.rest().starts_with("<!") || self.rest().starts_with("</") {
            return Err(malformed("document does not start with an opening tag"));
        }
        if !self.rest().starts_with('<') {
            return Err(malformed("not an XML document"));
        }
        let root = self.parse_element(0)?;
        if !self.rest().trim().is_empty() {
            return Err(malformed("content after the closing root tag"));
        }
        Ok(root)
    }

    /// Parse one element; the cursor sits on its `<`.
    fn parse_element(&mut self, depth: usize) -> Result<Element<'a>, TractError> {
        if depth >= MAX_ELEMENT_DEPTH {
            return Err(malformed(format!(
                "element nesting deeper than {MAX_ELEMENT_DEPTH} levels"
            )));
        }
        let (name, attributes, closed) = self.parse_opening_tag()?;
        let mut element = Element {
            name,
            attributes,
            children: Vec::new(),
            text: None,
        };
        if closed {
            return Ok(element);
        }
        loop {
            let rest = self.rest();
            let next = rest
                .find('<')
                .ok_or_else(|| malformed(format!("element <{name}> is never closed")))?;
            let run = &rest[..next];
            if !run.trim().is_empty() {
                element.text = Some(run);
            }
            self.pos += next;
            if self.rest().starts_with("</") {
                let closing = self.parse_closing_tag()?;
                if closing != name {
                    return Err(malformed(format!(
                        "mismatched closing tag </{closing}> for <{name}>"
                    )));
                }
                return Ok(element);
            }
            if self.rest().starts_with("<!") {
                return Err(malformed("XML comments and declarations are not supported"));
            }
            element.children.push(self.parse_element(depth + 1)?);
        }
    }

    fn parse_opening_tag(&mut self) -> Result<(&'a str, Vec<(&'a str, String)>, bool), TractError> {
        self.pos += 1; // '<'
        let name = self.parse_name()?;
        let mut attributes = Vec::new();
        loop {
            self.skip_spaces();
            let rest = self.rest();
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok((name, attributes, true));
            }
            if rest.starts_with('>') {
                self.pos += 1;
                return Ok((name, attributes, false));
            }
            if rest.is_empty() {
                return Err(malformed(format!("tag <{name}> is never terminated")));
            }
            let key = self.parse_name()?;
            self.skip_spaces();
            if !self.rest().starts_with('=') {
                return Err(malformed(format!("attribute {key:?} has no value")));
            }
            self.pos += 1;
            self.skip_spaces();
            attributes.push((key, self.parse_quoted()?));
        }
    }

    fn parse_closing_tag(&mut self) -> Result<&'a str, TractError> {
        self.pos += 2; // "</"
        let name = self.parse_name()?;
        self.skip_spaces();
        if !self.rest().starts_with('>') {
            return Err(malformed(format!("closing tag </{name}> is never terminated")));
        }
        self.pos += 1;
        Ok(name)
    }

    fn parse_name(&mut self) -> Result<&'a str, TractError> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '>' | '/' | '='))
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(malformed("empty XML name"));
        }
        self.pos += end;
        Ok(&rest[..end])
    }

    fn parse_quoted(&mut self) -> Result<String, TractError> {
        let rest = self.rest();
        let quote = rest
            .chars()
            .next()
            .filter(|c| matches!(c, '"' | '\''))
            .ok_or_else(|| malformed("attribute value is not quoted"))?;
        let body = &rest[1..];
        let end = body
            .find(quote)
            .ok_or_else(|| malformed("unterminated attribute value"))?;
        self.pos += end + 2;
        unescape(&body[..end])
    }
}

fn unescape(text: &str) -> Result<String, TractError> {
    if !text.contains('&') {
        return Ok(text.to_string());
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        rest = &rest[at..];
        let end = rest
            .find(';')
            .ok_or_else(|| malformed("unterminated XML entity"))?;
        match &rest[..=end] {
            "&amp;" => out.push('&'),
            "&lt;" => out.push('<'),
            "&gt;" => out.push('>'),
            "&quot;" => out.push('"'),
            "&apos;" => out.push('\''),
            other => return Err(malformed(format!("unsupported XML entity {other:?}"))),
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Order {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderType {
    UInt32,
    UInt64,
}

impl HeaderType {
    fn width(self) -> usize {
        match self {
            HeaderType::UInt32 => 4,
            HeaderType::UInt64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayType {
    Float32,
    Float64,
    Int32,
    Int64,
    UInt32,
    UInt64,
}

impl ArrayType {
    fn parse(element: &Element<'_>) -> Result<Self, TractError> {
        match element.attribute("type") {
            Some("Float32") => Ok(ArrayType::Float32),
            Some("Float64") => Ok(ArrayType::Float64),
            Some("Int32") => Ok(ArrayType::Int32),
            Some("Int64") => Ok(ArrayType::Int64),
            Some("UInt32") => Ok(ArrayType::UInt32),
            Some("UInt64") => Ok(ArrayType::UInt64),
            Some(other) => Err(malformed(format!("unsupported data array type {other:?}"))),
            None => Err(malformed("data array without a type attribute")),
        }
    }

    fn width(self) -> usize {
        match self {
            ArrayType::Float32 | ArrayType::Int32 | ArrayType::UInt32 => 4,
            ArrayType::Float64 | ArrayType::Int64 | ArrayType::UInt64 => 8,
        }
    }
}

/// Decode one inline binary block. The byte-count header is base64-encoded
/// on its own (padded to a full group), then the payload follows as a second
/// base64 run; this is how the reference XML writer frames uncompressed data.
fn decode_block(text: &str, header: HeaderType, order: Order) -> Result<Vec<u8>, TractError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let header_chars = header.width().div_ceil(3) * 4;
    if compact.len() < header_chars {
        return Err(malformed("data array block is shorter than its byte-count header"));
    }
    let (head, body) = compact.split_at(header_chars);
    let head = STANDARD
        .decode(head)
        .map_err(|_| malformed("unreadable base64 in data array header"))?;
    if head.len() != header.width() {
        return Err(malformed("truncated data array byte-count header"));
    }
    let declared = match (header, order) {
        (HeaderType::UInt32, Order::Little) => u64::from(LittleEndian::read_u32(&head)),
        (HeaderType::UInt32, Order::Big) => u64::from(BigEndian::read_u32(&head)),
        (HeaderType::UInt64, Order::Little) => LittleEndian::read_u64(&head),
        (HeaderType::UInt64, Order::Big) => BigEndian::read_u64(&head),
    };
    let payload = STANDARD
        .decode(body)
        .map_err(|_| malformed("unreadable base64 in data array"))?;
    if payload.len() as u64 != declared {
        return Err(malformed(format!(
            "data array holds {} bytes, header declares {declared}",
            payload.len()
        )));
    }
    Ok(payload)
}

fn values_with<E: ByteOrder>(payload: &[u8], array: ArrayType) -> Vec<f64> {
    match array {
        ArrayType::Float32 => payload
            .chunks_exact(4)
            .map(|chunk| f64::from(E::read_f32(chunk)))
            .collect(),
        ArrayType::Float64 => payload.chunks_exact(8).map(E::read_f64).collect(),
        ArrayType::Int32 => payload
            .chunks_exact(4)
            .map(|chunk| f64::from(E::read_i32(chunk)))
            .collect(),
        ArrayType::Int64 => payload
            .chunks_exact(8)
            .map(|chunk| E::read_i64(chunk) as f64)
            .collect(),
        ArrayType::UInt32 => payload
            .chunks_exact(4)
            .map(|chunk| f64::from(E::read_u32(chunk)))
            .collect(),
        ArrayType::UInt64 => payload
            .chunks_exact(8)
            .map(|chunk| E::read_u64(chunk) as f64)
            .collect(),
    }
}

fn indices_with<E: ByteOrder>(payload: &[u8], array: ArrayType) -> Result<Vec<i64>, TractError> {
    match array {
        ArrayType::Int32 => Ok(payload
            .chunks_exact(4)
            .map(|chunk| i64::from(E::read_i32(chunk)))
            .collect()),
        ArrayType::Int64 => Ok(payload.chunks_exact(8).map(E::read_i64).collect()),
        ArrayType::UInt32 => Ok(payload
            .chunks_exact(4)
            .map(|chunk| i64::from(E::read_u32(chunk)))
            .collect()),
        ArrayType::UInt64 => payload
            .chunks_exact(8)
            .map(|chunk| {
                i64::try_from(E::read_u64(chunk))
                    .map_err(|_| malformed("index value exceeds the 64-bit signed range"))
            })
            .collect(),
        _ => Err(malformed("connectivity and offsets must be integer arrays")),
    }
}

fn require_binary(element: &Element<'_>) -> Result<(), TractError> {
    match element.attribute("format") {
        Some("binary") => Ok(()),
        Some(other) => Err(malformed(format!(
            "{other:?} data arrays are not supported, only inline binary"
        ))),
        None => Err(malformed("data array without a format attribute")),
    }
}

fn array_payload(
    element: &Element<'_>,
    array: ArrayType,
    header: HeaderType,
    order: Order,
) -> Result<Vec<u8>, TractError> {
    require_binary(element)?;
    let payload = decode_block(element.text.unwrap_or(""), header, order)?;
    if payload.len() % array.width() != 0 {
        return Err(malformed(format!(
            "data array payload of {} bytes is not a whole number of values",
            payload.len()
        )));
    }
    Ok(payload)
}

fn array_values(
    element: &Element<'_>,
    header: HeaderType,
    order: Order,
) -> Result<Vec<f64>, TractError> {
    let array = ArrayType::parse(element)?;
    let payload = array_payload(element, array, header, order)?;
    Ok(match order {
        Order::Little => values_with::<LittleEndian>(&payload, array),
        Order::Big => values_with::<BigEndian>(&payload, array),
    })
}

fn array_indices(
    element: &Element<'_>,
    header: HeaderType,
    order: Order,
) -> Result<Vec<i64>, TractError> {
    let array = ArrayType::parse(element)?;
    let payload = array_payload(element, array, header, order)?;
    match order {
        Order::Little => indices_with::<LittleEndian>(&payload, array),
        Order::Big => indices_with::<BigEndian>(&payload, array),
    }
}

fn count_attribute(element: &Element<'_>, name: &str) -> Result<Option<usize>, TractError> {
    match element.attribute(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| malformed(format!("unreadable {name} value {raw:?}"))),
    }
}

fn required_count(element: &Element<'_>, name: &str) -> Result<usize, TractError> {
    count_attribute(element, name)?
        .ok_or_else(|| malformed(format!("Piece element without {name}")))
}

fn line_array<'e, 'a>(lines: &'e Element<'a>, name: &str) -> Result<&'e Element<'a>, TractError> {
    lines
        .children_named("DataArray")
        .find(|child| child.attribute("Name") == Some(name))
        .ok_or_else(|| malformed(format!("missing {name} array")))
}

/// Rebuild the flat length-prefixed cell array from connectivity and end
/// offsets, validating the framing before the shared unpacking sees it.
fn cells_from_offsets(
    connectivity: &[i64],
    offsets: &[i64],
    number_of_lines: usize,
) -> Result<Vec<i64>, TractError> {
    if offsets.len() != number_of_lines {
        return Err(malformed(format!(
            "{} offsets for {number_of_lines} lines",
            offsets.len()
        )));
    }
    let mut cells = Vec::with_capacity(connectivity.len() + offsets.len());
    let mut start = 0usize;
    for (line, &end) in offsets.iter().enumerate() {
        let end = usize::try_from(end)
            .map_err(|_| malformed(format!("negative offset at line {line}")))?;
        if end < start {
            return Err(malformed(format!("offsets decrease at line {line}")));
        }
        if end > connectivity.len() {
            return Err(malformed(format!(
                "offset {end} overruns the connectivity array of {}",
                connectivity.len()
            )));
        }
        cells.push((end - start) as i64);
        cells.extend_from_slice(&connectivity[start..end]);
        start = end;
    }
    if start != connectivity.len() {
        return Err(malformed(format!(
            "{} trailing connectivity entries after the final offset",
            connectivity.len() - start
        )));
    }
    Ok(cells)
}

pub fn read(data: &[u8]) -> Result<TractCollection, TractError> {
    let text = std::str::from_utf8(data)
        .map_err(|_| malformed("not an XML document (invalid UTF-8)"))?;
    let root = Scanner::new(text).parse_document()?;
    if root.name != "VTKFile" {
        return Err(malformed(format!("root element is <{}>, expected <VTKFile>", root.name)));
    }
    match root.attribute("type") {
        Some("PolyData") => {}
        Some(other) => return Err(malformed(format!("not a polydata file: type {other:?}"))),
        None => return Err(malformed("VTKFile element without a type attribute")),
    }
    if root.attribute("compressor").is_some() {
        return Err(malformed("compressed data arrays are not supported"));
    }
    let order = match root.attribute("byte_order") {
        Some("LittleEndian") | None => Order::Little,
        Some("BigEndian") => Order::Big,
        Some(other) => return Err(malformed(format!("unknown byte order {other:?}"))),
    };
    let header = match root.attribute("header_type") {
        Some("UInt32") | None => HeaderType::UInt32,
        Some("UInt64") => HeaderType::UInt64,
        Some(other) => return Err(malformed(format!("unknown header type {other:?}"))),
    };

    let grid = root
        .child("PolyData")
        .ok_or_else(|| malformed("missing PolyData element"))?;
    let mut pieces = grid.children_named("Piece");
    let piece = pieces.next().ok_or_else(|| malformed("missing Piece element"))?;
    if pieces.next().is_some() {
        return Err(malformed("multi-piece polydata is not supported"));
    }

    let number_of_points = required_count(piece, "NumberOfPoints")?;
    let number_of_lines = required_count(piece, "NumberOfLines")?;
    for other in ["NumberOfVerts", "NumberOfStrips", "NumberOfPolys"] {
        if count_attribute(piece, other)?.unwrap_or(0) != 0 {
            return Err(malformed(format!("{other} is nonzero, only line cells are supported")));
        }
    }

    let points_array = piece
        .child("Points")
        .and_then(|points| points.child("DataArray"))
        .ok_or_else(|| malformed("missing point array"))?;
    let components = count_attribute(points_array, "NumberOfComponents")?.unwrap_or(1);
    if components != 3 {
        return Err(malformed(format!(
            "point array has {components} components, expected 3"
        )));
    }
    let raw_points = array_values(points_array, header, order)?;
    let expected = number_of_points
        .checked_mul(3)
        .ok_or_else(|| malformed("point array size overflows"))?;
    if raw_points.len() != expected {
        return Err(malformed(format!(
            "point array holds {} values for {number_of_points} points",
            raw_points.len()
        )));
    }
    let points: Vec<[f64; 3]> = raw_points
        .chunks_exact(3)
        .map(|triple| [triple[0], triple[1], triple[2]])
        .collect();

    let lines = piece
        .child("Lines")
        .ok_or_else(|| malformed("missing line-index arrays"))?;
    let connectivity = array_indices(line_array(lines, "connectivity")?, header, order)?;
    let offsets = array_indices(line_array(lines, "offsets")?, header, order)?;
    let cells = cells_from_offsets(&connectivity, &offsets, number_of_lines)?;

    let mut point_data = Vec::new();
    let mut active = ActiveArrays::default();
    if let Some(data) = piece.child("PointData") {
        active.scalars = data.attribute("Scalars").map(str::to_string);
        active.vectors = data.attribute("Vectors").map(str::to_string);
        active.tensors = data.attribute("Tensors").map(str::to_string);
        for array in data.children_named("DataArray") {
            let name = array
                .attribute("Name")
                .ok_or_else(|| malformed("point data array without a Name attribute"))?
                .to_string();
            let components = count_attribute(array, "NumberOfComponents")?.unwrap_or(1);
            let values = array_values(array, header, order)?;
            point_data.push(PointDataArray {
                name,
                components,
                values,
            });
        }
    }

    polydata::unpack(PolyData {
        title: String::new(),
        points,
        cells,
        number_of_lines,
        point_data,
        active,
    })
}

fn inline_block(payload: &[u8]) -> Result<String, TractError> {
    let count = u32::try_from(payload.len()).map_err(|_| {
        TractError::ShapeMismatch(format!(
            "data array of {} bytes exceeds the UInt32 inline header",
            payload.len()
        ))
    })?;
    let mut block = STANDARD.encode(count.to_le_bytes());
    block.push_str(&STANDARD.encode(payload));
    Ok(block)
}

fn encode_f64(values: &[f64]) -> Result<String, TractError> {
    let mut payload = vec![0u8; values.len() * 8];
    LittleEndian::write_f64_into(values, &mut payload);
    inline_block(&payload)
}

fn encode_i64(values: &[i64]) -> Result<String, TractError> {
    let mut payload = vec![0u8; values.len() * 8];
    LittleEndian::write_i64_into(values, &mut payload);
    inline_block(&payload)
}

pub fn write<W: Write>(mut writer: W, tracts: &TractCollection) -> Result<(), TractError> {
    let poly = polydata::pack(tracts);

    // Split the flat cell array back into connectivity and end offsets.
    let mut connectivity: Vec<i64> = Vec::with_capacity(poly.cells.len());
    let mut offsets: Vec<i64> = Vec::with_capacity(poly.number_of_lines);
    let mut cursor = 0usize;
    for _ in 0..poly.number_of_lines {
        let count = poly.cells[cursor] as usize;
        connectivity.extend_from_slice(&poly.cells[cursor + 1..cursor + 1 + count]);
        offsets.push(connectivity.len() as i64);
        cursor += count + 1;
    }

    let mut document = String::new();
    let _ = writeln!(document, "<?xml version=\"1.0\"?>");
    let _ = writeln!(
        document,
        "<VTKFile type=\"PolyData\" version=\"0.1\" byte_order=\"LittleEndian\" header_type=\"UInt32\">"
    );
    let _ = writeln!(document, "  <PolyData>");
    let _ = writeln!(
        document,
        "    <Piece NumberOfPoints=\"{}\" NumberOfVerts=\"0\" NumberOfLines=\"{}\" NumberOfStrips=\"0\" NumberOfPolys=\"0\">",
        poly.points.len(),
        poly.number_of_lines
    );

    let mut roles = String::new();
    if let Some(name) = &poly.active.scalars {
        let _ = write!(roles, " Scalars=\"{}\"", escape(name));
    }
    if let Some(name) = &poly.active.vectors {
        let _ = write!(roles, " Vectors=\"{}\"", escape(name));
    }
    if let Some(name) = &poly.active.tensors {
        let _ = write!(roles, " Tensors=\"{}\"", escape(name));
    }
    let _ = writeln!(document, "      <PointData{roles}>");
    for array in &poly.point_data {
        let _ = writeln!(
            document,
            "        <DataArray type=\"Float64\" Name=\"{}\" NumberOfComponents=\"{}\" format=\"binary\">",
            escape(&array.name),
            array.components
        );
        let _ = writeln!(document, "          {}", encode_f64(&array.values)?);
        let _ = writeln!(document, "        </DataArray>");
    }
    let _ = writeln!(document, "      </PointData>");

    let flat_points: Vec<f64> = poly.points.iter().flatten().copied().collect();
    let _ = writeln!(document, "      <Points>");
    let _ = writeln!(
        document,
        "        <DataArray type=\"Float64\" Name=\"Points\" NumberOfComponents=\"3\" format=\"binary\">"
    );
    let _ = writeln!(document, "          {}", encode_f64(&flat_points)?);
    let _ = writeln!(document, "        </DataArray>");
    let _ = writeln!(document, "      </Points>");

    let _ = writeln!(document, "      <Lines>");
    let _ = writeln!(
        document,
        "        <DataArray type=\"Int64\" Name=\"connectivity\" format=\"binary\">"
    );
    let _ = writeln!(document, "          {}", encode_i64(&connectivity)?);
    let _ = writeln!(document, "        </DataArray>");
    let _ = writeln!(
        document,
        "        <DataArray type=\"Int64\" Name=\"offsets\" format=\"binary\">"
    );
    let _ = writeln!(document, "          {}", encode_i64(&offsets)?);
    let _ = writeln!(document, "        </DataArray>");
    let _ = writeln!(document, "      </Lines>");
    let _ = writeln!(document, "    </Piece>");
    let _ = writeln!(document, "  </PolyData>");
    let _ = writeln!(document, "</VTKFile>");

    writer.write_all(document.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tractogram::PointAttribute;

    fn sample() -> TractCollection {
        let mut tracts = TractCollection::from_streamlines(vec![
            vec![[0.125, -3.5, 7.0], [1.0, 2.0, 3.0], [4.5, 5.5, 6.5]],
            vec![[9.0, 8.0, 7.0], [6.0, 5.0, 4.0]],
        ]);
        tracts
            .insert_attribute(
                "fa",
                PointAttribute::new(1, vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5]]),
            )
            .unwrap();
        tracts
            .insert_attribute(
                "direction",
                PointAttribute::new(
                    3,
                    vec![
                        vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
                        vec![0.5, 0.5, 0.0, 0.0, 0.5, 0.5],
                    ],
                ),
            )
            .unwrap();
        tracts.set_active(ActiveArrays {
            scalars: Some("fa".into()),
            vectors: Some("direction".into()),
            tensors: None,
        });
        tracts
    }

    #[test]
    fn round_trip_preserves_geometry_attributes_and_roles() {
        let tracts = sample();
        let mut buffer = Vec::new();
        write(&mut buffer, &tracts).unwrap();

        let reread = read(&buffer).unwrap();
        assert_eq!(reread, tracts);
    }

    #[test]
    fn empty_collection_round_trips() {
        let tracts = TractCollection::new();
        let mut buffer = Vec::new();
        write(&mut buffer, &tracts).unwrap();

        let reread = read(&buffer).unwrap();
        assert!(reread.is_empty());
        assert_eq!(reread.num_points(), 0);
    }

    #[test]
    fn attribute_names_survive_escaping() {
        let mut tracts = TractCollection::from_streamlines(vec![vec![[0.0, 0.0, 0.0]]]);
        tracts
            .insert_attribute("fa & \"md\" <raw>", PointAttribute::new(1, vec![vec![0.5]]))
            .unwrap();

        let mut buffer = Vec::new();
        write(&mut buffer, &tracts).unwrap();
        let reread = read(&buffer).unwrap();
        assert!(reread.attributes().contains_key("fa & \"md\" <raw>"));
    }

    #[test]
    fn big_endian_wide_header_document_is_accepted() {
        // Points as Float32, indices as UInt32/Int32, everything big-endian
        // with a UInt64 byte-count header.
        fn block(payload: &[u8]) -> String {
            let mut text = STANDARD.encode((payload.len() as u64).to_be_bytes());
            text.push_str(&STANDARD.encode(payload));
            text
        }
        let mut points = vec![0u8; 6 * 4];
        BigEndian::write_f32_into(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &mut points);
        let mut connectivity = vec![0u8; 2 * 4];
        BigEndian::write_u32_into(&[0, 1], &mut connectivity);
        let mut offsets = vec![0u8; 4];
        BigEndian::write_i32_into(&[2], &mut offsets);

        let document = format!(
            "<?xml version=\"1.0\"?>\n\
             <VTKFile type=\"PolyData\" version=\"0.1\" byte_order=\"BigEndian\" header_type=\"UInt64\">\n\
               <PolyData>\n\
                 <Piece NumberOfPoints=\"2\" NumberOfLines=\"1\">\n\
                   <Points>\n\
                     <DataArray type=\"Float32\" Name=\"Points\" NumberOfComponents=\"3\" format=\"binary\">{}</DataArray>\n\
                   </Points>\n\
                   <Lines>\n\
                     <DataArray type=\"UInt32\" Name=\"connectivity\" format=\"binary\">{}</DataArray>\n\
                     <DataArray type=\"Int32\" Name=\"offsets\" format=\"binary\">{}</DataArray>\n\
                   </Lines>\n\
                 </Piece>\n\
               </PolyData>\n\
             </VTKFile>\n",
            block(&points),
            block(&connectivity),
            block(&offsets),
        );

        let tracts = read(document.as_bytes()).unwrap();
        assert_eq!(tracts.len(), 1);
        assert_eq!(tracts.streamline(0), [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    }

    #[test]
    fn ascii_and_appended_arrays_are_rejected() {
        let tracts = sample();
        let mut buffer = Vec::new();
        write(&mut buffer, &tracts).unwrap();
        let document = String::from_utf8(buffer).unwrap();

        let ascii = document.replace("format=\"binary\"", "format=\"ascii\"");
        assert!(matches!(
            read(ascii.as_bytes()),
            Err(TractError::MalformedContainer(_))
        ));

        let appended = document.replace("format=\"binary\"", "format=\"appended\"");
        assert!(matches!(
            read(appended.as_bytes()),
            Err(TractError::MalformedContainer(_))
        ));
    }

    #[test]
    fn compressed_documents_are_rejected() {
        let tracts = sample();
        let mut buffer = Vec::new();
        write(&mut buffer, &tracts).unwrap();
        let document = String::from_utf8(buffer).unwrap().replace(
            "header_type=\"UInt32\"",
            "header_type=\"UInt32\" compressor=\"vtkZLibDataCompressor\"",
        );

        let error = read(document.as_bytes()).unwrap_err();
        assert!(error.to_string().contains("compressed"));
    }

    #[test]
    fn offset_framing_violations_are_rejected() {
        let tracts = sample();
        let mut buffer = Vec::new();
        write(&mut buffer, &tracts).unwrap();
        let document = String::from_utf8(buffer).unwrap();

        // Recompute the offsets block as a decreasing sequence.
        let good = encode_i64(&[3, 5]).unwrap();
        let bad = encode_i64(&[5, 3]).unwrap();
        let tampered = document.replace(&good, &bad);
        assert_ne!(tampered, document);
        assert!(matches!(
            read(tampered.as_bytes()),
            Err(TractError::MalformedContainer(_))
        ));

        // Declare one line more than the offsets array holds.
        let miscounted = document.replace("NumberOfLines=\"2\"", "NumberOfLines=\"3\"");
        assert!(matches!(
            read(miscounted.as_bytes()),
            Err(TractError::MalformedContainer(_))
        ));
    }

    #[test]
    fn byte_count_mismatch_is_rejected() {
        let tracts = TractCollection::from_streamlines(vec![vec![[1.0, 2.0, 3.0]]]);
        let mut buffer = Vec::new();
        write(&mut buffer, &tracts).unwrap();
        let document = String::from_utf8(buffer).unwrap();

        // The points block declares 24 bytes; swap in a 16-byte payload.
        let good = encode_f64(&[1.0, 2.0, 3.0]).unwrap();
        let bad_payload = {
            let mut payload = vec![0u8; 16];
            LittleEndian::write_f64_into(&[1.0, 2.0], &mut payload);
            let mut block = STANDARD.encode(24u32.to_le_bytes());
            block.push_str(&STANDARD.encode(&payload));
            block
        };
        let tampered = document.replace(&good, &bad_payload);
        assert_ne!(tampered, document);
        assert!(matches!(
            read(tampered.as_bytes()),
            Err(TractError::MalformedContainer(_))
        ));
    }

    #[test]
    fn huge_component_declarations_are_rejected() {
        // 2 points x (2^63 + 5) components wraps to 10, the payload length.
        let document = format!(
            "<?xml version=\"1.0\"?>\n\
             <VTKFile type=\"PolyData\" version=\"0.1\" byte_order=\"LittleEndian\" header_type=\"UInt32\">\n\
               <PolyData>\n\
                 <Piece NumberOfPoints=\"2\" NumberOfLines=\"1\">\n\
                   <PointData>\n\
                     <DataArray type=\"Float64\" Name=\"fa\" NumberOfComponents=\"9223372036854775813\" format=\"binary\">{}</DataArray>\n\
                   </PointData>\n\
                   <Points>\n\
                     <DataArray type=\"Float64\" Name=\"Points\" NumberOfComponents=\"3\" format=\"binary\">{}</DataArray>\n\
                   </Points>\n\
                   <Lines>\n\
                     <DataArray type=\"Int64\" Name=\"connectivity\" format=\"binary\">{}</DataArray>\n\
                     <DataArray type=\"Int64\" Name=\"offsets\" format=\"binary\">{}</DataArray>\n\
                   </Lines>\n\
                 </Piece>\n\
               </PolyData>\n\
             </VTKFile>\n",
            encode_f64(&[0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9]).unwrap(),
            encode_f64(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
            encode_i64(&[0, 1]).unwrap(),
            encode_i64(&[2]).unwrap(),
        );

        assert!(matches!(
            read(document.as_bytes()),
            Err(TractError::MalformedContainer(_))
        ));
    }

    #[test]
    fn huge_point_declarations_are_rejected() {
        // 3 x 6148914691236517216 wraps to 32, the payload length.
        let document = format!(
            "<VTKFile type=\"PolyData\"><PolyData>\
             <Piece NumberOfPoints=\"6148914691236517216\" NumberOfLines=\"0\">\
             <Points><DataArray type=\"Float64\" Name=\"Points\" NumberOfComponents=\"3\" \
             format=\"binary\">{}</DataArray></Points>\
             <Lines><DataArray type=\"Int64\" Name=\"connectivity\" format=\"binary\">{}</DataArray>\
             <DataArray type=\"Int64\" Name=\"offsets\" format=\"binary\">{}</DataArray></Lines>\
             </Piece></PolyData></VTKFile>",
            encode_f64(&[0.0; 32]).unwrap(),
            encode_i64(&[]).unwrap(),
            encode_i64(&[]).unwrap(),
        );

        assert!(matches!(
            read(document.as_bytes()),
            Err(TractError::MalformedContainer(_))
        ));
    }

    #[test]
    fn mismatched_tags_are_rejected() {
        let data = b"<VTKFile type=\"PolyData\"><PolyData></Piece></VTKFile>";
        assert!(matches!(
            read(data),
            Err(TractError::MalformedContainer(_))
        ));
    }

    #[test]
    fn runaway_element_nesting_is_rejected() {
        let mut document = String::from("<VTKFile type=\"PolyData\">");
        for _ in 0..200 {
            document.push_str("<PolyData>");
        }
        for _ in 0..200 {
            document.push_str("</PolyData>");
        }
        document.push_str("</VTKFile>");

        let error = read(document.as_bytes()).unwrap_err();
        assert!(error.to_string().contains("nesting"));
    }

    #[test]
    fn vert_and_poly_pieces_are_rejected() {
        let data = b"<VTKFile type=\"PolyData\"><PolyData>\
                     <Piece NumberOfPoints=\"0\" NumberOfLines=\"0\" NumberOfPolys=\"4\"/>\
                     </PolyData></VTKFile>";
        let error = read(data).unwrap_err();
        assert!(error.to_string().contains("NumberOfPolys"));
    }
}
