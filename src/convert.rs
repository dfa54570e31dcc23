//
// convert.rs
// neuro-tools
//
// Format detection and the whole-file conversion pipeline. Writers serialize
// fully in memory and the output is committed by rename, so a failed
// conversion never leaves a partial file behind.
//

use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::models::ConversionSummary;
use crate::tck::{self, TckHeader};
use crate::tractogram::{TractCollection, TractError};
use crate::trk::{self, TrkHeader};
use crate::{vtk, vtp};

/// The four supported containers, decided once from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TractFormat {
    Tck,
    Trk,
    VtkLegacy,
    VtkXml,
}

impl TractFormat {
    /// Map a path to its container by extension, case-insensitively.
    /// `.xml` and `.vtp` name the same container.
    pub fn from_path(path: &Path) -> Result<Self, TractError> {
        let extension = path
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("tck") => Ok(TractFormat::Tck),
            Some("trk") => Ok(TractFormat::Trk),
            Some("vtk") => Ok(TractFormat::VtkLegacy),
            Some("xml") | Some("vtp") => Ok(TractFormat::VtkXml),
            _ => Err(TractError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TractFormat::Tck => "tck",
            TractFormat::Trk => "trk",
            TractFormat::VtkLegacy => "vtk",
            TractFormat::VtkXml => "vtp",
        }
    }
}

impl fmt::Display for TractFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Container metadata preserved opaquely for same-format round trips.
/// The XML container keeps nothing outside the collection itself.
#[derive(Debug, Clone)]
pub enum NativeHeader {
    Tck(TckHeader),
    Trk(Box<TrkHeader>),
    VtkLegacy(String),
}

pub fn read_tractogram(
    path: &Path,
    format: TractFormat,
) -> Result<(TractCollection, Option<NativeHeader>), TractError> {
    let data = fs::read(path)?;
    let (tracts, header) = match format {
        TractFormat::Tck => {
            let (tracts, header) = tck::read(&data)?;
            (tracts, Some(NativeHeader::Tck(header)))
        }
        TractFormat::Trk => {
            let (tracts, header) = trk::read(&data)?;
            (tracts, Some(NativeHeader::Trk(Box::new(header))))
        }
        TractFormat::VtkLegacy => {
            let (tracts, title) = vtk::read(&data)?;
            (tracts, Some(NativeHeader::VtkLegacy(title)))
        }
        TractFormat::VtkXml => (vtp::read(&data)?, None),
    };
    debug!(
        path = %path.display(),
        format = %format,
        streamlines = tracts.len(),
        points = tracts.num_points(),
        "tractogram read"
    );
    Ok((tracts, header))
}

/// Serialize the collection and commit it to `path`. The bytes are staged in
/// a temporary file next to the destination and renamed into place, so the
/// target holds either the previous content or the complete new file.
pub fn write_tractogram(
    path: &Path,
    format: TractFormat,
    tracts: &TractCollection,
    header: Option<&NativeHeader>,
) -> Result<(), TractError> {
    let mut buffer = Vec::new();
    match format {
        TractFormat::Tck => {
            let native = match header {
                Some(NativeHeader::Tck(header)) => Some(header),
                _ => None,
            };
            tck::write(&mut buffer, tracts, native)?;
        }
        TractFormat::Trk => {
            let native = match header {
                Some(NativeHeader::Trk(header)) => Some(header.as_ref()),
                _ => None,
            };
            trk::write(&mut buffer, tracts, native)?;
        }
        TractFormat::VtkLegacy => {
            let title = match header {
                Some(NativeHeader::VtkLegacy(title)) => Some(title.as_str()),
                _ => None,
            };
            vtk::write(&mut buffer, tracts, title)?;
        }
        TractFormat::VtkXml => vtp::write(&mut buffer, tracts)?,
    }
    commit(path, &buffer)
}

fn commit(path: &Path, bytes: &[u8]) -> Result<(), TractError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(bytes)?;
    staged
        .persist(path)
        .map_err(|error| TractError::Io(error.error))?;
    Ok(())
}

/// Convert one tractogram file into another container. Native header
/// metadata carries over only when both sides are the same format.
pub fn convert(input: &Path, output: &Path) -> Result<ConversionSummary, TractError> {
    let input_format = TractFormat::from_path(input)?;
    let output_format = TractFormat::from_path(output)?;

    let (tracts, header) = read_tractogram(input, input_format)?;
    let header = if input_format == output_format {
        header
    } else {
        None
    };
    write_tractogram(output, output_format, &tracts, header.as_ref())?;

    debug!(
        input = %input.display(),
        output = %output.display(),
        "conversion finished"
    );
    Ok(ConversionSummary {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        input_format: input_format.name().to_string(),
        output_format: output_format.name().to_string(),
        streamlines: tracts.len(),
        points: tracts.num_points(),
        attributes: tracts.attributes().keys().cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_map_case_insensitively() {
        let cases = [
            ("fibers.tck", TractFormat::Tck),
            ("a/b/FIBERS.TCK", TractFormat::Tck),
            ("fibers.Trk", TractFormat::Trk),
            ("fibers.vtk", TractFormat::VtkLegacy),
            ("fibers.vtp", TractFormat::VtkXml),
            ("fibers.XML", TractFormat::VtkXml),
        ];
        for (name, expected) in cases {
            assert_eq!(TractFormat::from_path(Path::new(name)).unwrap(), expected);
        }
    }

    #[test]
    fn unknown_extensions_are_refused() {
        for name in ["fibers.nii", "fibers", "fibers.tck.gz", ".tck"] {
            assert!(matches!(
                TractFormat::from_path(Path::new(name)),
                Err(TractError::UnsupportedFormat { .. })
            ));
        }
    }
}
