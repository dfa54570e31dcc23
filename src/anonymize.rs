//
// anonymize.rs
// neuro-tools
//
// In-place de-identification of one DICOM file: a sweep over identifying
// VRs at every nesting depth, mandatory field overrides, removals, and an
// atomic rewrite.
//

use std::path::Path;

use dicom::core::value::{DataSetSequence, PrimitiveValue, Value};
use dicom::core::{DataElement, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::mem::InMemElement;
use dicom::object::{open_file, InMemDicomObject, ReadError, WriteError};
use rand::Rng;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Placeholder written into every redacted text field.
pub const REDACTED: &str = "(??)";
/// Value swept into every person-name element before the per-file override.
pub const ANONYMOUS_NAME: &str = "ANONYMOUS";
/// Every date collapses to this value.
pub const EPOCH_DATE: &str = "20000101";
/// Every time collapses to midnight.
pub const MIDNIGHT_TIME: &str = "000000";

const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);

/// Overridden with the redaction placeholder; absence abandons the file.
const REDACTED_FIELDS: [(Tag, &'static str); 4] = [
    (Tag(0x0010, 0x0020), "PatientID"),
    (Tag(0x0008, 0x0080), "InstitutionName"),
    (Tag(0x0008, 0x103E), "SeriesDescription"),
    (Tag(0x0018, 0x1030), "ProtocolName"),
];

/// Removed outright: PatientWeight and AdditionalPatientHistory.
const REMOVED_FIELDS: [Tag; 2] = [Tag(0x0010, 0x1030), Tag(0x0010, 0x21B0)];

/// Why one file was left untouched.
#[derive(Debug, Error)]
pub enum AnonymizeError {
    #[error("not a readable DICOM file: {0}")]
    Parse(#[from] ReadError),
    #[error("mandatory field {0} is missing")]
    FieldMissing(&'static str),
    #[error("failed to encode the redacted data set: {0}")]
    Write(#[from] WriteError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fresh replacement for the patient name: eight uppercase ASCII letters,
/// drawn per file so no two files share a pseudonym.
fn patient_token() -> String {
    let mut rng = rand::rng();
    (0..8)
        .map(|_| char::from(rng.random_range(b'A'..=b'Z')))
        .collect()
}

fn sweep_value(vr: VR) -> Option<&'static str> {
    match vr {
        VR::PN => Some(ANONYMOUS_NAME),
        VR::DA => Some(EPOCH_DATE),
        VR::TM => Some(MIDNIGHT_TIME),
        VR::SH => Some(REDACTED),
        _ => None,
    }
}

/// Rewrite one element according to its VR, recursing through sequences.
/// Sequences are rebuilt with undefined lengths so the rewritten data set
/// re-encodes cleanly regardless of how the source framed them.
fn sweep_element(
    element: InMemElement<StandardDataDictionary>,
) -> InMemElement<StandardDataDictionary> {
    let tag = element.header().tag;
    let vr = element.header().vr;
    if let Some(value) = sweep_value(vr) {
        return DataElement::new(tag, vr, PrimitiveValue::from(value));
    }
    if vr == VR::SQ {
        return match element.into_value() {
            Value::Sequence(sequence) => {
                let items: Vec<_> = sequence.into_items().into_iter().map(sweep_item).collect();
                DataElement::new(tag, VR::SQ, DataSetSequence::from(items))
            }
            other => DataElement::new(tag, VR::SQ, other),
        };
    }
    element
}

fn sweep_item(
    item: InMemDicomObject<StandardDataDictionary>,
) -> InMemDicomObject<StandardDataDictionary> {
    InMemDicomObject::from_element_iter(item.into_iter().map(sweep_element))
}

/// One pass over the data set, redacting every PN, DA, TM and SH element at
/// any nesting depth.
fn sweep_dataset(obj: &mut InMemDicomObject<StandardDataDictionary>) {
    let targets: Vec<Tag> = obj
        .iter()
        .filter(|element| {
            matches!(
                element.header().vr,
                VR::PN | VR::DA | VR::TM | VR::SH | VR::SQ
            )
        })
        .map(|element| element.header().tag)
        .collect();
    for tag in targets {
        if let Ok(element) = obj.take_element(tag) {
            obj.put(sweep_element(element));
        }
    }
}

/// Replace the value of one element, keeping its VR. The element must
/// already exist; a missing mandatory field abandons the whole file.
fn override_field(
    obj: &mut InMemDicomObject<StandardDataDictionary>,
    tag: Tag,
    field: &'static str,
    value: &str,
) -> Result<(), AnonymizeError> {
    let vr = obj
        .element(tag)
        .map_err(|_| AnonymizeError::FieldMissing(field))?
        .header()
        .vr;
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
    Ok(())
}

/// De-identify one file in place.
///
/// All redaction happens on the in-memory data set; the result is staged to
/// a temporary file in the same directory and renamed over the original.
/// The file on disk is therefore always either the original or the fully
/// redacted version, never something in between.
pub fn anonymize_file(path: &Path) -> Result<(), AnonymizeError> {
    let mut obj = open_file(path)?;

    sweep_dataset(&mut obj);

    override_field(&mut obj, PATIENT_NAME, "PatientName", &patient_token())?;
    for (tag, field) in REDACTED_FIELDS {
        override_field(&mut obj, tag, field, REDACTED)?;
    }
    for tag in REMOVED_FIELDS {
        obj.remove_element(tag);
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let staged = NamedTempFile::new_in(parent)?;
    obj.write_to_file(staged.path())?;
    staged
        .persist(path)
        .map_err(|error| AnonymizeError::Io(error.error))?;
    Ok(())
}
