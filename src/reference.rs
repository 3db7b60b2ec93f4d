use std::path::Path;

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;

use crate::error::CohortError;

/// Extracts the UID of the image series a segmentation was drawn on.
///
/// DICOM-SEG headers carry a direct referenced series sequence; RTSTRUCT
/// headers reach the same UID through the referenced frame of reference
/// chain. The direct shape is tried first.
///
/// A header exposing neither shape is a configuration error: the
/// segmentation cannot be associated with any image.
pub fn resolve_reference_uid(
    header: &InMemDicomObject,
    path: &Path,
) -> Result<String, CohortError> {
    if let Some(uid) = referenced_series_uid(header) {
        return Ok(uid);
    }
    if let Some(uid) = rt_referenced_series_uid(header) {
        return Ok(uid);
    }
    Err(CohortError::MissingReferenceUid {
        path: path.to_path_buf(),
    })
}

/// Shape (a): ReferencedSeriesSequence, first item.
fn referenced_series_uid(header: &InMemDicomObject) -> Option<String> {
    let item = first_item(header, tags::REFERENCED_SERIES_SEQUENCE)?;
    item_series_uid(item)
}

/// Shape (b): ReferencedFrameOfReferenceSequence -> RTReferencedStudySequence
/// -> RTReferencedSeriesSequence, first item of each.
fn rt_referenced_series_uid(header: &InMemDicomObject) -> Option<String> {
    let frame_of_reference = first_item(header, tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE)?;
    let study = first_item(frame_of_reference, tags::RT_REFERENCED_STUDY_SEQUENCE)?;
    let series = first_item(study, tags::RT_REFERENCED_SERIES_SEQUENCE)?;
    item_series_uid(series)
}

fn first_item(object: &InMemDicomObject, tag: Tag) -> Option<&InMemDicomObject> {
    object
        .element_opt(tag)
        .ok()
        .flatten()
        .and_then(|element| element.value().items())
        .and_then(|items| items.first())
}

fn item_series_uid(item: &InMemDicomObject) -> Option<String> {
    item.element_opt(tags::SERIES_INSTANCE_UID)
        .ok()
        .flatten()
        .and_then(|element| element.to_str().ok())
        .map(|uid| uid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::value::DataSetSequence;
    use dicom_core::{DataElement, VR};

    fn uid_item(uid: &str) -> InMemDicomObject {
        InMemDicomObject::from_element_iter(vec![DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            uid,
        )])
    }

    #[test]
    fn resolves_direct_referenced_series_sequence() {
        let header = InMemDicomObject::from_element_iter(vec![DataElement::new(
            tags::REFERENCED_SERIES_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![uid_item("1.2.840.1.1")]),
        )]);

        let uid = resolve_reference_uid(&header, Path::new("seg.dcm")).unwrap();
        assert_eq!(uid, "1.2.840.1.1");
    }

    #[test]
    fn resolves_rtstruct_frame_of_reference_chain() {
        let series = InMemDicomObject::from_element_iter(vec![DataElement::new(
            tags::RT_REFERENCED_SERIES_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![uid_item("1.2.840.2.2")]),
        )]);
        let study = InMemDicomObject::from_element_iter(vec![DataElement::new(
            tags::RT_REFERENCED_STUDY_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![series]),
        )]);
        let header = InMemDicomObject::from_element_iter(vec![DataElement::new(
            tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![study]),
        )]);

        let uid = resolve_reference_uid(&header, Path::new("rtstruct.dcm")).unwrap();
        assert_eq!(uid, "1.2.840.2.2");
    }

    #[test]
    fn direct_shape_wins_over_nested_chain() {
        let nested_series = InMemDicomObject::from_element_iter(vec![DataElement::new(
            tags::RT_REFERENCED_SERIES_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![uid_item("9.9.9")]),
        )]);
        let study = InMemDicomObject::from_element_iter(vec![DataElement::new(
            tags::RT_REFERENCED_STUDY_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![nested_series]),
        )]);
        let header = InMemDicomObject::from_element_iter(vec![
            DataElement::new(
                tags::REFERENCED_SERIES_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(vec![uid_item("1.1.1")]),
            ),
            DataElement::new(
                tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(vec![study]),
            ),
        ]);

        let uid = resolve_reference_uid(&header, Path::new("seg.dcm")).unwrap();
        assert_eq!(uid, "1.1.1");
    }

    #[test]
    fn header_without_reference_shape_is_an_error() {
        let header = InMemDicomObject::from_element_iter(vec![DataElement::new(
            tags::MODALITY,
            VR::CS,
            "SEG",
        )]);

        let err = resolve_reference_uid(&header, Path::new("seg.dcm")).unwrap_err();
        assert!(matches!(err, CohortError::MissingReferenceUid { .. }));
    }
}
