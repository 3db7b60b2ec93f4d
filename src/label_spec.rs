use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use dicom_core::Tag;

use crate::error::CohortError;
use crate::series::ImageSeries;

/// Declarative selection criteria: a mapping from an arbitrary label (for
/// example `"CT_THORAX"`) to the tag values under which a matching series
/// may appear in the archive.
///
/// The accepted-value lists of distinct labels must be pairwise disjoint,
/// otherwise a single series could satisfy two labels at once. The overlap
/// check runs at construction; a violation is a configuration error, never
/// a per-patient failure.
///
/// The persisted form is a flat JSON object, keys are labels and values are
/// arrays of accepted tag values:
///
/// ```json
/// {
///     "CT_THORAX": ["Thorax 1.0", "Chest routine"],
///     "PT": ["PET WB"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSpec {
    labels: BTreeMap<String, Vec<String>>,
}

impl LabelSpec {
    /// Validates pairwise disjointness and builds the spec.
    pub fn new(labels: BTreeMap<String, Vec<String>>) -> Result<Self, CohortError> {
        let entries: Vec<(&String, &Vec<String>)> = labels.iter().collect();
        for (i, (first, first_values)) in entries.iter().enumerate() {
            for (second, second_values) in entries.iter().skip(i + 1) {
                let overlap: Vec<String> = first_values
                    .iter()
                    .filter(|value| second_values.contains(value))
                    .cloned()
                    .collect();
                if !overlap.is_empty() {
                    return Err(CohortError::OverlappingLabelValues {
                        first: (*first).clone(),
                        second: (*second).clone(),
                        overlap,
                    });
                }
            }
        }
        Ok(LabelSpec { labels })
    }

    /// Reads the flat JSON object form from a file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CohortError> {
        let text = fs::read_to_string(path)?;
        let labels: BTreeMap<String, Vec<String>> = serde_json::from_str(&text)?;
        LabelSpec::new(labels)
    }

    /// Writes the flat JSON object form to a file, pretty-printed.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<(), CohortError> {
        let text = serde_json::to_string_pretty(&self.labels)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Accepted tag values for one label.
    pub fn accepted_values(&self, label: &str) -> Option<&[String]> {
        self.labels.get(label).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.labels
            .iter()
            .map(|(label, values)| (label.as_str(), values.as_slice()))
    }

    /// Assigns labels to every image whose `tag` value appears in a label's
    /// accepted list.
    ///
    /// Disjointness guarantees an image can match at most one label. Labels
    /// with zero matching images are reported in the returned
    /// [`SelectionReport`] together with the tag values that were actually
    /// available; a miss is expected, not an error, and selection continues
    /// with the remaining labels.
    pub fn select(&self, images: &mut [ImageSeries], tag: Tag) -> SelectionReport {
        let available: Vec<String> = images
            .iter()
            .filter_map(|image| image.record().tag_value(tag))
            .collect();

        let mut missing = BTreeMap::new();
        for (label, accepted) in &self.labels {
            let mut matched = false;
            for image in images.iter_mut() {
                let Some(value) = image.record().tag_value(tag) else {
                    continue;
                };
                if accepted.contains(&value) {
                    image.assign_label(label.clone());
                    matched = true;
                }
            }
            if !matched {
                log::debug!(
                    "no series matches label {label:?}; expected one of {accepted:?}, found {available:?}"
                );
                missing.insert(label.clone(), accepted.clone());
            }
        }

        SelectionReport { missing, available }
    }
}

/// Outcome of running the selector over one patient's images.
#[derive(Debug, Clone, Default)]
pub struct SelectionReport {
    /// Labels with zero matching series, with their accepted values.
    pub missing: BTreeMap<String, Vec<String>>,
    /// Every tag value present in the patient's image series.
    pub available: Vec<String>,
}

impl SelectionReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::SeriesRecord;
    use dicom_core::{DataElement, VR};
    use dicom_dictionary_std::tags;
    use dicom_object::InMemDicomObject;
    use std::path::PathBuf;

    fn spec(entries: &[(&str, &[&str])]) -> Result<LabelSpec, CohortError> {
        LabelSpec::new(
            entries
                .iter()
                .map(|(label, values)| {
                    (
                        label.to_string(),
                        values.iter().map(|v| v.to_string()).collect(),
                    )
                })
                .collect(),
        )
    }

    fn image(uid: &str, description: &str, modality: &str) -> ImageSeries {
        let header = InMemDicomObject::from_element_iter(vec![
            DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, uid),
            DataElement::new(tags::SERIES_DESCRIPTION, VR::LO, description),
            DataElement::new(tags::MODALITY, VR::CS, modality),
        ]);
        ImageSeries::new(SeriesRecord::new(
            uid,
            description,
            modality,
            vec![PathBuf::from(format!("{uid}/0.dcm"))],
            header,
        ))
    }

    #[test]
    fn disjoint_value_lists_construct() {
        let spec = spec(&[
            ("CT_THORAX", &["Thorax 1.0"]),
            ("PT", &["PET WB", "PET AC"]),
        ])
        .unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(
            spec.accepted_values("PT").unwrap(),
            &["PET WB".to_string(), "PET AC".to_string()]
        );
    }

    #[test]
    fn overlapping_value_lists_are_rejected() {
        let err = spec(&[("CT", &["desc_a"]), ("PET", &["desc_a"])]).unwrap_err();
        match err {
            CohortError::OverlappingLabelValues {
                first,
                second,
                overlap,
            } => {
                assert_eq!(first, "CT");
                assert_eq!(second, "PET");
                assert_eq!(overlap, vec!["desc_a".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn overlap_is_detected_across_non_adjacent_labels() {
        let err = spec(&[
            ("A", &["x"]),
            ("B", &["y"]),
            ("C", &["x"]),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            CohortError::OverlappingLabelValues { ref first, ref second, .. }
                if first == "A" && second == "C"
        ));
    }

    #[test]
    fn matching_image_receives_its_label() {
        let spec = spec(&[("CT_THORAX", &["Thorax 1.0"])]).unwrap();
        let mut images = vec![image("1.2.3", "Thorax 1.0", "CT")];

        let report = spec.select(&mut images, tags::SERIES_DESCRIPTION);

        assert!(report.is_complete());
        assert_eq!(images[0].label(), Some("CT_THORAX"));
        assert_eq!(report.available, vec!["Thorax 1.0".to_string()]);
    }

    #[test]
    fn miss_is_reported_with_available_values() {
        let spec = spec(&[("CT_THORAX", &["Thorax 1.0"])]).unwrap();
        let mut images = vec![image("1.2.3", "Chest routine", "CT")];

        let report = spec.select(&mut images, tags::SERIES_DESCRIPTION);

        assert_eq!(images[0].label(), None);
        assert_eq!(
            report.missing.get("CT_THORAX").unwrap(),
            &vec!["Thorax 1.0".to_string()]
        );
        assert_eq!(report.available, vec!["Chest routine".to_string()]);
    }

    #[test]
    fn one_miss_does_not_stop_other_labels() {
        let spec = spec(&[("CT_THORAX", &["Thorax 1.0"]), ("PT", &["PET WB"])]).unwrap();
        let mut images = vec![
            image("1.2.3", "Thorax 1.0", "CT"),
            image("1.2.4", "PET brain", "PT"),
        ];

        let report = spec.select(&mut images, tags::SERIES_DESCRIPTION);

        assert_eq!(images[0].label(), Some("CT_THORAX"));
        assert_eq!(images[1].label(), None);
        assert_eq!(report.missing.len(), 1);
        assert!(report.missing.contains_key("PT"));
    }

    #[test]
    fn json_round_trip_preserves_the_mapping() {
        let spec = spec(&[
            ("CT_THORAX", &["Thorax 1.0", "Chest routine"]),
            ("PT", &["PET WB"]),
        ])
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.json");
        spec.to_json_file(&path).unwrap();

        let reread = LabelSpec::from_json_file(&path).unwrap();
        assert_eq!(reread, spec);
    }

    #[test]
    fn overlap_in_persisted_spec_is_rejected_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.json");
        fs::write(&path, r#"{"CT": ["desc_a"], "PET": ["desc_a"]}"#).unwrap();

        let err = LabelSpec::from_json_file(&path).unwrap_err();
        assert!(matches!(err, CohortError::OverlappingLabelValues { .. }));
    }
}
