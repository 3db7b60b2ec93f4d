use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use serde::Serialize;

use crate::error::CohortError;
use crate::label_spec::LabelSpec;
use crate::patient::{
    ImageAndSegmentations, PatientRecord, TransformHistory, TransformPipeline, VolumeDecoder,
};
use crate::series::PatientFolder;
use crate::strategy::{self, QueryStrategy, UnknownSeriesPolicy};

/// Knobs that apply uniformly to every patient of a run.
#[derive(Debug, Clone)]
pub struct CohortOptions {
    /// The DICOM tag whose value the selector matches against the label
    /// spec. Defaults to SeriesDescription.
    pub selection_tag: Tag,
    pub unknown_series_policy: UnknownSeriesPolicy,
    /// When set, only these organs are materialized from segmentations.
    pub organs: Option<Vec<String>>,
}

impl Default for CohortOptions {
    fn default() -> Self {
        CohortOptions {
            selection_tag: tags::SERIES_DESCRIPTION,
            unknown_series_policy: UnknownSeriesPolicy::default(),
            organs: None,
        }
    }
}

/// One patient with at least one label that matched no series.
///
/// The caller typically drains the whole cohort once, inspects these,
/// extends the label spec with the tag values the archive actually uses,
/// and runs a second pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientFailure {
    pub patient_id: String,
    /// Missing labels with the accepted values none of which were found.
    pub missing: BTreeMap<String, Vec<String>>,
    /// Every tag value present in the patient's image series.
    pub available_tag_values: Vec<String>,
}

/// Pull-based iterator over the patient folders of a cohort root.
///
/// Folders are visited in lexicographic order. All work for one patient
/// (grouping, resolution, selection, assembly, decoding, transforms)
/// happens inside a single [`advance`](PatientIterator::advance) call, and
/// only one record is alive at a time.
///
/// `advance` returns `None` once every folder has been consumed; a patient
/// that could not be processed yields `Some(Err(_))` and iteration
/// continues, so the two outcomes are never conflated.
/// [`reset`](PatientIterator::reset) rewinds to the first folder and clears
/// the accumulated failures.
pub struct PatientIterator {
    folders: Vec<PathBuf>,
    index: usize,
    label_spec: Option<LabelSpec>,
    spec_path: Option<PathBuf>,
    options: CohortOptions,
    decoder: Option<Box<dyn VolumeDecoder>>,
    transforms: Option<Box<dyn TransformPipeline>>,
    failures: Vec<PatientFailure>,
}

impl PatientIterator {
    /// Lists the patient folders under `root`, sorted lexicographically.
    ///
    /// Fails when `root` does not exist; entries that are not directories
    /// are ignored.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, CohortError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(CohortError::InvalidPath {
                path: root.to_path_buf(),
            });
        }

        let mut folders: Vec<PathBuf> = fs::read_dir(root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        folders.sort();

        Ok(PatientIterator {
            folders,
            index: 0,
            label_spec: None,
            spec_path: None,
            options: CohortOptions::default(),
            decoder: None,
            transforms: None,
            failures: Vec::new(),
        })
    }

    /// Uses the given label spec for the whole run.
    pub fn with_label_spec(mut self, spec: LabelSpec) -> Self {
        self.label_spec = Some(spec);
        self
    }

    /// Reads the label spec from a JSON file and keeps it synchronized with
    /// that file: the file is re-read before and re-written after every
    /// patient, so it can be repaired while a pass is running.
    pub fn with_label_spec_file(mut self, path: impl Into<PathBuf>) -> Result<Self, CohortError> {
        let path = path.into();
        self.label_spec = Some(LabelSpec::from_json_file(&path)?);
        self.spec_path = Some(path);
        Ok(self)
    }

    pub fn with_options(mut self, options: CohortOptions) -> Self {
        self.options = options;
        self
    }

    /// Plugs in the external volume decoder; without one, records carry
    /// header metadata only.
    pub fn with_decoder(mut self, decoder: Box<dyn VolumeDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_transforms(mut self, transforms: Box<dyn TransformPipeline>) -> Self {
        self.transforms = Some(transforms);
        self
    }

    /// Total number of patient folders.
    pub fn len(&self) -> usize {
        self.folders.len()
    }

    /// The patient folders of this cohort, in visitation order.
    pub fn folders(&self) -> &[PathBuf] {
        &self.folders
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn has_next(&self) -> bool {
        self.index < self.folders.len()
    }

    /// Rewinds to the first patient and clears the failure list.
    pub fn reset(&mut self) {
        self.index = 0;
        self.failures.clear();
    }

    /// Failures accumulated by every patient processed since the last
    /// [`reset`](PatientIterator::reset), in visitation order.
    pub fn failures(&self) -> &[PatientFailure] {
        &self.failures
    }

    /// Runs the full pipeline for the next patient folder.
    ///
    /// `None` means the cohort is exhausted. `Some(Err(_))` means this
    /// patient was aborted by a configuration error; later patients are
    /// unaffected.
    pub fn advance(&mut self) -> Option<Result<PatientRecord, CohortError>> {
        if self.index >= self.folders.len() {
            return None;
        }
        let folder = self.folders[self.index].clone();
        self.index += 1;

        log::info!(
            "patient {}/{}: {}",
            self.index,
            self.folders.len(),
            folder.display()
        );

        // pick up edits made to the persisted spec since the last patient
        if let Some(path) = &self.spec_path {
            match LabelSpec::from_json_file(path) {
                Ok(spec) => self.label_spec = Some(spec),
                Err(error) => return Some(Err(error)),
            }
        }

        let result = self.read_patient(&folder);

        if let (Some(path), Some(spec)) = (&self.spec_path, &self.label_spec) {
            if let Err(error) = spec.to_json_file(path) {
                return Some(Err(error));
            }
        }

        Some(result)
    }

    fn read_patient(&mut self, folder: &Path) -> Result<PatientRecord, CohortError> {
        let grouped = PatientFolder::scan(folder)?;
        let strategy = QueryStrategy::for_spec(self.label_spec.as_ref());
        let assembled = strategy::assemble(
            grouped,
            strategy,
            self.options.selection_tag,
            self.options.unknown_series_policy,
        );

        if let Some(report) = &assembled.report {
            if !report.is_complete() {
                for (label, expected) in &report.missing {
                    log::error!(
                        "patient {} has no series that correlates with the image {label:?}; \
                         expected one of {expected:?} but the record only contains {:?}",
                        assembled.patient_id,
                        report.available
                    );
                }
                self.failures.push(PatientFailure {
                    patient_id: assembled.patient_id.clone(),
                    missing: report.missing.clone(),
                    available_tag_values: report.available.clone(),
                });
            }
        }

        let mut data = Vec::new();
        for (mut image, segmentations) in assembled.pairs {
            if let Some(decoder) = &self.decoder {
                match decoder.decode_image(image.record()) {
                    Ok(volume) => image.set_volume(volume),
                    Err(error) => {
                        log::warn!(
                            "dropping series {:?} of patient {}: {error}",
                            image.record().description(),
                            assembled.patient_id
                        );
                        continue;
                    }
                }
            }

            let mut kept_segmentations = Vec::new();
            for mut segmentation in segmentations {
                if let Some(decoder) = &self.decoder {
                    match decoder.decode_segmentation(
                        &segmentation,
                        &image,
                        self.options.organs.as_deref(),
                    ) {
                        Ok(label_maps) => segmentation.set_label_maps(label_maps),
                        Err(error) => {
                            log::warn!(
                                "dropping segmentation {} of patient {}: {error}",
                                segmentation.record().series_uid(),
                                assembled.patient_id
                            );
                            continue;
                        }
                    }
                }
                kept_segmentations.push(segmentation);
            }

            log::info!(
                "  {} [{}]: {} segmentation(s)",
                image.label().unwrap_or("?"),
                image.record().modality(),
                kept_segmentations.len()
            );
            data.push(ImageAndSegmentations {
                image,
                segmentations: kept_segmentations,
            });
        }

        let mut record = PatientRecord {
            patient_id: assembled.patient_id,
            folder: assembled.folder,
            data,
            transform_history: TransformHistory::default(),
        };

        if let Some(transforms) = &self.transforms {
            transforms.apply(&mut record)?;
        }

        Ok(record)
    }
}

impl Iterator for PatientIterator {
    type Item = Result<PatientRecord, CohortError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_root_is_rejected_up_front() {
        let err = PatientIterator::new("/nonexistent/cohort").unwrap_err();
        assert!(matches!(err, CohortError::InvalidPath { .. }));
    }

    #[test]
    fn folders_are_visited_in_lexicographic_order() {
        let root = tempfile::tempdir().unwrap();
        for name in ["patient-b", "patient-a", "patient-c"] {
            fs::create_dir(root.path().join(name)).unwrap();
        }
        fs::write(root.path().join("stray.txt"), "not a folder").unwrap();

        let patients = PatientIterator::new(root.path()).unwrap();
        let names: Vec<_> = patients
            .folders
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["patient-a", "patient-b", "patient-c"]);
        assert_eq!(patients.len(), 3);
    }

    #[test]
    fn folder_without_dicom_files_aborts_that_patient_only() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("patient-a")).unwrap();
        fs::create_dir(root.path().join("patient-b")).unwrap();

        let mut patients = PatientIterator::new(root.path()).unwrap();

        let first = patients.advance().unwrap();
        assert!(matches!(
            first.unwrap_err(),
            CohortError::EmptyPatientFolder { .. }
        ));
        // the pass keeps going
        assert!(patients.has_next());
        let second = patients.advance().unwrap();
        assert!(second.is_err());
        assert!(patients.advance().is_none());
    }

    #[test]
    fn reset_rewinds_and_clears_failures() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("patient-a")).unwrap();

        let mut patients = PatientIterator::new(root.path()).unwrap();
        patients.failures.push(PatientFailure {
            patient_id: "PA-001".into(),
            missing: BTreeMap::new(),
            available_tag_values: vec![],
        });
        let _ = patients.advance();
        assert!(!patients.has_next());

        patients.reset();
        assert!(patients.has_next());
        assert!(patients.failures().is_empty());
    }
}
