use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, TransformError};
use crate::series::{ImageSeries, SegmentationRecord, SeriesRecord};
use crate::volume::ImageVolume;

/// One kept image series together with every segmentation drawn on it.
#[derive(Debug, Clone)]
pub struct ImageAndSegmentations {
    pub image: ImageSeries,
    pub segmentations: Vec<SegmentationRecord>,
}

/// The fully assembled data of one patient.
///
/// Produced and consumed one at a time by the
/// [`PatientIterator`](crate::cohort::PatientIterator); the iterator owns no
/// persistent set of records, so memory stays bounded over large cohorts.
#[derive(Debug, Clone)]
pub struct PatientRecord {
    pub patient_id: String,
    /// The folder this patient was read from.
    pub folder: PathBuf,
    pub data: Vec<ImageAndSegmentations>,
    pub transform_history: TransformHistory,
}

/// One applied transform, kept for provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRecord {
    /// Transform name, e.g. `"resample"`.
    pub name: String,
    /// The image label or organ name the transform was keyed on.
    pub target: String,
    pub applied_at: DateTime<Utc>,
    /// Free-form parameter description.
    pub parameters: serde_json::Value,
}

impl TransformRecord {
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        TransformRecord {
            name: name.into(),
            target: target.into(),
            applied_at: Utc::now(),
            parameters,
        }
    }
}

/// Ordered log of the transforms applied to a patient record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformHistory {
    records: Vec<TransformRecord>,
}

impl TransformHistory {
    pub fn push(&mut self, record: TransformRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[TransformRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// External volume decoder.
///
/// Reconstructing voxel data from the files of a series is outside this
/// crate; implementations typically wrap a DICOM pixel-decoding library.
/// A failure is recoverable: the iterator drops the affected series with a
/// warning and continues with the rest of the patient.
pub trait VolumeDecoder {
    /// Decodes the ordered files of one image series into a volume.
    fn decode_image(&self, series: &SeriesRecord) -> Result<ImageVolume, DecodeError>;

    /// Decodes a segmentation into binary label maps keyed by organ name,
    /// in the geometry of the image series it references.
    ///
    /// When `organs` is given, only the named organs are materialized.
    fn decode_segmentation(
        &self,
        segmentation: &SegmentationRecord,
        reference: &ImageSeries,
        organs: Option<&[String]>,
    ) -> Result<BTreeMap<String, ImageVolume>, DecodeError>;
}

/// External transform pipeline.
///
/// Applied to each assembled patient record; implementations mutate the
/// volumes in place, keyed by assigned image label or organ name, and push
/// what they did onto the record's transform history.
pub trait TransformPipeline {
    fn apply(&self, patient: &mut PatientRecord) -> Result<(), TransformError>;
}
