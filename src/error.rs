use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by cohort scanning and patient assembly.
///
/// Everything here is either a run-level configuration error (invalid root,
/// malformed label specification) or a per-patient one (mixed patient IDs,
/// unreadable header, segmentation without a reference chain). Per-patient
/// errors abort that patient only; the iterator keeps going. A label that
/// simply matches no series is not an error at all and is reported through
/// [`PatientFailure`](crate::cohort::PatientFailure) instead.
#[derive(Debug, Error)]
pub enum CohortError {
    #[error("path {path:?} does not exist or is not a directory")]
    InvalidPath { path: PathBuf },

    #[error("no DICOM files found in patient folder {folder:?}")]
    EmptyPatientFolder { folder: PathBuf },

    #[error(
        "patient identifiers {ids:?} found in folder {folder:?}; all DICOM files in one patient \
         folder must belong to the same patient"
    )]
    MixedPatientIds { folder: PathBuf, ids: Vec<String> },

    #[error(
        "accepted values for labels {first:?} and {second:?} overlap on {overlap:?}; the value \
         lists of distinct labels must be disjoint"
    )]
    OverlappingLabelValues {
        first: String,
        second: String,
        overlap: Vec<String>,
    },

    #[error(
        "segmentation file {path:?} carries neither a referenced series sequence nor a \
         referenced frame of reference chain; it cannot be associated with an image series"
    )]
    MissingReferenceUid { path: PathBuf },

    #[error("attribute {name} is missing from {path:?}")]
    MissingAttribute { name: &'static str, path: PathBuf },

    #[error("failed to read DICOM header from {path:?}")]
    Header {
        path: PathBuf,
        #[source]
        source: Box<dicom_object::ReadError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed label specification: {0}")]
    LabelSpecJson(#[from] serde_json::Error),

    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Failure of the external volume decoder for one series.
///
/// Recoverable by contract: the affected series is dropped with a warning
/// and the patient keeps its remaining series.
#[derive(Debug, Error)]
#[error("failed to decode series {series_uid}: {message}")]
pub struct DecodeError {
    pub series_uid: String,
    pub message: String,
}

impl DecodeError {
    pub fn new(series_uid: impl Into<String>, message: impl Into<String>) -> Self {
        DecodeError {
            series_uid: series_uid.into(),
            message: message.into(),
        }
    }
}

/// Failure of the external transform pipeline for one patient.
#[derive(Debug, Error)]
#[error("transform pipeline failed: {message}")]
pub struct TransformError {
    pub message: String,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        TransformError {
            message: message.into(),
        }
    }
}
