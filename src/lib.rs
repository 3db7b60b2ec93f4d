//! # dicom-cohort
//!
//! Resolve per-patient folders of DICOM files into assembled patient records
//! ready for dataset serialization or feature extraction.
//!
//! A cohort is a root directory with one subfolder per patient. Each patient
//! folder mixes image series (CT, PT, MR, ...) with segmentation files
//! (DICOM-SEG, RTSTRUCT), possibly nested in subfolders. This crate groups
//! the loose files into series, matches every segmentation to the image
//! series it was drawn on through its referenced-series UID, selects images
//! by declarative tag-value rules, and yields one [`PatientRecord`] at a
//! time.
//!
//! Pixel decoding, resampling and persistence are external collaborators:
//! plug them in through the [`VolumeDecoder`] and [`TransformPipeline`]
//! traits.
//!
//! # Examples
//!
//! Iterate over a cohort, keeping only images whose series description
//! matches a declared label:
//!
//! ```no_run
//! # use dicom_cohort::{LabelSpec, PatientIterator};
//! # use std::collections::BTreeMap;
//! let spec = LabelSpec::new(BTreeMap::from([(
//!     "CT_THORAX".to_string(),
//!     vec!["Thorax 1.0".to_string()],
//! )]))?;
//!
//! let mut patients = PatientIterator::new("data/patients")?.with_label_spec(spec);
//! while let Some(patient) = patients.advance() {
//!     let patient = patient?;
//!     println!("{}: {} image(s)", patient.patient_id, patient.data.len());
//! }
//! for failure in patients.failures() {
//!     eprintln!("{} is missing {:?}", failure.patient_id, failure.missing);
//! }
//! # Ok::<(), dicom_cohort::CohortError>(())
//! ```

pub mod cohort;
pub mod error;
pub mod label_spec;
pub mod patient;
pub mod reference;
pub mod series;
pub mod strategy;
pub mod volume;

pub use cohort::{CohortOptions, PatientFailure, PatientIterator};
pub use error::{CohortError, DecodeError, TransformError};
pub use label_spec::{LabelSpec, SelectionReport};
pub use patient::{
    ImageAndSegmentations, PatientRecord, TransformHistory, TransformPipeline, TransformRecord,
    VolumeDecoder,
};
pub use reference::resolve_reference_uid;
pub use series::{ImageSeries, PatientFolder, SegmentationRecord, SeriesRecord};
pub use strategy::{QueryStrategy, UnknownSeriesPolicy, erase_series_files};
pub use volume::ImageVolume;
