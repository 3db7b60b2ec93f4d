use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::{InMemDicomObject, OpenFileOptions};
use walkdir::WalkDir;

use crate::error::CohortError;
use crate::reference::resolve_reference_uid;
use crate::volume::ImageVolume;

/// Modalities recognized as segmentations rather than images.
pub const SEGMENTATION_MODALITIES: &[&str] = &["SEG", "RTSTRUCT"];

/// Sentinel used when a series carries no series description.
pub const UNKNOWN_DESCRIPTION: &str = "Unknown";

/// One DICOM series found on disk: its UID, a representative header and the
/// ordered list of files that belong to it.
///
/// Files are ordered by slice location when every file in the series exposes
/// one, otherwise by discovery order. Immutable once built.
#[derive(Debug, Clone)]
pub struct SeriesRecord {
    series_uid: String,
    description: String,
    modality: String,
    paths: Vec<PathBuf>,
    header: InMemDicomObject,
}

impl SeriesRecord {
    pub fn new(
        series_uid: impl Into<String>,
        description: impl Into<String>,
        modality: impl Into<String>,
        paths: Vec<PathBuf>,
        header: InMemDicomObject,
    ) -> Self {
        SeriesRecord {
            series_uid: series_uid.into(),
            description: description.into(),
            modality: modality.into(),
            paths,
            header,
        }
    }

    pub fn series_uid(&self) -> &str {
        &self.series_uid
    }

    /// Series description, or [`UNKNOWN_DESCRIPTION`] when the header had none.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn modality(&self) -> &str {
        &self.modality
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Parsed header of the first file of the series.
    pub fn header(&self) -> &InMemDicomObject {
        &self.header
    }

    pub fn is_segmentation(&self) -> bool {
        SEGMENTATION_MODALITIES.contains(&self.modality.as_str())
    }

    /// Value of `tag` in the representative header, as text.
    ///
    /// String values are returned directly; other primitive types fall back
    /// to their textual representation. `None` when the tag is absent or
    /// holds a nested data set.
    pub fn tag_value(&self, tag: Tag) -> Option<String> {
        let element = self.header.element_opt(tag).ok().flatten()?;
        match element.to_str() {
            Ok(value) => Some(value.to_string()),
            Err(_) => element.value().primitive().map(|v| format!("{v:?}")),
        }
    }
}

/// An image series, plus the label and volume it acquires along the pipeline.
///
/// The label is assigned at most once, by the tag-value selector or by the
/// default strategy (which uses the modality code); the volume is attached
/// once the external decoder materializes the series.
#[derive(Debug, Clone)]
pub struct ImageSeries {
    record: SeriesRecord,
    label: Option<String>,
    volume: Option<ImageVolume>,
}

impl ImageSeries {
    pub fn new(record: SeriesRecord) -> Self {
        ImageSeries {
            record,
            label: None,
            volume: None,
        }
    }

    pub fn record(&self) -> &SeriesRecord {
        &self.record
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn assign_label(&mut self, label: impl Into<String>) {
        debug_assert!(self.label.is_none(), "label assigned twice");
        self.label = Some(label.into());
    }

    pub fn volume(&self) -> Option<&ImageVolume> {
        self.volume.as_ref()
    }

    pub(crate) fn set_volume(&mut self, volume: ImageVolume) {
        self.volume = Some(volume);
    }

    pub(crate) fn into_record(self) -> SeriesRecord {
        self.record
    }
}

/// A segmentation series with the UID of the image series it was drawn on.
#[derive(Debug, Clone)]
pub struct SegmentationRecord {
    record: SeriesRecord,
    reference_uid: String,
    label_maps: Option<BTreeMap<String, ImageVolume>>,
}

impl SegmentationRecord {
    /// Wraps a series record, resolving its reference UID from the header.
    ///
    /// Fails immediately when the header exposes neither reference shape;
    /// such a segmentation cannot be associated with any image.
    pub fn from_record(record: SeriesRecord) -> Result<Self, CohortError> {
        let path = record
            .paths()
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<unknown>"));
        let reference_uid = resolve_reference_uid(record.header(), &path)?;
        Ok(SegmentationRecord {
            record,
            reference_uid,
            label_maps: None,
        })
    }

    pub fn record(&self) -> &SeriesRecord {
        &self.record
    }

    pub fn modality(&self) -> &str {
        self.record.modality()
    }

    /// UID of the image series this segmentation was drawn on.
    pub fn reference_uid(&self) -> &str {
        &self.reference_uid
    }

    /// Binary label maps keyed by organ name, once materialized.
    pub fn label_maps(&self) -> Option<&BTreeMap<String, ImageVolume>> {
        self.label_maps.as_ref()
    }

    pub(crate) fn set_label_maps(&mut self, label_maps: BTreeMap<String, ImageVolume>) {
        self.label_maps = Some(label_maps);
    }
}

/// The grouped content of one patient folder: image series and segmentation
/// series keyed by series UID, plus the patient ID shared by every file.
#[derive(Debug)]
pub struct PatientFolder {
    patient_id: String,
    folder: PathBuf,
    images: BTreeMap<String, ImageSeries>,
    segmentations: BTreeMap<String, SegmentationRecord>,
}

impl PatientFolder {
    /// Scans a patient folder tree and groups its DICOM files into series.
    ///
    /// Every regular file that looks like DICOM gets a header-only read
    /// (everything up to the pixel data). Files are bucketed by series
    /// instance UID and each bucket becomes a [`SeriesRecord`], classified
    /// as image or segmentation by modality.
    ///
    /// A folder without any DICOM file, or with files from more than one
    /// patient, is a configuration error for that patient.
    pub fn scan(folder: impl AsRef<Path>) -> Result<Self, CohortError> {
        let folder = folder.as_ref();
        if !folder.is_dir() {
            return Err(CohortError::InvalidPath {
                path: folder.to_path_buf(),
            });
        }

        let mut buckets: BTreeMap<String, Vec<(PathBuf, Option<f64>)>> = BTreeMap::new();
        let mut patient_ids: BTreeSet<String> = BTreeSet::new();

        for entry in WalkDir::new(folder)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !is_likely_dicom_file(path) {
                continue;
            }

            let header = read_header(path)?;
            let series_uid = string_value(&header, tags::SERIES_INSTANCE_UID).ok_or(
                CohortError::MissingAttribute {
                    name: "SeriesInstanceUID",
                    path: path.to_path_buf(),
                },
            )?;
            let patient_id =
                string_value(&header, tags::PATIENT_ID).ok_or(CohortError::MissingAttribute {
                    name: "PatientID",
                    path: path.to_path_buf(),
                })?;
            patient_ids.insert(patient_id);

            let slice_location = float_value(&header, tags::SLICE_LOCATION);
            buckets
                .entry(series_uid)
                .or_default()
                .push((path.to_path_buf(), slice_location));
        }

        if buckets.is_empty() {
            return Err(CohortError::EmptyPatientFolder {
                folder: folder.to_path_buf(),
            });
        }
        if patient_ids.len() > 1 {
            return Err(CohortError::MixedPatientIds {
                folder: folder.to_path_buf(),
                ids: patient_ids.into_iter().collect(),
            });
        }
        let patient_id = patient_ids
            .into_iter()
            .next()
            .ok_or(CohortError::EmptyPatientFolder {
                folder: folder.to_path_buf(),
            })?;
        log::debug!("patient {patient_id}: {} series found", buckets.len());

        let mut images = BTreeMap::new();
        let mut segmentations = BTreeMap::new();
        for (series_uid, files) in buckets {
            let paths = order_series_files(files);
            // representative header: first file after ordering
            let header = read_header(&paths[0])?;
            let description =
                string_value(&header, tags::SERIES_DESCRIPTION).unwrap_or_else(|| {
                    UNKNOWN_DESCRIPTION.to_string()
                });
            let modality = string_value(&header, tags::MODALITY).ok_or(
                CohortError::MissingAttribute {
                    name: "Modality",
                    path: paths[0].clone(),
                },
            )?;
            log::debug!("  series {series_uid} [{modality}]: {description}");

            let record = SeriesRecord::new(series_uid.clone(), description, modality, paths, header);
            if record.is_segmentation() {
                segmentations.insert(series_uid, SegmentationRecord::from_record(record)?);
            } else {
                images.insert(series_uid, ImageSeries::new(record));
            }
        }

        Ok(PatientFolder {
            patient_id,
            folder: folder.to_path_buf(),
            images,
            segmentations,
        })
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn images(&self) -> &BTreeMap<String, ImageSeries> {
        &self.images
    }

    pub fn segmentations(&self) -> &BTreeMap<String, SegmentationRecord> {
        &self.segmentations
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        String,
        PathBuf,
        BTreeMap<String, ImageSeries>,
        BTreeMap<String, SegmentationRecord>,
    ) {
        (self.patient_id, self.folder, self.images, self.segmentations)
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        patient_id: impl Into<String>,
        folder: impl Into<PathBuf>,
        images: BTreeMap<String, ImageSeries>,
        segmentations: BTreeMap<String, SegmentationRecord>,
    ) -> Self {
        PatientFolder {
            patient_id: patient_id.into(),
            folder: folder.into(),
            images,
            segmentations,
        }
    }
}

/// Orders the files of one series by slice location, ascending, when every
/// file exposes one; otherwise keeps discovery order.
fn order_series_files(mut files: Vec<(PathBuf, Option<f64>)>) -> Vec<PathBuf> {
    if files.len() > 1 && files.iter().all(|(_, loc)| loc.is_some()) {
        files.sort_by(|a, b| {
            a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    files.into_iter().map(|(path, _)| path).collect()
}

/// Reads the header of one DICOM file, stopping before the pixel data.
fn read_header(path: &Path) -> Result<InMemDicomObject, CohortError> {
    let object = OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .open_file(path)
        .map_err(|source| CohortError::Header {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
    Ok(object.into_inner())
}

fn string_value(header: &InMemDicomObject, tag: Tag) -> Option<String> {
    header
        .element_opt(tag)
        .ok()
        .flatten()
        .and_then(|element| element.to_str().ok())
        .map(|value| value.to_string())
        .filter(|value| !value.is_empty())
}

fn float_value(header: &InMemDicomObject, tag: Tag) -> Option<f64> {
    header
        .element_opt(tag)
        .ok()
        .flatten()
        .and_then(|element| element.to_float64().ok())
}

fn is_likely_dicom_file(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        let ext = ext.to_string_lossy().to_lowercase();
        if matches!(ext.as_str(), "dcm" | "dicom" | "ima" | "img") {
            return true;
        }
    }

    // no known extension: probe for the DICM magic bytes
    if let Ok(mut file) = File::open(path) {
        let mut buffer = [0u8; 132];
        if file.read_exact(&mut buffer).is_ok() {
            return &buffer[128..132] == b"DICM";
        }
    }

    false
}
