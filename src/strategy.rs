use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use dicom_core::Tag;

use crate::label_spec::{LabelSpec, SelectionReport};
use crate::series::{ImageSeries, PatientFolder, SegmentationRecord, SeriesRecord, UNKNOWN_DESCRIPTION};

/// What to do with image series that carry no series description under the
/// default strategy.
///
/// Historical behavior was inconsistent; the policy makes the choice
/// visible. `Keep` retains such a series under its modality label,
/// `Exclude` drops it from the candidate pool entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownSeriesPolicy {
    #[default]
    Keep,
    Exclude,
}

/// How a patient's data is assembled, chosen once per run.
///
/// `Default` applies when no selection criteria were supplied: every image
/// series is kept and labeled with its own modality code. `TagValue` runs
/// the selector and keeps only the images that received a label. Both
/// attach every segmentation whose reference UID equals the image's series
/// UID.
#[derive(Debug, Clone, Copy)]
pub enum QueryStrategy<'a> {
    Default,
    TagValue(&'a LabelSpec),
}

impl<'a> QueryStrategy<'a> {
    /// Selects the strategy for a run: `TagValue` exactly when a non-empty
    /// label spec was supplied.
    pub fn for_spec(spec: Option<&'a LabelSpec>) -> Self {
        match spec {
            Some(spec) if !spec.is_empty() => QueryStrategy::TagValue(spec),
            _ => QueryStrategy::Default,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueryStrategy::Default => "default",
            QueryStrategy::TagValue(_) => "tag-value",
        }
    }
}

/// One patient's data after strategy resolution: the kept images with their
/// attached segmentations, the image series that matched no label, and the
/// selection report when the tag-value strategy ran.
#[derive(Debug)]
pub struct AssembledPatient {
    pub patient_id: String,
    pub folder: PathBuf,
    pub pairs: Vec<(ImageSeries, Vec<SegmentationRecord>)>,
    /// Image series excluded by the tag-value strategy. Candidates for the
    /// explicit prune operation; nothing is deleted here.
    pub unmatched: Vec<SeriesRecord>,
    pub report: Option<SelectionReport>,
}

/// Assembles a grouped patient folder into (image, segmentations) pairs.
///
/// Segmentations attach by reference UID; an image may receive zero, one or
/// many. A segmentation whose reference UID matches no kept image is
/// excluded from the assembled record without error.
pub fn assemble(
    folder: PatientFolder,
    strategy: QueryStrategy<'_>,
    selection_tag: Tag,
    unknown_policy: UnknownSeriesPolicy,
) -> AssembledPatient {
    let (patient_id, folder_path, images, segmentations) = folder.into_parts();

    let mut by_reference: BTreeMap<String, Vec<SegmentationRecord>> = BTreeMap::new();
    for segmentation in segmentations.into_values() {
        by_reference
            .entry(segmentation.reference_uid().to_string())
            .or_default()
            .push(segmentation);
    }

    let mut images: Vec<ImageSeries> = images.into_values().collect();
    let mut pairs = Vec::new();
    let mut unmatched = Vec::new();

    log::debug!("patient {patient_id}: assembling with the {} strategy", strategy.name());

    let report = match strategy {
        QueryStrategy::Default => {
            for mut image in images {
                if unknown_policy == UnknownSeriesPolicy::Exclude
                    && image.record().description() == UNKNOWN_DESCRIPTION
                {
                    log::debug!(
                        "excluding series {} without a series description",
                        image.record().series_uid()
                    );
                    continue;
                }
                let modality = image.record().modality().to_string();
                image.assign_label(modality);
                let attached = by_reference
                    .remove(image.record().series_uid())
                    .unwrap_or_default();
                pairs.push((image, attached));
            }
            None
        }
        QueryStrategy::TagValue(spec) => {
            let report = spec.select(&mut images, selection_tag);
            for image in images {
                if image.label().is_some() {
                    let attached = by_reference
                        .remove(image.record().series_uid())
                        .unwrap_or_default();
                    pairs.push((image, attached));
                } else {
                    unmatched.push(image.into_record());
                }
            }
            Some(report)
        }
    };

    for orphans in by_reference.values() {
        for segmentation in orphans {
            log::debug!(
                "segmentation {} references series {} which is not part of the record",
                segmentation.record().series_uid(),
                segmentation.reference_uid()
            );
        }
    }

    AssembledPatient {
        patient_id,
        folder: folder_path,
        pairs,
        unmatched,
        report,
    }
}

/// Deletes every file of the given series from disk.
///
/// Irreversible. Callers are expected to gate this behind an explicit
/// confirmation; the library never invokes it on its own.
pub fn erase_series_files(series: &[SeriesRecord]) -> io::Result<usize> {
    let mut removed = 0;
    for record in series {
        for path in record.paths() {
            fs::remove_file(path)?;
            removed += 1;
        }
        log::info!(
            "erased {} file(s) of unused series {}",
            record.paths().len(),
            record.series_uid()
        );
    }
    Ok(removed)
}
