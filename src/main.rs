use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use dicom_core::Tag;
use dicom_core::dictionary::DataDictionary;
use dicom_dictionary_std::StandardDataDictionary;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use dicom_cohort::{
    CohortOptions, LabelSpec, PatientFailure, PatientFolder, PatientIterator, PatientRecord,
    QueryStrategy, UnknownSeriesPolicy, erase_series_files, strategy,
};

#[derive(Parser)]
#[command(name = "dicom-cohort")]
#[command(about = "Resolve cohorts of patient DICOM folders into ML-ready records")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan every patient folder and write a JSON cohort report
    Scan(ScanArgs),
    /// Delete the files of image series that match no label in the spec
    Prune(PruneArgs),
}

#[derive(Args)]
struct ScanArgs {
    /// Root folder containing one subfolder per patient
    input: PathBuf,

    /// Label specification JSON file (labels to accepted tag values)
    #[arg(short, long)]
    label_spec: Option<PathBuf>,

    /// Output directory (defaults to current directory)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pretty print JSON output
    #[arg(short, long)]
    pretty: bool,

    /// DICOM tag used to match label values, as a keyword or GGGG,EEEE pair
    #[arg(long, default_value = "SeriesDescription")]
    tag: String,

    /// Drop image series without a series description instead of keeping them
    #[arg(long)]
    exclude_unknown_series: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args)]
struct PruneArgs {
    /// Root folder containing one subfolder per patient
    input: PathBuf,

    /// Label specification JSON file; series matching none of its labels
    /// are candidates for deletion
    #[arg(short, long)]
    label_spec: PathBuf,

    /// DICOM tag used to match label values, as a keyword or GGGG,EEEE pair
    #[arg(long, default_value = "SeriesDescription")]
    tag: String,

    /// Actually delete files; without this flag candidates are only listed
    #[arg(long)]
    confirm: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Command::Scan(args) => args.verbose,
        Command::Prune(args) => args.verbose,
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if verbose { "info" } else { "warn" }),
    )
    .init();

    match cli.command {
        Command::Scan(args) => scan(args),
        Command::Prune(args) => prune(args),
    }
}

#[derive(Serialize)]
struct CohortReport {
    root: String,
    generated_at: DateTime<Utc>,
    total_patients: usize,
    patients: Vec<PatientSummary>,
    errors: Vec<String>,
    failures: Vec<PatientFailure>,
}

#[derive(Serialize)]
struct PatientSummary {
    patient_id: String,
    folder: String,
    images: Vec<ImageSummary>,
}

#[derive(Serialize)]
struct ImageSummary {
    label: Option<String>,
    modality: String,
    series_description: String,
    series_uid: String,
    file_count: usize,
    segmentations: Vec<SegmentationSummary>,
}

#[derive(Serialize)]
struct SegmentationSummary {
    modality: String,
    series_uid: String,
    reference_uid: String,
}

fn scan(args: ScanArgs) -> Result<()> {
    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| std::env::current_dir().expect("current directory"));
    fs::create_dir_all(&output_dir)?;

    let options = CohortOptions {
        selection_tag: resolve_tag(&args.tag)?,
        unknown_series_policy: if args.exclude_unknown_series {
            UnknownSeriesPolicy::Exclude
        } else {
            UnknownSeriesPolicy::Keep
        },
        organs: None,
    };

    let mut patients = PatientIterator::new(&args.input)
        .with_context(|| format!("failed to open cohort root {:?}", args.input))?
        .with_options(options);
    if let Some(path) = &args.label_spec {
        patients = patients
            .with_label_spec_file(path)
            .with_context(|| format!("failed to load label spec from {path:?}"))?;
    }

    if patients.is_empty() {
        bail!("no patient folders found in {:?}", args.input);
    }

    if args.verbose {
        println!(
            "🏥 Scanning {} patient folder(s) in {:?}",
            patients.len(),
            args.input
        );
    }

    let progress_bar = if args.verbose {
        let pb = ProgressBar::new(patients.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap()
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut summaries = Vec::new();
    let mut errors = Vec::new();
    while let Some(result) = patients.advance() {
        match result {
            Ok(record) => summaries.push(summarize(&record)),
            Err(error) => {
                if args.verbose {
                    eprintln!("❌ {error}");
                }
                errors.push(error.to_string());
            }
        }
        if let Some(pb) = &progress_bar {
            pb.inc(1);
        }
    }

    if let Some(pb) = &progress_bar {
        pb.finish_with_message("✅ Scan complete");
    }

    let report = CohortReport {
        root: args.input.to_string_lossy().to_string(),
        generated_at: Utc::now(),
        total_patients: patients.len(),
        patients: summaries,
        errors,
        failures: patients.failures().to_vec(),
    };

    let json_content = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    let report_file = output_dir.join("cohort_report.json");
    fs::write(&report_file, json_content)?;

    if args.verbose {
        println!("📄 Report saved to: {report_file:?}");
        print_summary(&report);
    }

    Ok(())
}

fn summarize(record: &PatientRecord) -> PatientSummary {
    PatientSummary {
        patient_id: record.patient_id.clone(),
        folder: record.folder.to_string_lossy().to_string(),
        images: record
            .data
            .iter()
            .map(|entry| ImageSummary {
                label: entry.image.label().map(str::to_string),
                modality: entry.image.record().modality().to_string(),
                series_description: entry.image.record().description().to_string(),
                series_uid: entry.image.record().series_uid().to_string(),
                file_count: entry.image.record().paths().len(),
                segmentations: entry
                    .segmentations
                    .iter()
                    .map(|seg| SegmentationSummary {
                        modality: seg.modality().to_string(),
                        series_uid: seg.record().series_uid().to_string(),
                        reference_uid: seg.reference_uid().to_string(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn print_summary(report: &CohortReport) {
    println!("\nCohort Summary:");
    println!("   Patients processed: {}", report.patients.len());
    println!("   Patients aborted: {}", report.errors.len());
    println!("   Patients with missing labels: {}", report.failures.len());

    let modalities: HashSet<_> = report
        .patients
        .iter()
        .flat_map(|p| p.images.iter().map(|i| i.modality.clone()))
        .collect();
    println!("   Modalities kept: {}", modalities.len());
    for modality in &modalities {
        println!("     - {modality}");
    }

    for failure in &report.failures {
        println!(
            "   Patient {} is missing {:?} (available: {:?})",
            failure.patient_id,
            failure.missing.keys().collect::<Vec<_>>(),
            failure.available_tag_values
        );
    }
}

fn prune(args: PruneArgs) -> Result<()> {
    let spec = LabelSpec::from_json_file(&args.label_spec)
        .with_context(|| format!("failed to load label spec from {:?}", args.label_spec))?;
    if spec.is_empty() {
        bail!("the label spec is empty; refusing to treat every series as unused");
    }
    let tag = resolve_tag(&args.tag)?;

    let patients = PatientIterator::new(&args.input)
        .with_context(|| format!("failed to open cohort root {:?}", args.input))?;

    let mut candidates = Vec::new();
    for folder in patients.folders() {
        let grouped = match PatientFolder::scan(folder) {
            Ok(grouped) => grouped,
            Err(error) => {
                eprintln!("❌ skipping {folder:?}: {error}");
                continue;
            }
        };
        let assembled = strategy::assemble(
            grouped,
            QueryStrategy::TagValue(&spec),
            tag,
            UnknownSeriesPolicy::Keep,
        );
        candidates.extend(assembled.unmatched);
    }

    if candidates.is_empty() {
        println!("Nothing to prune: every image series matches a label.");
        return Ok(());
    }
    let file_count: usize = candidates.iter().map(|s| s.paths().len()).sum();

    if args.verbose || !args.confirm {
        for series in &candidates {
            println!(
                "   {} [{}] {:?}: {} file(s)",
                series.series_uid(),
                series.modality(),
                series.description(),
                series.paths().len()
            );
        }
    }

    if !args.confirm {
        println!(
            "{} series ({} files) match no label. Re-run with --confirm to delete them.",
            candidates.len(),
            file_count
        );
        return Ok(());
    }

    let removed = erase_series_files(&candidates)?;
    println!(
        "🗑️  Deleted {removed} file(s) from {} series.",
        candidates.len()
    );

    Ok(())
}

/// Resolves a DICOM tag from a dictionary keyword or a `GGGG,EEEE` pair.
fn resolve_tag(input: &str) -> Result<Tag> {
    input.parse::<Tag>().or_else(|_| {
        StandardDataDictionary
            .by_name(input)
            .map(|entry| entry.tag.inner())
            .with_context(|| format!("unknown DICOM tag {input:?}"))
    })
}
