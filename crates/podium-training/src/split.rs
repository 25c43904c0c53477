//! Seeded train/val/test partitioning of a validated dataset.
//!
//! The split is planned in memory, copied into a staging directory, verified,
//! and only then swapped into place. Until the swap the flat `images/` and
//! `labels/` directories stay untouched, so a crash mid-copy leaves the
//! dataset as it was fetched. A crash during the swap itself is repaired on
//! the next call: the swap is rolled back unless `config.yaml` already made it
//! into place, in which case it is finished.

use crate::dataset::{collect_pairs, list_files, read_class_manifest, SamplePair, Subset, TrainingConfig};
use crate::error::{SplitError, TrainingResult};
use crate::layout::DatasetLayout;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitOptions {
    pub seed: u64,
    /// Fraction of the full set held out for testing.
    pub test_size: f64,
    /// Fraction of the full set (not of the remainder) used for validation.
    pub val_size: f64,
}

impl SplitOptions {
    pub fn validate(&self) -> Result<(), SplitError> {
        check_fraction("test_size", self.test_size)?;
        check_fraction("val_size", self.val_size)?;
        if self.test_size + self.val_size >= 1.0 {
            return Err(SplitError::FractionSum { test_size: self.test_size, val_size: self.val_size });
        }
        Ok(())
    }

    /// Validation share of what remains after the test carve-out.
    #[must_use]
    pub fn val_fraction_of_remainder(&self) -> f64 {
        self.val_size / (1.0 - self.test_size)
    }
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), SplitError> {
    if value.is_finite() && value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(SplitError::FractionRange { name, value })
    }
}

/// Stems assigned to each subset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitAssignment {
    pub train: Vec<String>,
    pub val: Vec<String>,
    pub test: Vec<String>,
}

impl SplitAssignment {
    #[must_use]
    pub fn subset(&self, subset: Subset) -> &[String] {
        match subset {
            Subset::Train => &self.train,
            Subset::Val => &self.val,
            Subset::Test => &self.test,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition `stems` into three non-empty disjoint subsets.
///
/// Stems are sorted before the seeded shuffle, so the result depends only on
/// the set of stems and the options.
pub fn plan_split(stems: &[String], options: &SplitOptions) -> Result<SplitAssignment, SplitError> {
    options.validate()?;

    let mut order = stems.to_vec();
    order.sort();
    order.dedup();
    let n = order.len();
    if n < 3 {
        return Err(SplitError::TooFewSamples { count: n });
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    order.shuffle(&mut rng);

    let n_test = rounded_share(options.test_size, n).clamp(1, n - 2);
    let remaining = n - n_test;
    let n_val = rounded_share(options.val_fraction_of_remainder(), remaining).clamp(1, remaining - 1);

    let mut test = order[..n_test].to_vec();
    let mut val = order[n_test..n_test + n_val].to_vec();
    let mut train = order[n_test + n_val..].to_vec();
    test.sort();
    val.sort();
    train.sort();

    Ok(SplitAssignment { train, val, test })
}

fn rounded_share(fraction: f64, total: usize) -> usize {
    (fraction * total as f64).round() as usize
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitReport {
    pub train: usize,
    pub val: usize,
    pub test: usize,
    pub config_path: PathBuf,
}

/// Split the flat dataset at `layout` into `train/val/test` subdirectories
/// and replace `data.yaml` with the consolidated `config.yaml`.
pub fn split_dataset(layout: &DatasetLayout, options: &SplitOptions) -> TrainingResult<SplitReport> {
    options.validate()?;

    match recover_interrupted_commit(layout)? {
        CommitRecovery::Completed => return completed_report(layout),
        CommitRecovery::Clean | CommitRecovery::RolledBack => {}
    }

    let names = read_class_manifest(&layout.class_manifest_path())?;
    let pairs = collect_pairs(layout)?;
    let stems: Vec<String> = pairs.iter().map(|p| p.stem.clone()).collect();
    let assignment = plan_split(&stems, options)?;

    let staging = layout.staging_dir();
    if staging.exists() {
        warn!(path = %staging.display(), "discarding leftover split staging directory");
        std::fs::remove_dir_all(&staging)?;
    }

    let staged = DatasetLayout::new(&staging);
    let by_stem: BTreeMap<&str, &SamplePair> = pairs.iter().map(|p| (p.stem.as_str(), p)).collect();
    for subset in Subset::ALL {
        let image_dir = staged.images_subset_dir(subset);
        let label_dir = staged.labels_subset_dir(subset);
        std::fs::create_dir_all(&image_dir)?;
        std::fs::create_dir_all(&label_dir)?;

        for stem in assignment.subset(subset) {
            let pair = by_stem[stem.as_str()];
            copy_into(&pair.image, &image_dir)?;
            copy_into(&pair.label, &label_dir)?;
        }

        let expected = assignment.subset(subset).len();
        verify_count(subset, &image_dir, expected)?;
        verify_count(subset, &label_dir, expected)?;
    }

    let config = TrainingConfig::for_layout(layout, names);
    config.save(&staged.training_config_path())?;

    commit(layout, &staged)?;

    let report = SplitReport {
        train: assignment.train.len(),
        val: assignment.val.len(),
        test: assignment.test.len(),
        config_path: layout.training_config_path(),
    };
    info!(
        train = report.train,
        val = report.val,
        test = report.test,
        seed = options.seed,
        "dataset split"
    );
    Ok(report)
}

fn copy_into(file: &Path, dir: &Path) -> TrainingResult<()> {
    let name = file
        .file_name()
        .ok_or_else(|| crate::TrainingError::Dataset(format!("not a file: {}", file.display())))?;
    std::fs::copy(file, dir.join(name))?;
    Ok(())
}

fn verify_count(subset: Subset, dir: &Path, expected: usize) -> Result<(), crate::TrainingError> {
    let found = list_files(dir)?.len();
    if found == expected {
        Ok(())
    } else {
        Err(SplitError::Verification { subset: subset.as_str(), dir: dir.to_path_buf(), expected, found }.into())
    }
}

/// State of a previous split commit found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitRecovery {
    /// No interrupted commit.
    Clean,
    /// The flat directories were restored from `.split-retired`.
    RolledBack,
    /// The staged tree was already in place; leftovers were removed.
    Completed,
}

/// Repair a commit interrupted between its first and last rename.
///
/// `config.yaml` is the last staged entry moved into place, so its presence
/// means every split directory is in place and only cleanup remains.
/// Otherwise the flat directories parked in `.split-retired` are moved back
/// over whatever staged directories had already been swapped in.
pub fn recover_interrupted_commit(layout: &DatasetLayout) -> TrainingResult<CommitRecovery> {
    let retired = layout.retired_dir();
    if !retired.exists() {
        return Ok(CommitRecovery::Clean);
    }

    if layout.training_config_path().exists() {
        warn!(path = %layout.root().display(), "finishing interrupted split commit");
        remove_file_if_exists(&layout.class_manifest_path())?;
        std::fs::remove_dir_all(&retired)?;
        remove_dir_if_exists(&layout.staging_dir())?;
        return Ok(CommitRecovery::Completed);
    }

    warn!(path = %layout.root().display(), "rolling back interrupted split commit");
    for (parked, live) in [
        (retired.join("images"), layout.images_dir()),
        (retired.join("labels"), layout.labels_dir()),
    ] {
        if parked.exists() {
            remove_dir_if_exists(&live)?;
            std::fs::rename(&parked, &live)?;
        }
    }
    std::fs::remove_dir_all(&retired)?;
    Ok(CommitRecovery::RolledBack)
}

fn remove_dir_if_exists(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove_file_if_exists(file: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(file) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn completed_report(layout: &DatasetLayout) -> TrainingResult<SplitReport> {
    let count = |subset| list_files(&layout.images_subset_dir(subset)).map(|files| files.len());
    let report = SplitReport {
        train: count(Subset::Train)?,
        val: count(Subset::Val)?,
        test: count(Subset::Test)?,
        config_path: layout.training_config_path(),
    };
    info!(train = report.train, val = report.val, test = report.test, "recovered dataset split");
    Ok(report)
}

/// Swap the staged tree into place. Sources are deleted only after every
/// rename has succeeded.
fn commit(layout: &DatasetLayout, staged: &DatasetLayout) -> TrainingResult<()> {
    let retired = layout.retired_dir();
    if retired.exists() {
        std::fs::remove_dir_all(&retired)?;
    }
    std::fs::create_dir_all(&retired)?;

    std::fs::rename(layout.images_dir(), retired.join("images"))?;
    std::fs::rename(layout.labels_dir(), retired.join("labels"))?;
    std::fs::rename(staged.images_dir(), layout.images_dir())?;
    std::fs::rename(staged.labels_dir(), layout.labels_dir())?;
    std::fs::rename(staged.training_config_path(), layout.training_config_path())?;

    std::fs::remove_file(layout.class_manifest_path())?;
    std::fs::remove_dir_all(&retired)?;
    std::fs::remove_dir_all(staged.root())?;
    Ok(())
}
