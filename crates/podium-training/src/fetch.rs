//! Pull an annotated dataset from a remote dataset platform into a local
//! working directory.

use crate::dataset::list_files;
use crate::error::{FetchError, TrainingResult};
use crate::layout::DatasetLayout;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Remote store holding the annotated dataset.
#[async_trait]
pub trait DatasetPlatform: Send + Sync {
    /// Download the YOLO annotation bundle into `dest_dir` and return its path.
    async fn export_annotations(&self, dataset_id: &str, dest_dir: &Path) -> TrainingResult<PathBuf>;

    /// Download every raw image of the dataset into `dest_dir`.
    async fn download_images(&self, dataset_id: &str, dest_dir: &Path) -> TrainingResult<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub images: usize,
    pub labels: usize,
}

/// Produce `images/*`, `labels/*` and `data.yaml` under `layout`.
///
/// Dataset entries left by an earlier fetch or split are removed first so they
/// never merge with the new export. A target holding anything else is refused
/// untouched.
pub async fn fetch_dataset(
    platform: &dyn DatasetPlatform,
    dataset_id: &str,
    layout: &DatasetLayout,
) -> TrainingResult<FetchReport> {
    prepare_target(layout)?;

    let export_dir = layout.export_dir();
    std::fs::create_dir_all(&export_dir)?;
    let bundle = platform.export_annotations(dataset_id, &export_dir).await?;
    debug!(bundle = %bundle.display(), "annotation bundle downloaded");

    let labels_dir = layout.labels_dir();
    let extracted = extract_bundle(&bundle, &labels_dir)?;
    std::fs::remove_dir_all(&export_dir)?;

    let manifest_in_labels = labels_dir.join("data.yaml");
    if !manifest_in_labels.exists() {
        return Err(FetchError::MissingManifest(manifest_in_labels).into());
    }
    std::fs::rename(&manifest_in_labels, layout.class_manifest_path())?;

    let images_dir = layout.images_dir();
    std::fs::create_dir_all(&images_dir)?;
    let images = platform.download_images(dataset_id, &images_dir).await?;

    let labels = list_files(&labels_dir)?.len();
    info!(dataset_id, images, labels, extracted, root = %layout.root().display(), "dataset fetched");
    Ok(FetchReport { images, labels })
}

fn prepare_target(layout: &DatasetLayout) -> TrainingResult<()> {
    let root = layout.root();
    if !root.exists() {
        std::fs::create_dir_all(root)?;
        return Ok(());
    }

    let mut stale = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !DatasetLayout::is_managed_entry(&name) {
            return Err(FetchError::ForeignEntry { root: root.to_path_buf(), entry: name }.into());
        }
        stale.push(entry);
    }

    if !stale.is_empty() {
        warn!(path = %root.display(), entries = stale.len(), "cleaning existing dataset before fetch");
    }
    for entry in stale {
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Extract a gzip tarball, flattening every regular file into `dest`.
///
/// Returns the number of files written. Entries with absolute paths or `..`
/// components are rejected.
pub fn extract_bundle(bundle: &Path, dest: &Path) -> TrainingResult<usize> {
    std::fs::create_dir_all(dest)?;
    let file = std::fs::File::open(bundle)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut written = 0;
    let entries = archive
        .entries()
        .map_err(|e| FetchError::Bundle(format!("{}: {e}", bundle.display())))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| FetchError::Bundle(e.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(|e| FetchError::Bundle(e.to_string()))?.into_owned();
        if path.components().any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))) {
            return Err(FetchError::Bundle(format!("unsafe entry path: {}", path.display())).into());
        }
        let Some(name) = path.file_name() else { continue };
        entry.unpack(dest.join(name))?;
        written += 1;
    }

    if written == 0 {
        return Err(FetchError::Bundle(format!("{} contains no files", bundle.display())).into());
    }
    Ok(written)
}
