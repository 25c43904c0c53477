//! Structural checks on a freshly fetched dataset.

use crate::dataset::{list_files, stems, ClassNames, DatasetPart};
use crate::error::{TrainingResult, ValidationError};
use crate::layout::DatasetLayout;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub pairs: usize,
}

/// Verify the flat `images/` and `labels/` directories form a consistent set
/// of sample pairs. Reports the first violated invariant.
pub fn validate_dataset(layout: &DatasetLayout) -> TrainingResult<ValidationReport> {
    let images = non_empty_listing(DatasetPart::Images, &layout.images_dir())?;
    let labels = non_empty_listing(DatasetPart::Labels, &layout.labels_dir())?;

    if images.len() != labels.len() {
        return Err(ValidationError::CountMismatch { images: images.len(), labels: labels.len() }.into());
    }

    let image_stems = stems(&images);
    let label_stems = stems(&labels);
    if image_stems != label_stems {
        return Err(ValidationError::StemMismatch {
            images_only: image_stems.difference(&label_stems).cloned().collect(),
            labels_only: label_stems.difference(&image_stems).cloned().collect(),
        }
        .into());
    }

    info!(pairs = images.len(), root = %layout.root().display(), "dataset validated");
    Ok(ValidationReport { pairs: images.len() })
}

fn non_empty_listing(part: DatasetPart, dir: &Path) -> TrainingResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ValidationError::MissingDirectory { part, path: dir.to_path_buf() }.into());
    }
    let files = list_files(dir)?;
    if files.is_empty() {
        return Err(ValidationError::EmptyDirectory { part, path: dir.to_path_buf() }.into());
    }
    debug!(%part, count = files.len(), "listed dataset directory");
    Ok(files)
}

/// Check every YOLO label line: `<class> <x> <y> <w> <h>` with a known class
/// index and normalized coordinates. Returns the number of boxes seen.
pub fn lint_labels(labels_dir: &Path, names: &ClassNames) -> TrainingResult<usize> {
    let mut boxes = 0;
    for file in list_files(labels_dir)? {
        if file.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let contents = std::fs::read_to_string(&file)?;
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            check_label_line(line, names).map_err(|reason| ValidationError::LabelFormat {
                file: file.clone(),
                line: idx + 1,
                reason,
            })?;
            boxes += 1;
        }
    }
    debug!(boxes, dir = %labels_dir.display(), "label files linted");
    Ok(boxes)
}

fn check_label_line(line: &str, names: &ClassNames) -> Result<(), String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!("expected 5 fields, found {}", fields.len()));
    }

    let class = fields[0]
        .parse::<u32>()
        .map_err(|_| format!("class index '{}' is not an integer", fields[0]))?;
    if !names.contains_key(&class) {
        return Err(format!("class index {class} is not in the class manifest ({} classes)", names.len()));
    }

    for value in &fields[1..] {
        let v = value
            .parse::<f64>()
            .map_err(|_| format!("coordinate '{value}' is not a number"))?;
        if !(0.0..=1.0).contains(&v) {
            return Err(format!("coordinate {v} is outside [0, 1]"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TrainingError, ValidationErrorKind};
    use tempfile::TempDir;

    fn layout_with(images: &[&str], labels: &[&str]) -> (TempDir, DatasetLayout) {
        let temp = TempDir::new().unwrap();
        let layout = DatasetLayout::new(temp.path());
        std::fs::create_dir_all(layout.images_dir()).unwrap();
        std::fs::create_dir_all(layout.labels_dir()).unwrap();
        for name in images {
            std::fs::write(layout.images_dir().join(name), b"img").unwrap();
        }
        for name in labels {
            std::fs::write(layout.labels_dir().join(name), b"0 0.5 0.5 0.2 0.2\n").unwrap();
        }
        (temp, layout)
    }

    fn validation_error(result: TrainingResult<ValidationReport>) -> ValidationError {
        match result {
            Err(TrainingError::Validation(err)) => err,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_accepts_matching_pairs() {
        let (_temp, layout) = layout_with(&["a.jpg", "b.png"], &["a.txt", "b.txt"]);
        assert_eq!(validate_dataset(&layout).unwrap(), ValidationReport { pairs: 2 });
    }

    #[test]
    fn test_rejects_missing_images_dir() {
        let temp = TempDir::new().unwrap();
        let layout = DatasetLayout::new(temp.path());
        let err = validation_error(validate_dataset(&layout));
        assert!(matches!(err, ValidationError::MissingDirectory { part: DatasetPart::Images, .. }));
        assert_eq!(err.kind(), ValidationErrorKind::MissingData);
    }

    #[test]
    fn test_rejects_empty_images_dir() {
        let (_temp, layout) = layout_with(&[], &["a.txt"]);
        let err = validation_error(validate_dataset(&layout));
        assert!(matches!(err, ValidationError::EmptyDirectory { part: DatasetPart::Images, .. }));
    }

    #[test]
    fn test_rejects_empty_labels_dir() {
        let (_temp, layout) = layout_with(&["a.jpg"], &[]);
        let err = validation_error(validate_dataset(&layout));
        assert!(matches!(err, ValidationError::EmptyDirectory { part: DatasetPart::Labels, .. }));
        assert_eq!(err.kind(), ValidationErrorKind::MissingData);
    }

    #[test]
    fn test_rejects_count_mismatch() {
        let (_temp, layout) = layout_with(&["a.jpg", "b.jpg"], &["a.txt"]);
        let err = validation_error(validate_dataset(&layout));
        assert!(matches!(err, ValidationError::CountMismatch { images: 2, labels: 1 }));
        assert_eq!(err.kind(), ValidationErrorKind::Mismatch);
    }

    #[test]
    fn test_rejects_stem_mismatch() {
        let (_temp, layout) = layout_with(&["a.jpg", "b.jpg"], &["a.txt", "c.txt"]);
        let err = validation_error(validate_dataset(&layout));
        match &err {
            ValidationError::StemMismatch { images_only, labels_only } => {
                assert_eq!(images_only, &vec!["b".to_string()]);
                assert_eq!(labels_only, &vec!["c".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.kind(), ValidationErrorKind::Mismatch);
    }

    #[test]
    fn test_lint_labels_flags_bad_lines() {
        let temp = TempDir::new().unwrap();
        let names: ClassNames = [(0, "cat".to_string())].into_iter().collect();
        std::fs::write(temp.path().join("ok.txt"), "0 0.1 0.2 0.3 0.4\n\n").unwrap();
        assert_eq!(lint_labels(temp.path(), &names).unwrap(), 1);

        std::fs::write(temp.path().join("short.txt"), "0 0.1 0.2\n").unwrap();
        let err = lint_labels(temp.path(), &names).unwrap_err();
        match err {
            TrainingError::Validation(ValidationError::LabelFormat { line, reason, .. }) => {
                assert_eq!(line, 1);
                assert!(reason.contains("expected 5 fields"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_lint_labels_rejects_unknown_class() {
        let temp = TempDir::new().unwrap();
        let names: ClassNames = [(0, "cat".to_string())].into_iter().collect();
        std::fs::write(temp.path().join("a.txt"), "0 0.1 0.2 0.3 0.4\n3 0.1 0.2 0.3 0.4\n").unwrap();

        let err = lint_labels(temp.path(), &names).unwrap_err();
        assert!(err.to_string().contains("a.txt:2"));
    }
}
