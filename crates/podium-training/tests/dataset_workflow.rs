//! End-to-end validate + split over a synthetic dataset on disk.

use podium_training::dataset::{list_files, read_class_manifest, stems, write_class_manifest};
use podium_training::{
    lint_labels, split_dataset, validate_dataset, ClassNames, DatasetLayout, SplitOptions, Subset, TrainingConfig,
};
use std::collections::BTreeSet;
use tempfile::TempDir;

fn class_names() -> ClassNames {
    ["person", "bicycle", "car"]
        .iter()
        .enumerate()
        .map(|(i, n)| (i as u32, (*n).to_string()))
        .collect()
}

fn seed_dataset(root: &std::path::Path, pairs: usize) -> DatasetLayout {
    let layout = DatasetLayout::new(root);
    std::fs::create_dir_all(layout.images_dir()).unwrap();
    std::fs::create_dir_all(layout.labels_dir()).unwrap();
    for i in 0..pairs {
        std::fs::write(layout.images_dir().join(format!("frame_{i:03}.jpg")), format!("image {i}")).unwrap();
        std::fs::write(
            layout.labels_dir().join(format!("frame_{i:03}.txt")),
            format!("{} 0.5 0.5 0.25 0.25\n", i % 3),
        )
        .unwrap();
    }
    write_class_manifest(&layout.class_manifest_path(), &class_names()).unwrap();
    layout
}

fn subset_stems(layout: &DatasetLayout, subset: Subset) -> (BTreeSet<String>, BTreeSet<String>) {
    let images = stems(&list_files(&layout.images_subset_dir(subset)).unwrap());
    let labels = stems(&list_files(&layout.labels_subset_dir(subset)).unwrap());
    (images, labels)
}

#[test]
fn split_hundred_pairs_into_seventy_ten_twenty() {
    let temp = TempDir::new().unwrap();
    let layout = seed_dataset(temp.path(), 100);
    let before = read_class_manifest(&layout.class_manifest_path()).unwrap();

    assert_eq!(validate_dataset(&layout).unwrap().pairs, 100);
    assert_eq!(lint_labels(&layout.labels_dir(), &before).unwrap(), 100);

    let options = SplitOptions { seed: 42, test_size: 0.2, val_size: 0.1 };
    let report = split_dataset(&layout, &options).unwrap();
    assert_eq!((report.train, report.val, report.test), (70, 10, 20));

    let mut union = BTreeSet::new();
    for subset in Subset::ALL {
        let (images, labels) = subset_stems(&layout, subset);
        assert_eq!(images, labels, "{subset} images and labels diverged");
        for stem in images {
            assert!(union.insert(stem), "stem assigned twice");
        }
    }
    assert_eq!(union.len(), 100);

    // Flat files, manifest and scratch directories are gone.
    assert!(list_files(&layout.images_dir()).unwrap().is_empty());
    assert!(!layout.class_manifest_path().exists());
    assert!(!layout.staging_dir().exists());
    assert!(!layout.retired_dir().exists());

    let config = TrainingConfig::load(&layout.training_config_path()).unwrap();
    assert_eq!(config.names, before);
    assert_eq!(config.train, "images/train");
    assert_eq!(config.val, "images/val");
    assert_eq!(config.test, "images/test");
}

#[test]
fn same_seed_reproduces_membership() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let a = seed_dataset(first.path(), 100);
    let b = seed_dataset(second.path(), 100);

    let options = SplitOptions { seed: 42, test_size: 0.2, val_size: 0.1 };
    split_dataset(&a, &options).unwrap();
    split_dataset(&b, &options).unwrap();

    for subset in Subset::ALL {
        assert_eq!(subset_stems(&a, subset), subset_stems(&b, subset), "{subset} differs");
    }
}

#[test]
fn leftover_staging_is_discarded() {
    let temp = TempDir::new().unwrap();
    let layout = seed_dataset(temp.path(), 10);
    std::fs::create_dir_all(layout.staging_dir().join("images/train")).unwrap();
    std::fs::write(layout.staging_dir().join("images/train/ghost.jpg"), b"x").unwrap();

    let report = split_dataset(&layout, &SplitOptions { seed: 1, test_size: 0.2, val_size: 0.2 }).unwrap();
    assert_eq!(report.train + report.val + report.test, 10);

    let (images, _) = subset_stems(&layout, Subset::Train);
    assert!(!images.contains("ghost"));
}

#[test]
fn invalid_fractions_leave_dataset_untouched() {
    let temp = TempDir::new().unwrap();
    let layout = seed_dataset(temp.path(), 10);

    let err = split_dataset(&layout, &SplitOptions { seed: 1, test_size: 0.5, val_size: 0.5 });
    assert!(err.is_err());
    assert_eq!(list_files(&layout.images_dir()).unwrap().len(), 10);
    assert!(layout.class_manifest_path().exists());
}
