use crate::error::{SplitError, TrainingResult, ValidationError};
use crate::layout::DatasetLayout;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Class index to class name mapping. Indices are contiguous from 0.
pub type ClassNames = BTreeMap<u32, String>;

/// One of the three disjoint dataset subsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subset {
    Train,
    Val,
    Test,
}

impl Subset {
    pub const ALL: [Subset; 3] = [Subset::Train, Subset::Val, Subset::Test];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }
}

impl std::fmt::Display for Subset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two halves of a sample pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetPart {
    Images,
    Labels,
}

impl std::fmt::Display for DatasetPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Images => f.write_str("images"),
            Self::Labels => f.write_str("labels"),
        }
    }
}

/// `names` in an exported manifest may be a list or an index map.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NamesRepr {
    List(Vec<String>),
    Map(BTreeMap<u32, String>),
}

#[derive(Debug, Clone, Deserialize)]
struct RawClassManifest {
    names: NamesRepr,
}

#[derive(Debug, Clone, Serialize)]
struct ExportedClassManifest<'a> {
    nc: usize,
    names: Vec<&'a str>,
}

/// Read the exported class manifest (`data.yaml`).
pub fn read_class_manifest(path: &Path) -> TrainingResult<ClassNames> {
    if !path.exists() {
        return Err(SplitError::MissingManifest(path.to_path_buf()).into());
    }
    let contents = std::fs::read_to_string(path)?;
    let raw: RawClassManifest = serde_yaml::from_str(&contents)?;
    let names = match raw.names {
        NamesRepr::List(list) => list
            .into_iter()
            .enumerate()
            .map(|(idx, name)| (idx as u32, name))
            .collect(),
        NamesRepr::Map(map) => map,
    };
    ensure_contiguous(&names)?;
    Ok(names)
}

/// Write a class manifest in the exported (`nc` + `names` list) shape.
pub fn write_class_manifest(path: &Path, names: &ClassNames) -> TrainingResult<()> {
    ensure_contiguous(names)?;
    let manifest = ExportedClassManifest {
        nc: names.len(),
        names: names.values().map(String::as_str).collect(),
    };
    std::fs::write(path, serde_yaml::to_string(&manifest)?)?;
    Ok(())
}

pub fn ensure_contiguous(names: &ClassNames) -> Result<(), SplitError> {
    let contiguous = names.keys().enumerate().all(|(idx, key)| idx as u32 == *key);
    if contiguous {
        Ok(())
    } else {
        Err(SplitError::NonContiguousClasses(names.keys().copied().collect()))
    }
}

/// Consolidated training configuration consumed by the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub path: String,
    pub train: String,
    pub val: String,
    pub test: String,
    pub names: ClassNames,
}

impl TrainingConfig {
    #[must_use]
    pub fn for_layout(layout: &DatasetLayout, names: ClassNames) -> Self {
        let root = std::path::absolute(layout.root()).unwrap_or_else(|_| layout.root().to_path_buf());
        Self {
            path: root.to_string_lossy().into_owned(),
            train: format!("images/{}", Subset::Train),
            val: format!("images/{}", Subset::Val),
            test: format!("images/{}", Subset::Test),
            names,
        }
    }

    pub fn load(path: &Path) -> TrainingResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> TrainingResult<()> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}

/// An image and its label file, associated by filename stem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SamplePair {
    pub stem: String,
    pub image: PathBuf,
    pub label: PathBuf,
}

/// Extension-independent file stem.
#[must_use]
pub fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

/// Regular files directly inside `dir`, sorted by path.
pub fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[must_use]
pub fn stems(files: &[PathBuf]) -> BTreeSet<String> {
    files.iter().filter_map(|f| file_stem(f)).collect()
}

/// Pair every flat image with its label by stem.
pub fn collect_pairs(layout: &DatasetLayout) -> TrainingResult<Vec<SamplePair>> {
    let images = list_files(&layout.images_dir())?;
    let labels: BTreeMap<String, PathBuf> = list_files(&layout.labels_dir())?
        .into_iter()
        .filter_map(|p| file_stem(&p).map(|s| (s, p)))
        .collect();

    let mut pairs = Vec::with_capacity(images.len());
    let mut images_only = Vec::new();
    for image in images {
        let Some(stem) = file_stem(&image) else { continue };
        match labels.get(&stem) {
            Some(label) => pairs.push(SamplePair { stem, image, label: label.clone() }),
            None => images_only.push(stem),
        }
    }

    let image_stems: BTreeSet<&str> = pairs.iter().map(|p| p.stem.as_str()).collect();
    let labels_only: Vec<String> =
        labels.keys().filter(|s| !image_stems.contains(s.as_str())).cloned().collect();

    if !images_only.is_empty() || !labels_only.is_empty() {
        return Err(ValidationError::StemMismatch { images_only, labels_only }.into());
    }

    pairs.sort();
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> ClassNames {
        list.iter().enumerate().map(|(i, n)| (i as u32, (*n).to_string())).collect()
    }

    #[test]
    fn test_read_class_manifest_accepts_list_and_map() {
        let temp = TempDir::new().unwrap();
        let list = temp.path().join("list.yaml");
        std::fs::write(&list, "nc: 2\nnames: ['cat', 'dog']\n").unwrap();
        let map = temp.path().join("map.yaml");
        std::fs::write(&map, "names:\n  0: cat\n  1: dog\n").unwrap();

        assert_eq!(read_class_manifest(&list).unwrap(), names(&["cat", "dog"]));
        assert_eq!(read_class_manifest(&map).unwrap(), names(&["cat", "dog"]));
    }

    #[test]
    fn test_read_class_manifest_rejects_gaps() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.yaml");
        std::fs::write(&path, "names:\n  0: cat\n  2: dog\n").unwrap();

        let err = read_class_manifest(&path).unwrap_err();
        assert!(matches!(
            err,
            crate::TrainingError::Split(SplitError::NonContiguousClasses(_))
        ));
    }

    #[test]
    fn test_training_config_yaml_shape() {
        let layout = DatasetLayout::new("/srv/data");
        let config = TrainingConfig::for_layout(&layout, names(&["person"]));
        let yaml = serde_yaml::to_string(&config).unwrap();

        assert!(yaml.contains("path: /srv/data"));
        assert!(yaml.contains("train: images/train"));
        assert!(yaml.contains("0: person"));
    }

    #[test]
    fn test_collect_pairs_matches_by_stem() {
        let temp = TempDir::new().unwrap();
        let layout = DatasetLayout::new(temp.path());
        std::fs::create_dir_all(layout.images_dir()).unwrap();
        std::fs::create_dir_all(layout.labels_dir()).unwrap();
        for stem in ["b", "a"] {
            std::fs::write(layout.images_dir().join(format!("{stem}.jpg")), b"img").unwrap();
            std::fs::write(layout.labels_dir().join(format!("{stem}.txt")), b"0 0.5 0.5 0.1 0.1").unwrap();
        }

        let pairs = collect_pairs(&layout).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].stem, "a");
        assert!(pairs[0].label.ends_with("a.txt"));
    }
}
