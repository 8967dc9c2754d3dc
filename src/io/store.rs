//! Reading and writing recordings and catalogs on the local filesystem.
//!
//! The file format is chosen from the extension: `.json` or `.yaml`/`.yml`.
//!
//! JSON has no NaN or infinity, so recordings carrying such samples are
//! refused for `.json` output. YAML writes them as `.nan`, `.inf` and `-.inf`
//! and reads them back.

use crate::model::{Catalog, RecordingSet};
use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// On-disk serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    /// Detect the format from a path's extension.
    ///
    /// # Errors
    /// Returns an error if the extension is missing or not recognized.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .with_context(|| format!("No file extension in '{}'", path.display()))?;

        match ext.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "yaml" | "yml" => Ok(Format::Yaml),
            other => bail!(
                "Unsupported file extension '{}' in '{}': expected json, yaml or yml",
                other,
                path.display()
            ),
        }
    }
}

fn read_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let format = Format::from_path(path)?;
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let value = match format {
        Format::Json => serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse JSON from {}", path.display()))?,
        Format::Yaml => serde_yaml::from_reader(reader)
            .with_context(|| format!("Failed to parse YAML from {}", path.display()))?,
    };
    Ok(value)
}

fn write_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let format = Format::from_path(path)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    match format {
        Format::Json => serde_json::to_writer_pretty(&mut writer, value)
            .with_context(|| format!("Failed to write JSON to {}", path.display()))?,
        Format::Yaml => serde_yaml::to_writer(&mut writer, value)
            .with_context(|| format!("Failed to write YAML to {}", path.display()))?,
    }
    writer.flush()?;
    Ok(())
}

/// Load a recording set.
pub fn read_recordings(path: impl AsRef<Path>) -> Result<RecordingSet> {
    let path = path.as_ref();
    let set: RecordingSet = read_file(path)?;
    tracing::debug!("Read {} recordings from {}", set.len(), path.display());
    Ok(set)
}

/// Save a recording set.
pub fn write_recordings(path: impl AsRef<Path>, recordings: &RecordingSet) -> Result<()> {
    let path = path.as_ref();
    if Format::from_path(path)? == Format::Json {
        if let Some(r) = recordings.iter().find(|r| r.data.iter().any(|v| !v.is_finite())) {
            bail!(
                "Recording {} has non-finite samples, which JSON cannot hold; write {} as .yaml instead",
                r.id,
                path.display()
            );
        }
    }
    write_file(path, recordings)?;
    tracing::debug!("Wrote {} recordings to {}", recordings.len(), path.display());
    Ok(())
}

/// Load a station catalog.
pub fn read_catalog(path: impl AsRef<Path>) -> Result<Catalog> {
    let path = path.as_ref();
    let catalog: Catalog = read_file(path)?;
    tracing::debug!(
        "Read catalog with {} stations from {}",
        catalog.station_count(),
        path.display()
    );
    Ok(catalog)
}

/// Save a station catalog.
pub fn write_catalog(path: impl AsRef<Path>, catalog: &Catalog) -> Result<()> {
    write_file(path.as_ref(), catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::tests::scenario;
    use tempfile::TempDir;

    #[test]
    fn test_format_from_path() {
        assert_eq!(Format::from_path(Path::new("a/b.json")).unwrap(), Format::Json);
        assert_eq!(Format::from_path(Path::new("b.YML")).unwrap(), Format::Yaml);
        assert_eq!(Format::from_path(Path::new("b.yaml")).unwrap(), Format::Yaml);
        assert!(Format::from_path(Path::new("b.mseed")).is_err());
        assert!(Format::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_recordings_json_and_yaml() {
        let dir = TempDir::new().unwrap();
        let (set, _) = scenario();

        for name in ["obsd.json", "obsd.yaml"] {
            let path = dir.path().join(name);
            write_recordings(&path, &set).unwrap();
            assert_eq!(read_recordings(&path).unwrap(), set);
        }
    }

    #[test]
    fn test_non_finite_samples() {
        let dir = TempDir::new().unwrap();
        let (mut set, _) = scenario();
        if let Some(first) = set.iter_mut().next() {
            first.data = vec![f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1.5];
        }

        let json = dir.path().join("obsd.json");
        let err = write_recordings(&json, &set).unwrap_err();
        assert!(err.to_string().contains("non-finite"));
        assert!(!json.exists());

        let yaml = dir.path().join("obsd.yaml");
        write_recordings(&yaml, &set).unwrap();
        let back = read_recordings(&yaml).unwrap();
        let data = &back.as_slice()[0].data;
        assert!(data[0].is_nan());
        assert_eq!(&data[1..], &[f64::INFINITY, f64::NEG_INFINITY, 1.5]);
        assert_eq!(back.as_slice()[1..], set.as_slice()[1..]);
    }

    #[test]
    fn test_catalog_written_into_new_directory() {
        let dir = TempDir::new().unwrap();
        let (_, cat) = scenario();

        let path = dir.path().join("meta").join("stations.yml");
        write_catalog(&path, &cat).unwrap();
        assert_eq!(read_catalog(&path).unwrap(), cat);
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = read_catalog("/nonexistent/stations.json").unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/stations.json"));
    }

    #[test]
    fn test_parse_error_names_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = read_recordings(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse JSON"));
    }
}
