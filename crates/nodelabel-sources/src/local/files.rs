//! Feature-file directory reader.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nodelabel_types::DiscoveryError;
use tracing::{debug, error};

use super::parser::{ParsedFeatures, parse_features};

/// Feature files larger than this are skipped.
pub const MAX_FEATURE_FILE_SIZE: u64 = 64 * 1024;

/// Read every feature file in `dir`, in file-name order.
///
/// Later files overwrite earlier ones on key collisions.  Unreadable and
/// oversized files are logged and skipped; a missing directory yields an
/// empty result.
pub fn read_feature_files(dir: &Path, now: DateTime<Utc>) -> ParsedFeatures {
    let mut parsed = ParsedFeatures::default();
    let files = match list_dir(dir) {
        Ok(files) => files,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "feature file directory not readable");
            return parsed;
        }
    };

    for path in files {
        let origin = path.display().to_string();
        match read_feature_file(&path) {
            Ok(content) => {
                debug!(file = %origin, "processing feature file");
                parsed.absorb(parse_features(content.lines(), &origin, now), &origin);
            }
            Err(e) => error!(file = %origin, error = %e, "skipping feature file"),
        }
    }
    parsed
}

fn read_feature_file(path: &Path) -> Result<String, DiscoveryError> {
    let meta = fs::metadata(path)
        .map_err(|e| DiscoveryError::Io(format!("stat {}: {e}", path.display())))?;
    if meta.len() > MAX_FEATURE_FILE_SIZE {
        return Err(DiscoveryError::source(
            super::NAME,
            format!(
                "file size {} exceeds limit of {MAX_FEATURE_FILE_SIZE} bytes",
                meta.len()
            ),
        ));
    }
    fs::read_to_string(path).map_err(|e| DiscoveryError::Io(format!("read {}: {e}", path.display())))
}

/// Regular, non-hidden entries of `dir`, sorted by file name.
pub(crate) fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| DiscoveryError::Io(format!("read_dir {}: {e}", dir.display())))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn files_are_merged_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "20-second", "shared=second\nb=1\n");
        write(dir.path(), "10-first", "shared=first\na=1\n");

        let parsed = read_feature_files(dir.path(), Utc::now());
        let expected: BTreeMap<String, String> = [("a", "1"), ("b", "1"), ("shared", "second")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(parsed.labels, expected);
    }

    #[test]
    fn hidden_files_and_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".swap", "hidden=1\n");
        fs::create_dir(dir.path().join("nested")).unwrap();
        write(dir.path(), "visible", "shown=1\n");

        let parsed = read_feature_files(dir.path(), Utc::now());
        assert_eq!(parsed.labels.len(), 1);
        assert!(parsed.labels.contains_key("shown"));
    }

    #[test]
    fn oversized_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let big = "x=1\n".repeat((MAX_FEATURE_FILE_SIZE as usize / 4) + 1);
        write(dir.path(), "big", &big);
        write(dir.path(), "small", "ok=1\n");

        let parsed = read_feature_files(dir.path(), Utc::now());
        assert_eq!(parsed.labels.keys().collect::<Vec<_>>(), vec!["ok"]);
    }

    #[test]
    fn missing_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = read_feature_files(&dir.path().join("absent"), Utc::now());
        assert_eq!(parsed, ParsedFeatures::default());
    }
}
