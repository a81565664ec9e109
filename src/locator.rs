//! Storage locations considered when bootstrapping a database

use std::path::PathBuf;

use crate::bootstrap::CandidateLocation;
use crate::config::DEFAULT_EXTENSION;

/// Supplies ranked candidate paths for a database
///
/// Implementations enumerate storage mounts; the core treats the output
/// as pure input and re-validates every path on each bootstrap.
pub trait StorageLocator: Send + Sync {
    /// Candidate locations for `name`, highest priority first
    fn list_candidates(&self, name: &str, expected_size: u64) -> Vec<CandidateLocation>;

    /// The bundled, read-only seed asset for `name`
    fn seed_path(&self, name: &str) -> PathBuf;

    /// Paths where earlier installations kept copies that must be removed
    fn obsolete_paths(&self, _name: &str) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Locator over a fixed, ordered list of directories
#[derive(Debug, Clone)]
pub struct DirectoryLocator {
    directories: Vec<PathBuf>,
    obsolete: Vec<PathBuf>,
    seed_dir: PathBuf,
    extension: String,
}

impl DirectoryLocator {
    pub fn new(directories: Vec<PathBuf>) -> Self {
        Self {
            directories,
            obsolete: Vec::new(),
            seed_dir: PathBuf::from("assets"),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    pub fn with_seed_dir(mut self, seed_dir: impl Into<PathBuf>) -> Self {
        self.seed_dir = seed_dir.into();
        self
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn with_obsolete(mut self, obsolete: Vec<PathBuf>) -> Self {
        self.obsolete = obsolete;
        self
    }

    pub fn file_name(&self, name: &str) -> String {
        format!("{}.{}", name, self.extension)
    }
}

impl StorageLocator for DirectoryLocator {
    fn list_candidates(&self, name: &str, expected_size: u64) -> Vec<CandidateLocation> {
        let file_name = self.file_name(name);
        let count = self.directories.len();
        self.directories
            .iter()
            .enumerate()
            .map(|(i, dir)| CandidateLocation {
                path: dir.join(&file_name),
                priority: (count - i) as i32,
                expected_size,
            })
            .collect()
    }

    fn seed_path(&self, name: &str) -> PathBuf {
        self.seed_dir.join(self.file_name(name))
    }

    /// Old releases stored `<dir>/<name>/<name>.<ext>`
    fn obsolete_paths(&self, name: &str) -> Vec<PathBuf> {
        let file_name = self.file_name(name);
        self.obsolete
            .iter()
            .map(|dir| dir.join(name).join(&file_name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_are_ranked_in_order() {
        let locator = DirectoryLocator::new(vec![PathBuf::from("/ext"), PathBuf::from("/int")]);
        let candidates = locator.list_candidates("dict", 1000);

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].path, PathBuf::from("/ext/dict.db"));
        assert_eq!(candidates[1].path, PathBuf::from("/int/dict.db"));
        assert!(candidates[0].priority > candidates[1].priority);
        assert!(candidates.iter().all(|c| c.expected_size == 1000));
    }

    #[test]
    fn test_extension_and_obsolete_paths() {
        let locator = DirectoryLocator::new(vec![PathBuf::from("/int")])
            .with_extension(".sqlite")
            .with_seed_dir("/app/www")
            .with_obsolete(vec![PathBuf::from("/mnt/sdcard")]);

        assert_eq!(locator.list_candidates("dict", 1)[0].path, PathBuf::from("/int/dict.sqlite"));
        assert_eq!(locator.seed_path("dict"), PathBuf::from("/app/www/dict.sqlite"));
        assert_eq!(locator.obsolete_paths("dict"), vec![PathBuf::from("/mnt/sdcard/dict/dict.sqlite")]);
    }
}
