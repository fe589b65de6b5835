//! Exact blacklist partition owned by one shard.

use super::error::FilterError;
use crate::rendezvous::{ShardIdentity, select};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// The exact set of denied keys owned by a shard.
///
/// Immutable after loading, so handlers read it without synchronization.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    keys: HashSet<String>,
}

impl Blacklist {
    /// Build a blacklist holding every given key, without partitioning.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Read the shared blacklist source and keep this shard's partition.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Read`] if the source cannot be read. A shard
    /// must not start with a missing blacklist.
    pub fn load_partition(
        path: &Path,
        shards: &[ShardIdentity],
        own_index: usize,
    ) -> Result<Self, FilterError> {
        let contents = fs::read_to_string(path).map_err(|source| FilterError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let blacklist = Self::parse_partition(&contents, shards, own_index);
        info!(
            "Loaded {} blacklist entries for shard {} from {:?}",
            blacklist.len(),
            own_index,
            path
        );
        Ok(blacklist)
    }

    /// Parse a line-oriented blacklist and keep the lines owned by `own_index`.
    ///
    /// Line terminators are stripped and blank lines are skipped; everything
    /// else on the line, including inner whitespace, is part of the key.
    pub fn parse_partition(contents: &str, shards: &[ShardIdentity], own_index: usize) -> Self {
        let mut keys = HashSet::new();
        for line in contents.lines() {
            if line.is_empty() {
                continue;
            }
            if select(line, shards) == own_index {
                debug!("Blacklisting '{}'", line);
                keys.insert(line.to_string());
            }
        }
        Self { keys }
    }

    /// Exact membership test.
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Iterate over the owned keys.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Number of owned keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when this shard owns no blacklist entries.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shards() -> Vec<ShardIdentity> {
        (1..=5)
            .map(|i| ShardIdentity::new(format!("shard-{}", i), 9000 + i as u16))
            .collect()
    }

    const SOURCE: &str = "secret.txt\nclassified.doc\r\n\nplans.pdf\nsalaries.csv\nhello world.txt\n";

    #[test]
    fn test_partitions_are_disjoint_and_complete() {
        let shards = shards();
        let partitions: Vec<Blacklist> = (0..shards.len())
            .map(|i| Blacklist::parse_partition(SOURCE, &shards, i))
            .collect();

        let total: usize = partitions.iter().map(Blacklist::len).sum();
        assert_eq!(total, 5);

        for key in ["secret.txt", "classified.doc", "plans.pdf", "salaries.csv", "hello world.txt"] {
            let owners: Vec<usize> = partitions
                .iter()
                .enumerate()
                .filter(|(_, p)| p.contains(key))
                .map(|(i, _)| i)
                .collect();
            assert_eq!(owners, vec![select(key, &shards)], "owner mismatch for {}", key);
        }
    }

    #[test]
    fn test_line_terminators_stripped() {
        let shards = shards();
        let owner = select("classified.doc", &shards);
        let partition = Blacklist::parse_partition(SOURCE, &shards, owner);
        assert!(partition.contains("classified.doc"));
        assert!(!partition.iter().any(|k| k.ends_with('\r')));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let shards = shards();
        let owner = select("", &shards);
        let partition = Blacklist::parse_partition("\n\n\n", &shards, owner);
        assert!(partition.is_empty());
    }

    #[test]
    fn test_load_partition_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklisted.txt");
        fs::write(&path, SOURCE).unwrap();

        let shards = shards();
        let owner = select("secret.txt", &shards);
        let partition = Blacklist::load_partition(&path, &shards, owner).unwrap();
        assert!(partition.contains("secret.txt"));
    }

    #[test]
    fn test_missing_source_is_error() {
        let result = Blacklist::load_partition(Path::new("/nonexistent/blacklisted.txt"), &shards(), 0);
        assert!(matches!(result, Err(FilterError::Read { .. })));
    }

    #[test]
    fn test_from_keys() {
        let blacklist = Blacklist::from_keys(["a", "b"]);
        assert_eq!(blacklist.len(), 2);
        assert!(blacklist.contains("a"));
        assert!(!blacklist.contains("c"));
    }
}
