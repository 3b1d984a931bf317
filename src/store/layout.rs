use crate::config::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Where every durable artifact of a deployment lives.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    tmp_dir: PathBuf,
    dist_dir: PathBuf,
}

impl StoreLayout {
    pub fn new(tmp_dir: impl Into<PathBuf>, dist_dir: impl Into<PathBuf>) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
            dist_dir: dist_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.tmp_dir, &config.dist_dir)
    }

    pub fn merged_file(&self) -> PathBuf {
        self.tmp_dir.join("merged_rules_temp.txt")
    }

    /// Candidate list of a shard, numbered from 1.
    pub fn part_file(&self, part: usize) -> PathBuf {
        self.tmp_dir.join(format!("part_{part:02}.txt"))
    }

    pub fn published_file(&self, part: usize) -> PathBuf {
        self.dist_dir.join(format!("validated_part_{part}.txt"))
    }

    pub fn delete_counter_file(&self) -> PathBuf {
        self.dist_dir.join("delete_counter.bin")
    }

    pub fn not_written_file(&self) -> PathBuf {
        self.dist_dir.join("not_written_counter.bin")
    }

    pub fn retry_file(&self) -> PathBuf {
        self.dist_dir.join("retry_rules.txt")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.tmp_dir, &self.dist_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }
}
