//! Settings shared by every session.

use std::path::{Path, PathBuf};

use crate::{ProfileError, Result};

/// Directory the profile files are written to.
pub const ENV_OUTPUT_DIR: &str = "PROF_OUTPUT_DIR";
/// CPU sampling frequency in Hz.
pub const ENV_CPU_FREQ: &str = "PROF_CPU_FREQ";
/// Blocking-profile sampling rate; 1 records every event, 0 disables.
pub const ENV_BLOCK_RATE: &str = "PROF_BLOCK_RATE";
/// Prefix of the label generated when a session is started without a name.
pub const ENV_LABEL_PREFIX: &str = "PROF_LABEL_PREFIX";

pub const DEFAULT_OUTPUT_DIR: &str = ".";
pub const DEFAULT_CPU_FREQ: i32 = 100;
pub const DEFAULT_BLOCK_RATE: u64 = 1;
pub const DEFAULT_LABEL_PREFIX: &str = "prof";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerConfig {
    output_dir: PathBuf,
    cpu_frequency: i32,
    block_rate: u64,
    label_prefix: String,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            cpu_frequency: DEFAULT_CPU_FREQ,
            block_rate: DEFAULT_BLOCK_RATE,
            label_prefix: DEFAULT_LABEL_PREFIX.to_string(),
        }
    }
}

impl ProfilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the `PROF_*` environment variables, keeping defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_CPU_FREQ) {
            config.cpu_frequency = match value.trim().parse::<i32>() {
                Ok(freq) if freq > 0 => freq,
                _ => {
                    return Err(ProfileError::Config {
                        var: ENV_CPU_FREQ,
                        value,
                    });
                }
            };
        }
        if let Some(value) = lookup(ENV_BLOCK_RATE) {
            config.block_rate = value.trim().parse().map_err(|_| ProfileError::Config {
                var: ENV_BLOCK_RATE,
                value: value.clone(),
            })?;
        }
        if let Some(prefix) = lookup(ENV_LABEL_PREFIX) {
            if !prefix.is_empty() {
                config.label_prefix = prefix;
            }
        }

        Ok(config)
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn cpu_frequency(mut self, frequency: i32) -> Self {
        self.cpu_frequency = frequency;
        self
    }

    pub fn block_rate(mut self, rate: u64) -> Self {
        self.block_rate = rate;
        self
    }

    pub fn label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.label_prefix = prefix.into();
        self
    }

    pub fn get_output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn get_cpu_frequency(&self) -> i32 {
        self.cpu_frequency
    }

    pub fn get_block_rate(&self) -> u64 {
        self.block_rate
    }

    pub fn get_label_prefix(&self) -> &str {
        &self.label_prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ProfilerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ProfilerConfig::default());
        assert_eq!(config.get_cpu_frequency(), 100);
        assert_eq!(config.get_block_rate(), 1);
        assert_eq!(config.get_label_prefix(), "prof");
    }

    #[test]
    fn test_reads_all_variables() {
        let config = ProfilerConfig::from_lookup(lookup(&[
            (ENV_OUTPUT_DIR, "/tmp/profiles"),
            (ENV_CPU_FREQ, "250"),
            (ENV_BLOCK_RATE, "1000"),
            (ENV_LABEL_PREFIX, "bench"),
        ]))
        .unwrap();

        assert_eq!(config.get_output_dir(), Path::new("/tmp/profiles"));
        assert_eq!(config.get_cpu_frequency(), 250);
        assert_eq!(config.get_block_rate(), 1000);
        assert_eq!(config.get_label_prefix(), "bench");
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let err = ProfilerConfig::from_lookup(lookup(&[(ENV_CPU_FREQ, "fast")])).unwrap_err();
        assert!(matches!(err, ProfileError::Config { var: ENV_CPU_FREQ, .. }));

        let err = ProfilerConfig::from_lookup(lookup(&[(ENV_CPU_FREQ, "0")])).unwrap_err();
        assert!(matches!(err, ProfileError::Config { var: ENV_CPU_FREQ, .. }));

        let err = ProfilerConfig::from_lookup(lookup(&[(ENV_BLOCK_RATE, "-1")])).unwrap_err();
        assert!(matches!(err, ProfileError::Config { var: ENV_BLOCK_RATE, .. }));
    }

    #[test]
    fn test_empty_prefix_keeps_default() {
        let config = ProfilerConfig::from_lookup(lookup(&[(ENV_LABEL_PREFIX, "")])).unwrap();
        assert_eq!(config.get_label_prefix(), DEFAULT_LABEL_PREFIX);
    }
}
