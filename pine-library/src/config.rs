//! Simple configuration persistence for Red Pine
//!
//! Plain `key=value` lines, `#` comments. Unknown keys are ignored and
//! malformed values fall back to the default with a warning.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Extensions picked up by a bulk scan unless configured otherwise
pub const DEFAULT_EXTENSIONS: [&str; 6] = ["mp3", "wav", "flac", "ogg", "m4a", "aac"];

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Worker threads for bulk analysis
    pub max_threads: usize,
    /// Resample the analysed channel to this rate; None keeps the native rate
    pub resample_rate: Option<u32>,
    /// Wall-clock limit per file; None waits for every file
    pub time_budget: Option<Duration>,
    pub use_cache: bool,
    /// Lowercase, without the leading dot
    pub extensions: Vec<String>,
    pub cache_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_threads: 4,
            resample_rate: None,
            time_budget: None,
            use_cache: true,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            cache_path: Self::default_cache_path(),
        }
    }
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns default config if the file doesn't exist or can't be read.
    pub fn load() -> Self {
        let path = Self::config_path();
        Self::load_from(&path).unwrap_or_default()
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to the default location
    pub fn save(&self) -> io::Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, self.serialize())
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("red-pine")
            .join("config.txt")
    }

    /// Default location of the analysis cache database
    pub fn default_cache_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("red-pine")
            .join("analysis.db")
    }

    /// Parse config from simple key=value format
    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                warn!(line = line_no + 1, "config line without '=' ignored");
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            let applied = match key {
                "max_threads" => value
                    .parse::<usize>()
                    .ok()
                    .filter(|&n| n > 0)
                    .map(|n| config.max_threads = n),
                "resample_rate" => value
                    .parse::<u32>()
                    .ok()
                    .filter(|&r| r > 0)
                    .map(|r| config.resample_rate = Some(r)),
                "time_budget_ms" => value
                    .parse::<u64>()
                    .ok()
                    .filter(|&ms| ms > 0)
                    .map(|ms| config.time_budget = Some(Duration::from_millis(ms))),
                "use_cache" => parse_bool(value).map(|b| config.use_cache = b),
                "extensions" => {
                    let extensions = parse_extensions(value);
                    (!extensions.is_empty()).then(|| config.extensions = extensions)
                }
                "cache_path" => (!value.is_empty())
                    .then(|| config.cache_path = PathBuf::from(value)),
                _ => Some(()), // Ignore unknown keys
            };

            if applied.is_none() {
                warn!(key, value, line = line_no + 1, "malformed config value ignored");
            }
        }

        config
    }

    /// Serialize config to simple key=value format
    fn serialize(&self) -> String {
        let mut lines = vec![
            "# Red Pine Configuration".to_string(),
            format!("max_threads={}", self.max_threads),
        ];

        if let Some(rate) = self.resample_rate {
            lines.push(format!("resample_rate={}", rate));
        }
        if let Some(budget) = self.time_budget {
            lines.push(format!("time_budget_ms={}", budget.as_millis()));
        }
        lines.push(format!("use_cache={}", self.use_cache));
        lines.push(format!("extensions={}", self.extensions.join(",")));
        lines.push(format!("cache_path={}", self.cache_path.display()));

        lines.join("\n")
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn parse_extensions(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
