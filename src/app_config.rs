//! Optional config file with run defaults.
//!
//! The file is a flat list of `key = value` lines (TOML subset): strings
//! are double-quoted, numbers are bare, `#` starts a comment. Values here
//! are defaults only; CLI flags override them.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// File configuration for harvester defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Site root, e.g. `https://example.com`.
    pub base_url: Option<String>,
    /// Default output directory for artifacts, snapshots and export.
    pub output_dir: Option<PathBuf>,
    pub short_delay_min_ms: Option<u64>,
    pub short_delay_max_ms: Option<u64>,
    /// Completed items between cooldowns (0 disables).
    pub cooldown_every: Option<u32>,
    pub cooldown_min_secs: Option<u64>,
    pub cooldown_max_secs: Option<u64>,
    pub gate_timeout_secs: Option<u64>,
    pub artifact_timeout_secs: Option<u64>,
    /// Artifact file extension without the dot.
    pub artifact_extension: Option<String>,
}

impl FileConfig {
    /// Validates config values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.short_delay_min_ms, self.short_delay_max_ms)
            && min > max
        {
            bail!(
                "Invalid config: `short_delay_min_ms` ({min}) is greater than `short_delay_max_ms` ({max})"
            );
        }
        if let (Some(min), Some(max)) = (self.cooldown_min_secs, self.cooldown_max_secs)
            && min > max
        {
            bail!(
                "Invalid config: `cooldown_min_secs` ({min}) is greater than `cooldown_max_secs` ({max})"
            );
        }
        validate_range("short_delay_min_ms", self.short_delay_min_ms, 0..=600_000)?;
        validate_range("short_delay_max_ms", self.short_delay_max_ms, 0..=600_000)?;
        validate_range("cooldown_min_secs", self.cooldown_min_secs, 0..=3600)?;
        validate_range("cooldown_max_secs", self.cooldown_max_secs, 0..=3600)?;
        validate_range("gate_timeout_secs", self.gate_timeout_secs, 1..=600)?;
        validate_range("artifact_timeout_secs", self.artifact_timeout_secs, 1..=600)?;

        if let Some(ext) = &self.artifact_extension
            && (ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            bail!(
                "Invalid config value for `artifact_extension`: '{ext}'. Expected letters and digits only"
            );
        }
        Ok(())
    }
}

fn validate_range(
    field: &str,
    value: Option<u64>,
    range: std::ops::RangeInclusive<u64>,
) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !range.contains(&value) {
        bail!(
            "Invalid config value for `{field}`: {value}. Expected range: {}..={}",
            range.start(),
            range.end()
        );
    }
    Ok(())
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/harvester/config.toml`
/// 2. `$HOME/.config/harvester/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("harvester")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("harvester")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist. Without one, the default path is used if a
/// file is there, and an empty config is returned otherwise.
pub fn load_config(explicit: Option<&Path>) -> Result<FileConfig> {
    if let Some(path) = explicit {
        return load_file_config(path);
    }

    match resolve_default_config_path() {
        Some(path) if path.exists() => load_file_config(&path),
        _ => Ok(FileConfig::default()),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_number = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_number}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_number}");

        match key {
            "base_url" => cfg.base_url = Some(parse_string_literal(value).with_context(invalid)?),
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "artifact_extension" => {
                cfg.artifact_extension = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "short_delay_min_ms" => {
                cfg.short_delay_min_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "short_delay_max_ms" => {
                cfg.short_delay_max_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "cooldown_every" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.cooldown_every = Some(
                    u32::try_from(parsed)
                        .map_err(|_| anyhow::anyhow!("cooldown_every out of range for u32"))
                        .with_context(invalid)?,
                );
            }
            "cooldown_min_secs" => {
                cfg.cooldown_min_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "cooldown_max_secs" => {
                cfg.cooldown_max_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "gate_timeout_secs" => {
                cfg.gate_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "artifact_timeout_secs" => {
                cfg.artifact_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_number}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}
