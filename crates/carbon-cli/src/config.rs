//! YAML run configuration.
//!
//! Every section and field is optional. Command-line flags are applied on top
//! of the file, then `~` and `$VAR` / `${VAR}` are expanded in every path.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use carbon_core::{AggregationMethod, RunOptions};
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub inputs: InputsConfig,
    pub outputs: OutputsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub country: String,
    pub method: AggregationMethod,
    pub force_wetland_overrides: bool,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InputsConfig {
    pub lulc: Option<PathBuf>,
    pub carbon_zones: Option<PathBuf>,
    pub boundary: Option<PathBuf>,
    pub crosswalk: Option<PathBuf>,
    pub coeff_lookup: Option<PathBuf>,
    pub expert_rules: Option<PathBuf>,
    pub class_overrides: Option<PathBuf>,
}

/// Output file names are relative to `folder` unless absolute.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputsConfig {
    pub folder: PathBuf,
    pub table: PathBuf,
    pub geojson: PathBuf,
    pub density: PathBuf,
    pub overlay: PathBuf,
    pub class_table: PathBuf,
}

impl Default for OutputsConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("outputs"),
            table: PathBuf::from("carbon_results.csv"),
            geojson: PathBuf::from("carbon_zones.geojson"),
            density: PathBuf::from("carbon_density.tif"),
            overlay: PathBuf::from("carbon_overlay.csv"),
            class_table: PathBuf::from("carbon_pools.csv"),
        }
    }
}

impl OutputsConfig {
    pub fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.folder.join(file)
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Cannot read config {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            country: self.project.country.clone(),
            method: self.project.method,
            force_wetland_overrides: self.project.force_wetland_overrides,
        }
    }

    /// Expand `~` and environment variables in every configured path.
    pub fn expand_paths(&mut self) {
        let expand_opt = |p: &mut Option<PathBuf>| {
            if let Some(path) = p.as_mut() {
                *path = expand_path(path);
            }
        };
        let i = &mut self.inputs;
        for p in [
            &mut i.lulc,
            &mut i.carbon_zones,
            &mut i.boundary,
            &mut i.crosswalk,
            &mut i.coeff_lookup,
            &mut i.expert_rules,
            &mut i.class_overrides,
        ] {
            expand_opt(p);
        }
        let o = &mut self.outputs;
        for p in [&mut o.folder, &mut o.table, &mut o.geojson, &mut o.density, &mut o.overlay, &mut o.class_table] {
            *p = expand_path(p);
        }
    }
}

pub fn expand_path(path: &Path) -> PathBuf {
    let home = std::env::var("HOME").ok();
    PathBuf::from(expand_with(&path.to_string_lossy(), home.as_deref(), |name| std::env::var(name).ok()))
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references. Unknown variables
/// are left as written.
fn expand_with(raw: &str, home: Option<&str>, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut s = raw.to_string();
    if let Some(h) = home {
        if s == "~" {
            s = h.to_string();
        } else if let Some(rest) = s.strip_prefix("~/") {
            s = format!("{h}/{rest}");
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let closed = braced && chars.peek() == Some(&'}');
        if closed {
            chars.next();
        }
        match lookup(&name) {
            Some(v) if !name.is_empty() && (closed || !braced) => out.push_str(&v),
            _ => {
                out.push('$');
                if braced {
                    out.push('{');
                }
                out.push_str(&name);
                if closed {
                    out.push('}');
                }
            }
        }
    }
    out
}
