//! Project manifest
//!
//! The root `main.md` lists the third-party packages generated code may use:
//!
//! ```text
//! ## Third-party Dependencies
//! - fastapi>=0.104.0  # web framework
//! - pydantic[email]~=2.5
//! - uvicorn - ASGI server
//! ```
//!
//! Bullets without a version map to `latest`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::Result;

static PACKAGE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[-*+]\s+`?([A-Za-z0-9_.@/-]+)(?:\[[^\]]*\])?`?\s*(?:([<>=~!^]+)\s*([0-9][0-9A-Za-z.*+-]*))?")
        .expect("valid package regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Runtime,
    Development,
}

fn section_for(heading: &str) -> Section {
    let title = heading
        .trim_start_matches('#')
        .trim()
        .trim_end_matches(':')
        .to_ascii_lowercase();
    match title.as_str() {
        "third-party dependencies" | "dependencies" | "dependencies to install" => {
            Section::Runtime
        }
        "development dependencies" | "dev dependencies" => Section::Development,
        _ => Section::None,
    }
}

/// Package constraints from `main.md`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub dependencies: BTreeMap<String, String>,
    pub dev_dependencies: BTreeMap<String, String>,
}

impl ProjectManifest {
    pub fn parse(text: &str) -> Self {
        let mut manifest = Self::default();
        let mut section = Section::None;
        let mut in_fence = false;

        for raw in text.lines() {
            let line = raw.trim();
            if line.starts_with("```") {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }

            if line.starts_with('#') {
                section = section_for(line);
                continue;
            }
            if line.ends_with(':') && !line.starts_with(['-', '*', '+']) {
                section = section_for(line);
                continue;
            }
            if section == Section::None {
                continue;
            }

            let Some(caps) = PACKAGE_LINE.captures(line) else {
                continue;
            };
            let Some(name) = caps.get(1).map(|m| m.as_str().to_string()) else {
                continue;
            };
            let constraint = match (caps.get(2), caps.get(3)) {
                (Some(op), Some(version)) => format!("{}{}", op.as_str(), version.as_str()),
                _ => "latest".to_string(),
            };

            let target = match section {
                Section::Development => &mut manifest.dev_dependencies,
                _ => &mut manifest.dependencies,
            };
            target.insert(name, constraint);
        }

        manifest
    }

    /// Empty when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            debug!(path = %path.display(), "No project manifest");
            return Ok(Self::default());
        }
        let manifest = Self::parse(&fs::read_to_string(path)?);
        debug!(
            path = %path.display(),
            dependencies = manifest.dependencies.len(),
            dev_dependencies = manifest.dev_dependencies.len(),
            "Project manifest loaded"
        );
        Ok(manifest)
    }

    /// Runtime and development packages together; runtime wins on conflict
    pub fn all_versions(&self) -> BTreeMap<String, String> {
        let mut all = self.dev_dependencies.clone();
        all.extend(self.dependencies.clone());
        all
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.dev_dependencies.is_empty()
    }
}
