//! Artifact persistence

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ForgeError, Result};
use crate::graph::BlueprintNode;
use crate::language::Language;

/// Stores accepted artifacts
pub trait ArtifactWriter: Send + Sync {
    /// Persist `artifact` for `node`, returning where it went
    fn write(&self, node: &BlueprintNode, artifact: &str) -> Result<PathBuf>;
}

/// Writes next to the blueprint, or mirrors module paths under an output dir.
///
/// Existing files are left alone unless overwriting is enabled. Python output
/// gets an empty `__init__.py` in every package directory below the base dir.
#[derive(Debug, Clone)]
pub struct FsArtifactWriter {
    root: PathBuf,
    output_dir: Option<PathBuf>,
    language: Language,
    overwrite: bool,
}

impl FsArtifactWriter {
    pub fn new(root: impl Into<PathBuf>, language: Language) -> Self {
        Self {
            root: root.into(),
            output_dir: None,
            language,
            overwrite: false,
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Output dir when set, else the project root
    fn base_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.root)
    }

    /// Empty `__init__.py` in each directory between the base dir and `file`
    fn ensure_init_files(&self, file: &Path) -> Result<Vec<PathBuf>> {
        let base = self.base_dir();
        let mut created = Vec::new();
        let mut dir = file.parent();
        while let Some(current) = dir {
            if current == base || !current.starts_with(base) {
                break;
            }
            let init = current.join("__init__.py");
            if !init.exists() {
                fs::write(&init, "")?;
                created.push(init);
            }
            dir = current.parent();
        }
        Ok(created)
    }

    /// Destination for a node's artifact
    pub fn target_path(&self, node: &BlueprintNode) -> PathBuf {
        let ext = self.language.extension();
        match &self.output_dir {
            Some(dir) => {
                let mut path = dir.clone();
                let segments: Vec<&str> = node.module_id.segments().collect();
                if let Some((last, parents)) = segments.split_last() {
                    for segment in parents {
                        path.push(segment);
                    }
                    path.push(format!("{}.{}", last, ext));
                }
                path
            }
            None => self.root.join(&node.source_path).with_extension(ext),
        }
    }
}

impl ArtifactWriter for FsArtifactWriter {
    fn write(&self, node: &BlueprintNode, artifact: &str) -> Result<PathBuf> {
        let path = self.target_path(node);
        if path.exists() && !self.overwrite {
            return Err(ForgeError::OutputExists(path));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, artifact)?;
        debug!(module = %node.module_id, path = %path.display(), "Artifact written");

        if self.language == Language::Python {
            for init in self.ensure_init_files(&path)? {
                debug!(path = %init.display(), "Package marker created");
            }
        }
        Ok(path)
    }
}

/// Relative form of `path` under `root`, for display
pub fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
