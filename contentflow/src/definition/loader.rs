//! Loading pipeline definitions from a directory of JSON or YAML files.

use super::PipelineDefinition;
use crate::errors::DefinitionError;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Supported definition file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    /// `.json`
    Json,
    /// `.yaml` or `.yml`
    Yaml,
}

impl DefinitionFormat {
    /// Detects the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Outcome of loading one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    /// A definition was loaded.
    Loaded {
        /// The pipeline id.
        id: String,
        /// The source file.
        path: PathBuf,
    },
    /// A file failed to read, parse, or validate.
    Error {
        /// The source file.
        path: PathBuf,
        /// What went wrong.
        error: String,
    },
}

/// A parsed and validated definition together with its raw source bytes.
#[derive(Debug, Clone)]
pub struct LoadedDefinition {
    /// The definition.
    pub definition: PipelineDefinition,
    /// The file it came from.
    pub path: PathBuf,
    /// Raw file contents.
    pub source: Vec<u8>,
}

/// Parses definition text in the given format.
///
/// # Errors
///
/// Returns [`DefinitionError::Parse`] on malformed input.
pub fn parse_definition(
    content: &str,
    format: DefinitionFormat,
    path: &Path,
) -> Result<PipelineDefinition, DefinitionError> {
    let parse_error = |message: String| DefinitionError::Parse {
        path: path.to_path_buf(),
        message,
    };
    match format {
        DefinitionFormat::Json => {
            serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))
        }
        DefinitionFormat::Yaml => serde_yml::from_str(content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Reads, parses, and validates a single definition file.
///
/// # Errors
///
/// Returns a [`DefinitionError`] if the file has an unsupported extension,
/// cannot be read, does not parse, or fails validation.
pub fn load_file(path: &Path) -> Result<LoadedDefinition, DefinitionError> {
    let format = DefinitionFormat::from_path(path)
        .ok_or_else(|| DefinitionError::UnsupportedFormat(path.to_path_buf()))?;
    debug!(path = %path.display(), "Loading pipeline definition");

    let source = std::fs::read(path).map_err(|source| DefinitionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let content = String::from_utf8_lossy(&source);
    let definition = parse_definition(&content, format, path)?;
    definition.validate()?;

    Ok(LoadedDefinition {
        definition,
        path: path.to_path_buf(),
        source,
    })
}

/// Loads every definition file in a directory.
///
/// Files are visited in name order. Invalid files are reported as
/// [`LoadEvent::Error`] and do not prevent the others from loading.
/// Returns the loaded definitions and one event per visited file.
#[must_use]
pub fn load_dir(dir: &Path) -> (Vec<LoadedDefinition>, Vec<LoadEvent>) {
    let mut loaded = Vec::new();
    let mut events = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "Failed to read pipeline directory");
            return (loaded, events);
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && DefinitionFormat::from_path(path).is_some())
        .collect();
    paths.sort();

    for path in paths {
        match load_file(&path) {
            Ok(definition) => {
                events.push(LoadEvent::Loaded {
                    id: definition.definition.id.clone(),
                    path,
                });
                loaded.push(definition);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping invalid pipeline definition");
                events.push(LoadEvent::Error {
                    path,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(count = loaded.len(), dir = %dir.display(), "Loaded pipeline definitions");
    (loaded, events)
}
