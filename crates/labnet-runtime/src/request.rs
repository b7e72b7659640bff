//! Deploy request model and input validation.

use std::collections::BTreeMap;

use labnet_common::error::{LabError, Result};
use serde::{Deserialize, Serialize};

/// What the caller asks to run.
///
/// Everything except the image is optional; the name defaults to
/// `lab-container-<unix-ts>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployRequest {
    /// Image reference.
    pub image: String,
    /// Container name.
    pub name: Option<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Bind mounts, host path to container path.
    pub volumes: BTreeMap<String, String>,
    /// Command override.
    pub command: Option<Vec<String>>,
}

impl DeployRequest {
    /// Starts a request for `image`.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Sets the container name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.env.insert(key.into(), value.into());
        self
    }

    /// Adds a bind mount.
    #[must_use]
    pub fn volume(mut self, host: impl Into<String>, container: impl Into<String>) -> Self {
        let _ = self.volumes.insert(host.into(), container.into());
        self
    }

    /// Overrides the image command.
    #[must_use]
    pub fn command(mut self, command: Vec<String>) -> Self {
        self.command = Some(command);
        self
    }

    /// Checks the request without touching any shared state.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Validation`] for an empty image, an image that
    /// would be read as a runtime option, a malformed name, an empty or `=`-containing env key, an empty volume path, or
    /// an empty command.
    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(LabError::validation("missing 'image' field"));
        }
        if self.image.chars().any(char::is_whitespace) {
            return Err(LabError::validation(format!(
                "image reference '{}' contains whitespace",
                self.image
            )));
        }
        if self.image.starts_with('-') {
            return Err(LabError::validation(format!(
                "image reference '{}' must not start with '-'",
                self.image
            )));
        }
        if let Some(name) = &self.name {
            if !is_valid_name(name) {
                return Err(LabError::validation(format!(
                    "invalid container name '{name}': use [a-zA-Z0-9][a-zA-Z0-9_.-]*"
                )));
            }
        }
        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(LabError::validation(format!(
                    "invalid environment variable name '{key}'"
                )));
            }
        }
        for (host, container) in &self.volumes {
            if host.trim().is_empty() || container.trim().is_empty() {
                return Err(LabError::validation(format!(
                    "invalid volume mapping '{host}:{container}'"
                )));
            }
        }
        if self.command.as_ref().is_some_and(Vec::is_empty) {
            return Err(LabError::validation("command override must not be empty"));
        }
        Ok(())
    }
}

/// Returns whether `name` is acceptable to the runtime as a container
/// name (`[a-zA-Z0-9][a-zA-Z0-9_.-]*`).
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Parses a `KEY=VALUE` pair.
///
/// # Errors
///
/// Returns [`LabError::Validation`] if there is no `=` or the key is empty.
pub fn parse_env_pair(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(LabError::validation(format!(
            "expected KEY=VALUE, got '{raw}'"
        ))),
    }
}

/// Parses a `HOST:CONTAINER[:MODE]` volume mapping.
///
/// # Errors
///
/// Returns [`LabError::Validation`] if either side is missing.
pub fn parse_volume(raw: &str) -> Result<(String, String)> {
    match raw.split_once(':') {
        Some((host, container)) if !host.is_empty() && !container.is_empty() => {
            Ok((host.to_string(), container.to_string()))
        }
        _ => Err(LabError::validation(format!(
            "expected HOST:CONTAINER, got '{raw}'"
        ))),
    }
}
