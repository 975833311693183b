//! Cloud-init user-data templates for newly created testers.
//!
//! A template is a plain script carrying `__NAME__` placeholders. Each tester
//! gets its own copy with the API token, repository, backend and region filled
//! in, so the script can install and start the monitor on first boot.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::config::expand_tilde;

/// Template read when no path is given.
pub const DEFAULT_TEMPLATE_PATH: &str = "cloud-init.sh";

/// Errors raised while loading a user-data template.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum CloudInitError {
    /// Raised when the configured path is empty or only whitespace.
    #[error("cloud-init template path must not be empty")]
    PathEmpty,
    /// Raised when reading the template fails.
    #[error("failed to read cloud-init template `{path}`: {message}")]
    Read {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the template is empty or only whitespace.
    #[error("cloud-init template `{path}` is empty")]
    Empty {
        /// Expanded path of the template.
        path: String,
    },
}

/// Values substituted into a template for one tester.
#[derive(Clone, Copy, Debug)]
pub struct Placeholders<'a> {
    /// Replaces `__HETZNER_API_TOKEN__`.
    pub api_token: &'a str,
    /// Replaces `__GIT_REPO_URL__`.
    pub git_repo_url: &'a str,
    /// Replaces `__BACKEND_API_URL__`.
    pub backend_url: &'a str,
    /// Replaces `__BACKEND_API_KEY__`.
    pub backend_key: &'a str,
    /// Replaces `__REGION__`.
    pub region: &'a str,
}

/// Loaded user-data template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Template {
    body: String,
}

impl Template {
    /// Wraps an in-memory template.
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    /// Reads a template from `path`, expanding a leading `~/`.
    ///
    /// Relative paths resolve against the current directory.
    ///
    /// # Errors
    ///
    /// Returns [`CloudInitError`] when the path is blank, the file cannot be
    /// read, or it holds only whitespace.
    pub fn load(path: &str) -> Result<Self, CloudInitError> {
        if path.trim().is_empty() {
            return Err(CloudInitError::PathEmpty);
        }
        let expanded = expand_tilde(path.trim());
        let body = read_to_string_ambient(&expanded).map_err(|message| CloudInitError::Read {
            path: expanded.clone(),
            message,
        })?;
        if body.trim().is_empty() {
            return Err(CloudInitError::Empty { path: expanded });
        }
        Ok(Self { body })
    }

    /// Returns the template with every placeholder occurrence replaced.
    #[must_use]
    pub fn render(&self, values: &Placeholders<'_>) -> String {
        self.body
            .replace("__HETZNER_API_TOKEN__", values.api_token)
            .replace("__GIT_REPO_URL__", values.git_repo_url)
            .replace("__BACKEND_API_URL__", values.backend_url)
            .replace("__BACKEND_API_KEY__", values.backend_key)
            .replace("__REGION__", values.region)
    }
}

fn read_to_string_ambient(path: &str) -> Result<String, String> {
    let target = Utf8Path::new(path);
    let (dir_path, file_name) = match (target.parent(), target.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => (parent, name),
        (_, Some(name)) => (Utf8Path::new("."), name),
        (_, None) => return Err(format!("path has no file name: {target}")),
    };
    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_name).map_err(|err| err.to_string())
}
