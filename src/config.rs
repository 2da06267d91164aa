//! Environment-driven configuration. Every knob has a default so the binary
//! works without any setup; keys only unlock higher upstream rate limits.

use std::path::PathBuf;

use crate::error::MedlitError;

pub const NCBI_API_KEY_ENV: &str = "MEDLIT_NCBI_API_KEY";
pub const CONTACT_EMAIL_ENV: &str = "MEDLIT_CONTACT_EMAIL";
pub const DATA_DIR_ENV: &str = "MEDLIT_DATA_DIR";

const DEFAULT_CONTACT_EMAIL: &str = "medlit@example.com";

fn non_empty(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// NCBI E-utilities API key. Optional; raises the esearch quota from 3 to
/// 10 requests/second when present.
pub fn ncbi_api_key() -> Option<String> {
    non_empty(NCBI_API_KEY_ENV)
}

/// Contact email sent to providers that request one (Unpaywall, Crossref).
pub fn contact_email() -> String {
    non_empty(CONTACT_EMAIL_ENV).unwrap_or_else(|| DEFAULT_CONTACT_EMAIL.to_string())
}

/// Directory for downloaded fulltext and the HTTP cache.
pub fn data_dir() -> Result<PathBuf, MedlitError> {
    if let Some(dir) = non_empty(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|d| d.join("medlit"))
        .ok_or_else(|| {
            MedlitError::Config(format!(
                "Cannot determine a data directory; set {DATA_DIR_ENV}"
            ))
        })
}

/// Global pipeline scope root (user-home config directory).
pub fn global_config_dir() -> Result<PathBuf, MedlitError> {
    dirs::config_dir()
        .map(|d| d.join("medlit"))
        .ok_or_else(|| {
            MedlitError::Config("Cannot determine a user config directory".into())
        })
}

/// Workspace pipeline scope root (per-project directory).
pub fn workspace_config_dir() -> PathBuf {
    PathBuf::from(".medlit")
}
