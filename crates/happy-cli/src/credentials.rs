//! Loading `credentials.json` (§6.5). Enrollment itself is out of scope
//! (§1 non-goals); this module only reads what an already-enrolled
//! machine has persisted and fails loudly when nothing is there.

use happy_core::dirs::HappyHome;
use happy_core::model::Credentials;

use crate::error::{CliError, CliResult};

/// Load and parse `credentials.json` from `home`.
///
/// # Errors
///
/// Returns [`CliError::CredentialsMissing`] if the file does not exist,
/// or [`CliError::CredentialsCorrupt`] if it exists but fails to parse.
pub fn load(home: &HappyHome) -> CliResult<Credentials> {
    let path = home.credentials_path();
    let raw = std::fs::read_to_string(&path).map_err(|_| CliError::CredentialsMissing {
        path: path.display().to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| CliError::CredentialsCorrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reports_credentials_missing() {
        let dir = tempfile::tempdir().unwrap();
        let home = HappyHome::from_path(dir.path());
        let result = load(&home);
        assert!(matches!(result, Err(CliError::CredentialsMissing { .. })));
    }

    #[test]
    fn corrupt_file_reports_credentials_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let home = HappyHome::from_path(dir.path());
        home.ensure().unwrap();
        std::fs::write(home.credentials_path(), b"{not json").unwrap();
        let result = load(&home);
        assert!(matches!(result, Err(CliError::CredentialsCorrupt { .. })));
    }

    #[test]
    fn well_formed_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let home = HappyHome::from_path(dir.path());
        home.ensure().unwrap();
        let body = serde_json::json!({
            "token": "tok-1",
            "encryption": {"variant": "legacy", "key": [0u8; 32]},
        });
        std::fs::write(home.credentials_path(), serde_json::to_vec(&body).unwrap()).unwrap();
        let creds = load(&home).unwrap();
        assert_eq!(creds.token, "tok-1");
    }
}
