//! Credentials for the remote issue tracker
//!
//! Secrets live apart from `config.toml` at `~/.config/shipwright/secrets.toml`
//! and must not be readable by group or others (0600 on Unix).
//!
//! Lookup order:
//! 1. `GITHUB_TOKEN` environment variable
//! 2. Secrets file

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result};

const SECRETS_TEMPLATE: &str = r#"# Shipwright secrets
# Keep this file out of version control and readable only by you (chmod 600).

[github]
# Token with Issues read/write on the tracked repository
token = ""
"#;

/// Secrets file contents
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Secrets {
    pub github: GitHubSecrets,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GitHubSecrets {
    pub token: Option<String>,
}

impl Secrets {
    /// Load from the default location, or empty secrets when there is no file
    pub fn load() -> Result<Self> {
        match Self::default_secrets_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from `path`, refusing files with loose permissions
    pub fn load_from_file(path: &Path) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mode = std::fs::metadata(path)?.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(Error::Config(format!(
                    "Secrets file {} has insecure permissions {:o}. Run: chmod 600 {}",
                    path.display(),
                    mode & 0o777,
                    path.display()
                )));
            }
        }

        let contents = std::fs::read_to_string(path)?;
        let mut secrets: Secrets = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse secrets: {}", e)))?;

        if let Some(token) = secrets.github.token.as_mut() {
            *token = token.trim().to_string();
        }

        Ok(secrets)
    }

    /// `~/.config/shipwright/secrets.toml`
    pub fn default_secrets_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("shipwright").join("secrets.toml"))
    }

    /// Token from the environment, falling back to the secrets file
    pub fn github_token(&self) -> Option<String> {
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            let token = token.trim().to_string();
            if !token.is_empty() {
                debug!("Using GitHub token from GITHUB_TOKEN");
                return Some(token);
            }
        }

        self.github
            .token
            .as_ref()
            .filter(|t| !t.is_empty())
            .cloned()
    }

    /// Write an empty secrets file with 0600 permissions at `path`
    pub fn create_template_at(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(Error::Config(format!(
                "Secrets file already exists at {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, SECRETS_TEMPLATE)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        warn!(path = %path.display(), "Created secrets template, add your token before using the remote tracker");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_secrets() {
        let secrets: Secrets = toml::from_str("[github]\ntoken = \"ghp_abc\"\n").unwrap();
        assert_eq!(secrets.github.token.as_deref(), Some("ghp_abc"));
    }

    #[cfg(unix)]
    #[test]
    fn test_insecure_permissions_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[github]\ntoken = \"test\"").unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = Secrets::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("insecure permissions"));
    }

    #[cfg(unix)]
    #[test]
    fn test_token_trimmed() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[github]\ntoken = \"  ghp_test \"").unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600)).unwrap();

        let secrets = Secrets::load_from_file(file.path()).unwrap();
        assert_eq!(secrets.github.token.as_deref(), Some("ghp_test"));
    }

    #[cfg(unix)]
    #[test]
    fn test_template_is_private_and_not_overwritten() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secrets.toml");
        Secrets::create_template_at(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(Secrets::create_template_at(&path).is_err());

        let loaded = Secrets::load_from_file(&path).unwrap();
        assert_eq!(loaded.github.token.as_deref(), Some(""));
    }
}
