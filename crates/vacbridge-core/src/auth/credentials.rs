//! File-backed storage for the two credential records.
//!
//! Pure I/O: records are written and read back verbatim, with no opinion
//! on whether a token is still usable.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{CredentialRecord, OAuthToken, PrimaryToken, TokenKind};

#[derive(Debug, Clone)]
pub struct CredentialStore {
    primary_path: PathBuf,
    oauth_path: PathBuf,
}

impl CredentialStore {
    pub fn new(primary_path: PathBuf, oauth_path: PathBuf) -> Self {
        Self {
            primary_path,
            oauth_path,
        }
    }

    pub fn path(&self, kind: TokenKind) -> &Path {
        match kind {
            TokenKind::Primary => &self.primary_path,
            TokenKind::OAuth => &self.oauth_path,
        }
    }

    /// Load a record. `Ok(None)` when nothing is stored, `Err(Io)` when the
    /// file exists but cannot be read or parsed.
    pub fn load(&self, kind: TokenKind) -> Result<Option<CredentialRecord>> {
        Ok(match kind {
            TokenKind::Primary => self.load_primary()?.map(CredentialRecord::Primary),
            TokenKind::OAuth => self.load_oauth()?.map(CredentialRecord::OAuth),
        })
    }

    pub fn load_primary(&self) -> Result<Option<PrimaryToken>> {
        read_json(&self.primary_path)
    }

    pub fn load_oauth(&self) -> Result<Option<OAuthToken>> {
        read_json(&self.oauth_path)
    }

    pub fn save(&self, record: &CredentialRecord) -> Result<()> {
        match record {
            CredentialRecord::Primary(token) => self.save_primary(token),
            CredentialRecord::OAuth(token) => self.save_oauth(token),
        }
    }

    pub fn save_primary(&self, token: &PrimaryToken) -> Result<()> {
        write_json(&self.primary_path, token)
    }

    pub fn save_oauth(&self, token: &OAuthToken) -> Result<()> {
        write_json(&self.oauth_path, token)
    }

    /// Remove a record. Clearing something that is not there is not an error.
    pub fn clear(&self, kind: TokenKind) -> Result<()> {
        let path = self.path(kind);
        if path.exists() {
            fs::remove_file(path)?;
            debug!(kind = kind.as_str(), "Cleared stored credential");
        }
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    let value = serde_json::from_str(&contents)
        .map_err(|e| Error::Io(format!("Failed to parse {}: {}", path.display(), e)))?;
    Ok(Some(value))
}

/// Write via a sibling temp file and rename, so readers never see a
/// half-written record.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Io(format!("Failed to serialize credential: {}", e)))?;

    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = open_private(&tmp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}
