//! Asset identity: keys, request sources and resolved names.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::InvalidKey;

/// Content-addressed asset identifier, `"{digest}.{kind}"` (e.g. `abcd1234.s2ma`).
///
/// Keys double as file names under the asset directory, so validation only
/// admits ASCII alphanumerics, `.`, `-` and `_`, never a leading dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetKey(String);

impl AssetKey {
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidKey> {
        let key = key.into();
        let reject = |reason| InvalidKey {
            key: key.clone(),
            reason,
        };
        if key.is_empty() {
            return Err(reject("empty"));
        }
        if key.starts_with('.') {
            return Err(reject("leading dot"));
        }
        if !key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'))
        {
            return Err(reject("unsupported character"));
        }
        let shape = match key.rsplit_once('.') {
            Some((_, crate::fetcher::PARTIAL_SUFFIX)) => Some("reserved type"),
            Some((digest, kind)) if !digest.is_empty() && !kind.is_empty() => None,
            _ => Some("expected <digest>.<type>"),
        };
        match shape {
            Some(reason) => Err(reject(reason)),
            None => Ok(AssetKey(key)),
        }
    }

    /// Build a key from a cache-handle digest and type (e.g. `"s2ma"`).
    pub fn from_parts(digest: &str, kind: &str) -> Result<Self, InvalidKey> {
        Self::new(format!("{}.{}", digest, kind))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Type suffix after the last dot.
    pub fn kind(&self) -> &str {
        self.0.rsplit_once('.').map(|(_, k)| k).unwrap_or("")
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AssetKey {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AssetKey::new(value)
    }
}

impl From<AssetKey> for String {
    fn from(key: AssetKey) -> Self {
        key.0
    }
}

/// One request for an asset: the key plus where to fetch it from.
///
/// Different callers may pass different URLs for the same key (mirrors);
/// only the URL of the caller that dispatches the fetch is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSource {
    pub key: AssetKey,
    pub url: String,
}

impl AssetSource {
    /// Validates that `url` is an absolute http(s) URL.
    pub fn new(key: AssetKey, url: &str) -> anyhow::Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| anyhow::anyhow!("invalid source URL {:?}: {}", url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("unsupported URL scheme {:?} in {}", parsed.scheme(), url);
        }
        Ok(Self {
            key,
            url: parsed.to_string(),
        })
    }
}

/// Human-readable name read from a fetched archive (e.g. `Abyssal Reef LE`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedName(String);

impl ResolvedName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResolvedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResolvedName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Regular files in `dir` whose names are valid asset keys, sorted by name.
/// Partial downloads and stray files are left out.
pub fn asset_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|name| AssetKey::new(name).is_ok())
                .unwrap_or(false)
        })
        .map(|e| e.path())
        .collect();
    files.sort();
    Ok(files)
}
