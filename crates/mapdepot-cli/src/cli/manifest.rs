//! Fetch manifests: which asset each input depends on.

use anyhow::{Context, Result};
use mapdepot_core::depot::{source_for_handle, CacheHandle, DepotRegion};
use mapdepot_core::pipeline::BatchInput;
use mapdepot_core::{AssetKey, AssetSource};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ManifestEntry {
    /// Cache handle from a replay header; the URL is derived from its region.
    Depot {
        input: PathBuf,
        digest: String,
        kind: String,
        region: DepotRegion,
    },
    /// Explicit key and URL.
    Direct {
        input: PathBuf,
        key: AssetKey,
        url: String,
    },
}

impl ManifestEntry {
    fn into_batch_input(self) -> Result<BatchInput> {
        Ok(match self {
            ManifestEntry::Depot {
                input,
                digest,
                kind,
                region,
            } => {
                let source = source_for_handle(&CacheHandle::new(digest, kind, region));
                BatchInput::new(input, source)
            }
            ManifestEntry::Direct { input, key, url } => {
                let source = AssetSource::new(key, &url)
                    .with_context(|| format!("manifest entry for {}", input.display()))?;
                BatchInput::new(input, Some(source))
            }
        })
    }
}

pub fn parse_manifest(data: &str) -> Result<Vec<BatchInput>> {
    let entries: Vec<ManifestEntry> = serde_json::from_str(data).context("parse manifest")?;
    entries
        .into_iter()
        .map(ManifestEntry::into_batch_input)
        .collect()
}

pub fn load_manifest(path: &Path) -> Result<Vec<BatchInput>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("read manifest: {}", path.display()))?;
    parse_manifest(&data).with_context(|| format!("manifest {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_depot_and_direct_entries() {
        let data = r#"[
            {"input": "a.SC2Replay", "digest": "abcd1234", "kind": "s2ma", "region": "EU"},
            {"input": "b.SC2Replay", "digest": "ffff", "kind": "s2ma", "region": "Public Test"},
            {"input": "c.SC2Replay", "key": "beef.s2ma", "url": "https://mirror.test/beef.s2ma"}
        ]"#;
        let inputs = parse_manifest(data).unwrap();
        assert_eq!(inputs.len(), 3);
        let a = inputs[0].source.as_ref().unwrap();
        assert_eq!(a.url, "http://eu.depot.battle.net:1119/abcd1234.s2ma");
        assert!(inputs[1].source.is_none());
        let c = inputs[2].source.as_ref().unwrap();
        assert_eq!(c.key.as_str(), "beef.s2ma");
        assert_eq!(inputs[2].input, PathBuf::from("c.SC2Replay"));
    }

    #[test]
    fn rejects_bad_direct_entries() {
        assert!(parse_manifest(r#"[{"input": "a", "key": "../x.s2ma", "url": "http://x/"}]"#).is_err());
        assert!(parse_manifest(r#"[{"input": "a", "key": "x.s2ma", "url": "file:///x"}]"#).is_err());
        assert!(parse_manifest(r#"{"input": "a"}"#).is_err());
    }

    #[test]
    fn load_manifest_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        fs::write(&path, r#"[{"input": "a", "digest": "aa", "kind": "s2ma", "region": "SEA"}]"#).unwrap();
        let inputs = load_manifest(&path).unwrap();
        assert_eq!(
            inputs[0].source.as_ref().unwrap().url,
            "http://us.depot.battle.net:1119/aa.s2ma"
        );
        assert!(load_manifest(&dir.path().join("missing.json")).is_err());
    }
}
