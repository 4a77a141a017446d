//! Derive an `AssetSource` from a replay's cache handle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::asset::{AssetKey, AssetSource};

/// Region a cache handle was published in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum DepotRegion {
    Us,
    Eu,
    Kr,
    Cn,
    /// Retired; served from the US depot.
    Sea,
    PublicTest,
    Unknown,
}

impl DepotRegion {
    /// Base URL of the region's depot, or `None` for regions without one.
    pub fn depot_url(self) -> Option<&'static str> {
        match self {
            DepotRegion::Us | DepotRegion::Sea => Some("http://us.depot.battle.net:1119/"),
            DepotRegion::Eu => Some("http://eu.depot.battle.net:1119/"),
            DepotRegion::Kr => Some("http://kr.depot.battle.net:1119/"),
            DepotRegion::Cn => Some("http://cn.depot.battlenet.com.cn:1119/"),
            DepotRegion::PublicTest | DepotRegion::Unknown => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DepotRegion::Us => "US",
            DepotRegion::Eu => "EU",
            DepotRegion::Kr => "KR",
            DepotRegion::Cn => "CN",
            DepotRegion::Sea => "SEA",
            DepotRegion::PublicTest => "Public Test",
            DepotRegion::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DepotRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for DepotRegion {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(r) => r,
            Err(never) => match never {},
        }
    }
}

impl From<DepotRegion> for &'static str {
    fn from(r: DepotRegion) -> Self {
        r.name()
    }
}

impl FromStr for DepotRegion {
    type Err = std::convert::Infallible;

    /// Unrecognised names parse as `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "US" | "us" => DepotRegion::Us,
            "EU" | "eu" => DepotRegion::Eu,
            "KR" | "kr" => DepotRegion::Kr,
            "CN" | "cn" => DepotRegion::Cn,
            "SEA" | "sea" => DepotRegion::Sea,
            "Public Test" => DepotRegion::PublicTest,
            _ => DepotRegion::Unknown,
        })
    }
}

/// Reference to a depot file as stored in a replay header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHandle {
    pub digest: String,
    /// File type, e.g. `s2ma`.
    pub kind: String,
    pub region: DepotRegion,
}

impl CacheHandle {
    pub fn new(digest: impl Into<String>, kind: impl Into<String>, region: DepotRegion) -> Self {
        Self {
            digest: digest.into(),
            kind: kind.into(),
            region,
        }
    }
}

/// Source for `handle`, or `None` when it must be skipped (unsupported region
/// or a malformed digest/type). Skipped handles never reach the coordinator.
pub fn source_for_handle(handle: &CacheHandle) -> Option<AssetSource> {
    let region = match handle.region {
        DepotRegion::Sea => {
            tracing::info!(region = %handle.region, "retired region, using the US depot");
            DepotRegion::Us
        }
        r => r,
    };
    let Some(depot) = region.depot_url() else {
        tracing::warn!(region = %handle.region, digest = %handle.digest, "unsupported region, skipping");
        return None;
    };
    let key = match AssetKey::from_parts(&handle.digest, &handle.kind) {
        Ok(k) => k,
        Err(e) => {
            tracing::warn!("skipping cache handle: {}", e);
            return None;
        }
    };
    let url = format!("{}{}", depot, key);
    match AssetSource::new(key, &url) {
        Ok(src) => Some(src),
        Err(e) => {
            tracing::warn!("skipping cache handle: {:#}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_depot_url_from_handle() {
        let h = CacheHandle::new("abcd1234", "s2ma", DepotRegion::Eu);
        let src = source_for_handle(&h).unwrap();
        assert_eq!(src.key.as_str(), "abcd1234.s2ma");
        assert_eq!(src.url, "http://eu.depot.battle.net:1119/abcd1234.s2ma");
    }

    #[test]
    fn sea_is_redirected_to_us() {
        let h = CacheHandle::new("ff00", "s2ma", DepotRegion::Sea);
        let src = source_for_handle(&h).unwrap();
        assert_eq!(src.url, "http://us.depot.battle.net:1119/ff00.s2ma");
    }

    #[test]
    fn unsupported_regions_are_skipped() {
        for region in [DepotRegion::Unknown, DepotRegion::PublicTest] {
            assert!(source_for_handle(&CacheHandle::new("ab", "s2ma", region)).is_none());
        }
        assert!(source_for_handle(&CacheHandle::new("../x", "s2ma", DepotRegion::Us)).is_none());
    }

    #[test]
    fn region_names_parse() {
        assert_eq!("KR".parse::<DepotRegion>().unwrap(), DepotRegion::Kr);
        assert_eq!("Mars".parse::<DepotRegion>().unwrap(), DepotRegion::Unknown);
        let r: DepotRegion = serde_json::from_str("\"Public Test\"").unwrap();
        assert_eq!(r, DepotRegion::PublicTest);
        let r: DepotRegion = serde_json::from_str("\"Atlantis\"").unwrap();
        assert_eq!(r, DepotRegion::Unknown);
    }
}
