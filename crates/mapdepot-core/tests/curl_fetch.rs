//! End to end: curl fetcher against a local server, through the coordinator.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::asset_server::{self, Route};
use mapdepot_core::fetcher::partial_path;
use mapdepot_core::locale::{LocaleNameExtractor, ScanOpener};
use mapdepot_core::{
    AssetKey, AssetSource, CurlFetcher, DownloadCoordinator, FetchErrorKind, FetchOptions,
    ResolveError,
};
use tempfile::tempdir;

fn map_bytes(name: &str) -> Vec<u8> {
    let mut raw = b"MPQ\x1a\0\0\0\0".to_vec();
    raw.extend_from_slice(b"enUS.SC2Data\\LocalizedData\\GameStrings.txt\r\n");
    raw.extend_from_slice(format!("\0DocInfo/Name={}\r\n", name).as_bytes());
    raw
}

fn coordinator(dir: &std::path::Path) -> DownloadCoordinator {
    let fetcher = CurlFetcher::new(LocaleNameExtractor::new(ScanOpener), FetchOptions::default());
    DownloadCoordinator::new(dir, 2, Arc::new(fetcher)).unwrap()
}

#[test]
fn downloads_archive_and_reads_english_name() {
    let body = map_bytes("Abyssal Reef LE");
    let server = asset_server::start(HashMap::from([(
        "abcd1234.s2ma".to_string(),
        Route::ok(body.clone()),
    )]));
    let dir = tempdir().unwrap();
    let coord = coordinator(dir.path());
    let key = AssetKey::new("abcd1234.s2ma").unwrap();
    let src = AssetSource::new(key.clone(), &server.url("abcd1234.s2ma")).unwrap();

    let name = coord.resolve(&src).unwrap();
    assert_eq!(name.as_str(), "Abyssal Reef LE");
    let dest = coord.asset_path(&key);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert!(!partial_path(&dest).exists());

    coord.resolve(&src).unwrap();
    assert_eq!(server.gets(), 1);
}

#[test]
fn http_error_is_network_failure_without_leftovers() {
    let server = asset_server::start(HashMap::from([(
        "gone.s2ma".to_string(),
        Route::status(503),
    )]));
    let dir = tempdir().unwrap();
    let coord = coordinator(dir.path());
    let key = AssetKey::new("gone.s2ma").unwrap();
    let src = AssetSource::new(key.clone(), &server.url("gone.s2ma")).unwrap();

    let err = coord.resolve(&src).unwrap_err();
    assert_eq!(err.fetch_kind(), Some(FetchErrorKind::Network));
    match err {
        ResolveError::Fetch(mapdepot_core::FetchError::Network { status, .. }) => {
            assert_eq!(status, Some(503))
        }
        other => panic!("expected Network, got {:?}", other),
    }
    assert!(!coord.asset_path(&key).exists());
    assert!(!partial_path(&coord.asset_path(&key)).exists());

    coord.resolve(&src).unwrap_err();
    assert_eq!(server.gets(), 2);
}

#[test]
fn archive_without_name_is_format_failure_and_removed() {
    let server = asset_server::start(HashMap::from([(
        "blank.s2ma".to_string(),
        Route::ok(b"MPQ\x1a no strings".to_vec()),
    )]));
    let dir = tempdir().unwrap();
    let coord = coordinator(dir.path());
    let key = AssetKey::new("blank.s2ma").unwrap();
    let src = AssetSource::new(key.clone(), &server.url("blank.s2ma")).unwrap();

    let err = coord.resolve(&src).unwrap_err();
    assert_eq!(err.fetch_kind(), Some(FetchErrorKind::Format));
    assert!(!coord.asset_path(&key).exists());
    assert!(coord.cached(&key).is_none());
}
