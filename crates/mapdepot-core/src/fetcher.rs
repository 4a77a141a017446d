//! Fetch one asset: HTTP GET into the asset directory, then read its name.
//!
//! The body is streamed to `<dest>.part` and renamed to `dest` once the
//! transfer succeeds. Any failure removes both files so a later attempt (or a
//! restart's reconciliation) never sees stale bytes.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::asset::ResolvedName;
use crate::error::FetchError;

/// Suffix of in-progress downloads; never a valid asset type.
pub const PARTIAL_SUFFIX: &str = "part";

/// Performs the transfer for one key. Implementations must be safe to call
/// from several worker threads at once.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, dest: &Path) -> Result<ResolvedName, FetchError>;
}

impl<F> Fetcher for F
where
    F: Fn(&str, &Path) -> Result<ResolvedName, FetchError> + Send + Sync,
{
    fn fetch(&self, url: &str, dest: &Path) -> Result<ResolvedName, FetchError> {
        self(url, dest)
    }
}

/// Reads the human-readable name out of a downloaded archive.
/// `Ok(None)` means the archive was readable but carries no name.
pub trait NameExtractor: Send + Sync {
    fn extract_name(&self, path: &Path) -> io::Result<Option<String>>;
}

/// Per-request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            timeout: Duration::from_secs(300),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
        }
    }
}

/// Path used while the body is being written.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut o = dest.as_os_str().to_owned();
    o.push(".");
    o.push(PARTIAL_SUFFIX);
    PathBuf::from(o)
}

/// libcurl-backed fetcher.
pub struct CurlFetcher<E> {
    extractor: E,
    options: FetchOptions,
}

impl<E: NameExtractor> CurlFetcher<E> {
    pub fn new(extractor: E, options: FetchOptions) -> Self {
        Self { extractor, options }
    }

    fn download(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        let part = partial_path(dest);
        let file = File::create(&part).map_err(|e| FetchError::storage(&part, e))?;
        let mut out = BufWriter::new(file);
        let mut write_error: Option<io::Error> = None;

        let curl_err = |e: curl::Error| FetchError::network(url, e.to_string());
        let mut easy = curl::easy::Easy::new();
        easy.url(url).map_err(curl_err)?;
        easy.follow_location(true).map_err(curl_err)?;
        easy.max_redirections(10).map_err(curl_err)?;
        easy.connect_timeout(self.options.connect_timeout)
            .map_err(curl_err)?;
        easy.timeout(self.options.timeout).map_err(curl_err)?;
        easy.low_speed_limit(self.options.low_speed_limit)
            .map_err(curl_err)?;
        easy.low_speed_time(self.options.low_speed_time)
            .map_err(curl_err)?;

        let performed = {
            let mut transfer = easy.transfer();
            transfer
                .write_function(|data| match out.write_all(data) {
                    Ok(()) => Ok(data.len()),
                    Err(e) => {
                        write_error = Some(e);
                        Ok(0) // abort transfer
                    }
                })
                .map_err(curl_err)?;
            transfer.perform()
        };

        if let Some(e) = write_error {
            return Err(FetchError::storage(&part, e));
        }
        if let Err(e) = performed {
            return Err(curl_err(e));
        }

        let code = easy.response_code().map_err(curl_err)?;
        if !(200..300).contains(&code) {
            return Err(FetchError::http_status(url, code));
        }

        let file = out
            .into_inner()
            .map_err(|e| FetchError::storage(&part, e.error()))?;
        file.sync_all().map_err(|e| FetchError::storage(&part, e))?;
        drop(file);
        fs::rename(&part, dest).map_err(|e| FetchError::storage(dest, e))?;
        Ok(())
    }
}

impl<E: NameExtractor> Fetcher for CurlFetcher<E> {
    fn fetch(&self, url: &str, dest: &Path) -> Result<ResolvedName, FetchError> {
        let result = self
            .download(url, dest)
            .and_then(|()| read_name(&self.extractor, dest));
        if result.is_err() {
            remove_quietly(&partial_path(dest));
            remove_quietly(dest);
        }
        result
    }
}

/// Run the extractor against a written file; a missing or blank name is a
/// format error (retryable, never cached).
pub fn read_name<E: NameExtractor + ?Sized>(
    extractor: &E,
    path: &Path,
) -> Result<ResolvedName, FetchError> {
    match extractor.extract_name(path) {
        Ok(Some(name)) if !name.trim().is_empty() => Ok(ResolvedName::new(name)),
        Ok(_) => Err(FetchError::format(path, "no name found in archive")),
        Err(e) => Err(FetchError::format(path, format!("unreadable archive: {}", e))),
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "could not remove failed download: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<&'static str>);

    impl NameExtractor for Fixed {
        fn extract_name(&self, _path: &Path) -> io::Result<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    struct Broken;

    impl NameExtractor for Broken {
        fn extract_name(&self, _path: &Path) -> io::Result<Option<String>> {
            Err(io::Error::new(io::ErrorKind::InvalidData, "bad header"))
        }
    }

    #[test]
    fn partial_path_appends_suffix() {
        let p = partial_path(Path::new("/maps/abcd.s2ma"));
        assert_eq!(p, PathBuf::from("/maps/abcd.s2ma.part"));
    }

    #[test]
    fn read_name_maps_outcomes() {
        let p = Path::new("/maps/abcd.s2ma");
        assert_eq!(
            read_name(&Fixed(Some("Abyssal Reef LE")), p).unwrap(),
            ResolvedName::from("Abyssal Reef LE")
        );
        assert!(matches!(
            read_name(&Fixed(None), p),
            Err(FetchError::Format { .. })
        ));
        assert!(matches!(
            read_name(&Fixed(Some("   ")), p),
            Err(FetchError::Format { .. })
        ));
        assert!(matches!(read_name(&Broken, p), Err(FetchError::Format { .. })));
    }

    #[test]
    fn closures_are_fetchers() {
        let f = |_url: &str, _dest: &Path| -> Result<ResolvedName, FetchError> {
            Ok(ResolvedName::from("Stub"))
        };
        let name = Fetcher::fetch(&f, "http://x/a.s2ma", Path::new("a.s2ma")).unwrap();
        assert_eq!(name.as_str(), "Stub");
    }

    #[test]
    fn connection_refused_is_network_error_and_leaves_no_file() {
        // Bind then drop to get a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("abcd.s2ma");
        let fetcher = CurlFetcher::new(Fixed(Some("x")), FetchOptions::default());
        let err = fetcher
            .fetch(&format!("http://127.0.0.1:{}/abcd.s2ma", port), &dest)
            .unwrap_err();
        assert!(matches!(err, FetchError::Network { status: None, .. }));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn missing_directory_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("no-such-dir").join("abcd.s2ma");
        let fetcher = CurlFetcher::new(Fixed(Some("x")), FetchOptions::default());
        let err = fetcher.fetch("http://127.0.0.1:9/abcd.s2ma", &dest).unwrap_err();
        assert!(matches!(err, FetchError::Storage { .. }));
    }
}
