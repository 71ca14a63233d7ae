//! Turns "an inner path inside an archive, possibly several archives deep"
//! into a real file on disk the rest of the pipeline can open with
//! `std::fs::File`, and fetches remote archives to a local temp file first.
//!
//! Every extraction and every remote fetch is cached behind a
//! [`SingletonMap`] keyed by a string identity, so a jar referenced by two
//! different classpath entries (or a nested archive opened by two sibling
//! elements) is only ever extracted once (§4.6).
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;

use crate::errors::{ErrorKind, Result, ResultExt};
use crate::singleton_map::SingletonMap;

/// A temp file produced by extraction or download. Removed on drop unless
/// the handler was constructed with `remove_temporary_files_after_scan =
/// false`, in which case it is persisted to disk for the caller to inspect
/// after the scan (§10.5) until the handler's `close()` is called.
struct ManagedTempFile {
    path: PathBuf,
    persist: bool,
}

impl Drop for ManagedTempFile {
    fn drop(&mut self) {
        if !self.persist {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

pub struct NestedArchiveHandler {
    persist_temp_files: bool,
    extracted: SingletonMap<String, PathBuf>,
    /// Keeps every [`ManagedTempFile`] alive for the handler's lifetime so
    /// the cached path stays valid; cleaned up (or not) on handler drop.
    owned_temp_files: std::sync::Mutex<Vec<ManagedTempFile>>,
    runtime: tokio::runtime::Runtime,
}

impl NestedArchiveHandler {
    pub fn new(remove_temporary_files_after_scan: bool) -> Self {
        NestedArchiveHandler {
            persist_temp_files: !remove_temporary_files_after_scan,
            extracted: SingletonMap::new(),
            owned_temp_files: std::sync::Mutex::new(Vec::new()),
            runtime: tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("failed to start the nested archive handler's tokio runtime"),
        }
    }

    fn remember(&self, temp: ManagedTempFile) -> PathBuf {
        let path = temp.path.clone();
        self.owned_temp_files
            .lock()
            .expect("nested archive handler temp file list poisoned")
            .push(temp);
        path
    }

    /// Releases every extracted/downloaded temp file this handler owns,
    /// regardless of whether it was persisted for later resource access
    /// (§5 "Resource lifetimes"). Called once the caller is done with a
    /// `ScanResult` that set `remove_temporary_files_after_scan = false` —
    /// until then those files outlive the scan on purpose; this is what
    /// finally lets them go.
    pub fn close(&self) {
        let mut owned = self
            .owned_temp_files
            .lock()
            .expect("nested archive handler temp file list poisoned");
        for temp in owned.drain(..) {
            let _ = std::fs::remove_file(&temp.path);
        }
    }

    /// Resolves `outer_path`, unpacking one inner entry per element of
    /// `nested_chain` in turn (the chain is empty for a plain top-level
    /// archive). Each step extracts the named entry from the archive
    /// produced by the previous step into a fresh temp file.
    pub fn resolve(&self, outer_path: &Path, nested_chain: &[String]) -> Result<PathBuf> {
        let mut current = outer_path.to_path_buf();
        for inner_entry in nested_chain {
            let key = format!("{}!{}", current.display(), inner_entry);
            current = self
                .extracted
                .get(key, || self.extract_entry(&current, inner_entry))?;
        }
        Ok(current)
    }

    fn extract_entry(&self, archive_path: &Path, entry_name: &str) -> Result<PathBuf> {
        let file = File::open(archive_path)
            .chain_err(|| ErrorKind::OpenElement(archive_path.display().to_string()))?;
        let mut zip = zip::ZipArchive::new(file)
            .chain_err(|| ErrorKind::OpenElement(archive_path.display().to_string()))?;
        let mut entry = zip
            .by_name(entry_name)
            .chain_err(|| ErrorKind::OpenElement(format!("{}!{}", archive_path.display(), entry_name)))?;

        let mut named = tempfile::Builder::new()
            .prefix("classpath-scan-nested-")
            .suffix(suffix_for(entry_name))
            .tempfile()
            .chain_err(|| "failed to create a temp file for a nested archive entry")?;
        io::copy(&mut entry, &mut named)
            .chain_err(|| ErrorKind::ResourceIo(entry_name.to_string()))?;
        named
            .flush()
            .chain_err(|| ErrorKind::ResourceIo(entry_name.to_string()))?;

        let (_, path) = named
            .keep()
            .chain_err(|| "failed to persist a nested archive entry's temp file")?;
        Ok(self.remember(ManagedTempFile {
            path,
            persist: self.persist_temp_files,
        }))
    }

    /// Downloads a remote archive (`http://`/`https://` raw path) to a local
    /// temp file, retrying transient failures with the same exponential
    /// backoff-plus-jitter strategy used for other network calls in this
    /// codebase.
    pub fn fetch_remote(&self, url: &str) -> Result<PathBuf> {
        let url = url.to_string();
        self.extracted
            .get(url.clone(), || self.fetch_remote_uncached(&url))
    }

    fn fetch_remote_uncached(&self, url: &str) -> Result<PathBuf> {
        let url = url.to_string();
        self.runtime.block_on(async {
            let strategy = ExponentialBackoff::from_millis(50)
                .max_delay(Duration::from_secs(5))
                .take(5)
                .map(tokio_retry::strategy::jitter);

            let body = Retry::spawn(strategy, || fetch_once(url.clone())).await?;

            let mut named = tempfile::Builder::new()
                .prefix("classpath-scan-remote-")
                .suffix(suffix_for(&url))
                .tempfile()
                .chain_err(|| "failed to create a temp file for a remote archive")?;
            named
                .write_all(&body)
                .chain_err(|| ErrorKind::RemoteFetch(url.clone()))?;
            named
                .flush()
                .chain_err(|| ErrorKind::RemoteFetch(url.clone()))?;

            let (_, path) = named
                .keep()
                .chain_err(|| "failed to persist a remote archive's temp file")?;
            Ok(self.remember(ManagedTempFile {
                path,
                persist: self.persist_temp_files,
            }))
        })
    }
}

async fn fetch_once(url: String) -> Result<Vec<u8>> {
    let uri: hyper::Uri = url
        .parse()
        .chain_err(|| ErrorKind::RemoteFetch(url.clone()))?;
    let client = hyper::Client::new();
    let response = client
        .get(uri)
        .await
        .chain_err(|| ErrorKind::RemoteFetch(url.clone()))?;

    if !response.status().is_success() {
        return Err(ErrorKind::RemoteFetch(format!("{url} ({})", response.status())).into());
    }

    let bytes = hyper::body::to_bytes(response.into_body())
        .await
        .chain_err(|| ErrorKind::RemoteFetch(url.clone()))?;
    Ok(bytes.to_vec())
}

fn suffix_for(name: &str) -> &str {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|_| ".jar")
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn make_zip_with_entry(entry_name: &str, contents: &[u8]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        {
            let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
            writer
                .start_file(entry_name, zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(contents).unwrap();
            writer.finish().unwrap();
        }
        file
    }

    #[test]
    fn extracts_and_caches_a_nested_entry() {
        let outer = make_zip_with_entry("inner.jar", b"inner-archive-bytes");
        let handler = NestedArchiveHandler::new(true);

        let resolved = handler
            .resolve(outer.path(), &["inner.jar".to_string()])
            .unwrap();
        let contents = std::fs::read(&resolved).unwrap();
        assert_eq!(contents, b"inner-archive-bytes");

        let resolved_again = handler
            .resolve(outer.path(), &["inner.jar".to_string()])
            .unwrap();
        assert_eq!(resolved, resolved_again);
    }

    #[test]
    fn empty_chain_returns_outer_path_unchanged() {
        let outer = make_zip_with_entry("inner.jar", b"x");
        let handler = NestedArchiveHandler::new(true);
        let resolved = handler.resolve(outer.path(), &[]).unwrap();
        assert_eq!(resolved, outer.path());
    }

    #[test]
    fn close_removes_persisted_temp_files() {
        let outer = make_zip_with_entry("inner.jar", b"inner-archive-bytes");
        // `remove_temporary_files_after_scan = false` -> persist on drop.
        let handler = NestedArchiveHandler::new(false);

        let resolved = handler
            .resolve(outer.path(), &["inner.jar".to_string()])
            .unwrap();
        assert!(resolved.exists());

        handler.close();

        assert!(!resolved.exists());
    }
}
