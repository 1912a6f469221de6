use std::fs;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::Session;
use crate::cancel::CancellationToken;
use crate::dataset::{Dataset, File};
use crate::error::EsgfError;
use crate::layout;
use crate::progress::{
    FileState, Manifest, ManifestSummary, ProgressEvent, ProgressSink, truncate_detail,
};

pub const CHUNK_SIZE: usize = 8192;

/// Source of remote file bytes.
pub trait FileTransport: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, EsgfError>;
}

/// Longest wait for the response head or for any single body read.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    session: Session,
}

impl HttpTransport {
    pub fn new(session: Session) -> Result<Self, EsgfError> {
        Self::with_read_timeout(session, READ_TIMEOUT)
    }

    /// The blocking client applies `read_timeout` to each read of the body
    /// separately, so a large file may stream for hours while a stalled
    /// node fails after `read_timeout`.
    pub fn with_read_timeout(session: Session, read_timeout: Duration) -> Result<Self, EsgfError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("esgf-dl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EsgfError::TransferHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(read_timeout)
            .build()
            .map_err(|err| EsgfError::TransferHttp(err.to_string()))?;
        Ok(Self { client, session })
    }

    fn request(&self, url: &str) -> Result<RequestBuilder, EsgfError> {
        let parsed =
            Url::parse(url).map_err(|err| EsgfError::TransferHttp(format!("{url}: {err}")))?;
        if !self.session.authorizes(&parsed) {
            debug!(url, "untrusted host, sending request without credentials");
            return Ok(self.client.get(parsed));
        }
        let credentials = self.session.credentials();
        Ok(self
            .client
            .get(parsed)
            .basic_auth(&credentials.username, Some(&credentials.password)))
    }
}

impl FileTransport for HttpTransport {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, EsgfError> {
        let response = self
            .request(url)?
            .send()
            .map_err(|err| EsgfError::TransferHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(EsgfError::TransferStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(Box::new(response))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub filename: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub interrupted: bool,
    pub summary: ManifestSummary,
    pub failures: Vec<FileFailure>,
}

enum Transfer {
    Complete,
    Cancelled,
}

/// Fetches the files of one dataset with at most `max_workers` concurrent
/// transfers.
pub struct DownloadEngine<'a, T: FileTransport> {
    transport: &'a T,
    token: CancellationToken,
    max_workers: usize,
}

impl<'a, T: FileTransport> DownloadEngine<'a, T> {
    pub fn new(transport: &'a T, token: CancellationToken, max_workers: usize) -> Self {
        Self {
            transport,
            token,
            max_workers: max_workers.max(1),
        }
    }

    /// Downloads every missing file of `dataset`. Per-file failures are
    /// recorded in the report; `interrupted` is set when the cancellation
    /// token fired during the run.
    pub fn download(
        &self,
        dataset: &Dataset,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadReport, EsgfError> {
        layout::ensure_dir(dataset.local_path())?;
        let files = dataset.files()?;

        let manifest = Arc::new(Manifest::new(
            dataset.dataset_id(),
            files.iter().map(|file| (file.filename(), file.size())),
        ));
        sink.manifest(manifest.clone());
        sink.event(ProgressEvent::phase(
            "Fetch",
            format!("{} files, {} workers", files.len(), self.max_workers),
        ));

        let next = AtomicUsize::new(0);
        let workers = self.max_workers.min(files.len()).max(1);
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        // queued files are abandoned once the token fires
                        if self.token.is_cancelled() {
                            break;
                        }
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(file) = files.get(index) else {
                            break;
                        };
                        let state = self.fetch_file(file, index, &manifest);
                        report_file(sink, file, &state);
                        manifest.finish(index, state);
                    }
                });
            }
        });

        let interrupted = self.token.is_cancelled();
        if interrupted {
            manifest.cancel_pending();
        }

        let failures = manifest
            .snapshot()
            .into_iter()
            .filter_map(|entry| match entry.state {
                FileState::Failed(detail) => Some(FileFailure {
                    filename: entry.filename,
                    detail,
                }),
                _ => None,
            })
            .collect();
        let summary = manifest.summary();
        sink.event(ProgressEvent::phase(
            "Done",
            format!(
                "{} complete, {} skipped, {} failed, {} cancelled",
                summary.complete, summary.skipped, summary.failed, summary.cancelled
            ),
        ));

        Ok(DownloadReport {
            interrupted,
            summary,
            failures,
        })
    }

    fn fetch_file(&self, file: &File, index: usize, manifest: &Manifest) -> FileState {
        if file.exists() {
            debug!(file = file.filename(), "already downloaded");
            return FileState::Skipped;
        }
        if self.token.is_cancelled() {
            return FileState::Cancelled;
        }
        let Some(url) = file.download_url() else {
            let err = EsgfError::MissingDownloadUrl(file.filename().to_string());
            return FileState::Failed(err.to_string());
        };

        manifest.start(index, file.size());
        match self.transfer(file, url, index, manifest) {
            Ok(Transfer::Complete) => FileState::Complete,
            Ok(Transfer::Cancelled) => {
                discard_partial(file);
                FileState::Cancelled
            }
            Err(err) => {
                discard_partial(file);
                FileState::Failed(truncate_detail(&err.to_string()))
            }
        }
    }

    fn transfer(
        &self,
        file: &File,
        url: &str,
        index: usize,
        manifest: &Manifest,
    ) -> Result<Transfer, EsgfError> {
        let mut reader = self.transport.open(url)?;
        let path = file.local_path();
        let mut out = fs::File::create(path.as_std_path())
            .map_err(|err| EsgfError::Filesystem(format!("create {path}: {err}")))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            if self.token.is_cancelled() {
                return Ok(Transfer::Cancelled);
            }
            let read = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(EsgfError::TransferHttp(err.to_string())),
            };
            out.write_all(&buf[..read])
                .map_err(|err| EsgfError::Filesystem(format!("write {path}: {err}")))?;
            manifest.advance(index, read as u64);
        }
        out.flush()
            .map_err(|err| EsgfError::Filesystem(format!("write {path}: {err}")))?;
        Ok(Transfer::Complete)
    }
}

fn discard_partial(file: &File) {
    if let Err(err) = file.remove() {
        warn!(file = file.filename(), %err, "could not remove partial download");
    }
}

fn report_file(sink: &dyn ProgressSink, file: &File, state: &FileState) {
    let message = match state {
        FileState::Failed(detail) => {
            warn!(file = file.filename(), detail = %detail, "download failed");
            format!("file={} status=failed {detail}", file.filename())
        }
        other => format!("file={} status={}", file.filename(), other.label()),
    };
    sink.event(ProgressEvent::message(message));
}

#[cfg(test)]
mod tests {
    use reqwest::header::AUTHORIZATION;

    use super::*;
    use crate::auth::Credentials;

    fn transport() -> HttpTransport {
        let credentials =
            Credentials::new(Some("user".to_string()), Some("secret".to_string())).unwrap();
        let session = Session::establish(credentials, "esgf-node.llnl.gov").unwrap();
        HttpTransport::new(session).unwrap()
    }

    fn authorization(transport: &HttpTransport, url: &str) -> Option<HeaderValue> {
        let request = transport.request(url).unwrap().build().unwrap();
        request.headers().get(AUTHORIZATION).cloned()
    }

    #[test]
    fn basic_auth_only_for_the_session_host_over_https() {
        let transport = transport();
        assert!(authorization(&transport, "https://esgf-node.llnl.gov/thredds/tas.nc").is_some());
        assert!(authorization(&transport, "http://esgf-node.llnl.gov/thredds/tas.nc").is_none());
        assert!(authorization(&transport, "https://other-node.example.org/tas.nc").is_none());
    }

    #[test]
    fn unparsable_url_is_a_transfer_error() {
        let transport = transport();
        assert!(matches!(
            transport.request("not a url"),
            Err(EsgfError::TransferHttp(_))
        ));
    }
}
