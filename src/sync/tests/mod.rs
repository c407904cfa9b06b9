use super::*;
use crate::fetch::{HttpResponse, TransportError};
use crate::state::FileStateStore;
use crate::verify::Verification;
use chrono::{DateTime, TimeZone, Utc};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use tempfile::TempDir;

const SERVER: &str = "http://alerts.test";
const T1: &str = "Mon, 01 Jan 2024 10:00:00 GMT";
const T2: &str = "Tue, 02 Jan 2024 10:00:00 GMT";

fn t1() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
}

fn t2() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap()
}

#[derive(Clone)]
struct RemoteFile {
    body: Vec<u8>,
    last_modified: Option<String>,
    /// Overrides the advertised length; defaults to the body length.
    advertised: Option<u64>,
}

/// In-memory server. Files can be replaced between cycles.
#[derive(Default)]
struct FakeTransport {
    files: RefCell<HashMap<String, RemoteFile>>,
    calls: RefCell<Vec<String>>,
    timeout_urls: RefCell<Vec<String>>,
}

impl FakeTransport {
    fn publish(&self, name: &str, body: &[u8], last_modified: Option<&str>) {
        self.files.borrow_mut().insert(
            format!("{SERVER}/{name}"),
            RemoteFile {
                body: body.to_vec(),
                last_modified: last_modified.map(str::to_string),
                advertised: None,
            },
        );
    }

    fn advertise(&self, name: &str, length: u64) {
        if let Some(file) = self.files.borrow_mut().get_mut(&format!("{SERVER}/{name}")) {
            file.advertised = Some(length);
        }
    }

    fn time_out(&self, name: &str) {
        self.timeout_urls.borrow_mut().push(format!("{SERVER}/{name}"));
    }

    fn lookup(&self, url: &str) -> Result<RemoteFile, TransportError> {
        if self.timeout_urls.borrow().iter().any(|u| u == url) {
            return Err(TransportError::Timeout);
        }
        self.files
            .borrow()
            .get(url)
            .cloned()
            .ok_or(TransportError::Status(404))
    }

    fn gets(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| c.strip_prefix("GET ").map(str::to_string))
            .collect()
    }

    fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }
}

impl Transport for FakeTransport {
    fn head(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.calls.borrow_mut().push(format!("HEAD {url}"));
        let file = self.lookup(url)?;
        Ok(HttpResponse {
            status: 200,
            content_length: Some(file.advertised.unwrap_or(file.body.len() as u64)),
            last_modified: file.last_modified,
            body: Vec::new(),
        })
    }

    fn get(&self, url: &str, limit: u64) -> Result<HttpResponse, TransportError> {
        self.calls.borrow_mut().push(format!("GET {url}"));
        let file = self.lookup(url)?;
        let mut body = file.body;
        body.truncate(limit as usize);
        Ok(HttpResponse {
            status: 200,
            content_length: Some(file.advertised.unwrap_or(body.len() as u64)),
            last_modified: file.last_modified,
            body,
        })
    }
}

struct FakeVerifier {
    valid: Cell<bool>,
    fail_to_run: Cell<bool>,
    calls: Cell<usize>,
}

impl Default for FakeVerifier {
    fn default() -> Self {
        FakeVerifier {
            valid: Cell::new(true),
            fail_to_run: Cell::new(false),
            calls: Cell::new(0),
        }
    }
}

impl SignatureVerifier for FakeVerifier {
    fn verify(&self, content: &Path, signature: &Path) -> Result<Verification, VerifyError> {
        self.calls.set(self.calls.get() + 1);
        // Both files must be on disk by the time we are asked.
        assert!(content.is_file(), "{} missing", content.display());
        assert!(signature.is_file(), "{} missing", signature.display());

        if self.fail_to_run.get() {
            return Err(VerifyError::Run(crate::runner::RunError::Spawn {
                program: "gpgv".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }));
        }

        let valid = self.valid.get();
        let report = if valid {
            "gpgv: Good signature from \"Alert Team <alerts@example.org>\"\n"
        } else {
            "gpgv: BAD signature from \"Alert Team <alerts@example.org>\"\n"
        };
        Ok(Verification {
            valid,
            report: report.to_string(),
        })
    }
}

struct Fixture {
    temp: TempDir,
    state: FileStateStore,
    fetcher: Fetcher<FakeTransport>,
    verifier: FakeVerifier,
    cache: AlertCache,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let state = FileStateStore::new(
            temp.path().join("system.conf"),
            temp.path().join("user/settings.toml"),
        );
        let cache = AlertCache::open(&temp.path().join("cache")).unwrap();
        Fixture {
            temp,
            state,
            fetcher: Fetcher::new(FakeTransport::default()),
            verifier: FakeVerifier::default(),
            cache,
        }
    }

    fn write_system(&self, body: &str) {
        std::fs::write(
            self.temp.path().join("system.conf"),
            format!("[metadata]\nversion = 1\n\n{body}"),
        )
        .unwrap();
    }

    fn server(&self) -> &FakeTransport {
        self.fetcher.transport()
    }

    fn sync(&self) -> Synchronizer<'_, FakeTransport> {
        Synchronizer::new(&self.state, &self.fetcher, &self.verifier, &self.cache, SERVER)
    }

    /// Publish a bulletin and its signature with the same stamp.
    fn publish(&self, channel: &Channel, body: &[u8], stamp: &str) {
        self.server()
            .publish(&channel.signature_file_name(), b"SIGNATURE", Some(stamp));
        self.server().publish(&channel.file_name(), body, Some(stamp));
    }

    fn cached_files_exist(&self, channel: &Channel) -> (bool, bool) {
        (
            self.cache.content_path(channel).exists(),
            self.cache.signature_path(channel).exists(),
        )
    }
}

fn channel() -> Channel {
    Channel::new("23")
}
