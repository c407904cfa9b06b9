use assert_cmd::{Command, cargo::cargo_bin_cmd};
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// Not every test crate publishes anything.
#[allow(dead_code)]
pub const T1: &str = "Mon, 01 Jan 2024 10:00:00 GMT";
// Not every test crate publishes a second version.
#[allow(dead_code)]
pub const T2: &str = "Tue, 02 Jan 2024 10:00:00 GMT";

pub const GOOD_GPGV: &str = "/bin/true";
#[allow(dead_code)]
pub const BAD_GPGV: &str = "/bin/false";

#[derive(Clone)]
struct ServedFile {
    body: Vec<u8>,
    last_modified: String,
}

type Files = Arc<Mutex<HashMap<String, ServedFile>>>;
type Requests = Arc<Mutex<Vec<String>>>;

/// Throwaway HTTP/1.1 server answering HEAD and GET for published files.
pub struct TestServer {
    port: u16,
    files: Files,
    requests: Requests,
}

impl TestServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let files: Files = Arc::default();
        let requests: Requests = Arc::default();

        let (thread_files, thread_requests) = (files.clone(), requests.clone());
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let _ = serve(stream, &thread_files, &thread_requests);
            }
        });

        TestServer {
            port,
            files,
            requests,
        }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn publish(&self, name: &str, body: &[u8], last_modified: &str) {
        self.files.lock().unwrap().insert(
            format!("/{name}"),
            ServedFile {
                body: body.to_vec(),
                last_modified: last_modified.to_string(),
            },
        );
    }

    /// `"METHOD /path"` for every request received so far.
    #[allow(dead_code)]
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn serve(stream: TcpStream, files: &Files, requests: &Requests) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header.trim().is_empty() {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    requests.lock().unwrap().push(format!("{method} {path}"));

    let file = files.lock().unwrap().get(&path).cloned();
    let mut stream = stream;
    match file {
        Some(file) => {
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nLast-Modified: {}\r\nConnection: close\r\n\r\n",
                file.body.len(),
                file.last_modified
            )?;
            if method == "GET" {
                stream.write_all(&file.body)?;
            }
        }
        None => {
            stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")?;
        }
    }
    stream.flush()
}

/// Settings, cache and server for one test.
pub struct TestEnv {
    pub temp: TempDir,
    pub server: TestServer,
}

impl TestEnv {
    /// Server configured, single channel `test`, given verifier program.
    pub fn new(gpgv: &str) -> Self {
        let env = TestEnv {
            temp: TempDir::new().unwrap(),
            server: TestServer::start(),
        };
        env.write_system_config(&env.server.url(), gpgv);
        env
    }

    pub fn write_system_config(&self, server: &str, gpgv: &str) {
        self.write_system_config_for(server, gpgv, &["test"]);
    }

    #[allow(dead_code)]
    pub fn write_system_config_for(&self, server: &str, gpgv: &str, channels: &[&str]) {
        let channels = channels
            .iter()
            .map(|id| format!("\"{id}\""))
            .collect::<Vec<_>>()
            .join(", ");
        fs::write(
            self.system_config(),
            format!(
                "[metadata]\nversion = 1\n\n[preferences]\nServer = \"{server}\"\nChannels = [{channels}]\n\n[verification]\nGpgv = \"{gpgv}\"\nKeyring = \"/nonexistent/keyring.gpg\"\n"
            ),
        )
        .unwrap();
    }

    pub fn system_config(&self) -> PathBuf {
        self.temp.path().join("alertwatch.conf")
    }

    pub fn user_config(&self) -> PathBuf {
        self.temp.path().join("user").join("settings.toml")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.temp.path().join("cache")
    }

    #[allow(dead_code)]
    pub fn cached(&self, name: &str) -> PathBuf {
        self.cache_dir().join(name)
    }

    #[allow(dead_code)]
    pub fn user_settings(&self) -> String {
        fs::read_to_string(self.user_config()).unwrap_or_default()
    }

    /// Publish bulletin and signature of channel `test` with one stamp.
    #[allow(dead_code)]
    pub fn publish(&self, body: &[u8], last_modified: &str) {
        self.server.publish("alerttest.sig", b"SIGNATURE", last_modified);
        self.server.publish("alerttest", body, last_modified);
    }

    pub fn cmd(&self) -> Command {
        alertwatch_cmd(&self.system_config(), &self.user_config(), &self.cache_dir())
    }
}

pub fn alertwatch_cmd(system_config: &Path, user_config: &Path, cache_dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("alertwatch");
    cmd.env_remove("RUST_LOG")
        .arg("--system-config")
        .arg(system_config)
        .arg("--user-config")
        .arg(user_config)
        .arg("--cache-dir")
        .arg(cache_dir);
    cmd
}

/// A URL nothing listens on.
#[allow(dead_code)]
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}
