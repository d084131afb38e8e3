//! Minimal scripted HTTP stub used by the integration tests: a real
//! listener on a loopback port, one request per connection, canned
//! responses chosen by a dispatcher closure.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use haruki_sekai_core::codec::Codec;
use haruki_sekai_core::config::ServerConfig;
use rmpv::Value as Mp;

pub const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f";
pub const IV_HEX: &str = "101112131415161718191a1b1c1d1e1f";

pub fn codec() -> Codec {
    Codec::from_hex(KEY_HEX, IV_HEX).unwrap()
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }
}

#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>
}

impl StubResponse {
    pub fn octet(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: String::from("application/octet-stream"),
            body,
            headers: Vec::new()
        }
    }

    pub fn text(status: u16, content_type: &str, body: &str) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body: body.as_bytes().to_vec(),
            headers: Vec::new()
        }
    }

    pub fn json(status: u16, body: &str) -> Self {
        Self::text(status, "application/json", body)
    }
}

pub struct StubServer {
    pub url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>
}

impl StubServer {
    /// Bind a loopback listener and answer each request through the
    /// dispatcher. The server thread lives until the test process exits.
    pub fn start(dispatch: impl Fn(&RecordedRequest) -> StubResponse + Send + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let requests = Arc::new(Mutex::new(Vec::new()));

        {
            let requests = requests.clone();

            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else {
                        continue;
                    };

                    let Some(request) = read_request(stream.try_clone().unwrap()) else {
                        continue;
                    };

                    requests.lock().unwrap().push(request.clone());

                    let response = dispatch(&request);

                    write_response(stream, &response);
                }
            });
        }

        Self {
            url: format!("http://{addr}"),
            requests
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests().iter().filter(|request| request.path() == path).count()
    }

    /// Poll until at least `count` requests hit `path`, up to ~5 s.
    pub fn wait_for(&self, path: &str, count: usize) -> bool {
        for _ in 0..100 {
            if self.count(path) >= count {
                return true;
            }

            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        false
    }
}

fn read_request(stream: TcpStream) -> Option<RecordedRequest> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;

    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut headers = HashMap::new();

    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;

        let line = line.trim_end();

        if line.is_empty() {
            break;
        }

        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length = headers.get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = vec![0; length];

    if length > 0 {
        reader.read_exact(&mut body).ok()?;
    }

    Some(RecordedRequest {
        method,
        target,
        headers,
        body
    })
}

fn write_response(mut stream: TcpStream, response: &StubResponse) {
    let mut head = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        response.content_type,
        response.body.len()
    );

    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }

    head.push_str("\r\n");

    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&response.body);
    let _ = stream.flush();
}

pub fn msgpack(value: &Mp) -> Vec<u8> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value).unwrap();
    buf
}

pub fn encrypted(value: &Mp) -> Vec<u8> {
    codec().pack_raw(&msgpack(value)).unwrap()
}

pub fn map(entries: Vec<(&str, Mp)>) -> Mp {
    Mp::Map(entries.into_iter().map(|(key, value)| (Mp::from(key), value)).collect())
}

/// Encrypted login answer with the required fields plus any extras
/// (`cdnVersion`, `suiteMasterSplitPath`, `userRegistration`, ...).
pub fn login_body(token: &str, data_version: &str, asset_version: &str, asset_hash: &str, extra: Vec<(&str, Mp)>) -> Vec<u8> {
    let mut entries = vec![
        ("sessionToken", Mp::from(token)),
        ("dataVersion", Mp::from(data_version)),
        ("assetVersion", Mp::from(asset_version)),
        ("assetHash", Mp::from(asset_hash))
    ];

    entries.extend(extra);

    encrypted(&map(entries))
}

/// Nuverse login answers must carry a registered user id.
pub fn nv_registration(user_id: i64) -> (&'static str, Mp) {
    ("userRegistration", map(vec![("userId", Mp::from(user_id))]))
}

/// Server config rooted in a temp directory, pointed at a stub server.
pub fn server_config(api_url: &str, root: &std::path::Path) -> ServerConfig {
    ServerConfig {
        enabled: true,
        api_url: api_url.to_string(),
        master_dir: root.join("master"),
        version_path: root.join("versions/current.json"),
        account_dir: root.join("accounts"),
        aes_key_hex: KEY_HEX.to_string(),
        aes_iv_hex: IV_HEX.to_string(),
        ..ServerConfig::default()
    }
}

pub fn write_fixture(root: &std::path::Path, relative: &str, contents: &str) {
    let path = root.join(relative);

    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

pub const DEFAULT_VERSION_FILE: &str = r#"{
  "appVersion": "4.0.0",
  "appHash": "apphash",
  "dataVersion": "1.0.0",
  "assetVersion": "1.0.0"
}"#;
