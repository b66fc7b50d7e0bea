//! Shared test infrastructure for integration tests
//!
//! Provides TestServer (spawns the real binary against temp storage) and a
//! SigV4-signing HTTP client built on the crate's own signing primitives,
//! so every request exercises the verifier end to end.

#![allow(dead_code)]

use bleepstore::auth::sigv4;
use chrono::{DateTime, Duration, Utc};
use std::process::{Child, Command};
use tempfile::TempDir;
use tokio::time::sleep;

/// Ask the OS for a currently-free port. The listener is dropped before the
/// server binds it; tests tolerate the tiny race by each using a fresh port.
fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local addr")
        .port()
}

pub const ACCESS_KEY: &str = "bleepstore";
pub const SECRET_KEY: &str = "bleepstore-secret";
pub const REGION: &str = "us-east-1";

/// Test server wrapper that spawns a real bleepstore binary
pub struct TestServer {
    process: Child,
    port: u16,
    _data_dir: TempDir,
}

impl TestServer {
    /// Start a test server with temp storage and metadata.
    pub async fn spawn() -> Self {
        let port = free_port();
        let data_dir = TempDir::new().expect("Failed to create temp dir");

        let process = Command::new(env!("CARGO_BIN_EXE_bleepstore"))
            .env("BLEEPSTORE_LISTEN_ADDR", format!("127.0.0.1:{port}"))
            .env("BLEEPSTORE_DATA_DIR", data_dir.path().join("data"))
            .env("BLEEPSTORE_METADATA_PATH", data_dir.path().join("meta.db"))
            .env("RUST_LOG", "bleepstore=warn")
            .spawn()
            .expect("Failed to start server");

        let mut server = Self {
            process,
            port,
            _data_dir: data_dir,
        };
        server.wait_ready().await;
        server
    }

    async fn wait_ready(&mut self) {
        let addr = format!("127.0.0.1:{}", self.port);
        for _ in 0..150 {
            if std::net::TcpStream::connect(&addr).is_ok() {
                sleep(std::time::Duration::from_millis(100)).await;
                return;
            }
            if let Ok(Some(status)) = self.process.try_wait() {
                panic!("Server exited before becoming ready: {status}");
            }
            sleep(std::time::Duration::from_millis(100)).await;
        }
        let _ = self.process.kill();
        panic!("Timed out waiting for server on {addr}");
    }

    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// A signing client for this server with the default credentials.
    pub fn client(&self) -> SigClient {
        SigClient {
            http: reqwest::Client::new(),
            host: self.host(),
            access_key: ACCESS_KEY.to_string(),
            secret_key: SECRET_KEY.to_string(),
            region: REGION.to_string(),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.process.kill();
    }
}

/// HTTP client that signs every request with SigV4 header auth.
pub struct SigClient {
    pub http: reqwest::Client,
    pub host: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl SigClient {
    pub fn with_secret(&self, secret: &str) -> SigClient {
        SigClient {
            http: self.http.clone(),
            host: self.host.clone(),
            access_key: self.access_key.clone(),
            secret_key: secret.to_string(),
            region: self.region.clone(),
        }
    }

    /// Sign and send a request at the current time.
    pub async fn send(
        &self,
        method: &str,
        path_and_query: &str,
        body: Vec<u8>,
        extra_headers: &[(&str, &str)],
    ) -> reqwest::Response {
        self.send_at(method, path_and_query, body, extra_headers, Utc::now())
            .await
    }

    /// Sign and send a request with an explicit signing timestamp
    /// (used by the clock-skew tests).
    pub async fn send_at(
        &self,
        method: &str,
        path_and_query: &str,
        body: Vec<u8>,
        extra_headers: &[(&str, &str)],
        signed_at: DateTime<Utc>,
    ) -> reqwest::Response {
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, q),
            None => (path_and_query, ""),
        };

        let amz_date = signed_at.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = signed_at.format("%Y%m%d").to_string();
        let payload_hash = sigv4::sha256_hex(&body);

        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "x-amz-content-sha256",
            payload_hash.parse().expect("valid header"),
        );
        headers.insert("x-amz-date", amz_date.parse().expect("valid header"));

        let signed_names: Vec<String> = ["host", "x-amz-content-sha256", "x-amz-date"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let canonical_query = sigv4::canonical_query_string(query, &[]);
        let creq = sigv4::canonical_request(
            method,
            path,
            &canonical_query,
            &headers,
            &self.host,
            &signed_names,
            &payload_hash,
        );
        let scope = format!("{date_stamp}/{}/s3/aws4_request", self.region);
        let sts = sigv4::string_to_sign(&amz_date, &scope, &creq);
        let key = sigv4::derive_signing_key(&self.secret_key, &date_stamp, &self.region, "s3");
        let signature = sigv4::compute_signature(&*key, &sts);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
            self.access_key,
            signed_names.join(";"),
        );

        let url = format!("http://{}{path_and_query}", self.host);
        let mut request = self
            .http
            .request(
                method.parse().expect("valid method"),
                url,
            )
            .header("authorization", authorization)
            .header("x-amz-date", &amz_date)
            .header("x-amz-content-sha256", &payload_hash)
            .body(body);
        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }
        request.send().await.expect("request failed")
    }

    /// Build a presigned URL for the given method and path.
    pub fn presign(
        &self,
        method: &str,
        path: &str,
        expires_secs: i64,
        signed_at: DateTime<Utc>,
    ) -> String {
        let amz_date = signed_at.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = signed_at.format("%Y%m%d").to_string();
        let scope = format!("{date_stamp}/{}/s3/aws4_request", self.region);
        let credential = format!("{}/{scope}", self.access_key);

        // Sorted parameter order so the raw query IS the canonical query.
        let base_query = format!(
            "X-Amz-Algorithm=AWS4-HMAC-SHA256\
             &X-Amz-Credential={}\
             &X-Amz-Date={amz_date}\
             &X-Amz-Expires={expires_secs}\
             &X-Amz-SignedHeaders=host",
            sigv4::uri_encode(&credential, true),
        );

        let headers = axum::http::HeaderMap::new();
        let signed_names = vec!["host".to_string()];
        let creq = sigv4::canonical_request(
            method,
            path,
            &base_query,
            &headers,
            &self.host,
            &signed_names,
            sigv4::UNSIGNED_PAYLOAD,
        );
        let sts = sigv4::string_to_sign(&amz_date, &scope, &creq);
        let key = sigv4::derive_signing_key(&self.secret_key, &date_stamp, &self.region, "s3");
        let signature = sigv4::compute_signature(&*key, &sts);

        format!(
            "http://{}{path}?{base_query}&X-Amz-Signature={signature}",
            self.host
        )
    }
}

/// Yesterday-relative timestamp helper for skew tests.
pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}

/// Five MiB of one repeated byte, the minimum non-last part size.
pub fn five_mib(byte: u8) -> Vec<u8> {
    vec![byte; 5 * 1024 * 1024]
}
