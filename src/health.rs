//! Simple HTTP health and metrics endpoint for a cache instance (synchronous)
//!
//! - `/health`, `/healthz`: liveness
//! - `/ready`, `/readyz`: readiness flag set by the owner
//! - `/metrics`: Prometheus text format
//! - `/stats`: JSON [`crate::stats::CacheStatsSnapshot`]

use crate::config::MetricsConfig;
use crate::stats::CacheStats;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

/// Health server state
pub struct HealthServer {
    stats: Arc<CacheStats>,
    ready: AtomicBool,
    running: AtomicBool,
}

/// Status, content type and body of a reply
type Reply = (u16, &'static str, String);

impl HealthServer {
    pub fn new(stats: Arc<CacheStats>) -> Self {
        Self {
            stats,
            ready: AtomicBool::new(false),
            running: AtomicBool::new(true),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Serve until [`HealthServer::stop`] is called (blocking, run in separate thread)
    ///
    /// Returns immediately when the endpoint is disabled in `config`.
    pub fn run(self: Arc<Self>, config: &MetricsConfig) -> std::io::Result<()> {
        if !config.enabled {
            info!("Health server disabled");
            return Ok(());
        }
        let listener = TcpListener::bind(&config.listen_addr)?;
        self.serve(&listener)
    }

    fn serve(&self, listener: &TcpListener) -> std::io::Result<()> {
        listener.set_nonblocking(true)?;
        info!("Health server listening on {}", listener.local_addr()?);

        while self.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("Health request from {}", peer);
                    if let Err(e) = self.handle_connection(stream) {
                        error!("Health connection error: {}", e);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    error!("Health server accept error: {}", e);
                }
            }
        }

        info!("Health server stopped");
        Ok(())
    }

    fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;

        let mut request_line = String::new();
        BufReader::new(&stream).read_line(&mut request_line)?;

        let (status, content_type, body) = self.route(&request_line);
        send_response(&mut stream, status, content_type, &body)
    }

    /// Map a request line ("GET /path HTTP/1.1") to a reply
    fn route(&self, request_line: &str) -> Reply {
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
            return (400, "text/plain", "Bad Request".to_string());
        };
        if method != "GET" {
            return (405, "text/plain", "Method Not Allowed".to_string());
        }

        match path {
            "/health" | "/healthz" => (200, "application/json", r#"{"status":"healthy"}"#.to_string()),
            "/ready" | "/readyz" if self.is_ready() => {
                (200, "application/json", r#"{"status":"ready"}"#.to_string())
            }
            "/ready" | "/readyz" => (503, "application/json", r#"{"status":"not ready"}"#.to_string()),
            "/metrics" => (200, "text/plain; version=0.0.4", self.stats.gather()),
            "/stats" => match serde_json::to_string(&self.stats.snapshot()) {
                Ok(json) => (200, "application/json", json),
                Err(e) => (500, "text/plain", e.to_string()),
            },
            _ => (404, "text/plain", "Not Found".to_string()),
        }
    }
}

fn send_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &str,
) -> std::io::Result<()> {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    };

    let response = format!(
        "HTTP/1.1 {status} {status_text}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );

    stream.write_all(response.as_bytes())?;
    stream.flush()
}
