//! Shared fixtures for the integration tests: a minimal HTTP server for the
//! resolver/signaling paths and channel-free mock pipeline components.

#![allow(dead_code)]

use async_trait::async_trait;
use srs_player::media::{FrameBuffer, VideoSample};
use srs_player::pipeline::FrameSource;
use srs_player::sink::{DisplaySink, RecordingSink};
use srs_player::{Error, Result};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One-response HTTP server on a random loopback port.
///
/// Every request gets the same canned response; the number of requests and
/// their bodies are recorded for assertions.
pub struct MockHttpServer {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<String>>>,
}

impl MockHttpServer {
    pub async fn spawn(status: u16, content_type: &'static str, body: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));

        let accept_hits = Arc::clone(&hits);
        let accept_bodies = Arc::clone(&bodies);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let hits = Arc::clone(&accept_hits);
                let bodies = Arc::clone(&accept_bodies);
                let body = body.clone();
                tokio::spawn(async move {
                    serve_one(stream, status, content_type, body, hits, bodies).await;
                });
            }
        });

        Self { addr, hits, bodies }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Requests served so far
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Bodies of the requests served so far
    pub fn request_bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

async fn serve_one(
    mut stream: TcpStream,
    status: u16,
    content_type: &str,
    body: String,
    hits: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<String>>>,
) {
    let request_body = read_request_body(&mut stream).await;
    hits.fetch_add(1, Ordering::SeqCst);
    bodies.lock().unwrap().push(request_body);

    let response = format!(
        "HTTP/1.1 {} MOCK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Read one HTTP/1.1 request and return its body (empty for GET)
async fn read_request_body(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return String::new(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let body_start = header_end + 4;
    while buf.len() < body_start + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    String::from_utf8_lossy(&buf[body_start..buf.len().min(body_start + content_length)])
        .into_owned()
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// A valid play page body pointing at `endpoint`
pub fn play_page(endpoint: &str) -> String {
    format!(
        r#"<html><script>var url = "{endpoint}"; startPlay(url);</script></html>"#
    )
}

/// A minimal SRS play answer with `code` 0 and a dummy SDP
pub fn play_answer() -> String {
    r#"{"code":0,"server":"mock","sdp":"v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n","sessionid":"mock:0"}"#
        .to_string()
}

/// Synthetic encoded sample with the given presentation timestamp
pub fn sample(pts_ms: u64) -> VideoSample {
    VideoSample {
        data: vec![0, 0, 0, 1, 0x65, 0x88, 0x84].into(),
        pts: Duration::from_millis(pts_ms),
        is_keyframe: true,
    }
}

/// Frame source backed by a fixed queue; yields `None` once drained
pub struct QueueSource {
    samples: VecDeque<VideoSample>,
}

impl QueueSource {
    pub fn new(pts_ms: &[u64]) -> Self {
        Self {
            samples: pts_ms.iter().map(|&ms| sample(ms)).collect(),
        }
    }
}

#[async_trait]
impl FrameSource for QueueSource {
    async fn next_frame(&mut self) -> Option<VideoSample> {
        self.samples.pop_front()
    }
}

/// Frame source that never yields a sample
pub struct PendingSource;

#[async_trait]
impl FrameSource for PendingSource {
    async fn next_frame(&mut self) -> Option<VideoSample> {
        futures::future::pending().await
    }
}

/// Recording sink that captures sample timestamps instead of writing a file
#[derive(Clone, Default)]
pub struct CapturingRecorder {
    pub written_pts: Arc<Mutex<Vec<Duration>>>,
    pub finalized: Arc<AtomicUsize>,
}

impl RecordingSink for CapturingRecorder {
    fn write_video(&mut self, sample: &VideoSample) -> Result<()> {
        self.written_pts.lock().unwrap().push(sample.pts);
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.finalized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Display sink whose render always fails
pub struct FailingDisplay;

impl DisplaySink for FailingDisplay {
    fn render(&mut self, _frame: &FrameBuffer) -> Result<()> {
        Err(Error::Sink("render always fails".to_string()))
    }

    fn close_requested(&mut self) -> bool {
        false
    }
}

/// Display sink that reports a close request after a fixed number of polls
pub struct ClosingDisplay {
    polls_before_close: usize,
}

impl ClosingDisplay {
    pub fn new(polls_before_close: usize) -> Self {
        Self { polls_before_close }
    }
}

impl DisplaySink for ClosingDisplay {
    fn render(&mut self, _frame: &FrameBuffer) -> Result<()> {
        Ok(())
    }

    fn close_requested(&mut self) -> bool {
        if self.polls_before_close == 0 {
            return true;
        }
        self.polls_before_close -= 1;
        false
    }
}
