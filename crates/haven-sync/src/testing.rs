//! Scripted collaborators shared by the unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cloud::CloudConnection;
use crate::error::{SyncError, SyncResult};

/// A cloud that answers each path from a queue of canned responses.
///
/// Unscripted paths answer `NotFound`. `subscribe` hands out a receiver whose
/// sender the test can grab with [`FakeCloud::pusher`].
#[derive(Default)]
pub(crate) struct FakeCloud {
    pub disconnected: AtomicBool,
    responses: Mutex<HashMap<String, VecDeque<SyncResult<Value>>>>,
    calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
    pusher: Mutex<Option<mpsc::Sender<Value>>>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeCloud::default())
    }

    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    pub fn script(&self, path: &str, response: SyncResult<Value>) {
        self.responses
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(p, _)| p == path).count()
    }

    /// Sender feeding the most recent subscription.
    pub fn pusher(&self) -> Option<mpsc::Sender<Value>> {
        self.pusher.lock().unwrap().clone()
    }
}

#[async_trait]
impl CloudConnection for FakeCloud {
    async fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> SyncResult<Value> {
        self.calls.lock().unwrap().push((
            path.to_string(),
            query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        ));
        self.responses
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(SyncError::NotFound(path.to_string())))
    }

    async fn subscribe(&self, _topic: &str) -> SyncResult<mpsc::Receiver<Value>> {
        let (tx, rx) = mpsc::channel(16);
        *self.pusher.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}

// =============================================================================
// Local HTTP
// =============================================================================

/// A loopback port with nothing listening on it.
pub(crate) async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Answers every request on `port` with `200` and `body`, one connection
/// per request.
pub(crate) async fn serve_json(port: u16, body: &'static str) -> JoinHandle<()> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    })
}
