//! Fire-and-forget HTTP notification of new attendance records.

use attend_core::Notifier;
use chrono::NaiveDateTime;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

const FLUSH_POLL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint returned status {0}")]
    Status(u16),
}

/// POSTs `<base_url><identity>` for every new record.
///
/// Each call runs on its own short-lived thread with a request timeout, so
/// the recognition loop never waits on the network. Failures are logged and
/// dropped. Call [`HttpNotifier::flush`] before the process exits so pending
/// requests get a chance to go out.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    base_url: String,
    timeout: Duration,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl HttpNotifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            pending: Arc::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self, identity: &str) -> String {
        format!("{}{identity}", self.base_url)
    }

    /// Send one notification on the calling thread.
    pub fn send_blocking(&self, identity: &str) -> Result<(), NotifyError> {
        post(&self.endpoint(identity), self.timeout)
    }

    /// Wait up to `deadline` for in-flight notifications.
    ///
    /// Returns how many were still running when the deadline passed; those
    /// threads are detached.
    pub fn flush(&self, deadline: Duration) -> usize {
        let handles = std::mem::take(&mut *self.lock_pending());
        if handles.is_empty() {
            return 0;
        }

        let until = Instant::now() + deadline;
        let mut remaining = handles;
        loop {
            let (done, running): (Vec<_>, Vec<_>) =
                remaining.into_iter().partition(|h| h.is_finished());
            for handle in done {
                if handle.join().is_err() {
                    tracing::debug!("notification thread panicked");
                }
            }
            remaining = running;
            if remaining.is_empty() || Instant::now() >= until {
                break;
            }
            std::thread::sleep(FLUSH_POLL);
        }

        if !remaining.is_empty() {
            tracing::debug!(pending = remaining.len(), "notifications still in flight at flush deadline");
        }
        remaining.len()
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn post(url: &str, timeout: Duration) -> Result<(), NotifyError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()?;
    let response = client.post(url).send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(NotifyError::Status(status.as_u16()));
    }
    Ok(())
}

impl Notifier for HttpNotifier {
    fn notify(&self, identity: &str, at: NaiveDateTime) {
        let url = self.endpoint(identity);
        let timeout = self.timeout;
        let identity = identity.to_string();
        let spawned = std::thread::Builder::new()
            .name("attend-notify".into())
            .spawn(move || match post(&url, timeout) {
                Ok(()) => tracing::debug!(identity = %identity, at = %at, "remote attendance updated"),
                Err(e) => tracing::debug!(identity = %identity, error = %e, "remote notification failed"),
            });
        match spawned {
            Ok(handle) => {
                let mut pending = self.lock_pending();
                pending.retain(|h| !h.is_finished());
                pending.push(handle);
            }
            Err(e) => tracing::debug!(error = %e, "could not spawn notification thread"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    #[test]
    fn test_endpoint() {
        let n = HttpNotifier::new("http://127.0.0.1:7860/update_attendance/");
        assert_eq!(n.endpoint("alice"), "http://127.0.0.1:7860/update_attendance/alice");
    }

    #[test]
    fn test_send_blocking_posts_identity() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).unwrap();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let n = HttpNotifier::new(format!("http://{addr}/update_attendance/"));
        n.send_blocking("alice").unwrap();

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /update_attendance/alice HTTP/1.1"), "{request}");
    }

    #[test]
    fn test_send_blocking_reports_http_status() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).unwrap();
            stream
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .unwrap();
        });

        let n = HttpNotifier::new(format!("http://{addr}/"));
        assert!(matches!(n.send_blocking("bob"), Err(NotifyError::Status(500))));
        server.join().unwrap();
    }

    #[test]
    fn test_notify_does_not_block_on_unreachable_endpoint() {
        // Reserve a port, then close it so connections are refused.
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let n = HttpNotifier::new(format!("http://{addr}/")).with_timeout(Duration::from_secs(5));

        let at = chrono::NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let start = Instant::now();
        n.notify("alice", at);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_flush_waits_for_notification_to_arrive() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).unwrap();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let n = HttpNotifier::new(format!("http://{addr}/update_attendance/"));
        let at = chrono::NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        n.notify("alice", at);
        assert_eq!(n.flush(Duration::from_secs(5)), 0);

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /update_attendance/alice HTTP/1.1"), "{request}");
    }

    #[test]
    fn test_flush_without_pending_returns_immediately() {
        let n = HttpNotifier::new("http://127.0.0.1:9/");
        let start = Instant::now();
        assert_eq!(n.flush(Duration::from_secs(5)), 0);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_flush_gives_up_at_deadline() {
        // Accepts the connection but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = std::thread::spawn(move || {
            let conn = listener.accept();
            std::thread::sleep(Duration::from_secs(3));
            drop(conn);
        });

        let n = HttpNotifier::new(format!("http://{addr}/")).with_timeout(Duration::from_secs(10));
        let at = chrono::NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        n.notify("bob", at);

        let start = Instant::now();
        assert_eq!(n.flush(Duration::from_millis(200)), 1);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
