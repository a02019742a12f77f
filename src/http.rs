use std::thread;
use std::time::{Duration, Instant};

pub(crate) const USER_AGENT: &str = concat!("malwatch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub(crate) enum FetchError {
    #[error("HTTP status {status}{}", body_suffix(.body))]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("request failed after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: usize,
        last: Box<FetchError>,
    },
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" ({body})")
    }
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => should_retry_http_status(*status),
            Self::Transport(_) => true,
            Self::Decode(_) | Self::Exhausted { .. } => false,
        }
    }

    pub(crate) fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Exhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

fn should_retry_http_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) timeout: Duration,
    pub(crate) attempts: usize,
    pub(crate) retry_delay: Duration,
    /// Ceiling on the whole call, retries and pauses included.
    pub(crate) deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(12),
            attempts: 2,
            retry_delay: Duration::from_millis(500),
            deadline: Duration::from_secs(15),
        }
    }
}

/// Blocking GET client; every request is bounded by the policy timeout.
#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    agent: ureq::Agent,
    policy: RetryPolicy,
}

impl HttpClient {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(policy.timeout)
            .user_agent(USER_AGENT)
            .build();
        Self { agent, policy }
    }

    pub(crate) fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, FetchError> {
        let started = Instant::now();
        let attempts = self.policy.attempts.max(1);
        let mut made = 0;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let Some(remaining) = self
                .policy
                .deadline
                .checked_sub(started.elapsed())
                .filter(|remaining| !remaining.is_zero())
            else {
                break;
            };
            made = attempt;
            match self.get_once(url, query, remaining.min(self.policy.timeout)) {
                Ok(body) => return Ok(body),
                Err(err) if err.is_retryable() => {
                    tracing::debug!(url, attempt, %err, "retryable fetch failure");
                    last_error = Some(err);
                    if attempt < attempts {
                        if started.elapsed() + self.policy.retry_delay >= self.policy.deadline {
                            break;
                        }
                        thread::sleep(self.policy.retry_delay);
                    }
                }
                Err(err) => return Err(err),
            }
        }

        let last = last_error.unwrap_or_else(|| {
            FetchError::Transport("exhausted attempts without a concrete error".to_string())
        });
        Err(FetchError::Exhausted {
            attempts: made,
            last: Box::new(last),
        })
    }

    fn get_once(
        &self,
        url: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let mut request = self.agent.get(url).timeout(timeout);
        for (key, value) in query {
            request = request.query(key, value);
        }

        match request.call() {
            Ok(response) => response
                .into_string()
                .map_err(|err| FetchError::Decode(err.to_string())),
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().ok().unwrap_or_default();
                Err(FetchError::Status {
                    status,
                    body: body.trim().chars().take(240).collect(),
                })
            }
            Err(ureq::Error::Transport(err)) => Err(FetchError::Transport(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    enum Behavior {
        Respond(u16, String),
        DelayRespond(Duration, u16, String),
    }

    #[derive(Debug)]
    struct TestServer {
        base_url: String,
        requests: Arc<AtomicUsize>,
        paths: Arc<Mutex<Vec<String>>>,
        shutdown_tx: mpsc::Sender<()>,
        join_handle: Option<std::thread::JoinHandle<()>>,
    }

    impl TestServer {
        fn spawn(behaviors: Vec<Behavior>) -> Self {
            let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind test server");
            listener.set_nonblocking(true).expect("set nonblocking");
            let addr = listener.local_addr().expect("local addr");

            let requests = Arc::new(AtomicUsize::new(0));
            let requests_clone = Arc::clone(&requests);
            let paths = Arc::new(Mutex::new(Vec::new()));
            let paths_clone = Arc::clone(&paths);
            let queue = Arc::new(Mutex::new(VecDeque::from(behaviors)));
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

            let join_handle = std::thread::spawn(move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }

                    match listener.accept() {
                        Ok((mut stream, _)) => {
                            requests_clone.fetch_add(1, Ordering::SeqCst);
                            let behavior = queue
                                .lock()
                                .expect("lock behaviors")
                                .pop_front()
                                .unwrap_or_else(|| Behavior::Respond(200, "[]".to_string()));
                            let paths = Arc::clone(&paths_clone);
                            std::thread::spawn(move || {
                                if let Some(path) = read_request_path(&mut stream) {
                                    paths.lock().expect("lock paths").push(path);
                                }
                                serve_behavior(&mut stream, behavior);
                            });
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            std::thread::sleep(Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            });

            Self {
                base_url: format!("http://{addr}"),
                requests,
                paths,
                shutdown_tx,
                join_handle: Some(join_handle),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            let _ = self.shutdown_tx.send(());
            if let Some(handle) = self.join_handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn read_request_path(stream: &mut TcpStream) -> Option<String> {
        stream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .ok()?;
        let mut buf = [0_u8; 1024];
        let mut data = Vec::new();
        while !data.windows(4).any(|window| window == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(read) => data.extend_from_slice(&buf[..read]),
            }
        }
        let head = String::from_utf8_lossy(&data);
        head.lines()
            .next()?
            .split_whitespace()
            .nth(1)
            .map(str::to_string)
    }

    fn serve_behavior(stream: &mut TcpStream, behavior: Behavior) {
        let (status, body) = match behavior {
            Behavior::Respond(status, body) => (status, body),
            Behavior::DelayRespond(delay, status, body) => {
                std::thread::sleep(delay);
                (status, body)
            }
        };
        let payload = body.as_bytes();
        let _ = write!(
            stream,
            "HTTP/1.1 {status} Status\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            payload.len()
        );
        let _ = stream.write_all(payload);
        let _ = stream.flush();
    }

    fn client(timeout_ms: u64, attempts: usize) -> HttpClient {
        HttpClient::new(RetryPolicy {
            timeout: Duration::from_millis(timeout_ms),
            attempts,
            retry_delay: Duration::from_millis(1),
            deadline: Duration::from_secs(5),
        })
    }

    #[test]
    fn retries_throttling_and_server_errors_until_success() {
        let server = TestServer::spawn(vec![
            Behavior::Respond(503, "down".to_string()),
            Behavior::Respond(429, "slow down".to_string()),
            Behavior::Respond(200, "[]".to_string()),
        ]);

        let body = client(500, 3)
            .get_text(&server.base_url, &[])
            .expect("third attempt should succeed");

        assert_eq!(body, "[]");
        assert_eq!(server.request_count(), 3);
    }

    #[test]
    fn does_not_retry_missing_user() {
        let server = TestServer::spawn(vec![Behavior::Respond(404, "no such user".to_string())]);

        let err = client(500, 4)
            .get_text(&server.base_url, &[])
            .expect_err("404 should fail immediately");

        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("no such user"), "unexpected error: {err}");
        assert_eq!(server.request_count(), 1);
    }

    #[test]
    fn slow_response_is_cut_off_by_timeout() {
        let server = TestServer::spawn(vec![
            Behavior::DelayRespond(Duration::from_millis(400), 200, "late".to_string()),
            Behavior::DelayRespond(Duration::from_millis(400), 200, "late".to_string()),
        ]);

        let err = client(50, 2)
            .get_text(&server.base_url, &[])
            .expect_err("both attempts should time out");

        assert!(
            err.to_string().contains("after 2 attempt(s)"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn deadline_bounds_the_whole_call() {
        let server = TestServer::spawn(vec![
            Behavior::DelayRespond(Duration::from_millis(600), 200, "late".to_string()),
            Behavior::DelayRespond(Duration::from_millis(600), 200, "late".to_string()),
            Behavior::DelayRespond(Duration::from_millis(600), 200, "late".to_string()),
        ]);
        let client = HttpClient::new(RetryPolicy {
            timeout: Duration::from_millis(150),
            attempts: 3,
            retry_delay: Duration::from_millis(1),
            deadline: Duration::from_millis(250),
        });

        let started = Instant::now();
        let err = client
            .get_text(&server.base_url, &[])
            .expect_err("every attempt should time out");

        assert!(
            started.elapsed() < Duration::from_millis(450),
            "call ran for {:?}",
            started.elapsed()
        );
        assert!(err.status().is_none(), "unexpected error: {err}");
    }

    #[test]
    fn sends_query_parameters() {
        let server = TestServer::spawn(vec![Behavior::Respond(200, "ok".to_string())]);

        client(500, 1)
            .get_text(
                &format!("{}/animelist/someone/load.json", server.base_url),
                &[("status", "7"), ("offset", "300")],
            )
            .expect("request should succeed");

        let paths = server.paths.lock().expect("lock paths");
        assert_eq!(
            paths.first().map(String::as_str),
            Some("/animelist/someone/load.json?status=7&offset=300")
        );
    }
}
