use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use fleetshell_exec::*;

// Mock implementations

#[derive(Default)]
struct MockState {
    dials: AtomicUsize,
    /// Number of upcoming dials that fail with a transport error
    failing_dials: AtomicUsize,
    reject_auth: AtomicBool,
    /// Cleared to simulate a connection that died silently
    alive: AtomicBool,
    /// Passes probes but never confirms a channel open
    half_dead: AtomicBool,
    closes: AtomicUsize,
    terminated: AtomicUsize,
    dial_times: Mutex<Vec<Instant>>,
    last_params: Mutex<Option<DialParams>>,
}

#[derive(Clone, Default)]
struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    fn dials(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    fn fail_next(&self, count: usize) {
        self.state.failing_dials.store(count, Ordering::SeqCst);
    }

    fn kill_connection(&self) {
        self.state.alive.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Connection = MockConnection;

    async fn dial(&self, params: &DialParams) -> Result<MockConnection, TransportError> {
        self.state.dials.fetch_add(1, Ordering::SeqCst);
        self.state.dial_times.lock().unwrap().push(Instant::now());
        *self.state.last_params.lock().unwrap() = Some(params.clone());

        let failing = self.state.failing_dials.load(Ordering::SeqCst);
        if failing > 0 {
            self.state.failing_dials.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::Protocol("connection refused".to_string()));
        }
        if self.state.reject_auth.load(Ordering::SeqCst) {
            return Err(TransportError::AuthRejected {
                username: params.username.clone(),
            });
        }

        self.state.alive.store(true, Ordering::SeqCst);
        Ok(MockConnection {
            state: Arc::clone(&self.state),
        })
    }
}

struct MockConnection {
    state: Arc<MockState>,
}

#[async_trait]
impl Connection for MockConnection {
    type Session = MockSession;

    async fn probe(&mut self) -> Result<(), TransportError> {
        if self.state.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    async fn open_session(&mut self) -> Result<MockSession, TransportError> {
        if self.state.half_dead.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(MockSession {
            state: Arc::clone(&self.state),
            events: VecDeque::new(),
            hang: false,
        })
    }

    async fn close(self) -> Result<(), TransportError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct MockSession {
    state: Arc<MockState>,
    events: VecDeque<SessionEvent>,
    hang: bool,
}

/// Behaves like a tiny remote shell for the commands used in these tests
#[async_trait]
impl Session for MockSession {
    async fn exec(&mut self, command: &str) -> Result<(), TransportError> {
        let out = |s: &str| SessionEvent::Stdout(s.as_bytes().to_vec());
        let events = match command {
            "echo hi" => vec![out("hi\n"), SessionEvent::Eof, SessionEvent::ExitStatus(0)],
            "exit 7" => vec![SessionEvent::Eof, SessionEvent::ExitStatus(7)],
            "sleep 60" => {
                self.hang = true;
                vec![]
            }
            "echo start; sleep 60" => {
                self.hang = true;
                vec![out("start\n")]
            }
            other => return Err(TransportError::Protocol(format!("unknown command {other}"))),
        };
        self.events = events.into();
        if !self.hang {
            self.events.push_back(SessionEvent::Closed);
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        match self.events.pop_front() {
            Some(event) => Some(event),
            None if self.hang => std::future::pending().await,
            None => None,
        }
    }

    async fn terminate(&mut self) -> Result<(), TransportError> {
        self.state.terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn ops_config() -> ExecutorConfig {
    ExecutorConfig::new("10.0.0.5", "ops")
        .with_port(22)
        .with_password("x")
}

fn executor(config: ExecutorConfig) -> (Executor<MockTransport>, MockTransport) {
    let transport = MockTransport::default();
    (Executor::with_transport(config, transport.clone()), transport)
}

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

#[tokio::test]
async fn test_echo_succeeds() {
    let (mut exec, transport) = executor(ops_config());

    let result = exec.execute("echo hi").await;

    assert_eq!(result.output, "hi\n");
    assert_eq!(result.status, 0);
    assert!(result.error.is_none());
    assert_eq!(transport.dials(), 1);
}

#[tokio::test]
async fn test_non_zero_exit_reports_status() {
    let (mut exec, _transport) = executor(ops_config());

    let result = exec.execute("exit 7").await;

    assert_eq!(result.status, 7);
    assert_eq!(result.output, "");
    assert!(matches!(
        result.error,
        Some(ExecError::RemoteExit { status: 7, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_returns_sentinel_and_keeps_connection() {
    let (mut exec, transport) = executor(ops_config());

    let result = exec
        .execute_with_timeout("echo start; sleep 60", Duration::from_secs(1))
        .await;

    assert_eq!(result.status, -1);
    assert_eq!(result.output, "start\n");
    let err = result.error.expect("timeout error");
    assert!(matches!(err, ExecError::Timeout { .. }));
    assert!(err.to_string().contains("1s"));
    assert_eq!(transport.state.terminated.load(Ordering::SeqCst), 1);

    // Only the session was torn down
    let result = exec.execute("echo hi").await;
    assert!(result.is_success());
    assert_eq!(transport.dials(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_configured_command_timeout() {
    let config = ops_config().with_command_timeout(Duration::from_secs(1));
    let (mut exec, _transport) = executor(config);

    let start = Instant::now();
    let result = exec.execute("sleep 60").await;

    assert_eq!(result.status, -1);
    assert!(matches!(
        result.error,
        Some(ExecError::Timeout { timeout }) if timeout == Duration::from_secs(1)
    ));
    assert!(start.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_uses_default() {
    let (mut exec, _transport) = executor(ops_config());

    let start = Instant::now();
    let result = exec.execute_with_timeout("sleep 60", Duration::ZERO).await;

    assert!(matches!(
        result.error,
        Some(ExecError::Timeout { timeout }) if timeout == DEFAULT_COMMAND_TIMEOUT
    ));
    assert!(start.elapsed() >= DEFAULT_COMMAND_TIMEOUT);
    assert!(start.elapsed() < Duration::from_secs(60));
}

#[tokio::test]
async fn test_live_connection_is_reused() {
    let (mut exec, transport) = executor(ops_config());

    assert!(exec.execute("echo hi").await.is_success());
    assert!(exec.execute("echo hi").await.is_success());

    assert_eq!(transport.dials(), 1);
}

#[tokio::test]
async fn test_dead_connection_is_replaced() {
    let (mut exec, transport) = executor(ops_config());

    assert!(exec.execute("echo hi").await.is_success());
    transport.kill_connection();
    assert!(exec.execute("echo hi").await.is_success());

    assert_eq!(transport.dials(), 2);
    // The stale handle was released before redialing
    assert_eq!(transport.state.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_then_execute_redials_once() {
    let (mut exec, transport) = executor(ops_config());

    assert!(exec.execute("echo hi").await.is_success());
    exec.close().await.unwrap();
    assert!(exec.execute("echo hi").await.is_success());

    assert_eq!(transport.dials(), 2);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (mut exec, transport) = executor(ops_config());

    // Never connected
    exec.close().await.unwrap();
    assert_eq!(transport.state.closes.load(Ordering::SeqCst), 0);

    exec.connect().await.unwrap();
    exec.close().await.unwrap();
    exec.close().await.unwrap();
    assert_eq!(transport.state.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_is_connected() {
    let (mut exec, transport) = executor(ops_config());

    assert!(!exec.is_connected().await);
    exec.connect().await.unwrap();
    assert!(exec.is_connected().await);

    transport.kill_connection();
    assert!(!exec.is_connected().await);

    exec.close().await.unwrap();
    assert!(!exec.is_connected().await);
    assert_eq!(transport.dials(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dial_retries_with_doubling_backoff() {
    let (mut exec, transport) = executor(ops_config());
    transport.fail_next(usize::MAX);

    let start = Instant::now();
    let result = exec.execute("echo hi").await;

    assert_eq!(result.status, -1);
    assert_eq!(result.output, "");
    match result.error {
        Some(ExecError::Connect {
            attempts,
            last_cause,
            ..
        }) => {
            assert_eq!(attempts, 3);
            assert!(last_cause.contains("connection refused"));
        }
        other => panic!("expected connect error, got {other:?}"),
    }
    assert_eq!(transport.dials(), 3);

    let times = transport.state.dial_times.lock().unwrap().clone();
    assert_eq!(times[1] - times[0], Duration::from_secs(2));
    assert_eq!(times[2] - times[1], Duration::from_secs(4));
    assert_eq!(start.elapsed(), Duration::from_secs(6));
    assert!(!exec.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_transient_dial_failure_recovers() {
    let (mut exec, transport) = executor(ops_config());
    transport.fail_next(2);

    let result = exec.execute("echo hi").await;

    assert!(result.is_success());
    assert_eq!(transport.dials(), 3);
}

#[tokio::test]
async fn test_no_credentials_never_dials() {
    let (mut exec, transport) = executor(ExecutorConfig::new("10.0.0.5", "ops"));

    let result = exec.execute("echo hi").await;

    assert_eq!(result.status, -1);
    let err = result.error.expect("auth error");
    assert_eq!(err.auth_error(), Some(&AuthError::NoCredentials));
    assert!(!err.is_retryable());
    assert_eq!(transport.dials(), 0);
}

#[tokio::test]
async fn test_rejected_credentials_are_not_retried() {
    let (mut exec, transport) = executor(ops_config());
    transport.state.reject_auth.store(true, Ordering::SeqCst);

    let err = exec.connect().await.unwrap_err();

    assert!(matches!(
        err.auth_error(),
        Some(AuthError::Rejected { username }) if username == "ops"
    ));
    assert_eq!(transport.dials(), 1);
}

#[tokio::test]
async fn test_dial_params() {
    let config = ops_config().with_private_key("~/id_ed25519");
    let transport = MockTransport::default();
    let mut exec = Executor::with_parts(
        config,
        transport.clone(),
        CredentialResolver::with_home_dir(fixtures()),
    );

    exec.connect().await.unwrap();

    let params = transport.state.last_params.lock().unwrap().clone().unwrap();
    assert_eq!(params.host, "10.0.0.5");
    assert_eq!(params.port, 22);
    assert_eq!(params.username, "ops");
    assert_eq!(params.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    assert!(!params.host_key_policy.verifies());
    let methods: Vec<_> = params.proofs.iter().map(AuthProof::method).collect();
    assert_eq!(methods, vec!["password", "publickey"]);
}

#[tokio::test]
async fn test_host_verification_is_opt_in() {
    let config = ops_config()
        .with_connect_timeout(Duration::from_secs(3))
        .verify_host_identity();
    let (mut exec, transport) = executor(config);

    exec.connect().await.unwrap();

    let params = transport.state.last_params.lock().unwrap().clone().unwrap();
    assert!(params.host_key_policy.verifies());
    assert_eq!(params.connect_timeout, Duration::from_secs(3));
}

#[tokio::test]
async fn test_key_is_resolved_on_every_dial() {
    let home = std::env::temp_dir().join(format!("fleetshell-keys-{}", std::process::id()));
    std::fs::create_dir_all(&home).unwrap();
    std::fs::copy(fixtures().join("id_ed25519"), home.join("id_ed25519")).unwrap();

    let config = ExecutorConfig::new("10.0.0.5", "ops").with_private_key("~/id_ed25519");
    let transport = MockTransport::default();
    let mut exec = Executor::with_parts(
        config,
        transport.clone(),
        CredentialResolver::with_home_dir(&home),
    );

    assert!(exec.execute("echo hi").await.is_success());

    std::fs::remove_file(home.join("id_ed25519")).unwrap();
    // Live connection: no resolution needed
    assert!(exec.execute("echo hi").await.is_success());

    transport.kill_connection();
    let result = exec.execute("echo hi").await;
    assert!(matches!(
        result.error.as_ref().and_then(ExecError::auth_error),
        Some(AuthError::KeyUnreadable { .. })
    ));
    assert_eq!(transport.dials(), 1);

    std::fs::remove_dir_all(&home).unwrap();
}

#[tokio::test]
async fn test_encrypted_key_fails_fast() {
    let config = ExecutorConfig::new("10.0.0.5", "ops").with_private_key("~/id_ed25519_encrypted");
    let transport = MockTransport::default();
    let mut exec = Executor::with_parts(
        config,
        transport.clone(),
        CredentialResolver::with_home_dir(fixtures()),
    );

    let err = exec.connect().await.unwrap_err();

    assert!(matches!(
        err.auth_error(),
        Some(AuthError::EncryptedKey { .. })
    ));
    assert_eq!(transport.dials(), 0);
}

#[tokio::test]
async fn test_shared_executor_serializes_callers() {
    let transport = MockTransport::default();
    let shared = Arc::new(SharedExecutor::new(Executor::with_transport(
        ops_config(),
        transport.clone(),
    )));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let shared = Arc::clone(&shared);
        handles.push(tokio::spawn(async move { shared.run("echo hi").await }));
    }
    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.output, "hi\n");
    }

    assert_eq!(transport.dials(), 1);
    assert!(shared.is_connected().await);
    shared.close().await.unwrap();
    assert!(!shared.is_connected().await);
    assert_eq!(shared.executor_type(), "ssh");
}

#[tokio::test(start_paused = true)]
async fn test_half_dead_connection_is_bounded_by_command_timeout() {
    let (mut exec, transport) = executor(ops_config());
    exec.connect().await.unwrap();
    transport.state.half_dead.store(true, Ordering::SeqCst);

    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(3600),
        exec.execute_with_timeout("echo hi", Duration::from_secs(1)),
    )
    .await
    .expect("execution must not outlive its timeout");

    assert_eq!(started.elapsed(), Duration::from_secs(1));
    assert_eq!(result.status, -1);
    assert!(matches!(result.error, Some(ExecError::Timeout { .. })));
    assert_eq!(transport.dials(), 1);
}
