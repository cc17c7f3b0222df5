//! `SshTransport` against an in-process russh server on localhost

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use russh::keys::decode_secret_key;
use russh::server::{self, Auth};
use russh::{Channel, ChannelId, CryptoVec, Sig};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use fleetshell_exec::*;

const PASSWORD: &str = "secret";

/// Answers a handful of fixed commands
#[derive(Default)]
struct FixtureShell {
    channels: Vec<Channel<server::Msg>>,
}

impl server::Handler for FixtureShell {
    type Error = russh::Error;

    async fn auth_password(&mut self, _user: &str, password: &str) -> Result<Auth, Self::Error> {
        if password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<server::Msg>,
        _session: &mut server::Session,
    ) -> Result<bool, Self::Error> {
        self.channels.push(channel);
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut server::Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        match data {
            b"echo hi" => {
                session.data(channel, CryptoVec::from_slice(b"hi\n"))?;
                session.exit_status_request(channel, 0)?;
            }
            b"warn" => {
                session.extended_data(channel, 1, CryptoVec::from_slice(b"careful"))?;
                session.exit_status_request(channel, 0)?;
            }
            b"kill" => {
                session.exit_signal_request(channel, Sig::KILL, false, "killed", "en")?;
            }
            _ => session.exit_status_request(channel, 127)?,
        }
        session.eof(channel)?;
        session.close(channel)?;
        Ok(())
    }
}

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Start the server and return its address
async fn spawn_server() -> SocketAddr {
    let pem = std::fs::read_to_string(fixtures().join("id_ed25519")).unwrap();
    let config = Arc::new(server::Config {
        keys: vec![decode_secret_key(&pem, None).unwrap()],
        auth_rejection_time: Duration::from_millis(10),
        inactivity_timeout: None,
        ..Default::default()
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                if let Ok(running) = server::run_stream(config, stream, FixtureShell::default()).await {
                    let _ = running.await;
                }
            });
        }
    });
    addr
}

/// TCP relay whose current connections can be frozen without closing them,
/// the way a network partition looks to the client
struct StallingProxy {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    stall: Arc<Notify>,
}

impl StallingProxy {
    async fn start(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let stall = Arc::new(Notify::new());

        let counter = Arc::clone(&accepted);
        let signal = Arc::clone(&stall);
        tokio::spawn(async move {
            while let Ok((mut client, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let signal = Arc::clone(&signal);
                tokio::spawn(async move {
                    let Ok(mut server) = TcpStream::connect(upstream).await else {
                        return;
                    };
                    let stalled = tokio::select! {
                        _ = tokio::io::copy_bidirectional(&mut client, &mut server) => false,
                        () = signal.notified() => true,
                    };
                    if stalled {
                        // Hold both sockets open and forward nothing
                        std::future::pending::<()>().await;
                    }
                });
            }
        });

        Self {
            addr,
            accepted,
            stall,
        }
    }

    /// Freeze every connection relayed so far
    fn stall(&self) {
        self.stall.notify_waiters();
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

fn dial_params(addr: SocketAddr, password: &str) -> DialParams {
    DialParams {
        host: addr.ip().to_string(),
        port: addr.port(),
        username: "ops".to_string(),
        proofs: vec![AuthProof::Password(password.to_string())],
        connect_timeout: Duration::from_secs(2),
        host_key_policy: HostKeyPolicy::AcceptAny,
    }
}

fn executor_config(addr: SocketAddr, password: &str) -> ExecutorConfig {
    ExecutorConfig::new(addr.ip().to_string(), "ops")
        .with_port(addr.port())
        .with_password(password)
        .with_connect_timeout(Duration::from_secs(2))
        .with_command_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_command_output_and_status() {
    let addr = spawn_server().await;
    let mut exec = Executor::new(executor_config(addr, PASSWORD));

    let result = exec.execute("echo hi").await;
    assert_eq!(result.output, "hi\n");
    assert_eq!(result.status, 0);
    assert!(result.error.is_none());

    let result = exec.execute("warn").await;
    assert_eq!(result.output, "\ncareful");
    assert!(result.is_success());

    let result = exec.execute("missing-command").await;
    assert_eq!(result.status, 127);

    exec.close().await.unwrap();
}

#[tokio::test]
async fn test_signal_reported_as_shell_status() {
    let addr = spawn_server().await;
    let mut exec = Executor::new(executor_config(addr, PASSWORD));

    let result = exec.execute("kill").await;

    assert_eq!(result.status, 137);
    assert!(matches!(
        result.error,
        Some(ExecError::RemoteExit { signal: Some(ref s), .. }) if s == "KILL"
    ));
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let addr = spawn_server().await;
    let mut exec = Executor::new(executor_config(addr, "wrong"));

    let result = exec.execute("echo hi").await;

    assert_eq!(result.status, -1);
    assert!(matches!(
        result.error,
        Some(ExecError::Auth {
            source: AuthError::Rejected { .. },
            ..
        })
    ));
}

#[tokio::test]
async fn test_liveness_check_detects_stalled_connection() {
    let proxy = StallingProxy::start(spawn_server().await).await;
    let mut conn = SshTransport::new()
        .dial(&dial_params(proxy.addr, PASSWORD))
        .await
        .unwrap();

    conn.probe().await.unwrap();

    proxy.stall();
    let err = conn.probe().await.unwrap_err();
    assert!(matches!(err, TransportError::TimedOut(t) if t == Duration::from_secs(2)));
}

#[tokio::test]
async fn test_stalled_connection_is_replaced() {
    let proxy = StallingProxy::start(spawn_server().await).await;
    let mut exec = Executor::new(executor_config(proxy.addr, PASSWORD));

    assert_eq!(exec.execute("echo hi").await.output, "hi\n");
    assert_eq!(proxy.accepted(), 1);

    proxy.stall();

    let result = exec.execute("echo hi").await;
    assert_eq!(result.output, "hi\n");
    assert_eq!(result.status, 0);
    assert_eq!(proxy.accepted(), 2);
}
