//! Fan a command out to many hosts, one executor per host

use std::time::Duration;

use fleetshell_api::{HostTarget, RemoteCommandResponse};
use fleetshell_exec::{Executor, Transport};
use tokio::task::JoinSet;
use tracing::{error, info};

/// Run `command` on every target concurrently
///
/// Results come back in target order. `make_executor` builds a fresh
/// executor per host; each is closed once its command finishes.
pub async fn run_on_hosts<T, F>(
    targets: &[HostTarget],
    command: &str,
    timeout: Option<Duration>,
    make_executor: F,
) -> Vec<RemoteCommandResponse>
where
    T: Transport + 'static,
    F: Fn(&HostTarget) -> Executor<T>,
{
    let mut set = JoinSet::new();

    for (index, target) in targets.iter().enumerate() {
        let mut executor = make_executor(target);
        let target = target.clone();
        let command = command.to_string();

        set.spawn(async move {
            info!(host = %target, "executing remote command");
            let result = match timeout {
                Some(timeout) => executor.execute_with_timeout(&command, timeout).await,
                None => executor.execute(&command).await,
            };

            if let Err(e) = executor.close().await {
                error!(host = %target, error = %e, "failed to close connection");
            }

            match &result.error {
                None => info!(
                    host = %target,
                    status = result.status,
                    duration = ?result.duration,
                    output_len = result.output.len(),
                    "remote command succeeded"
                ),
                Some(e) => error!(
                    host = %target,
                    status = result.status,
                    duration = ?result.duration,
                    error = %e,
                    "remote command failed"
                ),
            }

            (index, RemoteCommandResponse::from_result(&target, &result))
        });
    }

    let mut responses: Vec<Option<RemoteCommandResponse>> = vec![None; targets.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, response)) => responses[index] = Some(response),
            Err(e) => error!(error = %e, "host task panicked"),
        }
    }

    responses
        .into_iter()
        .zip(targets)
        .map(|(response, target)| {
            response.unwrap_or_else(|| RemoteCommandResponse {
                host: target.host.clone(),
                port: target.port,
                output: String::new(),
                status: fleetshell_exec::STATUS_UNAVAILABLE,
                error: Some("host task failed".to_string()),
                duration_ms: 0,
            })
        })
        .collect()
}
