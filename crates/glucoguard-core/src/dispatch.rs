//! Command dispatch port.
//!
//! The controller talks to the remote command gateway only through
//! [`CommandDispatcher`]. Dispatchers never retry; retry is the caller's
//! decision.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::command::{CommandResponse, CommandSpec};
use crate::error::{CommandFailure, Error, Result};

/// Remote actuation and query calls.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Issue a set command with parameters to a device.
    async fn issue(&self, device: &str, command: &CommandSpec) -> Result<CommandResponse>;

    /// Read a command's current value from a device.
    async fn query(&self, device: &str, command_name: &str) -> Result<CommandResponse>;
}

#[async_trait]
impl<T: CommandDispatcher + ?Sized> CommandDispatcher for Arc<T> {
    async fn issue(&self, device: &str, command: &CommandSpec) -> Result<CommandResponse> {
        (**self).issue(device, command).await
    }

    async fn query(&self, device: &str, command_name: &str) -> Result<CommandResponse> {
        (**self).query(device, command_name).await
    }
}

/// Puts a hard deadline on every call of the wrapped dispatcher.
///
/// A call that outlives the deadline is dropped and reported as
/// `CommandFailed` with [`CommandFailure::Timeout`].
pub struct TimedDispatcher<D> {
    inner: D,
    timeout: Duration,
}

impl<D: CommandDispatcher> TimedDispatcher<D> {
    pub fn new(inner: D, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl<D: CommandDispatcher> CommandDispatcher for TimedDispatcher<D> {
    async fn issue(&self, device: &str, command: &CommandSpec) -> Result<CommandResponse> {
        match tokio::time::timeout(self.timeout, self.inner.issue(device, command)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    device,
                    command = %command.command_name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Command timed out"
                );
                Err(Error::command_failed(
                    device,
                    &command.command_name,
                    CommandFailure::Timeout,
                ))
            }
        }
    }

    async fn query(&self, device: &str, command_name: &str) -> Result<CommandResponse> {
        match tokio::time::timeout(self.timeout, self.inner.query(device, command_name)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    device,
                    command = command_name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Query timed out"
                );
                Err(Error::command_failed(device, command_name, CommandFailure::Timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hanging;

    #[async_trait]
    impl CommandDispatcher for Hanging {
        async fn issue(&self, _device: &str, _command: &CommandSpec) -> Result<CommandResponse> {
            futures::future::pending().await
        }

        async fn query(&self, _device: &str, _command_name: &str) -> Result<CommandResponse> {
            futures::future::pending().await
        }
    }

    struct Immediate;

    #[async_trait]
    impl CommandDispatcher for Immediate {
        async fn issue(&self, _device: &str, _command: &CommandSpec) -> Result<CommandResponse> {
            Ok(CommandResponse::ok())
        }

        async fn query(&self, _device: &str, _command_name: &str) -> Result<CommandResponse> {
            Ok(CommandResponse::with_body(200, serde_json::json!({"Bool": "false"})))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_issue_times_out() {
        let dispatcher = TimedDispatcher::new(Hanging, Duration::from_secs(5));
        let err = dispatcher
            .issue("insulin-injector", &CommandSpec::new("WriteBoolValue"))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_query_times_out() {
        let dispatcher = TimedDispatcher::new(Hanging, Duration::from_secs(5));
        let err = dispatcher.query("insulin-injector", "WriteBoolValue").await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_fast_calls_pass_through() {
        let dispatcher = TimedDispatcher::new(Immediate, Duration::from_secs(5));
        let response = dispatcher
            .issue("insulin-injector", &CommandSpec::new("WriteBoolValue"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let response = dispatcher.query("insulin-injector", "WriteBoolValue").await.unwrap();
        assert_eq!(response.body["Bool"], "false");
    }
}
