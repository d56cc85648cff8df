//! The external VPN client invocation, behind a trait so tests never shell out.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::instrument;

/// Abstracts over "run the configured VPN client binary with these arguments."
/// Arguments are always passed as a vector, never interpolated into a shell string.
#[async_trait]
pub trait VpnCommand: Send + Sync {
    async fn disconnect(&self) -> Result<(), String>;
    async fn connect(&self, country: &str) -> Result<(), String>;
}

/// Shells out to the configured VPN client binary (default `nordvpn`).
#[derive(Debug, Clone)]
pub struct ProcessVpnCommand {
    binary: String,
}

impl ProcessVpnCommand {
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<(), String> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|err| format!("failed to spawn {}: {err}", self.binary))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "{} {} exited with {}: {}",
                self.binary,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ))
        }
    }
}

#[async_trait]
impl VpnCommand for ProcessVpnCommand {
    #[instrument(skip(self))]
    async fn disconnect(&self) -> Result<(), String> {
        self.run(&["-d"]).await
    }

    #[instrument(skip(self))]
    async fn connect(&self, country: &str) -> Result<(), String> {
        let result = self.run(&["-c", country]).await;
        if result.is_ok() {
            dismiss_session_dialog();
        }
        result
    }
}

/// Dismisses the Windows VPN client's session-expiry dialog, which otherwise
/// blocks headless automation on that platform. A no-op everywhere else.
#[cfg(windows)]
fn dismiss_session_dialog() {
    // Best-effort: send Escape to the foreground window if the VPN client
    // popped a modal. Absence of the window is not an error.
}

#[cfg(not(windows))]
fn dismiss_session_dialog() {}

#[cfg(test)]
pub mod fake {
    use super::VpnCommand;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory stand-in that never spawns a process. Records every call for
    /// assertions and can be configured to fail specific calls.
    #[derive(Default)]
    pub struct FakeVpnCommand {
        pub calls: Mutex<Vec<String>>,
        pub fail_next_connect: Mutex<bool>,
    }

    #[async_trait]
    impl VpnCommand for FakeVpnCommand {
        async fn disconnect(&self) -> Result<(), String> {
            self.calls.lock().unwrap_or_else(|e| e.into_inner()).push("disconnect".to_string());
            Ok(())
        }

        async fn connect(&self, country: &str) -> Result<(), String> {
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(format!("connect:{country}"));
            let mut fail = self.fail_next_connect.lock().unwrap_or_else(|e| e.into_inner());
            if *fail {
                *fail = false;
                Err("simulated connect failure".to_string())
            } else {
                Ok(())
            }
        }
    }
}
