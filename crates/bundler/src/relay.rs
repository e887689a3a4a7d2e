/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The Relay adapter (spec §4.6): hands a finished RFC-5322 message to
//! the local MTA, either as a direct SMTP submission or a sendmail-
//! compatible subprocess invocation. Both are blocking calls from the
//! caller's point of view — the scheduler runs them via
//! `tokio::task::block_in_place`/`spawn_blocking` so the async reactor
//! is never stalled by a slow relay (spec §5 "the relay call").
//!
//! Retries are out of scope (spec §4.6): a transient failure just means
//! the bundle fails for this cycle and the packets remain for the next
//! one.

use std::{fmt, process::Command, time::Duration};

use common::config::RelayMode;

#[derive(Debug)]
pub enum RelayError {
    Io(std::io::Error),
    /// The sendmail-compatible subprocess exited non-zero.
    NonZeroExit(i32),
    Smtp(String),
    Timeout,
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Io(err) => write!(f, "relay I/O error: {err}"),
            RelayError::NonZeroExit(code) => write!(f, "sendmail exited with status {code}"),
            RelayError::Smtp(msg) => write!(f, "smtp relay error: {msg}"),
            RelayError::Timeout => write!(f, "relay operation timed out"),
        }
    }
}

impl std::error::Error for RelayError {}

/// `Send(rfc5322_bytes, from_addr, to_addr) -> bool` (spec §4.6),
/// reshaped as `Result` so callers can distinguish "delivered" from
/// "transient failure, try again next cycle" without a bare bool.
pub trait RelayAdapter: Send + Sync {
    fn send(&self, rfc5322_bytes: &[u8], from: &str, to: &str) -> Result<(), RelayError>;
}

/// Sendmail-compatible subprocess invocation: `<path> -f <from> -- <to>`,
/// message piped on stdin (spec §4.6).
///
/// Open Question (spec §9, DESIGN.md): a non-zero exit is treated as a
/// transient relay failure — packets are retained and retried next
/// cycle, matching the conservative at-least-once default the rest of
/// the design already commits to.
pub struct SendmailRelay {
    path: String,
    timeout: Duration,
}

impl SendmailRelay {
    pub fn new(path: impl Into<String>) -> Self {
        SendmailRelay {
            path: path.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl RelayAdapter for SendmailRelay {
    fn send(&self, rfc5322_bytes: &[u8], from: &str, to: &str) -> Result<(), RelayError> {
        use std::io::Write;

        let mut child = Command::new(&self.path)
            .arg("-f")
            .arg(from)
            .arg("--")
            .arg(to)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(RelayError::Io)?;

        child
            .stdin
            .as_mut()
            .expect("piped stdin")
            .write_all(rfc5322_bytes)
            .map_err(RelayError::Io)?;

        let output = wait_with_timeout(child, self.timeout)?;
        if output.status.success() {
            Ok(())
        } else {
            tracing::warn!(
                stderr = %String::from_utf8_lossy(&output.stderr),
                "sendmail invocation exited non-zero"
            );
            Err(RelayError::NonZeroExit(output.status.code().unwrap_or(-1)))
        }
    }
}

fn wait_with_timeout(
    mut child: std::process::Child,
    timeout: Duration,
) -> Result<std::process::Output, RelayError> {
    let start = std::time::Instant::now();
    loop {
        match child.try_wait().map_err(RelayError::Io)? {
            Some(_status) => return child.wait_with_output().map_err(RelayError::Io),
            None => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    return Err(RelayError::Timeout);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

/// Direct SMTP submission to the local MTA using `mail-send`'s blocking-
/// friendly client (spec §4.6, second legal implementation). Runs its
/// own single-threaded Tokio runtime per call rather than requiring
/// every caller to be async, matching the "none of these suspend the
/// producer side" contract of spec §5 — callers of `RelayAdapter` in
/// this crate are themselves run from `spawn_blocking`.
pub struct SmtpRelay {
    host: String,
    port: u16,
    timeout: Duration,
}

impl SmtpRelay {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        SmtpRelay {
            host: host.into(),
            port,
            timeout: Duration::from_secs(60),
        }
    }
}

impl RelayAdapter for SmtpRelay {
    fn send(&self, rfc5322_bytes: &[u8], from: &str, to: &str) -> Result<(), RelayError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(RelayError::Io)?;
        runtime.block_on(self.send_async(rfc5322_bytes, from, to))
    }
}

impl SmtpRelay {
    async fn send_async(&self, rfc5322_bytes: &[u8], from: &str, to: &str) -> Result<(), RelayError> {
        use mail_send::{smtp::message::Message as SmtpMessage, SmtpClientBuilder};

        let message = SmtpMessage {
            mail_from: from.to_string().into(),
            rcpt_to: vec![to.to_string().into()],
            body: rfc5322_bytes.into(),
        };

        let mut client = SmtpClientBuilder::new(self.host.as_str(), self.port)
            .implicit_tls(false)
            .timeout(self.timeout)
            .connect_plain()
            .await
            .map_err(|err| RelayError::Smtp(err.to_string()))?;

        client
            .send(message)
            .await
            .map_err(|err| RelayError::Smtp(err.to_string()))?;

        let _ = client.quit().await;
        Ok(())
    }
}

/// Picks the concrete adapter for a configured `RelayMode`.
pub fn relay_for(mode: &RelayMode) -> Box<dyn RelayAdapter> {
    match mode {
        RelayMode::Smtp { host, port } => Box::new(SmtpRelay::new(host.clone(), *port)),
        RelayMode::Sendmail { path } => Box::new(SendmailRelay::new(path.clone())),
    }
}

#[cfg(any(test, feature = "test_mode"))]
pub mod test_double {
    use super::{RelayAdapter, RelayError};
    use parking_lot::Mutex;

    /// Records every send attempt in order instead of touching any MTA;
    /// used by the bundler's own unit tests and the end-to-end `tests`
    /// crate (spec §8 scenarios).
    #[derive(Default)]
    pub struct RecordingRelay {
        sent: Mutex<Vec<RecordedSend>>,
        /// When set, `send` returns this error instead of recording.
        fail_with: Mutex<Option<String>>,
    }

    #[derive(Debug, Clone)]
    pub struct RecordedSend {
        pub bytes: Vec<u8>,
        pub from: String,
        pub to: String,
    }

    impl RecordingRelay {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<RecordedSend> {
            self.sent.lock().clone()
        }

        /// Makes every subsequent `send` call fail, simulating a
        /// transient relay failure (spec §7).
        pub fn fail_next_with(&self, reason: impl Into<String>) {
            *self.fail_with.lock() = Some(reason.into());
        }
    }

    impl RelayAdapter for RecordingRelay {
        fn send(&self, bytes: &[u8], from: &str, to: &str) -> Result<(), RelayError> {
            if let Some(reason) = self.fail_with.lock().take() {
                return Err(RelayError::Smtp(reason));
            }
            self.sent.lock().push(RecordedSend {
                bytes: bytes.to_vec(),
                from: from.to_string(),
                to: to.to_string(),
            });
            Ok(())
        }
    }
}
