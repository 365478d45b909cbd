// SPDX-License-Identifier: Apache-2.0

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;

use ramdata_core::{EngineConfig, ENV_RAMDATA_LOG_LEVEL};
use tracing::{debug, info, info_span, warn};

use super::protocol::{decode_frame, encode_frame, Handshake, Reply, Request, Response, PROTOCOL_VERSION};
use crate::backends::StoreSpec;
use crate::error::{StoreError, StoreErrorCode};

struct WorkerChannel {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl WorkerChannel {
    fn exchange(&mut self, line: &str) -> Result<Response, StoreError> {
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|()| self.stdin.flush())
            .map_err(|e| StoreError::new(StoreErrorCode::Io, format!("worker pipe closed: {e}")))?;
        let mut reply = String::new();
        let n = self
            .stdout
            .read_line(&mut reply)
            .map_err(|e| StoreError::new(StoreErrorCode::Io, format!("worker pipe closed: {e}")))?;
        if n == 0 {
            return Err(StoreError::new(StoreErrorCode::Io, "worker exited unexpectedly"));
        }
        decode_frame(&reply)
    }
}

/// A spawned store worker. Requests are serialized over one pipe pair;
/// callers on several threads take turns.
pub struct IsolationServer {
    spec: StoreSpec,
    pid: u32,
    channel: Mutex<Option<WorkerChannel>>,
}

impl IsolationServer {
    pub fn spawn(spec: &StoreSpec, config: &EngineConfig) -> Result<Self, StoreError> {
        let bin = config
            .resolve_worker_bin()
            .map_err(|e| StoreError::new(StoreErrorCode::Internal, e))?;
        let _span = info_span!("isolation_spawn", bin = %bin.display()).entered();
        let mut command = Command::new(&bin);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Ok(level) = std::env::var(ENV_RAMDATA_LOG_LEVEL) {
            command.env(ENV_RAMDATA_LOG_LEVEL, level);
        }
        let mut child = command.spawn().map_err(|e| {
            StoreError::new(
                StoreErrorCode::Io,
                format!("failed to start store worker at {}: {e}", bin.display()),
            )
        })?;
        let pid = child.id();
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(StoreError::new(StoreErrorCode::Internal, "worker pipes unavailable"));
        };
        let mut channel = WorkerChannel {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };
        let handshake = encode_frame(&Handshake {
            protocol_version: PROTOCOL_VERSION,
            spec: spec.clone(),
        })?;
        match channel.exchange(&handshake).and_then(Response::into_result) {
            Ok(_) => {}
            Err(e) => {
                warn!(pid, error = %e, "store worker rejected handshake");
                let _ = channel.child.kill();
                let _ = channel.child.wait();
                return Err(e);
            }
        }
        info!(pid, backend = spec.kind().as_str(), "store worker started");
        Ok(Self {
            spec: spec.clone(),
            pid,
            channel: Mutex::new(Some(channel)),
        })
    }

    #[must_use]
    pub fn spec(&self) -> &StoreSpec {
        &self.spec
    }

    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.channel.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    /// Sends one request and waits for its response.
    pub fn request(&self, request: &Request) -> Result<Reply, StoreError> {
        let line = encode_frame(request)?;
        let mut guard = self
            .channel
            .lock()
            .map_err(|_| StoreError::new(StoreErrorCode::Internal, "worker channel poisoned"))?;
        let Some(channel) = guard.as_mut() else {
            return Err(StoreError::new(
                StoreErrorCode::Io,
                format!("store worker {} was terminated", self.pid),
            ));
        };
        debug!(pid = self.pid, op = request.name(), "isolated request");
        match channel.exchange(&line) {
            Ok(response) => response.into_result(),
            Err(e) => {
                // a broken pipe leaves the worker unusable
                if let Some(mut dead) = guard.take() {
                    let _ = dead.child.kill();
                    let _ = dead.child.wait();
                }
                Err(e)
            }
        }
    }

    /// Stops the worker. Later calls do nothing.
    pub fn terminate(&self) {
        let Ok(mut guard) = self.channel.lock() else {
            return;
        };
        let Some(mut channel) = guard.take() else {
            return;
        };
        let clean = encode_frame(&Request::Shutdown)
            .and_then(|line| channel.exchange(&line))
            .is_ok();
        drop(channel.stdin);
        if !clean {
            let _ = channel.child.kill();
        }
        let _ = channel.child.wait();
        info!(pid = self.pid, clean, "store worker stopped");
    }
}

impl Drop for IsolationServer {
    fn drop(&mut self) {
        self.terminate();
    }
}
