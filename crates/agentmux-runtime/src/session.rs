use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::broadcast;
use tracing::debug;

use agentmux_core::{ProjectId, SessionStatus};

use crate::{LaunchSpec, RingBuffer, RuntimeError, RuntimeResult, TerminalEmulator,
    TerminalSnapshot};

const READ_CHUNK_SIZE: usize = 4 * 1024;
const OUTPUT_CHANNEL_SLOTS: usize = 512;
const HISTORY_CAPACITY: usize = 50_000;
const SCROLLBACK_LINES: usize = 2_000;

struct Lifecycle {
    status: SessionStatus,
    exit_error: Option<String>,
}

/// One agent child process bound to a pseudo-terminal.
///
/// Two background threads run while the session is live: a read loop on the
/// PTY master feeding the ring buffer, emulator, and output channel, and a
/// wait loop reaping the child. The output channel is a bounded broadcast:
/// when a subscriber falls behind, the oldest frames are overwritten and the
/// subscriber skips ahead, while the ring buffer keeps the true trailing
/// history.
pub struct PtySession {
    id: ProjectId,
    command_line: String,
    lifecycle: RwLock<Lifecycle>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    killer: Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>,
    output_tx: Mutex<Option<broadcast::Sender<Vec<u8>>>>,
    history: RingBuffer,
    emulator: Mutex<TerminalEmulator>,
    stop_fired: AtomicBool,
}

pub struct OutputSubscription {
    receiver: broadcast::Receiver<Vec<u8>>,
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("id", &self.id)
            .field("command_line", &self.command_line)
            .finish_non_exhaustive()
    }
}

impl PtySession {
    pub fn new(id: ProjectId, spec: &LaunchSpec) -> RuntimeResult<Self> {
        let emulator = TerminalEmulator::new(spec.rows, spec.cols, SCROLLBACK_LINES)?;
        Ok(Self {
            id,
            command_line: spec.command_line.clone(),
            lifecycle: RwLock::new(Lifecycle {
                status: SessionStatus::Idle,
                exit_error: None,
            }),
            master: Mutex::new(None),
            writer: Mutex::new(None),
            killer: Mutex::new(None),
            output_tx: Mutex::new(None),
            history: RingBuffer::new(HISTORY_CAPACITY),
            emulator: Mutex::new(emulator),
            stop_fired: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &ProjectId {
        &self.id
    }

    /// Launches the child on a fresh PTY and transitions `Idle -> Running`.
    /// Any failure before the child is up leaves the session in `Error` with
    /// the reconstructed command line in the cause.
    pub fn start(self: &Arc<Self>, spec: &LaunchSpec) -> RuntimeResult<()> {
        {
            let lifecycle = self.lifecycle.read().expect("lifecycle lock poisoned");
            if lifecycle.status == SessionStatus::Running {
                return Err(RuntimeError::Configuration(
                    "session already running".to_owned(),
                ));
            }
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|error| self.fail_start(error.to_string()))?;

        let mut command = CommandBuilder::new(&spec.program);
        command.cwd(&spec.cwd);
        for arg in &spec.args {
            command.arg(arg);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(command)
            .map_err(|error| self.fail_start(error.to_string()))?;
        // The slave handle must not outlive the spawn; the child owns the
        // sole reference to the replica end from here on.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|error| self.fail_start(error.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|error| self.fail_start(error.to_string()))?;
        let killer = child.clone_killer();

        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_SLOTS);
        *self.master.lock().expect("master lock poisoned") = Some(pair.master);
        *self.writer.lock().expect("writer lock poisoned") = Some(writer);
        *self.killer.lock().expect("killer lock poisoned") = Some(killer);
        *self.output_tx.lock().expect("output lock poisoned") = Some(output_tx.clone());
        self.lifecycle
            .write()
            .expect("lifecycle lock poisoned")
            .status = SessionStatus::Running;

        let session = Arc::clone(self);
        std::thread::spawn(move || session.read_loop(reader, output_tx));
        let session = Arc::clone(self);
        std::thread::spawn(move || session.wait_loop(child));
        Ok(())
    }

    fn fail_start(&self, reason: String) -> RuntimeError {
        let error = RuntimeError::ChildStart {
            command: self.command_line.clone(),
            reason,
        };
        let mut lifecycle = self.lifecycle.write().expect("lifecycle lock poisoned");
        lifecycle.status = SessionStatus::Error;
        lifecycle.exit_error = Some(error.to_string());
        error
    }

    fn read_loop(&self, mut reader: Box<dyn Read + Send>, output_tx: broadcast::Sender<Vec<u8>>) {
        let mut scratch = [0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut scratch) {
                Ok(0) => break,
                Ok(read) => {
                    // Fresh buffer per chunk: the channel hands ownership to
                    // subscribers and must never alias the scratch space.
                    let chunk = scratch[..read].to_vec();
                    self.history.write(&chunk);
                    if let Ok(mut emulator) = self.emulator.lock() {
                        emulator.process(&chunk);
                    }
                    let _ = output_tx.send(chunk);
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    debug!(session = %self.id, %error, "pty read loop ended");
                    break;
                }
            }
        }

        self.demote_to_stopped();
        // Taking the session-held sender closes the channel once the local
        // clone drops; subscribers observe Closed, never a silent stall.
        self.output_tx.lock().expect("output lock poisoned").take();
    }

    fn wait_loop(&self, mut child: Box<dyn Child + Send + Sync>) {
        match child.wait() {
            Ok(status) if !status.success() => {
                let mut lifecycle = self.lifecycle.write().expect("lifecycle lock poisoned");
                lifecycle.exit_error = Some(format!("exited with {status}"));
                if lifecycle.status == SessionStatus::Running {
                    lifecycle.status = SessionStatus::Stopped;
                }
            }
            Ok(_) => self.demote_to_stopped(),
            Err(error) => {
                let mut lifecycle = self.lifecycle.write().expect("lifecycle lock poisoned");
                lifecycle.exit_error = Some(error.to_string());
                if lifecycle.status == SessionStatus::Running {
                    lifecycle.status = SessionStatus::Stopped;
                }
            }
        }
    }

    fn demote_to_stopped(&self) {
        let mut lifecycle = self.lifecycle.write().expect("lifecycle lock poisoned");
        if lifecycle.status == SessionStatus::Running {
            lifecycle.status = SessionStatus::Stopped;
        }
    }

    /// Sends bytes to the child's stdin. Only valid while `Running`.
    pub fn write(&self, data: &[u8]) -> RuntimeResult<usize> {
        {
            let lifecycle = self.lifecycle.read().expect("lifecycle lock poisoned");
            if lifecycle.status != SessionStatus::Running {
                return Err(RuntimeError::SessionNotRunning(
                    self.id.as_str().to_owned(),
                ));
            }
        }
        let mut writer = self.writer.lock().expect("writer lock poisoned");
        let writer = writer
            .as_mut()
            .ok_or_else(|| RuntimeError::SessionNotRunning(self.id.as_str().to_owned()))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(data.len())
    }

    pub fn resize(&self, rows: u16, cols: u16) -> RuntimeResult<()> {
        if rows == 0 || cols == 0 {
            return Err(RuntimeError::Configuration(
                "resize requires non-zero rows and columns".to_owned(),
            ));
        }
        let master = self.master.lock().expect("master lock poisoned");
        let master = master
            .as_ref()
            .ok_or_else(|| RuntimeError::SessionNotRunning(self.id.as_str().to_owned()))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|error| RuntimeError::Pty(error.to_string()))?;
        if let Ok(mut emulator) = self.emulator.lock() {
            emulator.resize(rows, cols)?;
        }
        Ok(())
    }

    /// Idempotent teardown: demotes the status, closes the PTY master (which
    /// delivers EOF to the read loop and usually ends the child), and sends
    /// a kill as a backstop. Safe to call from any thread, any number of
    /// times.
    pub fn stop(&self) -> RuntimeResult<()> {
        if self.stop_fired.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.demote_to_stopped();
        self.writer.lock().expect("writer lock poisoned").take();
        self.master.lock().expect("master lock poisoned").take();
        if let Some(mut killer) = self.killer.lock().expect("killer lock poisoned").take() {
            let _ = killer.kill();
        }
        Ok(())
    }

    /// Subscribes to the live output stream. Fails once the read loop has
    /// closed the channel.
    pub fn subscribe(&self) -> RuntimeResult<OutputSubscription> {
        let output_tx = self.output_tx.lock().expect("output lock poisoned");
        let sender = output_tx
            .as_ref()
            .ok_or_else(|| RuntimeError::OutputClosed(self.id.as_str().to_owned()))?;
        Ok(OutputSubscription {
            receiver: sender.subscribe(),
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.lifecycle
            .read()
            .expect("lifecycle lock poisoned")
            .status
    }

    /// Trailing history as recorded by the read loop, oldest byte first.
    pub fn history(&self) -> Vec<u8> {
        self.history.snapshot()
    }

    pub fn exit_error(&self) -> Option<String> {
        self.lifecycle
            .read()
            .expect("lifecycle lock poisoned")
            .exit_error
            .clone()
    }

    pub fn screen(&self) -> TerminalSnapshot {
        self.emulator
            .lock()
            .expect("emulator lock poisoned")
            .snapshot()
    }
}

impl OutputSubscription {
    /// Next chunk, or `None` once the session's output channel has closed.
    /// A lagged subscriber silently skips the overwritten frames; the ring
    /// buffer retains the authoritative history.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.receiver.recv().await {
                Ok(bytes) => return Some(bytes),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "output subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant used by the pump's batching drain. `None` means
    /// nothing immediately available (empty or closed).
    pub fn try_next_chunk(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.receiver.try_recv() {
                Ok(bytes) => return Some(bytes),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn shell_spec(script: &str) -> LaunchSpec {
        LaunchSpec {
            program: "sh".to_owned(),
            args: vec!["-c".to_owned(), script.to_owned()],
            cwd: std::env::current_dir().expect("resolve current dir"),
            env: Vec::new(),
            command_line: format!("sh -c {script}"),
            rows: 24,
            cols: 80,
        }
    }

    fn started(command: &str) -> Arc<PtySession> {
        let spec = shell_spec(command);
        let session =
            Arc::new(PtySession::new(ProjectId::new("sess-test"), &spec).expect("create session"));
        session.start(&spec).expect("start session");
        session
    }

    async fn collect_until_closed(subscription: &mut OutputSubscription) -> Vec<u8> {
        let mut collected = Vec::new();
        while let Some(chunk) = tokio::time::timeout(Duration::from_secs(5), subscription.next_chunk())
            .await
            .expect("pty output should arrive before the timeout")
        {
            collected.extend_from_slice(&chunk);
        }
        collected
    }

    async fn wait_for_status(session: &PtySession, wanted: SessionStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while session.status() != wanted {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session should reach the wanted status");
    }

    #[tokio::test]
    async fn launch_and_echo_records_history_and_stops_clean() {
        let session = started("printf hello");
        let mut subscription = session.subscribe().expect("subscribe to output");

        let output = collect_until_closed(&mut subscription).await;
        assert!(String::from_utf8_lossy(&output).contains("hello"));

        wait_for_status(&session, SessionStatus::Stopped).await;
        assert_eq!(session.exit_error(), None);
        assert_eq!(session.history(), output);
    }

    #[tokio::test]
    async fn write_is_rejected_after_stop() {
        let session = started("sleep 5");
        wait_for_status(&session, SessionStatus::Running).await;
        assert!(session.write(b"ignored\n").is_ok());

        session.stop().expect("stop session");
        let error = session.write(b"late").expect_err("write after stop should fail");
        assert!(matches!(error, RuntimeError::SessionNotRunning(_)));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_closes_the_channel_once() {
        let session = started("sleep 5");
        wait_for_status(&session, SessionStatus::Running).await;
        let mut subscription = session.subscribe().expect("subscribe to output");

        for _ in 0..5 {
            session.stop().expect("repeated stop should succeed");
        }
        assert_eq!(session.status(), SessionStatus::Stopped);

        // Closing the master EOFs the read loop, which closes the channel.
        let drained = collect_until_closed(&mut subscription).await;
        let _ = drained;
        assert!(matches!(
            session.subscribe(),
            Err(RuntimeError::OutputClosed(_))
        ));
    }

    #[tokio::test]
    async fn resize_rejects_zero_dimensions() {
        let session = started("sleep 2");
        wait_for_status(&session, SessionStatus::Running).await;

        assert!(session.resize(0, 40).is_err());
        assert!(session.resize(10, 0).is_err());
        session.resize(10, 40).expect("valid resize");
        assert_eq!(session.screen().rows, 10);
        assert_eq!(session.screen().cols, 40);
        session.stop().expect("stop session");
    }

    #[tokio::test]
    async fn child_observes_resized_dimensions() {
        let session = started("sleep 1; stty size");
        wait_for_status(&session, SessionStatus::Running).await;
        session.resize(10, 40).expect("resize session");

        let mut subscription = session.subscribe().expect("subscribe to output");
        let output = collect_until_closed(&mut subscription).await;
        assert!(String::from_utf8_lossy(&output).contains("10 40"));
    }

    #[tokio::test]
    async fn echoed_input_round_trips() {
        let session = started("read line; printf 'got:%s\\n' \"$line\"; sleep 1");
        wait_for_status(&session, SessionStatus::Running).await;
        let mut subscription = session.subscribe().expect("subscribe to output");

        session.write(b"ping\n").expect("write to session");
        let output = collect_until_closed(&mut subscription).await;
        assert!(String::from_utf8_lossy(&output).contains("got:ping"));
    }

    #[tokio::test]
    async fn fast_producer_never_starves_a_slow_consumer() {
        // Emit far more than the channel can hold while the consumer sleeps;
        // frames must keep arriving and history must keep the newest bytes.
        let session = started("i=0; while [ $i -lt 2000 ]; do echo line-$i; i=$((i+1)); done; echo DONE-MARKER");
        let mut subscription = session.subscribe().expect("subscribe to output");

        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut seen_any = false;
        while let Some(chunk) = tokio::time::timeout(Duration::from_secs(5), subscription.next_chunk())
            .await
            .expect("subscriber must keep receiving frames")
        {
            seen_any = !chunk.is_empty() || seen_any;
        }
        assert!(seen_any);

        let history = String::from_utf8_lossy(&session.history()).to_string();
        assert!(history.contains("DONE-MARKER"));
    }

    #[test]
    fn start_failure_wraps_the_command_line() {
        let spec = LaunchSpec {
            program: "agentmux-definitely-missing-binary".to_owned(),
            args: vec!["--flag".to_owned()],
            cwd: std::env::current_dir().expect("resolve current dir"),
            env: Vec::new(),
            command_line: "agentmux-definitely-missing-binary --flag".to_owned(),
            rows: 24,
            cols: 80,
        };
        let session =
            Arc::new(PtySession::new(ProjectId::new("sess-bad"), &spec).expect("create session"));

        let error = session.start(&spec).expect_err("missing binary should fail");
        assert!(error
            .to_string()
            .contains("agentmux-definitely-missing-binary --flag"));
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(session.exit_error().is_some());
    }
}
