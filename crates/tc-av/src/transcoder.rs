//! Encoder process supervision.
//!
//! [`Transcoder`] admits a job through the [`ConcurrencyGate`], spawns the
//! encoder, and classifies how it ends: success, non-zero exit
//! ([`Error::EncodeFailure`]), deadline ([`Error::EncodeTimeout`]), or
//! cancellation ([`Error::Cancelled`]). The deadline starts once the job is
//! admitted, so time spent queued behind other jobs does not count against it.
//!
//! The child is always owned by a `RunningEncode`; dropping it before the
//! job reaches a terminal state kills the process and frees the gate slot.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use tc_core::config::{EncodeConfig, QualityProfile};
use tc_core::{DeliveryIntent, Error, Result};

use crate::encode::{build_args, EncodeJob, OutputTarget};
use crate::gate::{ConcurrencyGate, GateSlot};
use crate::tools::ToolRegistry;

/// Bytes of encoder stderr kept for diagnostics.
const STDERR_TAIL_BYTES: usize = 64 * 1024;

/// Read size for streamed output.
const STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// Chunks buffered between the encoder and a streaming consumer.
const STREAM_BUFFER_CHUNKS: usize = 4;

/// Encoder output delivered as it is produced. Ends with an `Err` item if
/// the encoder fails after output has started.
pub type EncodeStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Summary of a finished file encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeReport {
    /// Size of the written file.
    pub bytes: u64,
    /// Time spent waiting for admission.
    pub queued: Duration,
    /// Time the encoder ran.
    pub encoded: Duration,
}

/// Runs encoder jobs under the concurrency gate.
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: PathBuf,
    gate: ConcurrencyGate,
    preview: QualityProfile,
    download: QualityProfile,
    preview_timeout: Duration,
    download_timeout: Duration,
}

impl Transcoder {
    /// Build a transcoder using the discovered `ffmpeg`.
    pub fn new(tools: &ToolRegistry, gate: ConcurrencyGate, config: &EncodeConfig) -> Result<Self> {
        let ffmpeg = tools.require("ffmpeg")?;
        Ok(Self::with_program(ffmpeg.path.clone(), gate, config))
    }

    /// Build a transcoder around an explicit encoder binary.
    pub fn with_program(program: impl Into<PathBuf>, gate: ConcurrencyGate, config: &EncodeConfig) -> Self {
        Self {
            program: program.into(),
            gate,
            preview: config.preview.clone(),
            download: config.download.clone(),
            preview_timeout: config.timeout(DeliveryIntent::Preview),
            download_timeout: config.timeout(DeliveryIntent::Download),
        }
    }

    /// Override the per-intent deadlines.
    pub fn with_timeouts(mut self, preview: Duration, download: Duration) -> Self {
        self.preview_timeout = preview;
        self.download_timeout = download;
        self
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn timeout_for(&self, intent: DeliveryIntent) -> Duration {
        match intent {
            DeliveryIntent::Preview => self.preview_timeout,
            DeliveryIntent::Download => self.download_timeout,
        }
    }

    fn profile_for(&self, intent: DeliveryIntent) -> &QualityProfile {
        match intent {
            DeliveryIntent::Preview => &self.preview,
            DeliveryIntent::Download => &self.download,
        }
    }

    /// Argument vector the encoder would be invoked with.
    pub fn args_for(&self, job: &EncodeJob, target: &OutputTarget) -> Vec<String> {
        build_args(job, self.profile_for(job.intent), target)
    }

    /// Encode `job` into `output`.
    ///
    /// On any failure the partially written `output` is removed before the
    /// error is returned.
    pub async fn encode_to_file(
        &self,
        job: &EncodeJob,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<EncodeReport> {
        let queued_at = Instant::now();
        let slot = self.gate.acquire_cancellable(cancel).await?;
        let queued = queued_at.elapsed();

        let args = self.args_for(job, &OutputTarget::File(output.to_path_buf()));
        let result = self.run_to_file(job, &args, slot, output, cancel).await;
        let result = result.map(|(bytes, encoded)| EncodeReport {
            bytes,
            queued,
            encoded,
        });

        match &result {
            Ok(report) => tracing::info!(
                mode = %job.mode,
                intent = %job.intent,
                range = %job.range,
                bytes = report.bytes,
                queued_ms = report.queued.as_millis() as u64,
                encoded_ms = report.encoded.as_millis() as u64,
                "Encode finished"
            ),
            Err(_) => remove_partial(output).await,
        }
        result
    }

    async fn run_to_file(
        &self,
        job: &EncodeJob,
        args: &[String],
        slot: GateSlot,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(u64, Duration)> {
        let mut run = self.start(job, args, slot, Stdio::null())?;
        run.finish(cancel).await?;
        let bytes = tokio::fs::metadata(output)
            .await
            .map_err(|e| Error::EncodeFailure {
                code: Some(0),
                stderr: format!("encoder reported success but output is unreadable: {e}"),
            })?
            .len();
        Ok((bytes, run.started.elapsed()))
    }

    /// Encode `job` and stream the encoder's stdout.
    ///
    /// Returns once the job has been admitted and the encoder started. A
    /// spawned task supervises the encoder, so its deadline and `cancel` are
    /// enforced even while the consumer is not polling. Output is buffered
    /// for at most [`STREAM_BUFFER_CHUNKS`] chunks; a consumer that stops
    /// reading stalls the encoder until the deadline kills it. Dropping the
    /// returned stream kills the encoder and releases the slot.
    pub async fn encode_to_stream(&self, job: &EncodeJob, cancel: CancellationToken) -> Result<EncodeStream> {
        let slot = self.gate.acquire_cancellable(&cancel).await?;
        let args = self.args_for(job, &OutputTarget::Stream);
        let mut run = self.start(job, &args, slot, Stdio::piped())?;
        let stdout = run
            .child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("encoder stdout not captured".into()))?;

        let (tx, mut rx) = mpsc::channel(STREAM_BUFFER_CHUNKS);
        tokio::spawn(pump_stdout(run, stdout, tx, cancel, job.clone()));

        let stream = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };
        Ok(Box::pin(stream))
    }

    fn start(&self, job: &EncodeJob, args: &[String], slot: GateSlot, stdout: Stdio) -> Result<RunningEncode> {
        let timeout = self.timeout_for(job.intent);
        tracing::debug!("{} {}", self.program.display(), args.join(" "));

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::tool("ffmpeg", format!("failed to spawn: {e}")))?;

        tracing::info!(
            pid = child.id(),
            mode = %job.mode,
            intent = %job.intent,
            range = %job.range,
            timeout_secs = timeout.as_secs_f64(),
            "Encoder started"
        );

        let stderr = child.stderr.take().map(collect_stderr);
        let started = Instant::now();
        Ok(RunningEncode {
            child,
            slot,
            stderr,
            started,
            deadline: started + timeout,
            timeout,
            finished: false,
        })
    }
}

enum Step<'a> {
    Chunk(mpsc::Permit<'a, Result<Bytes>>, Bytes),
    Eof,
    ReadFailed(std::io::Error),
    Interrupted(Interrupt),
}

#[derive(Debug, Clone, Copy)]
enum Interrupt {
    Deadline,
    Cancelled,
    /// The stream consumer dropped its end.
    Abandoned,
}

enum Exit {
    Status(std::io::Result<ExitStatus>),
    Interrupted(Interrupt),
}

/// A spawned encoder together with the gate slot it occupies.
struct RunningEncode {
    child: Child,
    slot: GateSlot,
    stderr: Option<JoinHandle<String>>,
    started: Instant,
    deadline: Instant,
    timeout: Duration,
    finished: bool,
}

impl RunningEncode {
    /// Wait for the encoder to exit, enforcing the deadline and `cancel`.
    async fn finish(&mut self, cancel: &CancellationToken) -> Result<()> {
        let exit = tokio::select! {
            status = self.child.wait() => Exit::Status(status),
            _ = tokio::time::sleep_until(self.deadline) => Exit::Interrupted(Interrupt::Deadline),
            _ = cancel.cancelled() => Exit::Interrupted(Interrupt::Cancelled),
        };

        match exit {
            Exit::Status(Ok(status)) if status.success() => {
                let stderr = self.stderr_tail().await;
                if !stderr.trim().is_empty() {
                    tracing::debug!(stderr = %stderr.trim(), "Encoder diagnostics");
                }
                self.done();
                Ok(())
            }
            Exit::Status(Ok(status)) => {
                let stderr = self.stderr_tail().await;
                tracing::warn!(
                    code = ?status.code(),
                    stderr = %stderr.trim(),
                    "Encoder exited unsuccessfully"
                );
                self.done();
                Err(Error::EncodeFailure {
                    code: status.code(),
                    stderr,
                })
            }
            Exit::Status(Err(e)) => {
                self.kill().await;
                self.done();
                Err(Error::from(e))
            }
            Exit::Interrupted(reason) => Err(self.interrupt(reason).await),
        }
    }

    /// Kill the encoder early and produce the matching error.
    async fn interrupt(&mut self, reason: Interrupt) -> Error {
        self.kill().await;
        self.done();
        match reason {
            Interrupt::Deadline => {
                tracing::warn!(timeout_secs = self.timeout.as_secs_f64(), "Encoder timed out; killed");
                Error::EncodeTimeout { after: self.timeout }
            }
            Interrupt::Cancelled => {
                tracing::info!("Encoder cancelled; killed");
                Error::Cancelled
            }
            Interrupt::Abandoned => {
                tracing::info!("Encoder output abandoned by consumer; killed");
                Error::Cancelled
            }
        }
    }

    /// SIGKILL and reap the child.
    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!("Failed to kill encoder: {e}");
        }
    }

    fn done(&mut self) {
        self.finished = true;
        self.slot.release();
    }

    async fn stderr_tail(&mut self) -> String {
        match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        }
    }
}

impl Drop for RunningEncode {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(pid = self.child.id(), "Encoder abandoned by caller; killing");
            let _ = self.child.start_kill();
        }
    }
}

/// Supervise a streaming encode: forward stdout chunks into `tx` while
/// enforcing the deadline, `cancel`, and the receiver going away.
async fn pump_stdout(
    mut run: RunningEncode,
    stdout: ChildStdout,
    tx: mpsc::Sender<Result<Bytes>>,
    cancel: CancellationToken,
    job: EncodeJob,
) {
    let mut chunks = ReaderStream::with_capacity(stdout, STREAM_CHUNK_BYTES);
    let deadline = run.deadline;
    let mut sent: u64 = 0;

    let interrupted = loop {
        let step = tokio::select! {
            step = next_chunk(&tx, &mut chunks) => step,
            _ = tokio::time::sleep_until(deadline) => Step::Interrupted(Interrupt::Deadline),
            _ = cancel.cancelled() => Step::Interrupted(Interrupt::Cancelled),
            _ = tx.closed() => Step::Interrupted(Interrupt::Abandoned),
        };
        match step {
            Step::Chunk(permit, bytes) => {
                sent += bytes.len() as u64;
                permit.send(Ok(bytes));
            }
            Step::Eof => break None,
            Step::ReadFailed(e) => {
                run.kill().await;
                run.done();
                break Some(Error::from(e));
            }
            Step::Interrupted(reason) => break Some(run.interrupt(reason).await),
        }
    };

    let outcome = match interrupted {
        Some(err) => Err(err),
        None => run.finish(&cancel).await,
    };
    match outcome {
        Ok(()) => tracing::info!(
            mode = %job.mode,
            intent = %job.intent,
            range = %job.range,
            bytes = sent,
            encoded_ms = run.started.elapsed().as_millis() as u64,
            "Encode stream finished"
        ),
        // Slot and process are already released; this only reports.
        Err(err) => {
            let _ = tx.send(Err(err)).await;
        }
    }
}

/// Wait for buffer room, then read the next stdout chunk.
async fn next_chunk<'a>(
    tx: &'a mpsc::Sender<Result<Bytes>>,
    chunks: &mut ReaderStream<ChildStdout>,
) -> Step<'a> {
    let Ok(permit) = tx.reserve().await else {
        return Step::Interrupted(Interrupt::Abandoned);
    };
    match chunks.next().await {
        Some(Ok(bytes)) => Step::Chunk(permit, bytes),
        Some(Err(e)) => Step::ReadFailed(e),
        None => Step::Eof,
    }
}

/// Drain stderr in the background, keeping only the last
/// [`STDERR_TAIL_BYTES`] so a chatty encoder cannot fill memory or block on
/// a full pipe.
fn collect_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut tail: Vec<u8> = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tail.extend_from_slice(&buf[..n]);
                    if tail.len() > STDERR_TAIL_BYTES {
                        let excess = tail.len() - STDERR_TAIL_BYTES;
                        tail.drain(..excess);
                    }
                }
            }
        }
        String::from_utf8_lossy(&tail).into_owned()
    })
}

/// Best-effort removal of a partially written output.
async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove partial output {}: {e}", path.display()),
    }
}
