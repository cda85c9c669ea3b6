use std::time::Duration;

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant as TokioInstant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use web_time::Instant;

use crate::{
    AbrError, AbrResult, Controller, MetricsSource, ProbeTransport, RenditionCatalog,
    RenditionSwitcher, StreamId,
};

/// Commands accepted by a running [`AbrDriver`].
#[derive(Clone, Debug)]
pub enum AbrCommand {
    Start,
    Stop { hard: bool },
    Restart { delayed: bool },
    SetBufferingTarget(Duration),
    ScheduleImmediateEvaluation,
    RenditionApplied { index: usize },
    ProbeInit { stream: StreamId },
    ProbeFrame { stream: StreamId, ts_us: u64 },
}

/// Cloneable sender side of an [`AbrDriver`].
#[derive(Clone, Debug)]
pub struct AbrHandle {
    tx: mpsc::Sender<AbrCommand>,
}

impl AbrHandle {
    /// Queue a command.
    ///
    /// # Errors
    ///
    /// Returns [`AbrError::DriverClosed`] once the driver task is gone.
    pub async fn send(&self, cmd: AbrCommand) -> AbrResult<()> {
        self.tx.send(cmd).await.map_err(|_| AbrError::DriverClosed)
    }

    /// Queue a command without waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns [`AbrError::DriverClosed`] if the driver task is gone or its
    /// queue is full.
    pub fn try_send(&self, cmd: AbrCommand) -> AbrResult<()> {
        self.tx.try_send(cmd).map_err(|_| AbrError::DriverClosed)
    }

    pub async fn start(&self) -> AbrResult<()> {
        self.send(AbrCommand::Start).await
    }

    pub async fn stop(&self, hard: bool) -> AbrResult<()> {
        self.send(AbrCommand::Stop { hard }).await
    }

    pub async fn restart(&self, delayed: bool) -> AbrResult<()> {
        self.send(AbrCommand::Restart { delayed }).await
    }

    pub async fn set_buffering_target(&self, target: Duration) -> AbrResult<()> {
        self.send(AbrCommand::SetBufferingTarget(target)).await
    }

    pub async fn schedule_immediate_evaluation(&self) -> AbrResult<()> {
        self.send(AbrCommand::ScheduleImmediateEvaluation).await
    }

    pub async fn rendition_applied(&self, index: usize) -> AbrResult<()> {
        self.send(AbrCommand::RenditionApplied { index }).await
    }

    pub async fn probe_init(&self, stream: StreamId) -> AbrResult<()> {
        self.send(AbrCommand::ProbeInit { stream }).await
    }

    pub async fn probe_frame(&self, stream: StreamId, ts_us: u64) -> AbrResult<()> {
        self.send(AbrCommand::ProbeFrame { stream, ts_us }).await
    }
}

/// Maps the tokio clock onto controller instants.
///
/// Controller time follows the tokio clock, so a paused test runtime drives
/// the control loop deterministically.
#[derive(Clone, Copy, Debug)]
struct Clock {
    tokio_origin: TokioInstant,
    origin: Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            tokio_origin: TokioInstant::now(),
            origin: Instant::now(),
        }
    }

    fn now(&self) -> Instant {
        self.origin + self.tokio_origin.elapsed()
    }

    fn to_tokio(&self, at: Instant) -> TokioInstant {
        self.tokio_origin + at.saturating_duration_since(self.origin)
    }
}

/// A [`Controller`] running inside a tokio task.
///
/// The task sleeps until the controller's next deadline, applies commands
/// from [`AbrHandle`]s as they arrive, and returns the controller on
/// [`shutdown`](Self::shutdown).
pub struct AbrDriver<C, M, S, T> {
    handle: AbrHandle,
    cancel: CancellationToken,
    task: JoinHandle<Controller<C, M, S, T>>,
}

impl<C, M, S, T> AbrDriver<C, M, S, T>
where
    C: RenditionCatalog + Send + 'static,
    M: MetricsSource + Send + 'static,
    S: RenditionSwitcher + Send + 'static,
    T: ProbeTransport + Send + 'static,
{
    /// Spawn the driver task on the current tokio runtime.
    pub fn spawn(controller: Controller<C, M, S, T>) -> Self {
        Self::spawn_with_capacity(controller, 64)
    }

    pub fn spawn_with_capacity(controller: Controller<C, M, S, T>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(controller, rx, cancel.clone(), Clock::new()));
        Self {
            handle: AbrHandle { tx },
            cancel,
            task,
        }
    }

    pub fn handle(&self) -> AbrHandle {
        self.handle.clone()
    }

    /// Stop the task and hand the controller back.
    ///
    /// # Errors
    ///
    /// Returns [`AbrError::DriverClosed`] if the task panicked.
    pub async fn shutdown(self) -> AbrResult<Controller<C, M, S, T>> {
        self.cancel.cancel();
        self.task.await.map_err(|e| {
            warn!(error = %e, "ABR driver task failed");
            AbrError::DriverClosed
        })
    }
}

async fn run<C, M, S, T>(
    mut controller: Controller<C, M, S, T>,
    mut rx: mpsc::Receiver<AbrCommand>,
    cancel: CancellationToken,
    clock: Clock,
) -> Controller<C, M, S, T>
where
    C: RenditionCatalog,
    M: MetricsSource,
    S: RenditionSwitcher,
    T: ProbeTransport,
{
    debug!("ABR driver started");
    loop {
        let deadline = controller.next_deadline().map(|d| clock.to_tokio(d));
        let timer = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = timer => controller.advance(clock.now()),
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                let now = clock.now();
                controller.advance(now);
                apply(&mut controller, cmd, now);
            }
        }
    }
    debug!("ABR driver finished");
    controller
}

fn apply<C, M, S, T>(controller: &mut Controller<C, M, S, T>, cmd: AbrCommand, now: Instant)
where
    C: RenditionCatalog,
    M: MetricsSource,
    S: RenditionSwitcher,
    T: ProbeTransport,
{
    trace!(?cmd, "ABR command");
    let result = match cmd {
        AbrCommand::Start => {
            controller.start(now);
            Ok(())
        }
        AbrCommand::Stop { hard } => {
            controller.stop(hard);
            Ok(())
        }
        AbrCommand::Restart { delayed } => {
            controller.restart(delayed, now);
            Ok(())
        }
        AbrCommand::SetBufferingTarget(target) => {
            controller.set_buffering_target(target);
            Ok(())
        }
        AbrCommand::ScheduleImmediateEvaluation => {
            controller.schedule_immediate_evaluation(now);
            controller.advance(now);
            Ok(())
        }
        AbrCommand::RenditionApplied { index } => controller.on_rendition_applied(index, now),
        AbrCommand::ProbeInit { stream } => controller.on_probe_init(stream, now),
        AbrCommand::ProbeFrame { stream, ts_us } => controller.on_probe_frame(stream, ts_us, now),
    };
    if let Err(e) = result {
        debug!(error = %e, "ABR command ignored");
    }
}
