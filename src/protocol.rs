//! Print job protocol on top of an unacknowledged write.
//!
//! The printer never confirms a write. [`ProtocolClient`] sequences a job as
//! frames on the command channel and learns about the printer only through
//! notifications fed into [`ProtocolClient::on_notify`] or a [`Notifier`].
//! Flow control and fault handling both run off that notification path.
//!
//! ```text
//! Idle -> Preparing -> Ready -> Printing -> Finishing -> Closed
//!   \________\___________\_________\___________\-----> Faulted
//! ```

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    bitmap::PackedRow,
    command,
    error::{Error, PrinterFault},
    status::{Notification, PrinterStatus, StateFlags},
    transport::FrameWriter,
};

/// Default wait after configuration when the printer doesn't acknowledge.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Default minimum spacing of frames when the printer doesn't acknowledge.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// Default bound on every wait for a notification.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether the printer answers device state requests.
///
/// With `Acknowledged` the client waits for the state reply after
/// configuring and finishing a job, and relies on flow control notifications
/// for pacing. With `Unacknowledged` it waits fixed delays instead and keeps
/// a minimum interval between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Acknowledged,
    Unacknowledged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub settle_delay: Duration,
    pub frame_interval: Duration,
    pub response_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            settle_delay: DEFAULT_SETTLE_DELAY,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Speed and energy values the printer accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub speed: RangeInclusive<u8>,
    pub energy: RangeInclusive<u16>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            speed: 1..=64,
            energy: 1..=0xFFFF,
        }
    }
}

impl Limits {
    fn speed(&self, speed: u32) -> Result<u8, Error> {
        u8::try_from(speed)
            .ok()
            .filter(|s| self.speed.contains(s))
            .ok_or_else(|| {
                Error::InvalidParameter(format!("speed {} outside {:?}", speed, self.speed))
            })
    }

    fn energy(&self, energy: u32) -> Result<u16, Error> {
        u16::try_from(energy)
            .ok()
            .filter(|e| self.energy.contains(e))
            .ok_or_else(|| {
                Error::InvalidParameter(format!("energy {} outside {:?}", energy, self.energy))
            })
    }
}

/// Why a job was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Device(PrinterFault),
    Transport,
    Timeout,
    Cancelled,
    Usage,
}

impl Fault {
    fn into_error(self) -> Error {
        match self {
            Self::Device(code) => Error::DeviceFault { code },
            _ => Error::Faulted(self),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(code) => write!(f, "printer fault ({})", code),
            Self::Transport => write!(f, "transport failure"),
            Self::Timeout => write!(f, "printer stopped responding"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Usage => write!(f, "invalid request"),
        }
    }
}

/// Position of a job in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Preparing,
    Ready,
    Printing,
    Finishing,
    Closed,
    Faulted(Fault),
}

impl Phase {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Faulted(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    phase: Phase,
    status: PrinterStatus,
    paused: bool,
    /// Device state notifications seen so far.
    state_replies: u64,
}

/// Handle for delivering notifications to a [`ProtocolClient`].
///
/// Cheap to clone and safe to use from another task while a command waits.
#[derive(Clone)]
pub struct Notifier {
    device: Arc<str>,
    state: Arc<watch::Sender<Snapshot>>,
}

impl Notifier {
    /// Feed one raw notification frame from the status channel.
    pub fn on_notify(&self, frame: &[u8]) {
        let notification = Notification::parse(frame);
        if notification == Notification::Unrecognized {
            debug!("{}: ignoring notification {:02X?}", self.device, frame);
            return;
        }

        let device = &self.device;
        self.state.send_if_modified(|snap| {
            if snap.phase.is_terminal() {
                trace!("{}: job over, dropping {:?}", device, notification);
                return false;
            }
            match notification {
                Notification::DeviceState(flags) => {
                    snap.state_replies += 1;
                    snap.status = PrinterStatus::from_flags(flags);
                    snap.paused = flags.contains(StateFlags::PAUSED);
                    if let Some(fault) = flags.fault() {
                        warn!("{}: printer reported {}", device, fault);
                        snap.phase = Phase::Faulted(Fault::Device(fault));
                    }
                }
                Notification::FlowControl { paused } => {
                    debug!("{}: flow control paused={}", device, paused);
                    snap.paused = paused;
                    snap.status = if paused {
                        PrinterStatus::Paused
                    } else {
                        PrinterStatus::Ready
                    };
                }
                Notification::Unrecognized => return false,
            }
            true
        });
    }

    /// Report that the status channel went away.
    pub fn link_lost(&self) {
        let device = &self.device;
        self.state.send_modify(|snap| {
            snap.status = PrinterStatus::Disconnected;
            if !snap.phase.is_terminal() {
                warn!("{}: lost connection during {:?}", device, snap.phase);
                snap.phase = Phase::Faulted(Fault::Transport);
            }
        });
    }
}

/// Single-owner token, released on drop.
struct ExecutionToken<'a>(&'a AtomicBool);

impl Drop for ExecutionToken<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Stateful print job conversation with one printer.
pub struct ProtocolClient {
    device: Arc<str>,
    writer: Arc<dyn FrameWriter>,
    ack_mode: AckMode,
    timing: Timing,
    limits: Limits,
    cancel: CancellationToken,
    state: Arc<watch::Sender<Snapshot>>,
    in_flight: AtomicBool,
    last_frame: Mutex<Option<Instant>>,
    /// Bytes per row of the job, 0 until the first row is drawn.
    pitch: AtomicUsize,
}

impl ProtocolClient {
    pub fn new(device: &str, writer: Arc<dyn FrameWriter>, ack_mode: AckMode) -> Self {
        let (state, _) = watch::channel(Snapshot {
            phase: Phase::Idle,
            status: PrinterStatus::Unknown,
            paused: false,
            state_replies: 0,
        });
        ProtocolClient {
            device: Arc::from(device),
            writer,
            ack_mode,
            timing: Timing::default(),
            limits: Limits::default(),
            cancel: CancellationToken::new(),
            state: Arc::new(state),
            in_flight: AtomicBool::new(false),
            last_frame: Mutex::new(None),
            pitch: AtomicUsize::new(0),
        }
    }

    pub fn timing(self, timing: Timing) -> Self {
        ProtocolClient { timing, ..self }
    }

    pub fn limits(self, limits: Limits) -> Self {
        ProtocolClient { limits, ..self }
    }

    /// Abort any wait with [`Error::Cancelled`] once `cancel` fires.
    pub fn cancellation(self, cancel: CancellationToken) -> Self {
        ProtocolClient { cancel, ..self }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    pub fn status(&self) -> PrinterStatus {
        self.state.borrow().status
    }

    pub fn notifier(&self) -> Notifier {
        Notifier {
            device: self.device.clone(),
            state: self.state.clone(),
        }
    }

    pub fn on_notify(&self, frame: &[u8]) {
        self.notifier().on_notify(frame)
    }

    /// Configure the printer and start a job.
    ///
    /// `speed` and `energy` are checked against the configured [`Limits`]
    /// before anything is written.
    pub async fn prepare(&self, speed: u32, energy: u32) -> Result<(), Error> {
        let _token = self.begin("prepare", &[Phase::Idle])?;
        let speed = self.limits.speed(speed).map_err(|e| self.fail(Fault::Usage, e))?;
        let energy = self
            .limits
            .energy(energy)
            .map_err(|e| self.fail(Fault::Usage, e))?;

        self.advance(Phase::Preparing)?;
        info!(
            "{}: preparing job, speed {} energy {} ({:?})",
            self.device, speed, energy, self.ack_mode
        );

        let replies = self.state.borrow().state_replies;
        self.transmit(command::get_device_state()).await?;
        self.transmit(command::set_dpi()).await?;
        self.transmit(command::set_speed(speed)).await?;
        self.transmit(command::set_energy(energy)).await?;
        self.transmit(command::apply_energy()).await?;
        self.transmit(command::update_device()).await?;
        self.settle(replies, "device state after configuration")
            .await?;

        self.transmit(command::lattice_start()).await?;
        self.advance(Phase::Ready)
    }

    /// Advance the paper by `lines` rows without printing.
    pub async fn feed(&self, lines: u16) -> Result<(), Error> {
        let _token = self.begin("feed", &[Phase::Ready, Phase::Printing])?;
        self.transmit(command::feed(lines)).await?;
        self.advance(Phase::Printing)
    }

    /// Print one packed row.
    pub async fn draw_row(&self, row: &PackedRow) -> Result<(), Error> {
        let _token = self.begin("draw", &[Phase::Ready, Phase::Printing])?;
        self.check_pitch(row)?;
        self.transmit(command::bitmap(row.as_bytes())).await?;
        self.advance(Phase::Printing)
    }

    /// Feed `extra_feed` rows past the tear-off edge and close the job.
    pub async fn finish(&self, extra_feed: u16) -> Result<(), Error> {
        let _token = self.begin("finish", &[Phase::Ready, Phase::Printing])?;
        self.advance(Phase::Finishing)?;

        self.transmit(command::lattice_end()).await?;
        self.transmit(command::set_speed(command::FINISH_SPEED))
            .await?;
        self.transmit(command::feed(extra_feed)).await?;
        let replies = self.state.borrow().state_replies;
        self.transmit(command::get_device_state()).await?;
        self.settle(replies, "device state after finish").await?;

        self.advance(Phase::Closed)?;
        info!("{}: job finished", self.device);
        Ok(())
    }

    fn begin(
        &self,
        operation: &'static str,
        allowed: &[Phase],
    ) -> Result<ExecutionToken<'_>, Error> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }
        let token = ExecutionToken(&self.in_flight);

        match self.phase() {
            Phase::Faulted(fault) => Err(fault.into_error()),
            phase if !allowed.contains(&phase) => Err(Error::InvalidState { operation, phase }),
            _ if self.cancel.is_cancelled() => Err(self.fail(Fault::Cancelled, Error::Cancelled)),
            _ => Ok(token),
        }
    }

    fn check_pitch(&self, row: &PackedRow) -> Result<(), Error> {
        match self
            .pitch
            .compare_exchange(0, row.len(), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(pitch) if pitch == row.len() => Ok(()),
            Err(pitch) => Err(self.fail(
                Fault::Usage,
                Error::ShapeMismatch {
                    expected: pitch as u32 * 8,
                    actual: row.len() as u32 * 8,
                },
            )),
        }
    }

    /// Move to `next` unless a notification faulted the job meanwhile.
    fn advance(&self, next: Phase) -> Result<(), Error> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|snap| {
            let current = snap.phase;
            match current {
                Phase::Faulted(fault) => {
                    outcome = Err(fault.into_error());
                    false
                }
                _ if current == next => false,
                _ => {
                    debug!("{}: {:?} -> {:?}", self.device, current, next);
                    snap.phase = next;
                    true
                }
            }
        });
        outcome
    }

    /// Mark the job faulted and hand back `err`.
    fn fail(&self, fault: Fault, err: Error) -> Error {
        self.state.send_if_modified(|snap| {
            if snap.phase.is_terminal() {
                return false;
            }
            snap.phase = Phase::Faulted(fault);
            true
        });
        warn!("{}: job aborted: {}", self.device, err);
        err
    }

    /// Wait until `ready` holds for the current snapshot.
    ///
    /// Returns `Ok(false)` once `deadline` passes. Faults and cancellation
    /// end the wait early with an error.
    async fn wait_until<F>(&self, deadline: Instant, mut ready: F) -> Result<bool, Error>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        let mut rx = self.state.subscribe();
        loop {
            {
                let snap = rx.borrow_and_update();
                if let Phase::Faulted(fault) = snap.phase {
                    return Err(fault.into_error());
                }
                if ready(&*snap) {
                    return Ok(true);
                }
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(self.fail(Fault::Cancelled, Error::Cancelled));
                }
                _ = time::sleep_until(deadline) => return Ok(false),
                changed = rx.changed() => {
                    // The sender lives in self, so this can't close under us.
                    if changed.is_err() {
                        return Ok(false);
                    }
                }
            }
        }
    }

    async fn settle(&self, replies: u64, waiting_for: &'static str) -> Result<(), Error> {
        match self.ack_mode {
            AckMode::Acknowledged => {
                let deadline = Instant::now() + self.timing.response_timeout;
                if !self
                    .wait_until(deadline, |snap| snap.state_replies > replies)
                    .await?
                {
                    return Err(self.fail(Fault::Timeout, Error::ProtocolTimeout(waiting_for)));
                }
            }
            AckMode::Unacknowledged => {
                let deadline = Instant::now() + self.timing.settle_delay;
                self.wait_until(deadline, |_| false).await?;
            }
        }
        Ok(())
    }

    /// Write one frame once the printer can take it.
    async fn transmit(&self, frame: Vec<u8>) -> Result<(), Error> {
        if self.ack_mode == AckMode::Unacknowledged {
            let last = *self
                .last_frame
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(last) = last {
                let next = last + self.timing.frame_interval;
                if next > Instant::now() {
                    self.wait_until(next, |_| false).await?;
                }
            }
        }

        // Checked last so a pause that arrived while pacing still holds the
        // frame. The wait returns without yielding when nothing is paused.
        let deadline = Instant::now() + self.timing.response_timeout;
        if !self.wait_until(deadline, |snap| !snap.paused).await? {
            return Err(self.fail(
                Fault::Timeout,
                Error::ProtocolTimeout("the printer to resume"),
            ));
        }

        trace!("{}: -> {:02X?}", self.device, frame);
        let written = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(self.fail(Fault::Cancelled, Error::Cancelled));
            }
            written = self.writer.write(&frame) => written,
        };
        if let Err(err) = written {
            return Err(self.fail(Fault::Transport, err));
        }

        *self
            .last_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{pack, TwoTonePixelBuffer, INK};
    use crate::command::{frame, Command, FrameType};
    use async_trait::async_trait;

    /// Records frames; optionally answers state requests and fails writes.
    #[derive(Default)]
    struct MockPrinter {
        frames: Mutex<Vec<(Instant, Vec<u8>)>>,
        responder: Mutex<Option<Notifier>>,
        fail_at: Option<usize>,
    }

    impl MockPrinter {
        fn frames(&self) -> Vec<Vec<u8>> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .map(|(_, f)| f.clone())
                .collect()
        }

        fn opcodes(&self) -> Vec<u8> {
            self.frames().iter().map(|f| f[2]).collect()
        }
    }

    #[async_trait]
    impl FrameWriter for MockPrinter {
        async fn write(&self, frame: &[u8]) -> Result<(), Error> {
            let mut frames = self.frames.lock().unwrap();
            if Some(frames.len()) == self.fail_at {
                return Err(Error::Transport("link dropped".to_string()));
            }
            frames.push((Instant::now(), frame.to_vec()));
            drop(frames);

            if frame[2] == Command::GetDeviceState.code() {
                if let Some(notifier) = self.responder.lock().unwrap().as_ref() {
                    notifier.on_notify(&state_reply(0x00));
                }
            }
            Ok(())
        }
    }

    fn state_reply(state: u8) -> Vec<u8> {
        frame(Command::GetDeviceState, FrameType::Response, &[state])
    }

    fn flow(paused: bool) -> Vec<u8> {
        frame(
            Command::FlowControl,
            FrameType::Response,
            &[if paused { 0x10 } else { 0x00 }],
        )
    }

    fn row(width: u32) -> PackedRow {
        let buf = TwoTonePixelBuffer::new(width, 1, vec![INK; width as usize]).unwrap();
        pack(&buf, width).unwrap().remove(0)
    }

    fn unacked(printer: &Arc<MockPrinter>) -> ProtocolClient {
        ProtocolClient::new("GB02", printer.clone(), AckMode::Unacknowledged)
    }

    fn acked(printer: &Arc<MockPrinter>) -> ProtocolClient {
        let client = ProtocolClient::new("GB02", printer.clone(), AckMode::Acknowledged);
        *printer.responder.lock().unwrap() = Some(client.notifier());
        client
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_rejected_before_prepare() {
        let printer = Arc::new(MockPrinter::default());
        let client = unacked(&printer);

        let err = client.feed(1).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                phase: Phase::Idle,
                ..
            }
        ));
        let err = client.draw_row(&row(8)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        let err = client.finish(10).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        assert_eq!(client.phase(), Phase::Idle);
        assert!(printer.frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_parameters_rejected_before_io() {
        let printer = Arc::new(MockPrinter::default());
        let client = unacked(&printer);
        let err = client.prepare(0, 20_000).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert_eq!(client.phase(), Phase::Faulted(Fault::Usage));

        let client = unacked(&printer);
        let err = client.prepare(300, 20_000).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));

        let client = unacked(&printer);
        let err = client.prepare(32, 70_000).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));

        assert!(printer.frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_unacknowledged() {
        let printer = Arc::new(MockPrinter::default());
        let client = unacked(&printer);

        client.prepare(32, 24_000).await.unwrap();

        assert_eq!(client.phase(), Phase::Ready);
        assert_eq!(
            printer.opcodes(),
            vec![0xA3, 0xA4, 0xBD, 0xAF, 0xBE, 0xA9, 0xA6]
        );
        assert_eq!(printer.frames()[2], command::set_speed(32));
        assert_eq!(printer.frames()[3], command::set_energy(24_000));
        assert_eq!(printer.frames()[6], command::lattice_start());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_acknowledged_waits_for_state() {
        let printer = Arc::new(MockPrinter::default());
        let client = acked(&printer);

        client.prepare(32, 24_000).await.unwrap();

        assert_eq!(client.phase(), Phase::Ready);
        assert_eq!(client.status(), PrinterStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_acknowledged_times_out() {
        let printer = Arc::new(MockPrinter::default());
        let client = ProtocolClient::new("GB02", printer.clone(), AckMode::Acknowledged);

        let err = client.prepare(32, 24_000).await.unwrap_err();

        assert!(matches!(err, Error::ProtocolTimeout(_)));
        assert_eq!(client.phase(), Phase::Faulted(Fault::Timeout));
        // lattice start never went out
        assert_eq!(printer.opcodes().last(), Some(&0xA9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_job() {
        let printer = Arc::new(MockPrinter::default());
        let client = acked(&printer);

        client.prepare(32, 24_000).await.unwrap();
        client.draw_row(&row(384)).await.unwrap();
        assert_eq!(client.phase(), Phase::Printing);
        client.feed(1).await.unwrap();
        client.finish(100).await.unwrap();

        assert_eq!(client.phase(), Phase::Closed);
        let frames = printer.frames();
        let tail: Vec<u8> = frames[7..].iter().map(|f| f[2]).collect();
        assert_eq!(tail, vec![0xA2, 0xA1, 0xA6, 0xBD, 0xA1, 0xA3]);
        assert_eq!(frames[7], command::bitmap(row(384).as_bytes()));
        assert_eq!(frames[8], command::feed(1));
        assert_eq!(frames[10], command::set_speed(command::FINISH_SPEED));
        assert_eq!(frames[11], command::feed(100));

        let err = client.feed(1).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                phase: Phase::Closed,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_stops_all_writes() {
        let printer = Arc::new(MockPrinter::default());
        let client = unacked(&printer);
        client.prepare(32, 24_000).await.unwrap();
        client.draw_row(&row(384)).await.unwrap();
        let sent = printer.frames().len();

        client.on_notify(&state_reply(0x01));

        assert_eq!(
            client.phase(),
            Phase::Faulted(Fault::Device(PrinterFault::PaperOut))
        );
        assert_eq!(client.status(), PrinterStatus::Fault(PrinterFault::PaperOut));
        for _ in 0..3 {
            match client.draw_row(&row(384)).await {
                Err(Error::DeviceFault { code }) => assert_eq!(code, PrinterFault::PaperOut),
                other => panic!("expected device fault, got {:?}", other),
            }
        }
        assert!(matches!(
            client.feed(1).await,
            Err(Error::DeviceFault {
                code: PrinterFault::PaperOut
            })
        ));
        assert!(matches!(
            client.finish(10).await,
            Err(Error::DeviceFault { .. })
        ));
        assert_eq!(printer.frames().len(), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_during_prepare_reply() {
        let printer = Arc::new(MockPrinter::default());
        let client = ProtocolClient::new("GB02", printer.clone(), AckMode::Acknowledged);
        let notifier = client.notifier();

        let (result, _) = tokio::join!(client.prepare(32, 24_000), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            notifier.on_notify(&state_reply(0x02));
        });

        assert!(matches!(
            result,
            Err(Error::DeviceFault {
                code: PrinterFault::CoverOpen
            })
        ));
        assert_eq!(printer.opcodes().last(), Some(&0xA9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_faults_without_retry() {
        let printer = Arc::new(MockPrinter {
            fail_at: Some(8),
            ..Default::default()
        });
        let client = unacked(&printer);
        client.prepare(32, 24_000).await.unwrap();
        client.draw_row(&row(16)).await.unwrap();

        let err = client.draw_row(&row(16)).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(client.phase(), Phase::Faulted(Fault::Transport));

        let err = client.feed(1).await.unwrap_err();
        assert!(matches!(err, Error::Faulted(Fault::Transport)));
        assert_eq!(printer.frames().len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_frames_until_resume() {
        let printer = Arc::new(MockPrinter::default());
        let client = Arc::new(unacked(&printer));
        client.prepare(32, 24_000).await.unwrap();
        let sent = printer.frames().len();

        client.on_notify(&flow(true));
        assert_eq!(client.status(), PrinterStatus::Paused);

        let drawing = tokio::spawn({
            let client = client.clone();
            async move { client.draw_row(&row(384)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(printer.frames().len(), sent);

        // one command at a time
        assert!(matches!(client.feed(1).await, Err(Error::Busy)));

        client.on_notify(&flow(false));
        drawing.await.unwrap().unwrap();
        assert_eq!(printer.frames().len(), sent + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_during_frame_interval_holds_frame() {
        let printer = Arc::new(MockPrinter::default());
        let client = Arc::new(unacked(&printer));
        client.prepare(32, 24_000).await.unwrap();
        let sent = printer.frames().len();

        let drawing = tokio::spawn({
            let client = client.clone();
            async move { client.draw_row(&row(384)).await }
        });
        // still inside the interval after lattice start
        tokio::time::sleep(Duration::from_millis(5)).await;
        client.on_notify(&flow(true));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(client.status(), PrinterStatus::Paused);
        assert_eq!(printer.frames().len(), sent);

        client.on_notify(&flow(false));
        drawing.await.unwrap().unwrap();
        assert_eq!(printer.frames().len(), sent + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_rejected_while_preparing() {
        let printer = Arc::new(MockPrinter::default());
        let client = Arc::new(ProtocolClient::new(
            "GB02",
            printer.clone(),
            AckMode::Acknowledged,
        ));

        let preparing = tokio::spawn({
            let client = client.clone();
            async move { client.prepare(32, 24_000).await }
        });
        // waiting for a state reply that never comes
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.phase(), Phase::Preparing);
        let sent = printer.frames().len();
        assert_eq!(sent, 6);

        assert!(matches!(client.feed(1).await, Err(Error::Busy)));
        assert!(matches!(client.draw_row(&row(384)).await, Err(Error::Busy)));
        assert!(matches!(client.finish(10).await, Err(Error::Busy)));
        assert_eq!(client.phase(), Phase::Preparing);
        assert_eq!(printer.frames().len(), sent);

        let err = preparing.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ProtocolTimeout(_)));
        assert_eq!(printer.frames().len(), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_times_out() {
        let printer = Arc::new(MockPrinter::default());
        let client = unacked(&printer);
        client.prepare(32, 24_000).await.unwrap();

        client.on_notify(&flow(true));
        let err = client.feed(1).await.unwrap_err();

        assert!(matches!(err, Error::ProtocolTimeout(_)));
        assert_eq!(client.phase(), Phase::Faulted(Fault::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let printer = Arc::new(MockPrinter::default());
        let cancel = CancellationToken::new();
        let client = unacked(&printer).cancellation(cancel.clone());
        client.prepare(32, 24_000).await.unwrap();
        client.on_notify(&flow(true));

        let r = row(8);
        let (result, _) = tokio::join!(client.draw_row(&r), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(client.phase(), Phase::Faulted(Fault::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_frames_are_spaced() {
        let printer = Arc::new(MockPrinter::default());
        let client = unacked(&printer);
        client.prepare(32, 24_000).await.unwrap();
        for _ in 0..5 {
            client.draw_row(&row(384)).await.unwrap();
        }

        let frames = printer.frames.lock().unwrap();
        for pair in frames.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= DEFAULT_FRAME_INTERVAL);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_notifications_are_ignored() {
        let printer = Arc::new(MockPrinter::default());
        let client = unacked(&printer);
        client.prepare(32, 24_000).await.unwrap();

        client.on_notify(&[0x01, 0x02, 0x03]);
        client.on_notify(&frame(Command::GetDeviceInfo, FrameType::Response, b"GB02"));

        assert_eq!(client.phase(), Phase::Ready);
        client.draw_row(&row(384)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_row_pitch_is_fixed() {
        let printer = Arc::new(MockPrinter::default());
        let client = unacked(&printer);
        client.prepare(32, 24_000).await.unwrap();
        client.draw_row(&row(384)).await.unwrap();

        let err = client.draw_row(&row(200)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch {
                expected: 384,
                actual: 200
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_lost_faults_job() {
        let printer = Arc::new(MockPrinter::default());
        let client = unacked(&printer);
        client.prepare(32, 24_000).await.unwrap();

        client.notifier().link_lost();

        assert_eq!(client.status(), PrinterStatus::Disconnected);
        assert!(matches!(
            client.feed(1).await,
            Err(Error::Faulted(Fault::Transport))
        ));
    }
}
