//! Control loop wiring target selection, geometry and the actuator link.

use crate::{
    command_channel::{ActuatorCommand, CommandChannel, CommandLog, CsvCommandLog, LogCommandLog},
    config::{load_extrinsics, load_floor_rectangle, Config},
    error::Result,
    homography::{FloorRectangle, HomographyCache},
    pan_tilt::{ExtrinsicParams, PanTiltModel},
    targeting::{FiringMode, JoystickSample, Selection, TargetSelector, TargetingMode},
    tracker::{filter_by_area, FrameSize, TrackSource},
};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    io::BufRead,
    time::{Duration, Instant},
};

/// Operator input, delivered to the control loop through an [`OperatorHandle`]
///
/// As a JSON line: `{"event": "set_mode", "value": "cursor"}`,
/// `{"event": "pointer_moved", "value": {"x": 320, "y": 240}}`, `{"event": "stop"}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "value", rename_all = "snake_case")]
pub enum OperatorEvent {
    /// Change targeting mode
    SetMode(TargetingMode),
    /// Change cursor firing behaviour
    SetFiringMode(FiringMode),
    /// Change the automatic-mode dwell time, in seconds
    SetHoldDuration(f64),
    /// Pointer moved to pixel `(x, y)`
    PointerMoved {
        /// Pixel column
        x: f64,
        /// Pixel row
        y: f64,
    },
    /// Discrete toggle of the trigger
    Activate,
    /// Pointer button down
    Press,
    /// Pointer button up
    Release,
    /// New joystick reading
    Joystick(JoystickSample),
    /// Drop and reopen the actuator connection
    Reconnect,
    /// Stop the control loop
    Stop,
}

/// Cloneable sender side of the operator event queue
#[derive(Debug, Clone)]
pub struct OperatorHandle {
    sender: Sender<OperatorEvent>,
}

impl OperatorHandle {
    /// Queue an event; returns `false` if the control loop is gone
    pub fn send(&self, event: OperatorEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Ask the control loop to stop
    pub fn stop(&self) -> bool {
        self.send(OperatorEvent::Stop)
    }
}

/// Forward JSON-line operator events from `reader` to the control loop
///
/// Malformed lines are logged and skipped. Returns the number of events
/// delivered once the reader is exhausted, a `stop` event was delivered, or
/// the control loop has gone away.
///
/// # Errors
///
/// Returns an I/O error if reading fails.
pub fn forward_operator_events<R: BufRead>(reader: R, handle: &OperatorHandle) -> Result<usize> {
    let mut delivered = 0;
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event = match serde_json::from_str::<OperatorEvent>(trimmed) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping malformed operator event: {}", e);
                continue;
            }
        };
        if !handle.send(event) {
            debug!("Control loop gone, operator input closed");
            break;
        }
        delivered += 1;
        if event == OperatorEvent::Stop {
            break;
        }
    }
    Ok(delivered)
}

/// What happened during one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Frame size the tick ran against
    pub frame: Option<FrameSize>,
    /// Tracks left after the area gate
    pub tracks: usize,
    /// Selector output, after geometry failures were folded into `NoTarget`
    pub selection: Selection,
    /// Floor point in metres for the aim pixel
    pub floor_point: Option<(f64, f64)>,
    /// Pan and tilt in degrees before clamping
    pub angles: Option<(f64, f64)>,
    /// Command staged this tick
    pub command: Option<ActuatorCommand>,
    /// Command that reached the wire this tick
    pub sent: Option<ActuatorCommand>,
    /// Whether the actuator link is up after this tick
    pub connected: bool,
    /// The track source has no more frames
    pub source_exhausted: bool,
    /// A stop was requested
    pub stop_requested: bool,
}

impl TickReport {
    const fn idle(stop_requested: bool, source_exhausted: bool, connected: bool) -> Self {
        Self {
            frame: None,
            tracks: 0,
            selection: Selection::NoTarget,
            floor_point: None,
            angles: None,
            command: None,
            sent: None,
            connected,
            source_exhausted,
            stop_requested,
        }
    }

    /// Whether the loop should end after this tick
    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.stop_requested || self.source_exhausted
    }
}

/// Totals for a finished [`SprayerApp::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Ticks executed
    pub ticks: usize,
    /// Ticks that produced an aim point
    pub aimed: usize,
    /// Commands written to the actuator
    pub sent: usize,
}

/// Settings the control loop reads every tick
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    /// Actuator host
    pub address: String,
    /// Actuator port
    pub port: u16,
    /// Tick spacing for [`SprayerApp::run`]
    pub tick_interval: Duration,
    /// Smallest accepted track box, as a fraction of the frame area
    pub min_area_fraction: f64,
    /// Largest accepted track box, as a fraction of the frame area
    pub max_area_fraction: f64,
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            address: config.actuator.address.clone(),
            port: config.actuator.port,
            tick_interval: config.actuator.update_interval(),
            min_area_fraction: config.detection.min_area_fraction,
            max_area_fraction: config.detection.max_area_fraction,
        }
    }
}

/// The sprayer control loop
pub struct SprayerApp {
    settings: LoopSettings,
    selector: TargetSelector,
    homography: HomographyCache,
    model: PanTiltModel,
    channel: CommandChannel,
    source: Box<dyn TrackSource>,
    events: Receiver<OperatorEvent>,
}

impl SprayerApp {
    /// Build the control loop from loaded artifacts and connect to the actuator
    ///
    /// A failed connection is not an error; it is reported through
    /// [`TickReport::connected`] and retried with [`OperatorEvent::Reconnect`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the calibration is unusable or
    /// `ConfigError` if the configuration fails validation.
    pub fn new(
        config: &Config,
        floor: FloorRectangle,
        params: ExtrinsicParams,
        source: Box<dyn TrackSource>,
        command_log: Box<dyn CommandLog>,
    ) -> Result<(Self, OperatorHandle)> {
        config.validate()?;
        let model = PanTiltModel::new(params)?;

        let mut selector = TargetSelector::new(
            config.targeting.default_mode,
            config.targeting.firing_mode,
            config.targeting.joystick,
        );
        selector.set_hold_duration(config.targeting.hold_duration_secs);

        let settings = LoopSettings::from(config);
        let mut channel = CommandChannel::new(config.actuator.timing(), command_log);
        channel.connect(&settings.address, settings.port);

        let (sender, events) = unbounded();
        info!(
            "Sprayer control loop ready: mode {}, firing {}, {:.1} Hz",
            config.targeting.default_mode, config.targeting.firing_mode, config.actuator.update_rate_hz
        );

        Ok((
            Self {
                settings,
                selector,
                homography: HomographyCache::new(floor),
                model,
                channel,
                source,
                events,
            },
            OperatorHandle { sender },
        ))
    }

    /// Load the artifacts named in `config` and build the control loop
    ///
    /// # Errors
    ///
    /// Returns an error if an artifact or the command log file cannot be loaded.
    pub fn from_config(config: &Config, source: Box<dyn TrackSource>) -> Result<(Self, OperatorHandle)> {
        let floor = load_floor_rectangle(&config.artifacts.floor_corners)?;
        let params = load_extrinsics(&config.artifacts.calibration)?;
        let command_log: Box<dyn CommandLog> = match &config.actuator.command_log {
            Some(path) => {
                info!("Logging commands to {}", path.display());
                Box::new(CsvCommandLog::create(path)?)
            }
            None => Box::new(LogCommandLog),
        };
        Self::new(config, floor, params, source, command_log)
    }

    /// Target selector state
    #[must_use]
    pub const fn selector(&self) -> &TargetSelector {
        &self.selector
    }

    /// Actuator channel
    #[must_use]
    pub const fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    /// Apply queued operator events; returns `true` if a stop was requested
    fn drain_events(&mut self) -> bool {
        loop {
            match self.events.try_recv() {
                Ok(OperatorEvent::Stop) => {
                    info!("Stop requested");
                    return true;
                }
                Ok(event) => self.apply(event),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn apply(&mut self, event: OperatorEvent) {
        debug!("Operator event: {:?}", event);
        match event {
            OperatorEvent::SetMode(mode) => self.selector.set_mode(mode),
            OperatorEvent::SetFiringMode(mode) => self.selector.set_firing_mode(mode),
            OperatorEvent::SetHoldDuration(seconds) => self.selector.set_hold_duration(seconds),
            OperatorEvent::PointerMoved { x, y } => self.selector.set_cursor(x, y),
            OperatorEvent::Activate => self.selector.activate(),
            OperatorEvent::Press => self.selector.press(),
            OperatorEvent::Release => self.selector.release(),
            OperatorEvent::Joystick(sample) => self.selector.set_joystick(sample),
            OperatorEvent::Reconnect => {
                self.channel.connect(&self.settings.address, self.settings.port);
            }
            OperatorEvent::Stop => {}
        }
    }

    /// Run one control tick at time `now`
    ///
    /// Geometry and connection failures only affect this tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the track source fails.
    pub fn tick(&mut self, now: Instant) -> Result<TickReport> {
        if self.drain_events() {
            return Ok(TickReport::idle(true, false, self.channel.is_connected()));
        }

        let Some(tracks) = self.source.current_tracks()? else {
            info!("Track source exhausted");
            return Ok(TickReport::idle(false, true, self.channel.is_connected()));
        };
        let Some(frame) = self.source.frame_size() else {
            warn!("Track source produced tracks without a frame size");
            return Ok(TickReport::idle(false, false, self.channel.is_connected()));
        };

        let tracks = filter_by_area(
            tracks,
            frame,
            self.settings.min_area_fraction,
            self.settings.max_area_fraction,
        );

        let mut report = TickReport::idle(false, false, false);
        report.frame = Some(frame);
        report.tracks = tracks.len();
        report.selection = self.selector.tick(&tracks, frame, now);

        if let Selection::Aim { x, y, firing, aux } = report.selection {
            let floor_point = self
                .homography
                .transform_for(frame)
                .and_then(|transform| transform.pixel_to_floor(x, y));

            match floor_point {
                Ok((fx, fy)) => {
                    let (pan, tilt) = self.model.angles_for(fx, fy, 0.0);
                    report.floor_point = Some((fx, fy));
                    report.angles = Some((pan, tilt));
                    self.stage(pan, tilt, firing, aux, &mut report);
                }
                Err(e) if e.is_tick_local() => {
                    warn!("No target this tick: {}", e);
                    report.selection = Selection::NoTarget;
                }
                Err(e) => return Err(e),
            }
        }

        // A tick without its own command must not release an older one
        if report.command.is_none() {
            if let Some(stale) = self.channel.discard_staged() {
                debug!("Discarded held-back command {}", stale);
            }
        }

        match self.channel.flush(now) {
            Ok(sent) => report.sent = sent,
            Err(e) => warn!("Command not delivered: {}", e),
        }
        report.connected = self.channel.is_connected();
        Ok(report)
    }

    fn stage(&mut self, pan: f64, tilt: f64, firing: bool, aux: bool, report: &mut TickReport) {
        let command = match ActuatorCommand::from_angles(pan, tilt, firing, aux) {
            Ok(command) => command,
            Err(e) => {
                warn!("Dropping command: {}", e);
                return;
            }
        };
        report.command = Some(command);
        if let Err(e) = self.channel.send_command(command) {
            debug!("Command {} not staged: {}", command, e);
        }
    }

    /// Tick at the configured rate until the source is exhausted or a stop is requested
    ///
    /// The actuator connection is closed and the track source released on return.
    ///
    /// # Errors
    ///
    /// Returns an error if the track source fails.
    pub fn run(mut self) -> Result<RunSummary> {
        info!("Starting control loop");
        let mut summary = RunSummary::default();

        let result = loop {
            let started = Instant::now();
            let report = match self.tick(started) {
                Ok(report) => report,
                Err(e) => break Err(e),
            };
            if report.is_final() {
                break Ok(());
            }

            summary.ticks += 1;
            if report.selection != Selection::NoTarget {
                summary.aimed += 1;
            }
            if report.sent.is_some() {
                summary.sent += 1;
            }

            if let Some(remaining) = self.settings.tick_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        };

        self.channel.disconnect();
        info!(
            "Control loop finished: {} ticks, {} aimed, {} commands sent",
            summary.ticks, summary.aimed, summary.sent
        );
        result.map(|()| summary)
    }
}
