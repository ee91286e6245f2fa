//! Actuator command encoding and the rate-limited TCP channel that carries it.
//!
//! The wire format is one ASCII record per line, `pan,tilt,trigger,aux\n`,
//! with integer angles in `[0, 180]` and `0`/`1` flags. Nothing is ever
//! acknowledged by the actuator.

use crate::{
    constants::{
        ANGLE_MAX_DEG, ANGLE_MIN_DEG, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_SEND_TIMEOUT_MS,
        DEFAULT_UPDATE_RATE_HZ,
    },
    utils::safe_cast::f64_to_u8_clamp,
    Error, Result,
};
use chrono::Local;
use log::{debug, info, warn};
use std::{
    fmt,
    fs::File,
    io::{BufWriter, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    path::Path,
    str::FromStr,
    time::{Duration, Instant},
};

/// One actuator command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActuatorCommand {
    /// Pan in whole degrees, `0..=180`
    pub pan: u8,
    /// Tilt in whole degrees, `0..=180`
    pub tilt: u8,
    /// Fire
    pub trigger: bool,
    /// Auxiliary button; forwarded with no defined meaning
    pub aux: bool,
}

impl ActuatorCommand {
    /// Build a command from angles in degrees, rounding and clamping into the device range
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if either angle is NaN or infinite.
    pub fn from_angles(pan: f64, tilt: f64, trigger: bool, aux: bool) -> Result<Self> {
        Ok(Self {
            pan: f64_to_u8_clamp(pan, ANGLE_MIN_DEG, ANGLE_MAX_DEG)?,
            tilt: f64_to_u8_clamp(tilt, ANGLE_MIN_DEG, ANGLE_MAX_DEG)?,
            trigger,
            aux,
        })
    }

    /// Wire record including the trailing newline
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.pan,
            self.tilt,
            u8::from(self.trigger),
            u8::from(self.aux)
        )
    }
}

impl FromStr for ActuatorCommand {
    type Err = Error;

    /// Parse a wire record; surrounding whitespace and the newline are ignored
    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.trim().split(',').map(str::trim).collect();
        let [pan, tilt, trigger, aux] = fields.as_slice() else {
            return Err(Error::InvalidInput(format!(
                "Expected 4 comma-separated fields, got {}: {:?}",
                fields.len(),
                s.trim()
            )));
        };

        let angle = |name: &str, value: &str| -> Result<u8> {
            let parsed: u8 = value
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Invalid {name} angle: {value:?}")))?;
            if parsed > ANGLE_MAX_DEG {
                return Err(Error::InvalidInput(format!(
                    "{name} angle {parsed} exceeds {ANGLE_MAX_DEG}"
                )));
            }
            Ok(parsed)
        };
        let flag = |name: &str, value: &str| match value {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(Error::InvalidInput(format!("Invalid {name} flag: {value:?}"))),
        };

        Ok(Self {
            pan: angle("pan", *pan)?,
            tilt: angle("tilt", *tilt)?,
            trigger: flag("trigger", *trigger)?,
            aux: flag("aux", *aux)?,
        })
    }
}

/// Sink for successfully transmitted commands
pub trait CommandLog: Send {
    /// Record one command
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be written.
    fn record(&mut self, command: &ActuatorCommand) -> Result<()>;
}

/// Discards every record
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCommandLog;

impl CommandLog for NoopCommandLog {
    fn record(&mut self, _command: &ActuatorCommand) -> Result<()> {
        Ok(())
    }
}

/// Writes each command to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCommandLog;

impl CommandLog for LogCommandLog {
    fn record(&mut self, command: &ActuatorCommand) -> Result<()> {
        info!(
            target: "sprayer::commands",
            "{},{},{}",
            command.pan,
            command.tilt,
            u8::from(command.trigger)
        );
        Ok(())
    }
}

/// Appends `timestamp,pan,tilt,trigger` lines
#[derive(Debug)]
pub struct CsvCommandLog<W> {
    writer: W,
}

impl CsvCommandLog<BufWriter<File>> {
    /// Create or truncate a CSV log file
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> CsvCommandLog<W> {
    /// Wrap a writer
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Underlying writer
    pub const fn get_ref(&self) -> &W {
        &self.writer
    }
}

impl<W: Write + Send> CommandLog for CsvCommandLog<W> {
    fn record(&mut self, command: &ActuatorCommand) -> Result<()> {
        writeln!(
            self.writer,
            "{},{},{},{}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            command.pan,
            command.tilt,
            u8::from(command.trigger)
        )?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Health of the actuator link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No open stream
    Disconnected {
        /// Why the link is down
        reason: String,
    },
    /// Stream open to `peer`
    Connected {
        /// Remote address
        peer: SocketAddr,
    },
}

impl ConnectionStatus {
    fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected { reason } => write!(f, "Disconnected ({reason})"),
            Self::Connected { peer } => write!(f, "Connected to {peer}"),
        }
    }
}

/// Timing for a [`CommandChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTiming {
    /// Minimum spacing between transmissions
    pub update_interval: Duration,
    /// Bound on opening the connection
    pub connect_timeout: Duration,
    /// Bound on a single write; exceeding it counts as a failure
    pub send_timeout: Duration,
}

impl Default for ChannelTiming {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs_f64(1.0 / DEFAULT_UPDATE_RATE_HZ),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
        }
    }
}

/// Persistent, rate-limited connection to the actuator
///
/// Commands are staged by [`send`](Self::send) and written by
/// [`flush`](Self::flush) no more than once per update interval. Staging
/// replaces any command not yet written, so only the newest one reaches the
/// wire.
pub struct CommandChannel {
    stream: Option<TcpStream>,
    status: ConnectionStatus,
    timing: ChannelTiming,
    staged: Option<ActuatorCommand>,
    last_sent: Option<Instant>,
    log: Box<dyn CommandLog>,
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel")
            .field("status", &self.status)
            .field("timing", &self.timing)
            .field("staged", &self.staged)
            .field("last_sent", &self.last_sent)
            .finish_non_exhaustive()
    }
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new(ChannelTiming::default(), Box::new(NoopCommandLog))
    }
}

impl CommandChannel {
    /// Create a disconnected channel
    #[must_use]
    pub fn new(timing: ChannelTiming, log: Box<dyn CommandLog>) -> Self {
        Self {
            stream: None,
            status: ConnectionStatus::disconnected("not connected"),
            timing,
            staged: None,
            last_sent: None,
            log,
        }
    }

    /// Open a connection, replacing any existing one
    ///
    /// Failures are recorded in [`status`](Self::status) rather than returned;
    /// call again to retry.
    pub fn connect(&mut self, address: &str, port: u16) -> &ConnectionStatus {
        self.stream = None;
        self.staged = None;

        self.status = match self.open(address, port) {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));
                info!("Connected to actuator at {}", peer);
                self.stream = Some(stream);
                ConnectionStatus::Connected { peer }
            }
            Err(e) => {
                warn!("Failed to connect to actuator at {}:{}: {}", address, port, e);
                ConnectionStatus::disconnected(e.to_string())
            }
        };
        &self.status
    }

    fn open(&self, address: &str, port: u16) -> Result<TcpStream> {
        let addrs = (address, port)
            .to_socket_addrs()
            .map_err(|e| Error::Connection(format!("cannot resolve {address}:{port}: {e}")))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timing.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(Some(self.timing.send_timeout))?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(Error::Connection(match last_error {
            Some(e) => e.to_string(),
            None => format!("{address}:{port} resolved to no addresses"),
        }))
    }

    /// Close the connection
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            info!("Disconnected from actuator");
        }
        self.staged = None;
        self.status = ConnectionStatus::disconnected("closed");
    }

    /// Current link health
    #[must_use]
    pub const fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Whether a stream is open
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Command waiting for the next transmission slot
    #[must_use]
    pub const fn staged(&self) -> Option<&ActuatorCommand> {
        self.staged.as_ref()
    }

    /// Drop the staged command, returning it if there was one
    pub fn discard_staged(&mut self) -> Option<ActuatorCommand> {
        self.staged.take()
    }

    /// Stage pan/tilt/trigger for transmission with `aux` cleared
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for non-finite angles and `Connection` if the
    /// channel is not connected.
    pub fn send(&mut self, pan_deg: f64, tilt_deg: f64, trigger: bool) -> Result<ActuatorCommand> {
        let command = ActuatorCommand::from_angles(pan_deg, tilt_deg, trigger, false)?;
        self.send_command(command)?;
        Ok(command)
    }

    /// Stage a fully formed command, replacing any command not yet written
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the channel is not connected.
    pub fn send_command(&mut self, command: ActuatorCommand) -> Result<()> {
        if self.stream.is_none() {
            self.staged = None;
            return Err(Error::Connection(format!("not connected: {}", self.status)));
        }
        if let Some(previous) = self.staged.replace(command) {
            debug!("Coalesced {} into {}", previous, command);
        }
        Ok(())
    }

    /// Write the staged command if the update interval has elapsed
    ///
    /// Returns the command that reached the wire, if any.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the write fails or times out. The stream is
    /// closed and [`connect`](Self::connect) must be called again.
    pub fn flush(&mut self, now: Instant) -> Result<Option<ActuatorCommand>> {
        let Some(command) = self.staged else {
            return Ok(None);
        };
        if let Some(last) = self.last_sent {
            if now.saturating_duration_since(last) < self.timing.update_interval {
                return Ok(None);
            }
        }
        let Some(stream) = self.stream.as_mut() else {
            self.staged = None;
            return Ok(None);
        };

        if let Err(e) = stream.write_all(command.encode().as_bytes()) {
            warn!("Actuator write failed, dropping connection: {}", e);
            self.stream = None;
            self.staged = None;
            self.status = ConnectionStatus::disconnected(format!("connection lost: {e}"));
            return Err(Error::Connection(e.to_string()));
        }

        self.staged = None;
        self.last_sent = Some(now);
        if let Err(e) = self.log.record(&command) {
            warn!("Failed to record command {}: {}", command, e);
        }
        Ok(Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn read_line(reader: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line
    }

    #[test]
    fn test_encode_clamps_and_rounds() {
        let cmd = ActuatorCommand::from_angles(-12.0, 90.6, true, false).unwrap();
        assert_eq!(cmd.encode(), "0,91,1,0\n");
        let cmd = ActuatorCommand::from_angles(400.0, 179.4, false, true).unwrap();
        assert_eq!(cmd.encode(), "180,179,0,1\n");
        assert!(ActuatorCommand::from_angles(f64::NAN, 0.0, false, false).is_err());
    }

    #[test]
    fn test_parse_record() {
        let cmd: ActuatorCommand = "90,45,1,0\n".parse().unwrap();
        assert_eq!(
            cmd,
            ActuatorCommand {
                pan: 90,
                tilt: 45,
                trigger: true,
                aux: false
            }
        );
        assert!("90,45,1".parse::<ActuatorCommand>().is_err());
        assert!("181,45,1,0".parse::<ActuatorCommand>().is_err());
        assert!("90,45,2,0".parse::<ActuatorCommand>().is_err());
        assert!("a,b,c,d".parse::<ActuatorCommand>().is_err());
    }

    #[test]
    fn test_connect_failure_is_reported_not_raised() {
        let (listener, port) = listener();
        drop(listener);

        let mut channel = CommandChannel::default();
        let status = channel.connect("127.0.0.1", port).clone();
        assert!(matches!(status, ConnectionStatus::Disconnected { .. }));
        assert!(!channel.is_connected());
        assert!(matches!(channel.send(10.0, 20.0, false), Err(Error::Connection(_))));
    }

    #[test]
    fn test_send_reaches_wire() {
        let (listener, port) = listener();
        let mut channel = CommandChannel::default();
        assert!(matches!(
            channel.connect("127.0.0.1", port),
            ConnectionStatus::Connected { .. }
        ));
        let (server, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(server);

        channel.send(90.0, 45.0, true).unwrap();
        let sent = channel.flush(Instant::now()).unwrap();
        assert_eq!(sent.map(|c| c.pan), Some(90));
        assert_eq!(read_line(&mut reader), "90,45,1,0\n");
    }

    #[test]
    fn test_rate_limit_keeps_latest() {
        let (listener, port) = listener();
        let mut channel = CommandChannel::default();
        channel.connect("127.0.0.1", port);
        let (server, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(server);

        let t0 = Instant::now();
        channel.send(10.0, 10.0, false).unwrap();
        assert!(channel.flush(t0).unwrap().is_some());

        channel.send(20.0, 20.0, false).unwrap();
        channel.send(30.0, 30.0, true).unwrap();
        assert!(channel.flush(t0 + Duration::from_millis(5)).unwrap().is_none());
        let sent = channel.flush(t0 + Duration::from_millis(40)).unwrap();
        assert_eq!(sent.map(|c| (c.pan, c.tilt)), Some((30, 30)));

        assert_eq!(read_line(&mut reader), "10,10,0,0\n");
        assert_eq!(read_line(&mut reader), "30,30,1,0\n");
    }

    #[test]
    fn test_disconnect_discards_staged() {
        let (listener, port) = listener();
        let mut channel = CommandChannel::default();
        channel.connect("127.0.0.1", port);
        let _server = listener.accept().unwrap();

        channel.send(10.0, 10.0, false).unwrap();
        channel.disconnect();
        assert!(channel.staged().is_none());
        assert!(channel.flush(Instant::now()).unwrap().is_none());
        assert_eq!(
            channel.status(),
            &ConnectionStatus::Disconnected {
                reason: "closed".to_string()
            }
        );
    }

    #[test]
    fn test_discard_staged() {
        let (listener, port) = listener();
        let mut channel = CommandChannel::default();
        channel.connect("127.0.0.1", port);
        let _server = listener.accept().unwrap();

        let cmd = channel.send(10.0, 20.0, false).unwrap();
        assert_eq!(channel.discard_staged(), Some(cmd));
        assert!(channel.discard_staged().is_none());
        assert!(channel.flush(Instant::now()).unwrap().is_none());
        assert!(channel.is_connected());
    }

    #[test]
    fn test_csv_log_format() {
        let mut log = CsvCommandLog::new(Vec::<u8>::new());
        let cmd = ActuatorCommand::from_angles(12.0, 34.0, true, true).unwrap();
        log.record(&cmd).unwrap();

        let text = String::from_utf8(log.get_ref().clone()).unwrap();
        let line = text.trim_end();
        // "YYYY-MM-DD HH:MM:SS,12,34,1"
        assert_eq!(line.len(), 19 + ",12,34,1".len());
        assert!(line.ends_with(",12,34,1"));
    }
}
