//! Actuator-side listener for the command wire format.
//!
//! Accepts a single controller connection, decodes each record, and hands at
//! most one command per update interval to a sink (normally the servo driver).
//! Records arriving inside an interval replace each other; the newest one is
//! forwarded as soon as the interval expires.

use crate::{
    command_channel::{ActuatorCommand, CommandLog, NoopCommandLog},
    Result,
};
use log::{debug, info, warn};
use std::{
    io::{BufRead, BufReader, ErrorKind},
    net::{SocketAddr, TcpListener},
    thread,
    time::{Duration, Instant},
};

/// Shortest read timeout used while waiting for records
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Counters for one served connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiverStats {
    /// Well-formed records received
    pub received: usize,
    /// Records handed to the sink
    pub forwarded: usize,
    /// Records replaced by a newer one before their slot came up
    pub superseded: usize,
    /// Records that failed to decode
    pub malformed: usize,
}

/// Decodes records and applies the update-interval gate
pub struct CommandGate {
    update_interval: Duration,
    last_forwarded: Option<Instant>,
    pending: Option<ActuatorCommand>,
    log: Box<dyn CommandLog>,
    stats: ReceiverStats,
}

impl CommandGate {
    /// Create a gate forwarding at most once per `update_interval`
    #[must_use]
    pub fn new(update_interval: Duration, log: Box<dyn CommandLog>) -> Self {
        Self {
            update_interval,
            last_forwarded: None,
            pending: None,
            log,
            stats: ReceiverStats::default(),
        }
    }

    /// Counters so far
    #[must_use]
    pub const fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Newest command still waiting for its slot
    #[must_use]
    pub const fn pending(&self) -> Option<&ActuatorCommand> {
        self.pending.as_ref()
    }

    /// Decode one line received at `now`, returning the command if it should be forwarded
    ///
    /// A record inside the update interval is held and replaces any record
    /// already held; see [`poll`](Self::poll).
    pub fn offer(&mut self, line: &str, now: Instant) -> Option<ActuatorCommand> {
        if line.trim().is_empty() {
            return None;
        }
        let command = match line.parse::<ActuatorCommand>() {
            Ok(command) => command,
            Err(e) => {
                warn!("Skipping malformed record: {}", e);
                self.stats.malformed += 1;
                return None;
            }
        };
        self.stats.received += 1;

        if let Some(previous) = self.pending.replace(command) {
            debug!("{} superseded by {}", previous, command);
            self.stats.superseded += 1;
        }
        self.poll(now)
    }

    /// Time left before the held command may be forwarded, if one is held
    #[must_use]
    pub fn pending_wait(&self, now: Instant) -> Option<Duration> {
        self.pending.as_ref()?;
        Some(match self.last_forwarded {
            Some(last) => (last + self.update_interval).saturating_duration_since(now),
            None => Duration::ZERO,
        })
    }

    /// Forward the held command if its slot has come up
    pub fn poll(&mut self, now: Instant) -> Option<ActuatorCommand> {
        if self.pending_wait(now)? > Duration::ZERO {
            return None;
        }
        let command = self.pending.take()?;

        self.last_forwarded = Some(now);
        self.stats.forwarded += 1;
        if let Err(e) = self.log.record(&command) {
            warn!("Failed to record command {}: {}", command, e);
        }
        Some(command)
    }
}

/// TCP listener for controller connections
pub struct CommandReceiver {
    listener: TcpListener,
    update_interval: Duration,
}

impl CommandReceiver {
    /// Bind to `address:port`
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket cannot be bound.
    pub fn bind(address: &str, port: u16, update_interval: Duration) -> Result<Self> {
        let listener = TcpListener::bind((address, port))?;
        info!("Listening for controller on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            update_interval,
        })
    }

    /// Bound address
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket address cannot be queried.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one controller and forward its commands to `sink` until it disconnects
    ///
    /// # Errors
    ///
    /// Returns an I/O error if accepting or reading from the connection fails.
    pub fn serve_one<F>(&self, log: Box<dyn CommandLog>, mut sink: F) -> Result<ReceiverStats>
    where
        F: FnMut(ActuatorCommand),
    {
        let (stream, peer) = self.listener.accept()?;
        info!("Controller connected from {}", peer);
        stream.set_read_timeout(Some(self.update_interval.max(MIN_POLL_INTERVAL)))?;

        let mut gate = CommandGate::new(self.update_interval, log);
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            // A timed-out read keeps its partial line in `line`
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if let Some(command) = gate.offer(&line, Instant::now()) {
                        sink(command);
                    }
                    line.clear();
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if let Some(command) = gate.poll(Instant::now()) {
                        sink(command);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        // The newest record is still owed to the sink
        if let Some(wait) = gate.pending_wait(Instant::now()) {
            thread::sleep(wait);
            if let Some(command) = gate.poll(Instant::now()) {
                sink(command);
            }
        }

        let stats = gate.stats();
        info!(
            "Controller {} disconnected: {} received, {} forwarded, {} malformed",
            peer, stats.received, stats.forwarded, stats.malformed
        );
        Ok(stats)
    }

    /// [`serve_one`](Self::serve_one) without a command log
    ///
    /// # Errors
    ///
    /// See [`serve_one`](Self::serve_one).
    pub fn serve_one_unlogged<F>(&self, sink: F) -> Result<ReceiverStats>
    where
        F: FnMut(ActuatorCommand),
    {
        self.serve_one(Box::new(NoopCommandLog), sink)
    }
}
