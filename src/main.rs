//! Sprayer targeting: aim a pan/tilt sprayer at tracked targets on the floor.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use sprayer_targeting::{
    app::{forward_operator_events, SprayerApp},
    calibration::CalibrationSolver,
    command_channel::{CommandLog, CsvCommandLog, NoopCommandLog},
    config::{load_samples, save_extrinsics, Config, EXAMPLE_CONFIG},
    pan_tilt::ExtrinsicParams,
    receiver::CommandReceiver,
    targeting::{FiringMode, TargetingMode},
    tracker::JsonLinesTrackSource,
};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    thread,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control loop on tracker output read as JSON lines from stdin
    Run {
        /// Targeting mode (automatic, cursor, joystick)
        #[arg(short, long)]
        mode: Option<TargetingMode>,

        /// Cursor firing mode (toggle, hold)
        #[arg(short, long)]
        firing: Option<FiringMode>,

        /// Actuator address
        #[arg(long)]
        address: Option<String>,

        /// Actuator port
        #[arg(long)]
        port: Option<u16>,

        /// Floor corners artifact
        #[arg(long)]
        floor: Option<PathBuf>,

        /// Calibration artifact
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Operator events as JSON lines (file or FIFO); required for cursor and joystick modes
        #[arg(long)]
        operator: Option<PathBuf>,
    },

    /// Fit extrinsic parameters from measured samples
    Calibrate {
        /// Samples file (YAML or JSON list of {point, angles})
        #[arg(short, long)]
        samples: PathBuf,

        /// Output calibration artifact
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Initial mount height in metres
        #[arg(long, default_value = "1.5")]
        height: f64,

        /// Initial mount pan in degrees
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        pan: f64,

        /// Initial mount tilt in degrees
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        tilt: f64,

        /// Initial mount roll in degrees
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        roll: f64,

        /// Save the result even if the RMS error exceeds the configured limit
        #[arg(long)]
        force: bool,
    },

    /// Listen for actuator commands and print them
    Receive {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Port to bind
        #[arg(long)]
        port: Option<u16>,

        /// Append forwarded commands to a CSV file
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Print an example configuration file
    ExampleConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    info!("Loading configuration from: {}", path.display());
    Config::from_file(path)
        .with_context(|| format!("Failed to load config file {}", path.display()))
}

/// Cursor and joystick modes are driven entirely by operator input
fn require_operator_input(mode: TargetingMode, operator: Option<&Path>) -> Result<()> {
    if mode != TargetingMode::Automatic && operator.is_none() {
        bail!("{mode} mode needs operator input; pass --operator <PATH>");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)] // One per CLI flag
fn run(
    mut config: Config,
    mode: Option<TargetingMode>,
    firing: Option<FiringMode>,
    address: Option<String>,
    port: Option<u16>,
    floor: Option<PathBuf>,
    calibration: Option<PathBuf>,
    operator: Option<PathBuf>,
) -> Result<()> {
    if let Some(mode) = mode {
        config.targeting.default_mode = mode;
    }
    if let Some(firing) = firing {
        config.targeting.firing_mode = firing;
    }
    if let Some(address) = address {
        config.actuator.address = address;
    }
    if let Some(port) = port {
        config.actuator.port = port;
    }
    if let Some(floor) = floor {
        config.artifacts.floor_corners = floor;
    }
    if let Some(calibration) = calibration {
        config.artifacts.calibration = calibration;
    }

    require_operator_input(config.targeting.default_mode, operator.as_deref())?;
    let operator_input = match &operator {
        Some(path) => Some(
            File::open(path)
                .with_context(|| format!("Failed to open operator input {}", path.display()))?,
        ),
        None => None,
    };

    let source = JsonLinesTrackSource::new(BufReader::new(std::io::stdin()));
    let (app, handle) = SprayerApp::from_config(&config, Box::new(source))
        .context("Failed to start control loop")?;

    if let Some(file) = operator_input {
        // Detached: the reader may block on a FIFO after the loop has ended
        thread::spawn(move || match forward_operator_events(BufReader::new(file), &handle) {
            Ok(count) => info!("Operator input closed after {} events", count),
            Err(e) => warn!("Operator input failed: {}", e),
        });
    }

    let summary = app.run()?;
    info!("{} ticks, {} commands sent", summary.ticks, summary.sent);
    Ok(())
}

fn calibrate(
    config: &Config,
    samples: &Path,
    output: Option<PathBuf>,
    guess: ExtrinsicParams,
    force: bool,
) -> Result<()> {
    let samples = load_samples(samples)?;
    info!("Fitting {} calibration samples", samples.len());

    let fit = CalibrationSolver::new(config.solver).fit(&samples, guess);
    let params = match fit.accept(config.solver.max_rms_error_deg) {
        Ok(params) => params,
        Err(e) if force => {
            warn!("{}; saving anyway", e);
            fit.params
        }
        Err(e) => return Err(e).context("Calibration rejected, rerun with --force to keep it"),
    };

    let output = output.unwrap_or_else(|| config.artifacts.calibration.clone());
    save_extrinsics(&output, &params)?;
    println!("{}", serde_json::to_string_pretty(&params)?);
    Ok(())
}

fn receive(config: &Config, bind: &str, port: Option<u16>, log: Option<PathBuf>) -> Result<()> {
    let port = port.unwrap_or(config.actuator.port);
    let receiver = CommandReceiver::bind(bind, port, config.actuator.update_interval())
        .with_context(|| format!("Failed to bind {bind}:{port}"))?;

    eprintln!("pan_angle,tilt_angle,trigger,red_button");
    let command_log: Box<dyn CommandLog> = match log {
        Some(path) => Box::new(CsvCommandLog::create(path)?),
        None => Box::new(NoopCommandLog),
    };
    receiver.serve_one(command_log, |command| println!("{command}"))?;
    Ok(())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logger
    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Run {
            mode,
            firing,
            address,
            port,
            floor,
            calibration,
            operator,
        } => run(config, mode, firing, address, port, floor, calibration, operator),
        Command::Calibrate {
            samples,
            output,
            height,
            pan,
            tilt,
            roll,
            force,
        } => calibrate(
            &config,
            &samples,
            output,
            ExtrinsicParams::new(height, pan, tilt, roll),
            force,
        ),
        Command::Receive { bind, port, log } => receive(&config, &bind, port, log),
        Command::ExampleConfig => {
            print!("{EXAMPLE_CONFIG}");
            Ok(())
        }
    }
}
