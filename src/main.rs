//! CLI entry point for coredaq
//!
//! Talks to one coreDAQ over a serial port, or to the built-in simulator with
//! `--mock`.
//!
//! # Usage
//!
//! ```bash
//! coredaq --port /dev/ttyACM0 info
//! coredaq --mock snapshot --frames 64 --unit w
//! coredaq acquire --frames 10000 --unit mv --output run.csv
//! coredaq gain 2 --power-range 750e-6
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use coredaq::config::{CoredaqConfig, DEFAULT_CONFIG_PATH};
use coredaq::{export, tracing_config};
use daq_core::{StreamTransport, Transport};
use daq_driver_coredaq::{
    gain_label, AcquisitionState, AutoGainOptions, Channels, CoreDaq, GainSetting, Head,
    MockCoreDaq, MockSignal, SerialCoreDaq, TriggerEdge, DEFAULT_SIG_DIGITS,
};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "coredaq")]
#[command(about = "coreDAQ photodetector acquisition tool", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port, overrides `[device] port`
    #[arg(long, global = true)]
    port: Option<String>,

    /// Use the built-in simulator instead of hardware
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identity, front end, gains, zeros and sampling
    Info,

    /// Averaged reading of all four heads
    Snapshot {
        /// Frames averaged on the device
        #[arg(long, default_value_t = 16)]
        frames: u32,

        #[arg(long, value_enum, default_value_t = Unit::W)]
        unit: Unit,
    },

    /// Capture a block of frames and write it as CSV
    Acquire {
        /// Frames to capture
        #[arg(long)]
        frames: u32,

        /// Wait for an external trigger edge instead of starting immediately
        #[arg(long, value_enum)]
        trigger: Option<Edge>,

        #[arg(long, value_enum, default_value_t = Unit::Mv)]
        unit: Unit,

        /// Significant digits for `--unit w`
        #[arg(long, default_value_t = DEFAULT_SIG_DIGITS)]
        sig_digits: u32,

        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Set the gain of one head
    Gain {
        /// Head number, 1-4
        head: u8,

        /// Gain index, 0-7
        #[arg(long, conflicts_with = "power_range")]
        value: Option<u8>,

        /// Largest optical power to measure, in Watts
        #[arg(long)]
        power_range: Option<f64>,

        /// Stage the gain without refreshing the front end
        #[arg(long)]
        no_apply: bool,
    },

    /// Step gains until every head sits inside the usable voltage window
    Autogain {
        /// Frames averaged per step
        #[arg(long, default_value_t = 16)]
        frames: u32,
    },

    /// Show or change the frame rate and oversampling
    Sampling {
        /// Frame rate in Hz
        #[arg(long)]
        freq: Option<u32>,

        /// Oversampling index, 0-7
        #[arg(long)]
        os: Option<u8>,
    },

    /// Head temperature, humidity and ADC die temperature
    Sensors,
}

#[derive(Clone, Copy, ValueEnum)]
enum Unit {
    /// Raw ADC codes
    Adc,
    /// Zero-corrected millivolts
    Mv,
    /// Optical power in Watts
    W,
}

#[derive(Clone, Copy, ValueEnum)]
enum Edge {
    Rising,
    Falling,
}

impl From<Edge> for TriggerEdge {
    fn from(edge: Edge) -> Self {
        match edge {
            Edge::Rising => TriggerEdge::Rising,
            Edge::Falling => TriggerEdge::Falling,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = CoredaqConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.device.port = Some(port);
    }
    config.validate()?;
    tracing_config::init_from_config(&config)?;

    let options = config.driver_options();

    if cli.mock {
        let simulator =
            MockCoreDaq::new().with_signal(MockSignal::Optical([1e-3, 200e-6, 20e-6, 1e-6]));
        let trigger = simulator.clone();
        let transport = StreamTransport::new(simulator, "coreDAQ simulator");
        let mut daq = CoreDaq::connect(transport, options)?;
        execute(&mut daq, cli.command, move || trigger.fire_trigger())?;
        daq.close()?;
    } else {
        let port = config
            .device
            .port
            .as_deref()
            .context("no serial port configured; pass --port or set [device] port")?;
        let mut daq = SerialCoreDaq::open(port, config.device.baud_rate, options)
            .with_context(|| format!("failed to open coreDAQ on {port}"))?;
        execute(&mut daq, cli.command, || {})?;
        daq.close()?;
    }
    Ok(())
}

/// Run one command. `after_trigger_arm` runs once a triggered acquisition is
/// armed; the simulator uses it to deliver the edge.
fn execute<T: Transport>(
    daq: &mut CoreDaq<T>,
    command: Commands,
    after_trigger_arm: impl FnOnce(),
) -> Result<()> {
    match command {
        Commands::Info => print_info(daq),
        Commands::Snapshot { frames, unit } => print_snapshot(daq, frames, unit),
        Commands::Acquire {
            frames,
            trigger,
            unit,
            sig_digits,
            output,
        } => {
            match trigger {
                Some(edge) => {
                    daq.trig_arm(frames, edge.into())?;
                    after_trigger_arm();
                }
                None => {
                    daq.arm(frames)?;
                    daq.start()?;
                }
            }
            let state = daq.wait_done_default()?;
            if state != AcquisitionState::DataReady {
                daq.stop()?;
                bail!("acquisition ended in state {state}");
            }
            match unit {
                Unit::Adc => write_channels(&daq.transfer_frames_adc(frames)?, output.as_deref()),
                Unit::Mv => write_channels(&daq.transfer_frames_mv(frames)?, output.as_deref()),
                Unit::W => write_channels(
                    &daq.transfer_frames_w(frames, None, sig_digits)?,
                    output.as_deref(),
                ),
            }
        }
        Commands::Gain {
            head,
            value,
            power_range,
            no_apply,
        } => {
            let head = Head::new(head)?;
            let setting = GainSetting::from_options(value, power_range)?;
            let gain = daq.set_gain(head, setting, !no_apply)?;
            println!("{head}: {gain} ({})", gain_label(gain));
            Ok(())
        }
        Commands::Autogain { frames } => {
            let gains = daq.autogain(frames, AutoGainOptions::default())?;
            for (head, gain) in Head::ALL.iter().zip(gains) {
                println!("{head}: {gain} ({})", gain_label(gain));
            }
            Ok(())
        }
        Commands::Sampling { freq, os } => {
            if let Some(hz) = freq {
                if let Some(adjusted) = daq.set_frequency(hz)? {
                    println!("oversampling lowered to {adjusted} for {hz} Hz");
                }
            }
            if let Some(os) = os {
                let applied = daq.set_oversampling(os)?;
                if applied != os {
                    println!("oversampling {os} not valid at this rate, applied {applied}");
                }
            }
            println!(
                "frequency: {} Hz, oversampling: {}",
                daq.frequency_hz()?,
                daq.oversampling()?
            );
            Ok(())
        }
        Commands::Sensors => {
            println!("head temperature: {:.2} °C", daq.head_temperature_c()?);
            println!("head humidity:    {:.2} %", daq.head_humidity()?);
            println!("die temperature:  {:.2} °C", daq.die_temperature_c()?);
            Ok(())
        }
    }
}

fn print_info<T: Transport>(daq: &mut CoreDaq<T>) -> Result<()> {
    println!("identity:     {}", daq.identity()?);
    println!("front end:    {:?}", daq.front_end());
    println!(
        "sampling:     {} Hz, oversampling {}",
        daq.frequency_hz()?,
        daq.oversampling()?
    );
    let gains = daq.gains()?;
    let zeros = daq.factory_zeros();
    for (head, gain) in Head::ALL.iter().zip(gains) {
        println!(
            "{head}: gain {gain} ({}), factory zero {}, slope {:.4e} mV/W",
            gain_label(gain),
            zeros.get(*head),
            daq.slope(*head, gain)
        );
    }
    Ok(())
}

fn print_snapshot<T: Transport>(daq: &mut CoreDaq<T>, frames: u32, unit: Unit) -> Result<()> {
    match unit {
        Unit::Adc => {
            let snapshot = daq.snapshot_codes(frames)?;
            for head in Head::ALL {
                let i = head.index();
                println!("{head} [{}]: {}", snapshot.gains[i], snapshot.codes[i]);
            }
        }
        Unit::Mv => {
            let snapshot = daq.snapshot_mv(frames)?;
            for head in Head::ALL {
                let i = head.index();
                println!("{head} [{}]: {:.3} mV", snapshot.gains[i], snapshot.mv[i]);
            }
        }
        Unit::W => {
            let snapshot = daq.snapshot_w(frames)?;
            for head in Head::ALL {
                let i = head.index();
                println!(
                    "{head} [{}]: {:.4e} W ({:.3} mV)",
                    snapshot.gains[i], snapshot.power_w[i], snapshot.mv[i]
                );
            }
        }
    }
    Ok(())
}

fn write_channels<V: Serialize + Copy>(channels: &Channels<V>, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let frames = export::write_channels(channels, BufWriter::new(file))
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(frames, path = %path.display(), "acquisition written");
        }
        None => {
            export::write_channels(channels, io::stdout().lock())?;
        }
    }
    Ok(())
}
