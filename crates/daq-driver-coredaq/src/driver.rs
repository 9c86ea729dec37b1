//! coreDAQ driver.
//!
//! Reference: coreDAQ firmware 3.x serial command set
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_coredaq::{CoreDaq, DriverOptions, Head};
//! use std::time::Duration;
//!
//! let mut daq = CoreDaq::open("/dev/ttyACM0", 115_200, DriverOptions::default())?;
//! daq.set_gain(Head::new(2)?, GainSetting::PowerRange(750e-6), true)?;
//!
//! daq.arm(1000)?;
//! daq.start()?;
//! daq.wait_done(Duration::from_millis(50))?;
//! let watts = daq.transfer_frames_w(1000, None, 4)?;
//! daq.close()?;
//! ```

use crate::acquisition::{
    AcquisitionMachine, AcquisitionState, Pacer, ThreadPacer, TriggerMode,
};
use crate::calibration::CalibrationTable;
use crate::channel::{Head, NUM_HEADS};
use crate::connection::Connection;
use crate::conversion::{
    channels_to_mv, channels_to_watts, Channels, CodeSnapshot, MvSnapshot, PowerSnapshot,
    ZeroOffsets,
};
use crate::gain::{GainIndex, GainSetting, GainState};
use crate::protocol::{
    decode_frames, parse_float, parse_front_end, parse_gains, parse_int, parse_snapshot,
    parse_zeros, Command, FrontEnd, Reply, TriggerEdge, FRAME_BYTES,
};
use crate::sampling::{best_oversampling_for, max_frequency_for, MAX_FREQUENCY_HZ, MAX_OVERSAMPLING};
use daq_core::error::{AppResult, DaqError};
use daq_core::serial::Transport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

// =============================================================================
// Options
// =============================================================================

/// Timing and chunking knobs for acquisitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionOptions {
    /// Interval between `STATE?` polls when waiting through [`CoreDaq::wait_done`]
    /// with the configured default.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound on a snapshot's `SNAP?`/`BUSY` loop.
    #[serde(with = "humantime_serde")]
    pub snapshot_timeout: Duration,
    /// Interval between `SNAP?` polls.
    #[serde(with = "humantime_serde")]
    pub snapshot_poll_interval: Duration,
    /// Largest `XFER` request; a positive multiple of one frame (8 bytes).
    pub transfer_chunk_bytes: usize,
    /// Pause after a gain change before the next measurement.
    #[serde(with = "humantime_serde")]
    pub gain_settle: Duration,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            snapshot_timeout: Duration::from_secs(1),
            snapshot_poll_interval: Duration::from_millis(5),
            transfer_chunk_bytes: 262_144,
            gain_settle: Duration::from_millis(50),
        }
    }
}

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverOptions {
    /// Per-exchange reply timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Acquisition timing.
    pub acquisition: AcquisitionOptions,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            acquisition: AcquisitionOptions::default(),
        }
    }
}

impl DriverOptions {
    /// Reject options the driver cannot work with.
    pub fn validate(&self) -> AppResult<()> {
        if self.timeout.is_zero() {
            return Err(DaqError::InvalidArgument("timeout must be > 0".into()));
        }
        let acq = &self.acquisition;
        if acq.snapshot_timeout.is_zero() {
            return Err(DaqError::InvalidArgument("snapshot_timeout must be > 0".into()));
        }
        if acq.transfer_chunk_bytes == 0 || acq.transfer_chunk_bytes % FRAME_BYTES != 0 {
            return Err(DaqError::InvalidArgument(format!(
                "transfer_chunk_bytes must be a positive multiple of {FRAME_BYTES}, got {}",
                acq.transfer_chunk_bytes
            )));
        }
        Ok(())
    }
}

/// Bounds for [`CoreDaq::autogain`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoGainOptions {
    /// Step to a more sensitive gain below this |mV|.
    pub min_mv: f64,
    /// Step to a less sensitive gain above this |mV|.
    pub max_mv: f64,
    /// Give up after this many snapshot/adjust rounds.
    pub max_iterations: u32,
}

impl Default for AutoGainOptions {
    fn default() -> Self {
        Self {
            min_mv: 100.0,
            max_mv: 4700.0,
            max_iterations: 10,
        }
    }
}

// =============================================================================
// CoreDaq
// =============================================================================

/// Driver for one coreDAQ with a linear (TIA) front end.
///
/// Owns the connection exclusively. Calibration, factory zeros and gains are
/// read once in [`CoreDaq::connect`]; the transport is released by
/// [`CoreDaq::close`] or on drop.
pub struct CoreDaq<T: Transport> {
    conn: Connection<T>,
    options: DriverOptions,
    pacer: Box<dyn Pacer>,
    front_end: FrontEnd,
    calibration: CalibrationTable,
    factory_zeros: ZeroOffsets,
    active_zeros: ZeroOffsets,
    gains: GainState,
    machine: AcquisitionMachine,
}

/// A [`CoreDaq`] on a real serial port.
#[cfg(feature = "serial")]
pub type SerialCoreDaq =
    CoreDaq<daq_core::serial::StreamTransport<Box<dyn serialport::SerialPort>>>;

#[cfg(feature = "serial")]
impl SerialCoreDaq {
    /// Open a serial port and connect.
    pub fn open(port_path: &str, baud_rate: u32, options: DriverOptions) -> AppResult<Self> {
        let transport = daq_core::serial::open_serial(port_path, baud_rate, "coreDAQ")?;
        Self::connect(transport, options)
    }
}

impl<T: Transport> CoreDaq<T> {
    /// Connect over an already-open transport, pacing polls with real sleeps.
    pub fn connect(transport: T, options: DriverOptions) -> AppResult<Self> {
        Self::connect_with_pacer(transport, options, ThreadPacer)
    }

    /// Connect with a custom [`Pacer`], e.g. a fake clock in tests.
    ///
    /// Runs the connect sequence: discard stale input, check the front end,
    /// refresh the front-end bus, load calibration, factory zeros and gains.
    /// The transport is closed again if any step fails.
    #[instrument(skip_all, fields(timeout = ?options.timeout), err)]
    pub fn connect_with_pacer(
        transport: T,
        options: DriverOptions,
        pacer: impl Pacer + 'static,
    ) -> AppResult<Self> {
        let mut conn = Connection::new(transport, options.timeout);
        let initialised = options.validate().and_then(|()| Self::initialise(&mut conn));

        match initialised {
            Ok((calibration, zeros, gains)) => {
                tracing::info!(
                    zeros = ?zeros.codes(),
                    gains = ?gains,
                    "coreDAQ connected"
                );
                Ok(Self {
                    conn,
                    options,
                    pacer: Box::new(pacer),
                    front_end: FrontEnd::Linear,
                    calibration,
                    factory_zeros: zeros,
                    active_zeros: zeros,
                    gains: GainState::from_gains(gains),
                    machine: AcquisitionMachine::new(),
                })
            }
            Err(e) => {
                if let Err(close_err) = conn.close() {
                    tracing::warn!(error = %close_err, "failed to close transport after connect error");
                }
                Err(e)
            }
        }
    }

    fn initialise(
        conn: &mut Connection<T>,
    ) -> AppResult<(CalibrationTable, ZeroOffsets, [GainIndex; NUM_HEADS])> {
        conn.drain();

        let payload = conn.ask(&Command::HeadType)?;
        let front_end = parse_front_end(&Command::HeadType, &payload)?;
        if front_end != FrontEnd::Linear {
            return Err(DaqError::CalibrationLoad(format!(
                "{front_end:?} front end has no per-gain slope calibration"
            )));
        }

        conn.command(&Command::Refresh)?;
        let calibration = CalibrationTable::load(conn)?;
        let zeros = Self::query_factory_zeros(conn)?;
        let payload = conn.ask(&Command::GetGains)?;
        let gains = parse_gains(&Command::GetGains, &payload)?;
        Ok((calibration, zeros, gains))
    }

    fn query_factory_zeros(conn: &mut Connection<T>) -> AppResult<ZeroOffsets> {
        let payload = conn.ask(&Command::FactoryZeros)?;
        Ok(ZeroOffsets::new(parse_zeros(&Command::FactoryZeros, &payload)?))
    }

    /// Release the transport.
    pub fn close(mut self) -> AppResult<()> {
        tracing::debug!("closing coreDAQ connection");
        self.conn.close()
    }

    /// Whether the transport is still open.
    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    /// Options this driver was connected with.
    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Borrow the underlying transport.
    pub fn transport(&self) -> &T {
        self.conn.transport()
    }

    // =========================================================================
    // Identity and calibration
    // =========================================================================

    /// Firmware identity string.
    #[instrument(skip(self), err)]
    pub fn identity(&mut self) -> AppResult<String> {
        self.conn.ask(&Command::Identify)
    }

    /// Front end detected at connect.
    pub fn front_end(&self) -> FrontEnd {
        self.front_end
    }

    /// Calibration loaded at connect.
    pub fn calibration(&self) -> &CalibrationTable {
        &self.calibration
    }

    /// Calibration slope (mV/W) for a head at a gain.
    pub fn slope(&self, head: Head, gain: GainIndex) -> f64 {
        self.calibration.slope(head, gain)
    }

    // =========================================================================
    // Gains
    // =========================================================================

    /// Query the latched gains and refresh the host-side copy.
    #[instrument(skip(self), err)]
    pub fn gains(&mut self) -> AppResult<[GainIndex; NUM_HEADS]> {
        let payload = self.conn.ask(&Command::GetGains)?;
        let gains = parse_gains(&Command::GetGains, &payload)?;
        self.gains = GainState::from_gains(gains);
        Ok(gains)
    }

    /// Host-side copy of the latched gains, without a device round trip.
    pub fn latched_gains(&self) -> [GainIndex; NUM_HEADS] {
        self.gains.all()
    }

    /// Gain written to `head` without a refresh, if any.
    pub fn staged_gain(&self, head: Head) -> Option<GainIndex> {
        self.gains.staged(head)
    }

    /// Set the gain of one head, by index or by the power range to cover.
    ///
    /// With `apply` the front-end bus is refreshed so the change takes effect
    /// immediately; otherwise it is only staged. Returns the resolved gain.
    #[instrument(skip(self), err)]
    pub fn set_gain(
        &mut self,
        head: Head,
        setting: impl Into<GainSetting> + std::fmt::Debug,
        apply: bool,
    ) -> AppResult<GainIndex> {
        let gain = setting.into().resolve()?;
        self.conn.command(&Command::SetGain { head, gain })?;
        self.gains.stage(head, gain);
        if apply {
            self.conn.command(&Command::Refresh)?;
            self.gains.refresh();
        }
        tracing::debug!(%head, %gain, apply, "gain set");
        let settle = self.options.acquisition.gain_settle;
        if !settle.is_zero() {
            self.pacer.pause(settle);
        }
        Ok(gain)
    }

    /// Step each head's gain until |mV| sits inside `[min_mv, max_mv]` or no
    /// further step is possible. Returns the final gains.
    #[instrument(skip(self), err)]
    pub fn autogain(
        &mut self,
        n_frames: u32,
        options: AutoGainOptions,
    ) -> AppResult<[GainIndex; NUM_HEADS]> {
        if !(options.min_mv > 0.0 && options.min_mv < options.max_mv) {
            return Err(DaqError::InvalidArgument(format!(
                "autogain window must satisfy 0 < min_mv < max_mv, got {}..{}",
                options.min_mv, options.max_mv
            )));
        }

        for iteration in 0..options.max_iterations {
            let snapshot = self.snapshot_mv(n_frames)?;
            let mut changed = false;
            for head in Head::ALL {
                let level = snapshot.mv[head.index()].abs();
                let gain = snapshot.gains[head.index()];
                let step = if level < options.min_mv {
                    gain.more_sensitive()
                } else if level > options.max_mv {
                    gain.less_sensitive()
                } else {
                    None
                };
                if let Some(next) = step {
                    self.set_gain(head, next, true)?;
                    changed = true;
                }
            }
            if !changed {
                tracing::debug!(iteration, "autogain settled");
                break;
            }
        }
        Ok(self.gains.all())
    }

    // =========================================================================
    // Sampling
    // =========================================================================

    /// Frame rate in Hz.
    #[instrument(skip(self), err)]
    pub fn frequency_hz(&mut self) -> AppResult<u32> {
        let payload = self.conn.ask(&Command::GetFrequency)?;
        let hz = parse_int(&Command::GetFrequency, &payload)?;
        u32::try_from(hz)
            .map_err(|_| DaqError::malformed(Command::GetFrequency.to_string(), format!("{hz} Hz")))
    }

    /// Oversampling index.
    #[instrument(skip(self), err)]
    pub fn oversampling(&mut self) -> AppResult<u8> {
        let payload = self.conn.ask(&Command::GetOversampling)?;
        let os = parse_int(&Command::GetOversampling, &payload)?;
        u8::try_from(os)
            .ok()
            .filter(|os| *os <= MAX_OVERSAMPLING)
            .ok_or_else(|| DaqError::malformed(Command::GetOversampling.to_string(), format!("index {os}")))
    }

    /// Set the frame rate.
    ///
    /// If the current oversampling index cannot run at `hz`, it is lowered to
    /// the largest one that can; the new index is returned.
    #[instrument(skip(self), err)]
    pub fn set_frequency(&mut self, hz: u32) -> AppResult<Option<u8>> {
        if !(1..=MAX_FREQUENCY_HZ).contains(&hz) {
            return Err(DaqError::InvalidArgument(format!(
                "frequency must be 1..={MAX_FREQUENCY_HZ} Hz, got {hz}"
            )));
        }
        self.conn.command(&Command::SetFrequency(hz))?;

        let current = self.oversampling()?;
        if hz <= max_frequency_for(current) {
            return Ok(None);
        }
        let adjusted = best_oversampling_for(hz);
        self.conn.command(&Command::SetOversampling(adjusted))?;
        tracing::warn!(
            hz,
            from = current,
            to = adjusted,
            "oversampling index not valid at this rate, lowered"
        );
        Ok(Some(adjusted))
    }

    /// Set the oversampling index.
    ///
    /// An index too high for the current frame rate is replaced by the largest
    /// valid one, keeping the rate. Returns the index actually applied.
    #[instrument(skip(self), err)]
    pub fn set_oversampling(&mut self, os: u8) -> AppResult<u8> {
        if os > MAX_OVERSAMPLING {
            return Err(DaqError::InvalidArgument(format!(
                "oversampling must be 0..={MAX_OVERSAMPLING}, got {os}"
            )));
        }
        let hz = self.frequency_hz()?;
        let applied = if hz > max_frequency_for(os) {
            let adjusted = best_oversampling_for(hz);
            tracing::warn!(
                hz,
                requested = os,
                applied = adjusted,
                "oversampling index not valid at this rate, kept rate"
            );
            adjusted
        } else {
            os
        };
        self.conn.command(&Command::SetOversampling(applied))?;
        Ok(applied)
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Current state of the host-side acquisition machine.
    pub fn acquisition_state(&self) -> AcquisitionState {
        self.machine.state()
    }

    /// Query the state the device reports, without touching the session.
    #[instrument(skip(self), err)]
    pub fn device_state(&mut self) -> AppResult<AcquisitionState> {
        let payload = self.conn.ask(&Command::State)?;
        let code = parse_int(&Command::State, &payload)?;
        Ok(AcquisitionState::from_status_code(code))
    }

    /// Run a device exchange belonging to an acquisition; protocol faults move
    /// the machine to `Error`.
    fn guarded<R>(
        &mut self,
        op: impl FnOnce(&mut Self) -> AppResult<R>,
    ) -> AppResult<R> {
        let result = op(self);
        if let Err(e) = &result {
            if e.is_protocol_fault() {
                tracing::warn!(error = %e, "acquisition fault");
                self.machine.fault();
            }
        }
        result
    }

    /// Arm a software-started acquisition of `frames` frames.
    #[instrument(skip(self), err)]
    pub fn arm(&mut self, frames: u32) -> AppResult<()> {
        self.machine.check_arm("arm", frames)?;
        self.guarded(|daq| daq.conn.command(&Command::Arm { frames }))?;
        self.machine.armed(frames, TriggerMode::Software);
        tracing::info!(frames, "acquisition armed");
        Ok(())
    }

    /// Arm an acquisition that starts on an external trigger edge.
    #[instrument(skip(self), err)]
    pub fn trig_arm(&mut self, frames: u32, edge: TriggerEdge) -> AppResult<()> {
        self.machine.check_arm("trigger-arm", frames)?;
        self.guarded(|daq| {
            daq.conn.command(&Command::Arm { frames })?;
            daq.conn.command(&Command::TriggerArm { frames, edge })
        })?;
        self.machine.armed(frames, TriggerMode::from(edge));
        tracing::info!(frames, ?edge, "acquisition armed for trigger");
        Ok(())
    }

    /// Start sampling an armed acquisition.
    #[instrument(skip(self), err)]
    pub fn start(&mut self) -> AppResult<()> {
        self.machine.check_start()?;
        self.guarded(|daq| daq.conn.command(&Command::Start))?;
        self.machine.started();
        tracing::info!("acquisition started");
        Ok(())
    }

    /// Abort any acquisition and discard the session. Also recovers from `Error`.
    #[instrument(skip(self), err)]
    pub fn stop(&mut self) -> AppResult<()> {
        self.guarded(|daq| daq.conn.command(&Command::Stop))?;
        self.machine.reset();
        tracing::info!("acquisition stopped");
        Ok(())
    }

    fn poll(&mut self) -> AppResult<AcquisitionState> {
        let reported = self.guarded(|daq| daq.device_state())?;
        let previous = self.machine.state();
        self.machine.polled(reported);
        if reported != previous {
            tracing::debug!(from = %previous, to = %reported, "acquisition state changed");
        }
        Ok(reported)
    }

    /// Poll every `poll_interval` until the device reports `DataReady` or
    /// `Error`, and return that state.
    ///
    /// There is no overall timeout; bound the wait externally if needed.
    #[instrument(skip(self), err)]
    pub fn wait_done(&mut self, poll_interval: Duration) -> AppResult<AcquisitionState> {
        self.machine.check_poll()?;
        loop {
            let state = self.poll()?;
            if state.is_terminal() {
                if state == AcquisitionState::Error {
                    tracing::warn!("device reported an error state");
                }
                return Ok(state);
            }
            self.pacer.pause(poll_interval);
        }
    }

    /// [`wait_done`](Self::wait_done) at the configured poll interval.
    pub fn wait_done_default(&mut self) -> AppResult<AcquisitionState> {
        self.wait_done(self.options.acquisition.poll_interval)
    }

    /// Frames of the current session not yet transferred; 0 once the last
    /// transfer is done.
    pub fn frames_left(&self) -> AppResult<u32> {
        self.machine.frames_left()
    }

    /// Frames left as counted by the device (`LEFT?`).
    #[instrument(skip(self), err)]
    pub fn device_frames_left(&mut self) -> AppResult<u32> {
        let payload = self.conn.ask(&Command::FramesLeft)?;
        let left = parse_int(&Command::FramesLeft, &payload)?;
        u32::try_from(left)
            .map_err(|_| DaqError::malformed(Command::FramesLeft.to_string(), format!("{left} frames")))
    }

    fn read_frames(&mut self, frames: u32) -> AppResult<Channels<i16>> {
        let total = frames as usize * FRAME_BYTES;
        let chunk = self.options.acquisition.transfer_chunk_bytes.min(total);
        let mut channels: Channels<i16> =
            std::array::from_fn(|_| Vec::with_capacity(frames as usize));
        let mut buf = vec![0u8; chunk];

        let mut remaining = total;
        while remaining > 0 {
            let n = chunk.min(remaining);
            let command = Command::Transfer { bytes: n as u64 };
            self.conn.command(&command)?;
            self.conn.read_payload(&command, &mut buf[..n])?;
            decode_frames(&buf[..n], &mut channels);
            remaining -= n;
        }
        Ok(channels)
    }

    /// Transfer `frames` frames of raw ADC codes, one sequence per channel.
    ///
    /// Valid only in `DataReady`. May be called repeatedly until every frame
    /// of the session is out; the machine then returns to `Idle`.
    #[instrument(skip(self), err)]
    pub fn transfer_frames_adc(&mut self, frames: u32) -> AppResult<Channels<i16>> {
        self.machine.check_transfer(frames)?;
        let channels = self.guarded(|daq| daq.read_frames(frames))?;
        self.machine.transferred(frames);
        tracing::debug!(
            frames,
            left = self.machine.frames_left().unwrap_or(0),
            "frames transferred"
        );
        Ok(channels)
    }

    /// Transfer `frames` frames converted to zero-corrected millivolts.
    #[instrument(skip(self), err)]
    pub fn transfer_frames_mv(&mut self, frames: u32) -> AppResult<Channels<f64>> {
        let codes = self.transfer_frames_adc(frames)?;
        Ok(channels_to_mv(&codes, &self.active_zeros))
    }

    /// Transfer `frames` frames converted to Watts, rounded to `sig_digits`
    /// significant digits.
    ///
    /// `gains` are the gains active during the acquisition; when `None` they
    /// are queried once before the transfer and assumed constant throughout.
    #[instrument(skip(self), err)]
    pub fn transfer_frames_w(
        &mut self,
        frames: u32,
        gains: Option<[GainIndex; NUM_HEADS]>,
        sig_digits: u32,
    ) -> AppResult<Channels<f64>> {
        if sig_digits == 0 {
            return Err(DaqError::InvalidArgument("sig_digits must be >= 1".into()));
        }
        self.machine.check_transfer(frames)?;
        let gains = match gains {
            Some(gains) => gains,
            None => self.guarded(|daq| daq.gains())?,
        };
        let mv = self.transfer_frames_mv(frames)?;
        Ok(channels_to_watts(mv, &self.calibration, gains, sig_digits))
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Average `n_frames` frames on the device and return the raw codes with
    /// the gains latched during the average.
    #[instrument(skip(self), err)]
    pub fn snapshot_codes(&mut self, n_frames: u32) -> AppResult<CodeSnapshot> {
        if n_frames == 0 {
            return Err(DaqError::InvalidArgument("n_frames must be > 0".into()));
        }
        if !self.machine.is_idle() {
            return Err(DaqError::invalid_state("take a snapshot", self.machine.state()));
        }

        self.conn.command(&Command::Snapshot { frames: n_frames })?;

        let acq = &self.options.acquisition;
        let interval = acq.snapshot_poll_interval;
        let timeout = acq.snapshot_timeout;
        let max_polls = if interval.is_zero() {
            1
        } else {
            (timeout.as_nanos() / interval.as_nanos()).max(1) as u64 + 1
        };

        let command = Command::SnapshotResult;
        for _ in 0..max_polls {
            match self.conn.exchange(&command)? {
                Reply::Busy => self.pacer.pause(interval),
                Reply::Ok(payload) => {
                    let (codes, gains) = parse_snapshot(&command, &payload)?;
                    self.gains = GainState::from_gains(gains);
                    return Ok(CodeSnapshot { codes, gains });
                }
                Reply::Err(reason) => {
                    return Err(DaqError::DeviceRejected {
                        command: command.to_string(),
                        reason,
                    })
                }
            }
        }
        Err(DaqError::Timeout {
            command: command.to_string(),
            timeout,
        })
    }

    /// Averaged, zero-corrected millivolts per head.
    pub fn snapshot_mv(&mut self, n_frames: u32) -> AppResult<MvSnapshot> {
        Ok(self.snapshot_codes(n_frames)?.to_mv(&self.active_zeros))
    }

    /// Averaged optical power per head, using the slope for each head's
    /// latched gain.
    pub fn snapshot_w(&mut self, n_frames: u32) -> AppResult<PowerSnapshot> {
        Ok(self.snapshot_mv(n_frames)?.to_power(&self.calibration))
    }

    // =========================================================================
    // Zeroing
    // =========================================================================

    /// Zero offsets read from the device at connect (or the last refresh).
    pub fn factory_zeros(&self) -> ZeroOffsets {
        self.factory_zeros
    }

    /// Zero offsets currently subtracted from every conversion.
    pub fn active_zeros(&self) -> ZeroOffsets {
        self.active_zeros
    }

    /// Override the active zero offsets host-side.
    pub fn set_soft_zero(&mut self, zeros: ZeroOffsets) {
        tracing::info!(zeros = ?zeros.codes(), "soft zero set");
        self.active_zeros = zeros;
    }

    /// Go back to the factory zero offsets.
    pub fn restore_factory_zero(&mut self) {
        self.active_zeros = self.factory_zeros;
    }

    /// Re-read factory zeros from the device and make them active.
    #[instrument(skip(self), err)]
    pub fn refresh_factory_zeros(&mut self) -> AppResult<ZeroOffsets> {
        let zeros = Self::query_factory_zeros(&mut self.conn)?;
        self.factory_zeros = zeros;
        self.active_zeros = zeros;
        Ok(zeros)
    }

    /// Use a dark snapshot as the active zero offsets.
    #[instrument(skip(self), err)]
    pub fn soft_zero_from_snapshot(&mut self, n_frames: u32) -> AppResult<CodeSnapshot> {
        let snapshot = self.snapshot_codes(n_frames)?;
        self.set_soft_zero(ZeroOffsets::new(snapshot.codes));
        Ok(snapshot)
    }

    // =========================================================================
    // Sensors
    // =========================================================================

    fn query_float(&mut self, command: Command) -> AppResult<f64> {
        let payload = self.conn.ask(&command)?;
        parse_float(&command, &payload)
    }

    /// Head temperature in °C.
    #[instrument(skip(self), err)]
    pub fn head_temperature_c(&mut self) -> AppResult<f64> {
        self.query_float(Command::HeadTemperature)
    }

    /// Head relative humidity in %.
    #[instrument(skip(self), err)]
    pub fn head_humidity(&mut self) -> AppResult<f64> {
        self.query_float(Command::HeadHumidity)
    }

    /// ADC die temperature in °C.
    #[instrument(skip(self), err)]
    pub fn die_temperature_c(&mut self) -> AppResult<f64> {
        self.query_float(Command::DieTemperature)
    }
}

impl<T: Transport> Drop for CoreDaq<T> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.close() {
            tracing::warn!(error = %e, "error while releasing coreDAQ transport");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCoreDaq;
    use daq_core::serial::StreamTransport;
    use tracing_test::traced_test;

    fn mock_daq(mock: &MockCoreDaq) -> CoreDaq<StreamTransport<MockCoreDaq>> {
        let options = DriverOptions {
            timeout: Duration::from_millis(50),
            ..DriverOptions::default()
        };
        CoreDaq::connect(StreamTransport::new(mock.clone(), "mock"), options).unwrap()
    }

    #[test]
    #[traced_test]
    fn fast_rate_lowers_oversampling() {
        let mock = MockCoreDaq::new().with_sampling(1000, 7);
        let mut daq = mock_daq(&mock);

        assert_eq!(daq.set_frequency(50_000).unwrap(), Some(2));
        assert_eq!(mock.sampling(), (50_000, 2));
        assert!(logs_contain("lowered"));

        assert_eq!(daq.set_frequency(500).unwrap(), None);
        assert_eq!(mock.sampling(), (500, 2));
    }

    #[test]
    #[traced_test]
    fn oversampling_too_high_keeps_rate() {
        let mock = MockCoreDaq::new().with_sampling(50_000, 1);
        let mut daq = mock_daq(&mock);

        assert_eq!(daq.set_oversampling(5).unwrap(), 2);
        assert_eq!(mock.sampling(), (50_000, 2));
        assert!(logs_contain("kept rate"));

        assert_eq!(daq.set_oversampling(0).unwrap(), 0);
        assert_eq!(mock.sampling(), (50_000, 0));
    }

    #[test]
    fn default_options_are_valid() {
        DriverOptions::default().validate().unwrap();
    }

    #[test]
    fn chunk_size_must_hold_whole_frames() {
        let mut options = DriverOptions::default();
        options.acquisition.transfer_chunk_bytes = 12;
        assert!(options.validate().is_err());
        options.acquisition.transfer_chunk_bytes = 0;
        assert!(options.validate().is_err());
        options.acquisition.transfer_chunk_bytes = 16;
        options.timeout = Duration::ZERO;
        assert!(options.validate().is_err());
    }

    #[test]
    fn options_deserialize_humantime() {
        let options: DriverOptions = toml::from_str(
            r#"
            timeout = "200ms"
            [acquisition]
            poll_interval = "20ms"
            transfer_chunk_bytes = 4096
            "#,
        )
        .unwrap();
        assert_eq!(options.timeout, Duration::from_millis(200));
        assert_eq!(options.acquisition.poll_interval, Duration::from_millis(20));
        assert_eq!(options.acquisition.transfer_chunk_bytes, 4096);
        assert_eq!(options.acquisition.gain_settle, Duration::from_millis(50));
    }
}
