//! In-process coreDAQ firmware simulator.
//!
//! `MockCoreDaq` implements `Read + Write`, so it plugs into
//! [`StreamTransport`](daq_core::serial::StreamTransport) exactly like a real
//! serial port. It speaks the full line protocol including bulk transfers.
//!
//! Clones share state, so a test can keep one handle for inspection (command
//! log, trigger, fault injection) while the driver owns the other.
//!
//! # Example
//!
//! ```rust,ignore
//! let mock = MockCoreDaq::new().with_signal(MockSignal::Constant([0; 4]));
//! let handle = mock.clone();
//! let mut daq = CoreDaq::connect(StreamTransport::new(mock, "mock"), DriverOptions::default())?;
//! daq.snapshot_mv(8)?;
//! assert!(handle.command_log().iter().any(|c| c == "SNAP 8"));
//! ```

use crate::channel::NUM_HEADS;
use crate::conversion::{FULL_SCALE_CODES, FULL_SCALE_MV};
use crate::gain::{GAIN_TABLE, NUM_GAINS};
use crate::protocol::{FrontEnd, FRAME_BYTES};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;

/// What the simulated heads see.
#[derive(Debug, Clone, PartialEq)]
pub enum MockSignal {
    /// Same raw code on every frame.
    Constant([i16; NUM_HEADS]),
    /// Raw code `start + step × frame_index` per head, saturating.
    Ramp {
        /// Code of frame 0.
        start: [i16; NUM_HEADS],
        /// Increment per frame.
        step: i16,
    },
    /// Optical power in Watts; codes follow the latched gain, slope and
    /// factory zero, clipping at full scale like the real ADC.
    Optical([f64; NUM_HEADS]),
}

/// Misbehaviour injected for commands starting with a given prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFault {
    /// Answer `ERR <reason>`.
    Reject(String),
    /// Never answer.
    Silence,
    /// Answer with a line that is not a reply.
    Garbage,
}

#[derive(Debug)]
struct MockState {
    identity: String,
    front_end: FrontEnd,
    status: i64,
    forced_status: Option<i64>,
    gains: [u8; NUM_HEADS],
    slopes: [[f32; NUM_GAINS]; NUM_HEADS],
    factory_zeros: [i32; NUM_HEADS],
    frequency_hz: u32,
    oversampling: u8,
    signal: MockSignal,
    armed_frames: u32,
    cursor: u32,
    running_polls: u32,
    polls_until_ready: u32,
    snapshot_busy_polls: u32,
    pending_snapshot: Option<(u32, u32)>,
    faults: Vec<(String, MockFault)>,
    log: Vec<String>,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
}

fn default_slopes() -> [[f32; NUM_GAINS]; NUM_HEADS] {
    let mut slopes = [[0.0f32; NUM_GAINS]; NUM_HEADS];
    for (h, row) in slopes.iter_mut().enumerate() {
        for (entry, slot) in GAIN_TABLE.iter().zip(row.iter_mut()) {
            // full scale sits a little above each stage's rated maximum
            *slot = ((4500.0 + 25.0 * h as f64) / entry.max_power_w) as f32;
        }
    }
    slopes
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            identity: "coreDAQ MOCK fw3.1".to_string(),
            front_end: FrontEnd::Linear,
            status: 0,
            forced_status: None,
            gains: [0; NUM_HEADS],
            slopes: default_slopes(),
            factory_zeros: [0; NUM_HEADS],
            frequency_hz: 1000,
            oversampling: 0,
            signal: MockSignal::Constant([0; NUM_HEADS]),
            armed_frames: 0,
            cursor: 0,
            running_polls: 2,
            polls_until_ready: 0,
            snapshot_busy_polls: 1,
            pending_snapshot: None,
            faults: Vec::new(),
            log: Vec::new(),
            rx: Vec::new(),
            tx: VecDeque::new(),
        }
    }
}

impl MockState {
    fn frame_codes(&self, index: u32) -> [i16; NUM_HEADS] {
        let clip = |v: f64| v.round().clamp(-FULL_SCALE_CODES, FULL_SCALE_CODES - 1.0) as i16;
        match &self.signal {
            MockSignal::Constant(codes) => *codes,
            MockSignal::Ramp { start, step } => {
                let mut out = [0i16; NUM_HEADS];
                for (slot, s) in out.iter_mut().zip(start) {
                    *slot = clip(f64::from(*s) + f64::from(*step) * f64::from(index));
                }
                out
            }
            MockSignal::Optical(power) => {
                let mut out = [0i16; NUM_HEADS];
                for (h, slot) in out.iter_mut().enumerate() {
                    let slope = f64::from(self.slopes[h][usize::from(self.gains[h])]);
                    let mv = power[h] * slope;
                    *slot = clip(mv / FULL_SCALE_MV * FULL_SCALE_CODES + f64::from(self.factory_zeros[h]));
                }
                out
            }
        }
    }

    fn reply(&mut self, line: &str) {
        self.tx.extend(line.as_bytes());
        self.tx.push_back(b'\n');
    }

    fn ok(&mut self, payload: impl AsRef<str>) {
        let payload = payload.as_ref();
        if payload.is_empty() {
            self.reply("OK");
        } else {
            self.reply(&format!("OK {payload}"));
        }
    }

    fn err(&mut self, reason: &str) {
        self.reply(&format!("ERR {reason}"));
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.log.push(line.to_string());

        let fault = self
            .faults
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, fault)| fault.clone());
        match fault {
            Some(MockFault::Reject(reason)) => return self.err(&reason),
            Some(MockFault::Silence) => return,
            Some(MockFault::Garbage) => return self.reply("#?%"),
            None => {}
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let arg = |i: usize| tokens.get(i).and_then(|t| t.parse::<u32>().ok());

        match tokens.as_slice() {
            ["IDN?"] => {
                let identity = self.identity.clone();
                self.ok(identity);
            }
            ["HEAD_TYPE?"] => match self.front_end {
                FrontEnd::Linear => self.ok("TYPE=LINEAR"),
                FrontEnd::Log => self.ok("TYPE=LOG"),
            },
            ["STATE?"] => self.state_query(),
            ["FREQ?"] => self.ok(self.frequency_hz.to_string()),
            ["FREQ", _] => match arg(1) {
                Some(hz) if (1..=100_000).contains(&hz) => {
                    self.frequency_hz = hz;
                    self.ok("");
                }
                _ => self.err("FREQ out of range"),
            },
            ["OS?"] => self.ok(self.oversampling.to_string()),
            ["OS", _] => match arg(1) {
                Some(os) if os < 8 => {
                    self.oversampling = os as u8;
                    self.ok("");
                }
                _ => self.err("OS out of range"),
            },
            ["GAINS?"] => {
                let g = self.gains;
                self.ok(format!("HEAD1={} HEAD2={} HEAD3={} HEAD4={}", g[0], g[1], g[2], g[3]));
            }
            ["GAIN", _, _] => match (arg(1), arg(2)) {
                (Some(h @ 1..=4), Some(g)) if (g as usize) < NUM_GAINS => {
                    self.gains[h as usize - 1] = g as u8;
                    self.ok("");
                }
                _ => self.err("bad GAIN args"),
            },
            ["I2C", "REFRESH"] => self.ok(""),
            ["CAL", _, _] => match (arg(1), arg(2)) {
                (Some(h @ 1..=4), Some(g)) if (g as usize) < NUM_GAINS => {
                    let slope = self.slopes[h as usize - 1][g as usize];
                    self.ok(format!("H{h} G{g} S={:08X} I={:08X}", slope.to_bits(), 0u32));
                }
                _ => self.err("bad CAL args"),
            },
            ["FACTORY_ZEROS?"] => {
                let z = self.factory_zeros;
                self.ok(format!("h1={} h2={} h3={} h4={}", z[0], z[1], z[2], z[3]));
            }
            ["ACQ", "ARM", _] => match arg(2) {
                Some(frames) if frames > 0 && self.status == 0 => {
                    self.armed_frames = frames;
                    self.cursor = 0;
                    self.status = 1;
                    self.ok("");
                }
                Some(_) if self.status != 0 => self.err("busy"),
                _ => self.err("bad frame count"),
            },
            ["TRIGARM", _, edge] => match arg(1) {
                Some(frames) if frames > 0 && matches!(*edge, "R" | "F") && self.status <= 1 => {
                    self.armed_frames = frames;
                    self.cursor = 0;
                    self.status = 2;
                    self.ok("");
                }
                _ => self.err("bad TRIGARM"),
            },
            ["ACQ", "START"] => {
                if self.status == 1 {
                    self.status = 3;
                    self.polls_until_ready = self.running_polls;
                    self.ok("");
                } else {
                    self.err("not armed");
                }
            }
            ["ACQ", "STOP"] => {
                self.status = 0;
                self.armed_frames = 0;
                self.cursor = 0;
                self.ok("");
            }
            ["LEFT?"] => self.ok((self.armed_frames - self.cursor).to_string()),
            ["SNAP", _] => match arg(1) {
                Some(frames) if frames > 0 && self.status == 0 => {
                    self.pending_snapshot = Some((frames, self.snapshot_busy_polls));
                    self.ok("");
                }
                _ => self.err("cannot snapshot"),
            },
            ["SNAP?"] => self.snapshot_query(),
            ["XFER", _] => self.transfer(tokens[1]),
            ["TEMP?"] => self.ok("23.50"),
            ["HUM?"] => self.ok("41.20"),
            ["DIE_TEMP?"] => self.ok("36.10"),
            _ => self.err("unknown command"),
        }
    }

    fn state_query(&mut self) {
        if let Some(code) = self.forced_status {
            return self.ok(code.to_string());
        }
        if self.status == 3 {
            if self.polls_until_ready == 0 {
                self.status = 4;
            } else {
                self.polls_until_ready -= 1;
            }
        }
        self.ok(self.status.to_string());
    }

    fn snapshot_query(&mut self) {
        match self.pending_snapshot {
            None => self.err("no snapshot"),
            Some((frames, busy)) if busy > 0 => {
                self.pending_snapshot = Some((frames, busy - 1));
                self.reply("BUSY");
            }
            Some((frames, _)) => {
                self.pending_snapshot = None;
                let mut sums = [0i64; NUM_HEADS];
                for i in 0..frames {
                    for (sum, code) in sums.iter_mut().zip(self.frame_codes(i)) {
                        *sum += i64::from(code);
                    }
                }
                let avg: Vec<String> = sums
                    .iter()
                    .map(|s| ((*s as f64 / f64::from(frames)).round() as i64).to_string())
                    .collect();
                let g = self.gains;
                self.ok(format!(
                    "{} G={} {} {} {}",
                    avg.join(" "),
                    g[0],
                    g[1],
                    g[2],
                    g[3]
                ));
            }
        }
    }

    fn transfer(&mut self, bytes: &str) {
        let Ok(bytes) = bytes.parse::<usize>() else {
            return self.err("bad XFER size");
        };
        if self.status != 4 {
            return self.err("no data");
        }
        let left = (self.armed_frames - self.cursor) as usize;
        if bytes == 0 || bytes % FRAME_BYTES != 0 || bytes / FRAME_BYTES > left {
            return self.err("bad XFER size");
        }
        let frames = (bytes / FRAME_BYTES) as u32;
        self.ok(bytes.to_string());
        for i in self.cursor..self.cursor + frames {
            for code in self.frame_codes(i) {
                self.tx.extend(code.to_le_bytes());
            }
        }
        self.cursor += frames;
        if self.cursor == self.armed_frames {
            self.status = 0;
            self.armed_frames = 0;
            self.cursor = 0;
        }
    }
}

/// Simulated coreDAQ. Cheap to clone; clones share one device.
#[derive(Debug, Clone, Default)]
pub struct MockCoreDaq {
    state: Arc<Mutex<MockState>>,
}

impl MockCoreDaq {
    /// Idle linear device, all gains 0, zero signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set what the heads measure.
    pub fn with_signal(self, signal: MockSignal) -> Self {
        self.set_signal(signal);
        self
    }

    /// Initial latched gains.
    pub fn with_gains(self, gains: [u8; NUM_HEADS]) -> Self {
        self.state.lock().gains = gains;
        self
    }

    /// Calibration slopes reported by `CAL`.
    pub fn with_slopes(self, slopes: [[f32; NUM_GAINS]; NUM_HEADS]) -> Self {
        self.state.lock().slopes = slopes;
        self
    }

    /// Factory zero offsets reported by `FACTORY_ZEROS?`.
    pub fn with_factory_zeros(self, zeros: [i32; NUM_HEADS]) -> Self {
        self.state.lock().factory_zeros = zeros;
        self
    }

    /// Front end reported by `HEAD_TYPE?`.
    pub fn with_front_end(self, front_end: FrontEnd) -> Self {
        self.state.lock().front_end = front_end;
        self
    }

    /// `STATE?` polls answered RUNNING before DATA_READY.
    pub fn with_running_polls(self, polls: u32) -> Self {
        self.state.lock().running_polls = polls;
        self
    }

    /// `SNAP?` polls answered BUSY before the result.
    pub fn with_snapshot_busy_polls(self, polls: u32) -> Self {
        self.state.lock().snapshot_busy_polls = polls;
        self
    }

    /// Initial sampling configuration.
    pub fn with_sampling(self, frequency_hz: u32, oversampling: u8) -> Self {
        {
            let mut state = self.state.lock();
            state.frequency_hz = frequency_hz;
            state.oversampling = oversampling;
        }
        self
    }

    /// Change the signal at runtime.
    pub fn set_signal(&self, signal: MockSignal) {
        self.state.lock().signal = signal;
    }

    /// Misbehave for every command starting with `prefix`.
    pub fn inject_fault(&self, prefix: impl Into<String>, fault: MockFault) {
        self.state.lock().faults.push((prefix.into(), fault));
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Report `code` to every `STATE?` regardless of the real state.
    pub fn force_status(&self, code: Option<i64>) {
        self.state.lock().forced_status = code;
    }

    /// Deliver the external trigger edge. Has no effect unless waiting for one.
    pub fn fire_trigger(&self) {
        let mut state = self.state.lock();
        if state.status == 2 {
            state.status = 3;
            state.polls_until_ready = state.running_polls;
        }
    }

    /// Push bytes that nobody asked for, e.g. a stale reply.
    pub fn inject_noise(&self, bytes: &[u8]) {
        self.state.lock().tx.extend(bytes);
    }

    /// Every command line received, in order.
    pub fn command_log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Forget the command log.
    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Currently latched gains.
    pub fn gains(&self) -> [u8; NUM_HEADS] {
        self.state.lock().gains
    }

    /// Current sampling configuration `(hz, os)`.
    pub fn sampling(&self) -> (u32, u8) {
        let state = self.state.lock();
        (state.frequency_hz, state.oversampling)
    }

    /// Raw firmware status code.
    pub fn status(&self) -> i64 {
        self.state.lock().status
    }
}

impl Read for MockCoreDaq {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.tx.is_empty() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let n = buf.len().min(state.tx.len());
        for (slot, byte) in buf.iter_mut().zip(state.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockCoreDaq {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.rx.extend_from_slice(buf);
        while let Some(end) = state.rx.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = state.rx.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line).into_owned();
            state.handle_line(&line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ask(mock: &mut MockCoreDaq, line: &str) -> String {
        mock.write_all(format!("{line}\n").as_bytes()).unwrap();
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        while mock.read(&mut byte).is_ok() {
            if byte[0] == b'\n' {
                break;
            }
            out.push(byte[0]);
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn answers_basic_queries() {
        let mut mock = MockCoreDaq::new().with_gains([1, 2, 3, 4]);
        assert!(ask(&mut mock, "IDN?").starts_with("OK coreDAQ"));
        assert_eq!(ask(&mut mock, "GAINS?"), "OK HEAD1=1 HEAD2=2 HEAD3=3 HEAD4=4");
        assert_eq!(ask(&mut mock, "STATE?"), "OK 0");
        assert_eq!(ask(&mut mock, "NOPE"), "ERR unknown command");
        assert_eq!(mock.command_log().len(), 4);
    }

    #[test]
    fn acquisition_runs_to_data_ready() {
        let mut mock = MockCoreDaq::new().with_running_polls(1);
        assert_eq!(ask(&mut mock, "ACQ START"), "ERR not armed");
        assert_eq!(ask(&mut mock, "ACQ ARM 2"), "OK");
        assert_eq!(ask(&mut mock, "ACQ START"), "OK");
        assert_eq!(ask(&mut mock, "STATE?"), "OK 3");
        assert_eq!(ask(&mut mock, "STATE?"), "OK 4");
        assert_eq!(ask(&mut mock, "LEFT?"), "OK 2");
    }

    #[test]
    fn snapshot_reports_busy_first() {
        let mut mock = MockCoreDaq::new()
            .with_snapshot_busy_polls(2)
            .with_signal(MockSignal::Constant([5, -5, 0, 7]));
        assert_eq!(ask(&mut mock, "SNAP 4"), "OK");
        assert_eq!(ask(&mut mock, "SNAP?"), "BUSY");
        assert_eq!(ask(&mut mock, "SNAP?"), "BUSY");
        assert_eq!(ask(&mut mock, "SNAP?"), "OK 5 -5 0 7 G=0 0 0 0");
    }

    #[test]
    fn faults_apply_by_prefix() {
        let mut mock = MockCoreDaq::new();
        mock.inject_fault("CAL", MockFault::Reject("eeprom".into()));
        assert_eq!(ask(&mut mock, "CAL 1 0"), "ERR eeprom");
        mock.clear_faults();
        assert!(ask(&mut mock, "CAL 1 0").starts_with("OK H1 G0 S="));
    }

    #[test]
    fn optical_signal_follows_gain() {
        let mock = MockCoreDaq::new().with_signal(MockSignal::Optical([1e-3; NUM_HEADS]));
        let low = mock.state.lock().frame_codes(0);
        mock.state.lock().gains = [7; NUM_HEADS];
        let high = mock.state.lock().frame_codes(0);
        assert!(low[0] > 0 && low[0] < high[0]);
        assert_eq!(high[0], i16::MAX);
    }
}
