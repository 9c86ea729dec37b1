//! coreDAQ wire codec.
//!
//! Protocol Overview:
//! - Format: ASCII command lines, one reply line per command
//! - Baud: 115200, 8N1, no flow control
//! - Terminator: LF only (`\n`)
//! - Replies: `OK <payload>`, `ERR <reason>` or `BUSY`
//! - Bulk transfer: `XFER <bytes>` answers `OK ...` followed by `<bytes>` of
//!   little-endian `i16`, interleaved CH1..CH4 per frame
//!
//! Everything in this module is pure: it maps typed commands to text and reply
//! text to typed values without doing any I/O.

use crate::channel::{Head, NUM_HEADS};
use crate::gain::GainIndex;
use daq_core::error::{AppResult, DaqError};
use std::fmt;

/// Bytes per frame in a bulk transfer: four `i16` samples.
pub const FRAME_BYTES: usize = NUM_HEADS * 2;

/// External trigger polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEdge {
    /// Start sampling on a rising edge.
    Rising,
    /// Start sampling on a falling edge.
    Falling,
}

impl TriggerEdge {
    fn wire(self) -> char {
        match self {
            TriggerEdge::Rising => 'R',
            TriggerEdge::Falling => 'F',
        }
    }
}

/// Analog front end fitted to the heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontEnd {
    /// Linear transimpedance amplifiers with eight gain stages.
    Linear,
    /// Logarithmic amplifiers with a lookup-table calibration.
    Log,
}

// =============================================================================
// Commands
// =============================================================================

/// Every command the driver issues.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `IDN?`
    Identify,
    /// `HEAD_TYPE?`
    HeadType,
    /// `STATE?`
    State,
    /// `FREQ?`
    GetFrequency,
    /// `FREQ <hz>`
    SetFrequency(u32),
    /// `OS?`
    GetOversampling,
    /// `OS <idx>`
    SetOversampling(u8),
    /// `GAINS?`
    GetGains,
    /// `GAIN <head> <gain>`
    SetGain {
        /// Head to change.
        head: Head,
        /// New stage.
        gain: GainIndex,
    },
    /// `I2C REFRESH`, makes staged front-end settings take effect.
    Refresh,
    /// `CAL <head> <gain>`
    ReadCalibration {
        /// Head to read.
        head: Head,
        /// Stage to read.
        gain: GainIndex,
    },
    /// `FACTORY_ZEROS?`
    FactoryZeros,
    /// `ACQ ARM <frames>`
    Arm {
        /// Frames to capture.
        frames: u32,
    },
    /// `TRIGARM <frames> R|F`
    TriggerArm {
        /// Frames to capture.
        frames: u32,
        /// Edge that starts sampling.
        edge: TriggerEdge,
    },
    /// `ACQ START`
    Start,
    /// `ACQ STOP`
    Stop,
    /// `LEFT?`
    FramesLeft,
    /// `SNAP <frames>`
    Snapshot {
        /// Frames to average on the device.
        frames: u32,
    },
    /// `SNAP?`
    SnapshotResult,
    /// `XFER <bytes>`
    Transfer {
        /// Payload size requested.
        bytes: u64,
    },
    /// `TEMP?`
    HeadTemperature,
    /// `HUM?`
    HeadHumidity,
    /// `DIE_TEMP?`
    DieTemperature,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Identify => write!(f, "IDN?"),
            Command::HeadType => write!(f, "HEAD_TYPE?"),
            Command::State => write!(f, "STATE?"),
            Command::GetFrequency => write!(f, "FREQ?"),
            Command::SetFrequency(hz) => write!(f, "FREQ {hz}"),
            Command::GetOversampling => write!(f, "OS?"),
            Command::SetOversampling(os) => write!(f, "OS {os}"),
            Command::GetGains => write!(f, "GAINS?"),
            Command::SetGain { head, gain } => {
                write!(f, "GAIN {} {}", head.number(), gain.value())
            }
            Command::Refresh => write!(f, "I2C REFRESH"),
            Command::ReadCalibration { head, gain } => {
                write!(f, "CAL {} {}", head.number(), gain.value())
            }
            Command::FactoryZeros => write!(f, "FACTORY_ZEROS?"),
            Command::Arm { frames } => write!(f, "ACQ ARM {frames}"),
            Command::TriggerArm { frames, edge } => {
                write!(f, "TRIGARM {frames} {}", edge.wire())
            }
            Command::Start => write!(f, "ACQ START"),
            Command::Stop => write!(f, "ACQ STOP"),
            Command::FramesLeft => write!(f, "LEFT?"),
            Command::Snapshot { frames } => write!(f, "SNAP {frames}"),
            Command::SnapshotResult => write!(f, "SNAP?"),
            Command::Transfer { bytes } => write!(f, "XFER {bytes}"),
            Command::HeadTemperature => write!(f, "TEMP?"),
            Command::HeadHumidity => write!(f, "HUM?"),
            Command::DieTemperature => write!(f, "DIE_TEMP?"),
        }
    }
}

// =============================================================================
// Replies
// =============================================================================

/// One reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `OK <payload>`
    Ok(String),
    /// `ERR <reason>`
    Err(String),
    /// `BUSY`
    Busy,
}

impl Reply {
    /// Parse a reply line. `None` if the line is not a reply at all.
    pub fn parse(line: &str) -> Option<Reply> {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("OK") {
            Some(Reply::Ok(rest.trim().to_string()))
        } else if let Some(rest) = line.strip_prefix("ERR") {
            Some(Reply::Err(rest.trim().to_string()))
        } else if line.starts_with("BUSY") {
            Some(Reply::Busy)
        } else {
            None
        }
    }
}

// =============================================================================
// Payload decoders
// =============================================================================

/// Integer payload, decimal or `0x` hex.
pub fn parse_int(command: &Command, payload: &str) -> AppResult<i64> {
    let text = payload.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => text.parse::<i64>(),
    };
    parsed.map_err(|_| DaqError::malformed(command.to_string(), format!("expected integer, got '{text}'")))
}

/// Decimal floating-point payload.
pub fn parse_float(command: &Command, payload: &str) -> AppResult<f64> {
    let text = payload.trim();
    text.parse::<f64>()
        .map_err(|_| DaqError::malformed(command.to_string(), format!("expected number, got '{text}'")))
}

/// `TYPE=LINEAR` / `TYPE=LOG`.
pub fn parse_front_end(command: &Command, payload: &str) -> AppResult<FrontEnd> {
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    if compact.contains("TYPE=LINEAR") {
        Ok(FrontEnd::Linear)
    } else if compact.contains("TYPE=LOG") {
        Ok(FrontEnd::Log)
    } else {
        Err(DaqError::malformed(
            command.to_string(),
            format!("unexpected front-end type '{payload}'"),
        ))
    }
}

/// `HEAD1=g HEAD2=g HEAD3=g HEAD4=g`.
pub fn parse_gains(command: &Command, payload: &str) -> AppResult<[GainIndex; NUM_HEADS]> {
    let bad = |detail: String| DaqError::malformed(command.to_string(), detail);
    let mut gains: [Option<GainIndex>; NUM_HEADS] = [None; NUM_HEADS];

    for token in payload.split_whitespace() {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| bad(format!("token '{token}' is not HEADn=g")))?;
        let head = key
            .trim_start_matches("HEAD")
            .parse::<u8>()
            .ok()
            .and_then(|n| Head::new(n).ok())
            .ok_or_else(|| bad(format!("bad head key '{key}'")))?;
        let gain = value
            .parse::<u8>()
            .ok()
            .and_then(|g| GainIndex::new(g).ok())
            .ok_or_else(|| bad(format!("bad gain value '{value}'")))?;
        gains[head.index()] = Some(gain);
    }

    let mut out = [GainIndex::MIN; NUM_HEADS];
    for (slot, gain) in out.iter_mut().zip(gains) {
        *slot = gain.ok_or_else(|| bad(format!("expected four heads in '{payload}'")))?;
    }
    Ok(out)
}

/// One calibration entry as reported by `CAL <head> <gain>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationEntry {
    /// Head echoed by the firmware, if present.
    pub head: Option<u8>,
    /// Gain echoed by the firmware, if present.
    pub gain: Option<u8>,
    /// Slope in mV per W.
    pub slope: f32,
}

fn parse_f32_hex(text: &str) -> Option<f32> {
    u32::from_str_radix(text.trim_start_matches("0x"), 16)
        .ok()
        .map(f32::from_bits)
}

/// `H<h> G<g> S=<hex> I=<hex>`, floats sent as their IEEE-754 bit pattern.
///
/// The intercept is not part of the slope model and is skipped.
pub fn parse_calibration(command: &Command, payload: &str) -> AppResult<CalibrationEntry> {
    let mut entry = CalibrationEntry {
        head: None,
        gain: None,
        slope: f32::NAN,
    };
    let mut have_slope = false;
    for token in payload.split_whitespace() {
        if let Some(hex) = token.strip_prefix("S=") {
            entry.slope = parse_f32_hex(hex).ok_or_else(|| {
                DaqError::malformed(command.to_string(), format!("bad slope '{hex}'"))
            })?;
            have_slope = true;
        } else if let Some(n) = token.strip_prefix('H') {
            entry.head = n.parse().ok();
        } else if let Some(n) = token.strip_prefix('G') {
            entry.gain = n.parse().ok();
        }
    }
    if !have_slope {
        return Err(DaqError::malformed(
            command.to_string(),
            format!("missing S= in '{payload}'"),
        ));
    }
    Ok(entry)
}

/// `z1 z2 z3 z4` or `h1=z1 h2=z2 h3=z3 h4=z4`.
pub fn parse_zeros(command: &Command, payload: &str) -> AppResult<[i32; NUM_HEADS]> {
    let bad = |detail: String| DaqError::malformed(command.to_string(), detail);
    let parse_code = |text: &str| -> AppResult<i32> {
        let value = parse_int(command, text)?;
        i32::try_from(value).map_err(|_| bad(format!("zero offset {value} out of range")))
    };

    let tokens: Vec<&str> = payload.split_whitespace().collect();
    let mut zeros = [0i32; NUM_HEADS];

    if tokens.iter().any(|t| t.contains('=')) {
        for head in Head::ALL {
            let key = format!("h{}", head.number());
            let value = tokens
                .iter()
                .filter_map(|t| t.split_once('='))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case(&key))
                .map(|(_, v)| v)
                .ok_or_else(|| bad(format!("missing {key}= in '{payload}'")))?;
            zeros[head.index()] = parse_code(value)?;
        }
    } else {
        if tokens.len() < NUM_HEADS {
            return Err(bad(format!("expected four zero offsets, got '{payload}'")));
        }
        for (slot, token) in zeros.iter_mut().zip(&tokens) {
            *slot = parse_code(token)?;
        }
    }
    Ok(zeros)
}

/// `c1 c2 c3 c4 G=g1 g2 g3 g4`: device-averaged codes plus latched gains.
pub fn parse_snapshot(
    command: &Command,
    payload: &str,
) -> AppResult<([i32; NUM_HEADS], [GainIndex; NUM_HEADS])> {
    let bad = |detail: String| DaqError::malformed(command.to_string(), detail);
    let tokens: Vec<&str> = payload.split_whitespace().collect();

    let gain_at = tokens
        .iter()
        .position(|t| t.starts_with("G="))
        .ok_or_else(|| bad(format!("missing G= in '{payload}'")))?;
    if gain_at < NUM_HEADS {
        return Err(bad(format!("expected four codes before G= in '{payload}'")));
    }

    let mut codes = [0i32; NUM_HEADS];
    for (slot, token) in codes.iter_mut().zip(&tokens) {
        *slot = token
            .parse::<i32>()
            .map_err(|_| bad(format!("bad ADC code '{token}'")))?;
    }

    let mut gain_tokens = Vec::with_capacity(NUM_HEADS);
    gain_tokens.push(tokens[gain_at].trim_start_matches("G="));
    gain_tokens.extend(tokens.iter().skip(gain_at + 1).take(NUM_HEADS - 1));
    if gain_tokens.len() != NUM_HEADS {
        return Err(bad(format!("expected four gains in '{payload}'")));
    }

    let mut gains = [GainIndex::MIN; NUM_HEADS];
    for (slot, token) in gains.iter_mut().zip(gain_tokens) {
        *slot = token
            .parse::<u8>()
            .ok()
            .and_then(|g| GainIndex::new(g).ok())
            .ok_or_else(|| bad(format!("bad gain '{token}'")))?;
    }
    Ok((codes, gains))
}

/// Append whole frames from a bulk-transfer chunk to per-channel vectors.
///
/// `bytes.len()` must be a multiple of [`FRAME_BYTES`]; trailing bytes are
/// ignored.
pub fn decode_frames(bytes: &[u8], channels: &mut [Vec<i16>; NUM_HEADS]) {
    for frame in bytes.chunks_exact(FRAME_BYTES) {
        for (channel, sample) in channels.iter_mut().zip(frame.chunks_exact(2)) {
            channel.push(i16::from_le_bytes([sample[0], sample[1]]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::ErrorKind;

    fn head(n: u8) -> Head {
        Head::new(n).unwrap()
    }

    fn gain(n: u8) -> GainIndex {
        GainIndex::new(n).unwrap()
    }

    #[test]
    fn commands_encode_to_firmware_syntax() {
        let cases = vec![
            (Command::Identify, "IDN?"),
            (Command::SetGain { head: head(2), gain: gain(5) }, "GAIN 2 5"),
            (Command::ReadCalibration { head: head(4), gain: gain(7) }, "CAL 4 7"),
            (Command::Arm { frames: 1000 }, "ACQ ARM 1000"),
            (
                Command::TriggerArm { frames: 10, edge: TriggerEdge::Falling },
                "TRIGARM 10 F",
            ),
            (Command::Transfer { bytes: 64 }, "XFER 64"),
            (Command::Refresh, "I2C REFRESH"),
            (Command::SetOversampling(3), "OS 3"),
        ];
        for (command, wire) in cases {
            assert_eq!(command.to_string(), wire);
        }
    }

    #[test]
    fn reply_prefixes() {
        assert_eq!(Reply::parse("OK 42\r"), Some(Reply::Ok("42".into())));
        assert_eq!(Reply::parse("ERR bad arg"), Some(Reply::Err("bad arg".into())));
        assert_eq!(Reply::parse("BUSY"), Some(Reply::Busy));
        assert_eq!(Reply::parse("garbage"), None);
    }

    #[test]
    fn integers_accept_hex() {
        assert_eq!(parse_int(&Command::State, "4").unwrap(), 4);
        assert_eq!(parse_int(&Command::State, "0x1F").unwrap(), 31);
        let err = parse_int(&Command::State, "four").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Communication);
    }

    #[test]
    fn gains_payload() {
        let gains = parse_gains(&Command::GetGains, "HEAD1=0 HEAD2=3 HEAD3=7 HEAD4=1").unwrap();
        assert_eq!(gains, [gain(0), gain(3), gain(7), gain(1)]);
        assert!(parse_gains(&Command::GetGains, "HEAD1=0 HEAD2=3").is_err());
        assert!(parse_gains(&Command::GetGains, "HEAD1=0 HEAD2=3 HEAD3=9 HEAD4=1").is_err());
    }

    #[test]
    fn calibration_payload_decodes_float_bits() {
        let command = Command::ReadCalibration { head: head(1), gain: gain(0) };
        let payload = format!("H1 G0 S={:08X} I={:08X}", 1000.0f32.to_bits(), 0.5f32.to_bits());
        let entry = parse_calibration(&command, &payload).unwrap();
        assert_eq!(entry.slope, 1000.0);
        assert_eq!((entry.head, entry.gain), (Some(1), Some(0)));

        assert!(parse_calibration(&command, "H1 G0 I=00000000").is_err());
        assert!(parse_calibration(&command, "H1 G0 S=XYZ").is_err());
    }

    #[test]
    fn zeros_in_both_layouts() {
        let plain = parse_zeros(&Command::FactoryZeros, "836 835 834 839").unwrap();
        assert_eq!(plain, [836, 835, 834, 839]);
        let keyed = parse_zeros(&Command::FactoryZeros, "h2=5 h1=-3 h4=0 h3=12").unwrap();
        assert_eq!(keyed, [-3, 5, 12, 0]);
        assert!(parse_zeros(&Command::FactoryZeros, "h1=1 h2=2 h3=3").is_err());
        assert!(parse_zeros(&Command::FactoryZeros, "1 2").is_err());
    }

    #[test]
    fn snapshot_payload() {
        let (codes, gains) =
            parse_snapshot(&Command::SnapshotResult, "120 -5 0 32767 G=1 2 3 4").unwrap();
        assert_eq!(codes, [120, -5, 0, 32767]);
        assert_eq!(gains, [gain(1), gain(2), gain(3), gain(4)]);

        assert!(parse_snapshot(&Command::SnapshotResult, "1 2 3 4").is_err());
        assert!(parse_snapshot(&Command::SnapshotResult, "1 2 G=1 2 3 4").is_err());
        assert!(parse_snapshot(&Command::SnapshotResult, "1 2 3 4 G=1 2").is_err());
    }

    #[test]
    fn front_end_detection() {
        assert_eq!(parse_front_end(&Command::HeadType, "TYPE=LINEAR").unwrap(), FrontEnd::Linear);
        assert_eq!(parse_front_end(&Command::HeadType, "type = log").unwrap(), FrontEnd::Log);
        assert!(parse_front_end(&Command::HeadType, "TYPE=OTHER").is_err());
    }

    #[test]
    fn frames_deinterleave_in_order() {
        let mut bytes = Vec::new();
        for frame in 0..3i16 {
            for ch in 0..4i16 {
                bytes.extend_from_slice(&(frame * 10 + ch - 20).to_le_bytes());
            }
        }
        let mut channels: [Vec<i16>; NUM_HEADS] = Default::default();
        decode_frames(&bytes[..16], &mut channels);
        decode_frames(&bytes[16..], &mut channels);
        assert_eq!(channels[0], vec![-20, -10, 0]);
        assert_eq!(channels[3], vec![-17, -7, 3]);
    }
}
