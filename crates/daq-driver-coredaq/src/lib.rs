//! coreDAQ driver for coredaq
//!
//! Host-side driver for the coreDAQ four-head photodetector acquisition unit.
//!
//! The layers, leaf to top:
//!
//! - [`protocol`]: typed commands and reply decoders for the line protocol
//! - [`connection`]: command/response exchange over a [`Transport`](daq_core::Transport)
//! - [`calibration`], [`gain`]: the 4×8 slope table and the fixed gain map
//! - [`acquisition`]: the arm → start/trigger → poll → transfer state machine
//! - [`conversion`]: raw code → mV → W with significant-digit rounding
//! - [`driver`]: the [`CoreDaq`] facade tying it together
//! - [`mock`]: a byte-level firmware simulator
//!
//! # Example
//!
//! ```rust,ignore
//! use daq_core::StreamTransport;
//! use daq_driver_coredaq::{CoreDaq, DriverOptions, MockCoreDaq};
//!
//! let transport = StreamTransport::new(MockCoreDaq::new(), "mock");
//! let mut daq = CoreDaq::connect(transport, DriverOptions::default())?;
//! let snapshot = daq.snapshot_w(16)?;
//! ```

pub mod acquisition;
pub mod calibration;
pub mod channel;
pub mod connection;
pub mod conversion;
pub mod driver;
pub mod gain;
pub mod mock;
pub mod protocol;
pub mod sampling;

pub use acquisition::{AcquisitionState, Pacer, ThreadPacer, TriggerMode};
pub use calibration::CalibrationTable;
pub use channel::{Head, NUM_HEADS};
pub use conversion::{
    round_sig, Channels, CodeSnapshot, MvSnapshot, PowerSnapshot, ZeroOffsets, DEFAULT_SIG_DIGITS,
};
pub use driver::{AcquisitionOptions, AutoGainOptions, CoreDaq, DriverOptions};
pub use gain::{gain_label, index_for_power, power_for_index, GainIndex, GainSetting, NUM_GAINS};
pub use mock::{MockCoreDaq, MockFault, MockSignal};
pub use protocol::{FrontEnd, TriggerEdge};

#[cfg(feature = "serial")]
pub use driver::SerialCoreDaq;
