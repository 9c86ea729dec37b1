//! coreDAQ driver tests against the firmware simulator.
//!
//! Every test drives a real `CoreDaq` through `StreamTransport` over a
//! `MockCoreDaq`, so the full command/reply codec is exercised.
//!
//! Run with: `cargo test -p daq-driver-coredaq --test driver_integration`

use daq_core::{ErrorKind, StreamTransport};
use daq_driver_coredaq::{
    round_sig, AcquisitionState, AutoGainOptions, CoreDaq, DriverOptions, GainIndex, GainSetting,
    Head, MockCoreDaq, MockFault, MockSignal, Pacer, ZeroOffsets, NUM_GAINS, NUM_HEADS,
};
use daq_driver_coredaq::protocol::{FrontEnd, TriggerEdge};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

type MockDaq = CoreDaq<StreamTransport<MockCoreDaq>>;

// =============================================================================
// Helpers
// =============================================================================

/// Fake clock: records every pause instead of sleeping.
#[derive(Clone, Default)]
struct RecordingPacer {
    pauses: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingPacer {
    fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().clone()
    }
}

impl Pacer for RecordingPacer {
    fn pause(&mut self, interval: Duration) {
        self.pauses.lock().push(interval);
    }
}

fn test_options() -> DriverOptions {
    let mut options = DriverOptions {
        timeout: Duration::from_millis(50),
        ..DriverOptions::default()
    };
    options.acquisition.snapshot_timeout = Duration::from_millis(10);
    options.acquisition.snapshot_poll_interval = Duration::from_millis(1);
    options
}

fn connect_with(mock: &MockCoreDaq, options: DriverOptions) -> (MockDaq, RecordingPacer) {
    let pacer = RecordingPacer::default();
    let transport = StreamTransport::new(mock.clone(), "mock");
    let daq = CoreDaq::connect_with_pacer(transport, options, pacer.clone()).unwrap();
    (daq, pacer)
}

fn connect(mock: &MockCoreDaq) -> (MockDaq, RecordingPacer) {
    connect_with(mock, test_options())
}

fn gains(values: [u8; NUM_HEADS]) -> [GainIndex; NUM_HEADS] {
    values.map(|g| GainIndex::new(g).unwrap())
}

fn run_to_data_ready(daq: &mut MockDaq, frames: u32) {
    daq.arm(frames).unwrap();
    daq.start().unwrap();
    let state = daq.wait_done(Duration::from_millis(1)).unwrap();
    assert_eq!(state, AcquisitionState::DataReady);
}

fn head(number: u8) -> Head {
    Head::new(number).unwrap()
}

// =============================================================================
// Connect
// =============================================================================

#[test]
fn connect_loads_calibration_zeros_and_gains() {
    let mock = MockCoreDaq::new()
        .with_gains([1, 2, 3, 4])
        .with_factory_zeros([12, -7, 0, 3]);
    let (mut daq, _) = connect(&mock);

    assert_eq!(daq.front_end(), FrontEnd::Linear);
    assert_eq!(daq.latched_gains(), gains([1, 2, 3, 4]));
    assert_eq!(daq.factory_zeros().codes(), [12, -7, 0, 3]);
    assert_eq!(daq.active_zeros(), daq.factory_zeros());
    assert!(daq.identity().unwrap().starts_with("coreDAQ"));

    let log = mock.command_log();
    let cal_reads = log.iter().filter(|c| c.starts_with("CAL ")).count();
    assert_eq!(cal_reads, NUM_HEADS * NUM_GAINS);
    assert_eq!(log[0], "HEAD_TYPE?");
    assert_eq!(log[1], "I2C REFRESH");
}

#[test]
fn every_loaded_slope_is_positive() {
    let (daq, _) = connect(&MockCoreDaq::new());
    for h in Head::ALL {
        for g in GainIndex::all() {
            assert!(daq.slope(h, g) > 0.0, "{h} {g}");
        }
    }
    assert_eq!(daq.calibration().head_slopes(head(1)).len(), NUM_GAINS);
}

#[test]
fn rejected_calibration_read_fails_connect() {
    let mock = MockCoreDaq::new();
    mock.inject_fault("CAL 3 5", MockFault::Reject("eeprom crc".into()));
    let transport = StreamTransport::new(mock.clone(), "mock");
    let err = CoreDaq::connect_with_pacer(transport, test_options(), RecordingPacer::default())
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::CalibrationLoad);
}

#[test]
fn garbled_calibration_reply_fails_connect() {
    let mock = MockCoreDaq::new();
    mock.inject_fault("CAL 1 0", MockFault::Garbage);
    let transport = StreamTransport::new(mock, "mock");
    let err = CoreDaq::connect(transport, test_options()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::CalibrationLoad);
}

#[test]
fn silent_calibration_read_is_a_communication_error() {
    let mock = MockCoreDaq::new();
    mock.inject_fault("CAL 2 4", MockFault::Silence);
    let transport = StreamTransport::new(mock, "mock");
    let err = CoreDaq::connect(transport, test_options()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Communication);
}

#[test]
fn log_front_end_is_refused() {
    let mock = MockCoreDaq::new().with_front_end(FrontEnd::Log);
    let transport = StreamTransport::new(mock.clone(), "mock");
    let err = CoreDaq::connect(transport, test_options()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::CalibrationLoad);
    assert!(!mock.command_log().iter().any(|c| c.starts_with("CAL ")));
}

#[test]
fn invalid_options_are_rejected_before_talking() {
    let mock = MockCoreDaq::new();
    let mut options = test_options();
    options.acquisition.transfer_chunk_bytes = 10;
    let err = CoreDaq::connect(StreamTransport::new(mock.clone(), "mock"), options)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(mock.command_log().is_empty());
}

#[test]
fn stale_bytes_are_discarded_at_connect() {
    let mock = MockCoreDaq::new();
    mock.inject_noise(b"OK 4\nOK 0\n");
    let (daq, _) = connect(&mock);
    assert_eq!(daq.front_end(), FrontEnd::Linear);
}

// =============================================================================
// Gains
// =============================================================================

#[test]
fn set_gain_by_power_range_latches_matching_stage() {
    let mock = MockCoreDaq::new();
    let (mut daq, pacer) = connect(&mock);

    let gain = daq
        .set_gain(head(2), GainSetting::PowerRange(750e-6), true)
        .unwrap();
    assert_eq!(gain, GainIndex::new(2).unwrap());
    assert_eq!(daq.gains().unwrap()[1], GainIndex::new(2).unwrap());
    assert_eq!(mock.gains()[1], 2);

    let log = mock.command_log();
    let at = log.iter().position(|c| c == "GAIN 2 2").unwrap();
    assert_eq!(log[at + 1], "I2C REFRESH");
    assert_eq!(pacer.pauses(), vec![Duration::from_millis(50)]);
}

#[test]
fn staged_gain_skips_refresh() {
    let mock = MockCoreDaq::new();
    let (mut daq, _) = connect(&mock);
    mock.clear_log();

    daq.set_gain(head(4), GainIndex::new(6).unwrap(), false).unwrap();
    assert_eq!(mock.command_log(), vec!["GAIN 4 6".to_string()]);
    assert_eq!(daq.latched_gains()[3], GainIndex::new(0).unwrap());
    assert_eq!(daq.staged_gain(head(4)), GainIndex::new(6).ok());

    daq.set_gain(head(1), GainIndex::new(3).unwrap(), true).unwrap();
    assert_eq!(daq.latched_gains(), gains([3, 0, 0, 6]));
    assert_eq!(daq.staged_gain(head(4)), None);
}

#[test]
fn gain_setting_needs_exactly_one_option() {
    let both = GainSetting::from_options(Some(1), Some(1e-3)).unwrap_err();
    assert_eq!(both.kind(), ErrorKind::InvalidArgument);
    let neither = GainSetting::from_options(None, None).unwrap_err();
    assert_eq!(neither.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn power_beyond_every_stage_is_out_of_range() {
    let mock = MockCoreDaq::new();
    let (mut daq, _) = connect(&mock);
    mock.clear_log();

    let err = daq
        .set_gain(head(1), GainSetting::PowerRange(10e-3), true)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRange);
    assert!(mock.command_log().is_empty());
}

#[test]
fn autogain_walks_each_head_into_window() {
    // head 4 saturates even at the least sensitive stage and stays there
    let mock = MockCoreDaq::new().with_signal(MockSignal::Optical([1e-3, 60e-6, 3e-6, 5e-3]));
    let (mut daq, _) = connect(&mock);

    let options = AutoGainOptions {
        min_mv: 2000.0,
        ..AutoGainOptions::default()
    };
    let settled = daq.autogain(4, options).unwrap();
    assert_eq!(settled, gains([1, 4, 6, 0]));
    assert_eq!(mock.gains(), [1, 4, 6, 0]);
}

#[test]
fn autogain_rejects_inverted_window() {
    let (mut daq, _) = connect(&MockCoreDaq::new());
    let options = AutoGainOptions {
        min_mv: 5000.0,
        max_mv: 100.0,
        max_iterations: 3,
    };
    assert_eq!(
        daq.autogain(4, options).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

// =============================================================================
// Acquisition
// =============================================================================

#[test]
fn software_acquisition_round_trip() {
    let mock = MockCoreDaq::new().with_signal(MockSignal::Ramp {
        start: [0, 100, -100, 7],
        step: 1,
    });
    let (mut daq, pacer) = connect(&mock);

    daq.arm(100).unwrap();
    assert_eq!(daq.acquisition_state(), AcquisitionState::Armed);
    assert_eq!(daq.frames_left().unwrap(), 100);
    daq.start().unwrap();
    assert_eq!(daq.acquisition_state(), AcquisitionState::Running);

    let state = daq.wait_done(Duration::from_millis(3)).unwrap();
    assert_eq!(state, AcquisitionState::DataReady);
    assert_eq!(pacer.pauses(), vec![Duration::from_millis(3); 2]);
    assert_eq!(daq.device_frames_left().unwrap(), 100);

    let channels = daq.transfer_frames_adc(100).unwrap();
    for (ch, start) in channels.iter().zip([0i16, 100, -100, 7]) {
        assert_eq!(ch.len(), 100);
        assert_eq!(ch[0], start);
        assert_eq!(ch[99], start + 99);
    }
    assert_eq!(daq.acquisition_state(), AcquisitionState::Idle);
    assert_eq!(daq.frames_left().unwrap(), 0);
    assert_eq!(mock.status(), 0);
}

#[test]
fn start_while_idle_is_invalid_state() {
    let mock = MockCoreDaq::new();
    let (mut daq, _) = connect(&mock);
    mock.clear_log();

    assert_eq!(daq.start().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(
        daq.transfer_frames_adc(1).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert_eq!(
        daq.wait_done(Duration::from_millis(1)).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert!(mock.command_log().is_empty());
    assert_eq!(daq.acquisition_state(), AcquisitionState::Idle);
}

#[test]
fn arm_twice_is_invalid_state() {
    let (mut daq, _) = connect(&MockCoreDaq::new());
    daq.arm(10).unwrap();
    assert_eq!(daq.arm(10).unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(daq.arm(0).unwrap_err().kind(), ErrorKind::InvalidState);
    daq.stop().unwrap();
    assert_eq!(daq.arm(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
}

#[test]
fn frames_left_shrinks_across_partial_transfers() {
    let mock = MockCoreDaq::new().with_signal(MockSignal::Ramp {
        start: [0; NUM_HEADS],
        step: 1,
    });
    let (mut daq, _) = connect(&mock);
    run_to_data_ready(&mut daq, 10);

    let mut left = daq.frames_left().unwrap();
    assert_eq!(left, 10);
    let mut collected = Vec::new();
    for chunk in [3u32, 4] {
        let channels = daq.transfer_frames_adc(chunk).unwrap();
        collected.extend_from_slice(&channels[0]);
        let now = daq.frames_left().unwrap();
        assert!(now < left);
        assert_eq!(now, left - chunk);
        left = now;
    }

    let err = daq.transfer_frames_adc(left + 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(daq.acquisition_state(), AcquisitionState::DataReady);

    let rest = daq.transfer_frames_adc(left).unwrap();
    collected.extend_from_slice(&rest[0]);
    assert_eq!(collected, (0..10).collect::<Vec<i16>>());
    assert_eq!(daq.acquisition_state(), AcquisitionState::Idle);
    assert_eq!(daq.frames_left().unwrap(), 0);
}

#[test]
fn transfer_is_split_into_chunks() {
    let mock = MockCoreDaq::new().with_signal(MockSignal::Ramp {
        start: [1, 2, 3, 4],
        step: 2,
    });
    let mut options = test_options();
    options.acquisition.transfer_chunk_bytes = 16;
    let (mut daq, _) = connect_with(&mock, options);
    run_to_data_ready(&mut daq, 5);
    mock.clear_log();

    let channels = daq.transfer_frames_adc(5).unwrap();
    assert_eq!(channels[3], vec![4, 6, 8, 10, 12]);
    assert_eq!(
        mock.command_log(),
        vec!["XFER 16".to_string(), "XFER 16".into(), "XFER 8".into()]
    );
}

#[test]
fn trigger_armed_acquisition_waits_for_edge() {
    let mock = MockCoreDaq::new().with_signal(MockSignal::Constant([5, 6, 7, 8]));
    let (mut daq, _) = connect(&mock);

    daq.trig_arm(4, TriggerEdge::Falling).unwrap();
    assert_eq!(daq.acquisition_state(), AcquisitionState::TriggerWait);
    assert!(mock.command_log().iter().any(|c| c == "TRIGARM 4 F"));
    assert_eq!(daq.device_state().unwrap(), AcquisitionState::TriggerWait);
    assert_eq!(daq.start().unwrap_err().kind(), ErrorKind::InvalidState);

    mock.fire_trigger();
    assert_eq!(
        daq.wait_done(Duration::from_millis(1)).unwrap(),
        AcquisitionState::DataReady
    );
    let channels = daq.transfer_frames_adc(4).unwrap();
    assert_eq!(channels[2], vec![7; 4]);
}

#[test]
fn rejected_start_moves_machine_to_error_and_stop_recovers() {
    let mock = MockCoreDaq::new();
    let (mut daq, _) = connect(&mock);
    mock.inject_fault("ACQ START", MockFault::Reject("overtemp".into()));

    daq.arm(8).unwrap();
    let err = daq.start().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceRejected);
    assert_eq!(daq.acquisition_state(), AcquisitionState::Error);
    assert_eq!(daq.arm(8).unwrap_err().kind(), ErrorKind::InvalidState);

    mock.clear_faults();
    daq.stop().unwrap();
    assert_eq!(daq.acquisition_state(), AcquisitionState::Idle);
    run_to_data_ready(&mut daq, 8);
}

#[test]
fn silent_poll_is_a_communication_fault() {
    let mock = MockCoreDaq::new();
    let (mut daq, _) = connect(&mock);
    daq.arm(2).unwrap();
    daq.start().unwrap();

    mock.inject_fault("STATE?", MockFault::Silence);
    let err = daq.wait_done(Duration::from_millis(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Communication);
    assert_eq!(daq.acquisition_state(), AcquisitionState::Error);
}

#[test]
fn late_reply_is_not_taken_for_the_next_command() {
    let mock = MockCoreDaq::new().with_gains([5, 5, 5, 5]);
    let (mut daq, _) = connect(&mock);

    mock.inject_fault("STATE?", MockFault::Silence);
    let err = daq.device_state().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Communication);

    // the missing STATE? reply turns up after its deadline
    mock.inject_noise(b"OK 3\n");
    mock.clear_faults();

    let idn = daq.identity().unwrap();
    assert!(idn.starts_with("coreDAQ"), "{idn}");
    assert_eq!(daq.gains().unwrap(), gains([5, 5, 5, 5]));
    assert_eq!(daq.device_state().unwrap(), AcquisitionState::Idle);
}

#[test]
fn unknown_status_code_is_error_state() {
    let mock = MockCoreDaq::new();
    let (mut daq, _) = connect(&mock);
    daq.arm(2).unwrap();
    daq.start().unwrap();

    mock.force_status(Some(9));
    assert_eq!(
        daq.wait_done(Duration::from_millis(1)).unwrap(),
        AcquisitionState::Error
    );
    assert_eq!(daq.acquisition_state(), AcquisitionState::Error);

    mock.force_status(None);
    daq.stop().unwrap();
    assert_eq!(daq.acquisition_state(), AcquisitionState::Idle);
}

// =============================================================================
// Conversion
// =============================================================================

#[test]
fn millivolt_transfer_spans_full_scale() {
    let mock = MockCoreDaq::new().with_signal(MockSignal::Constant([0, i16::MAX, i16::MIN, 16384]));
    let (mut daq, _) = connect(&mock);
    run_to_data_ready(&mut daq, 3);

    let mv = daq.transfer_frames_mv(3).unwrap();
    assert_eq!(mv[0], vec![0.0; 3]);
    assert!((mv[1][0] - 5000.0).abs() < 0.2);
    assert_eq!(mv[2][0], -5000.0);
    assert_eq!(mv[3][0], 2500.0);
}

#[test]
fn watt_transfer_uses_slope_and_rounds() {
    let mock = MockCoreDaq::new()
        .with_slopes([[1000.0; NUM_GAINS]; NUM_HEADS])
        .with_signal(MockSignal::Constant([1234, -1234, 0, 32000]));
    let (mut daq, _) = connect(&mock);
    run_to_data_ready(&mut daq, 2);
    mock.clear_log();

    let watts = daq.transfer_frames_w(2, None, 4).unwrap();
    // 1234 codes → 188.2934… mV → 0.1882934… W
    assert_eq!(watts[0], vec![0.1883; 2]);
    assert_eq!(watts[1][0], -0.1883);
    assert_eq!(watts[2][0], 0.0);
    assert_eq!(watts[3][0], round_sig(32000.0 / 32768.0 * 5.0, 4));
    assert!(mock.command_log().iter().any(|c| c == "GAINS?"));
}

#[test]
fn watt_transfer_with_explicit_gains_skips_query() {
    let mock = MockCoreDaq::new().with_signal(MockSignal::Constant([1000; NUM_HEADS]));
    let (mut daq, _) = connect(&mock);
    run_to_data_ready(&mut daq, 1);
    mock.clear_log();

    let g = gains([0, 1, 2, 7]);
    let watts = daq.transfer_frames_w(1, Some(g), 3).unwrap();
    assert!(!mock.command_log().iter().any(|c| c == "GAINS?"));

    let mv = 1000.0 / 32768.0 * 5000.0;
    for h in Head::ALL {
        let expected = round_sig(mv / daq.slope(h, g[h.index()]), 3);
        assert_eq!(watts[h.index()][0], expected);
    }
}

#[test]
fn watt_transfer_rejects_zero_digits() {
    let (mut daq, _) = connect(&MockCoreDaq::new());
    run_to_data_ready(&mut daq, 1);
    let err = daq.transfer_frames_w(1, None, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(daq.frames_left().unwrap(), 1);
}

// =============================================================================
// Snapshots
// =============================================================================

#[test]
fn dark_snapshot_reads_zero_with_latched_gains() {
    let mock = MockCoreDaq::new()
        .with_gains([1, 2, 3, 4])
        .with_signal(MockSignal::Constant([0; NUM_HEADS]));
    let (mut daq, pacer) = connect(&mock);

    let snapshot = daq.snapshot_mv(8).unwrap();
    assert_eq!(snapshot.mv, [0.0; NUM_HEADS]);
    assert_eq!(snapshot.gains, gains([1, 2, 3, 4]));
    assert!(mock.command_log().iter().any(|c| c == "SNAP 8"));
    // one BUSY before the result
    assert_eq!(pacer.pauses(), vec![Duration::from_millis(1)]);
}

#[test]
fn power_snapshot_uses_latched_gain_slope() {
    let mock = MockCoreDaq::new()
        .with_gains([2; NUM_HEADS])
        .with_signal(MockSignal::Optical([500e-6; NUM_HEADS]));
    let (mut daq, _) = connect(&mock);

    let snapshot = daq.snapshot_w(16).unwrap();
    for h in Head::ALL {
        let w = snapshot.power_w[h.index()];
        assert!((w - 500e-6).abs() < 1e-6, "{h}: {w}");
        assert_eq!(w, snapshot.mv[h.index()] / daq.slope(h, snapshot.gains[h.index()]));
    }
}

#[test]
fn endless_busy_snapshot_times_out() {
    let mock = MockCoreDaq::new().with_snapshot_busy_polls(u32::MAX);
    let (mut daq, pacer) = connect(&mock);

    let err = daq.snapshot_codes(4).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Communication);
    // 10 ms budget at 1 ms per poll, plus the first poll
    assert_eq!(pacer.pauses().len(), 11);
    assert_eq!(daq.acquisition_state(), AcquisitionState::Idle);
}

#[test]
fn snapshot_during_acquisition_is_invalid_state() {
    let (mut daq, _) = connect(&MockCoreDaq::new());
    daq.arm(10).unwrap();
    assert_eq!(daq.snapshot_mv(4).unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(daq.snapshot_codes(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
}

// =============================================================================
// Zeroing
// =============================================================================

#[test]
fn zero_offsets_follow_factory_soft_and_restore() {
    let mock = MockCoreDaq::new()
        .with_factory_zeros([100, -50, 0, 0])
        .with_signal(MockSignal::Constant([100, -50, 0, 0]));
    let (mut daq, _) = connect(&mock);

    assert_eq!(daq.snapshot_mv(4).unwrap().mv, [0.0; NUM_HEADS]);

    daq.set_soft_zero(ZeroOffsets::new([0; NUM_HEADS]));
    let raw = daq.snapshot_mv(4).unwrap();
    assert_eq!(raw.mv[0], 100.0 / 32768.0 * 5000.0);
    assert_eq!(raw.mv[1], -50.0 / 32768.0 * 5000.0);

    daq.restore_factory_zero();
    assert_eq!(daq.active_zeros().codes(), [100, -50, 0, 0]);

    mock.set_signal(MockSignal::Constant([7, 7, 7, 7]));
    let dark = daq.soft_zero_from_snapshot(4).unwrap();
    assert_eq!(dark.codes, [7; NUM_HEADS]);
    assert_eq!(daq.snapshot_mv(4).unwrap().mv, [0.0; NUM_HEADS]);

    let refreshed = daq.refresh_factory_zeros().unwrap();
    assert_eq!(refreshed.codes(), [100, -50, 0, 0]);
    assert_eq!(daq.active_zeros(), refreshed);
}

// =============================================================================
// Sampling and sensors
// =============================================================================

#[test]
fn sampling_round_trip() {
    let mock = MockCoreDaq::new().with_sampling(1000, 3);
    let (mut daq, _) = connect(&mock);

    assert_eq!(daq.frequency_hz().unwrap(), 1000);
    assert_eq!(daq.oversampling().unwrap(), 3);
    assert_eq!(daq.set_frequency(20_000).unwrap(), None);
    assert_eq!(mock.sampling(), (20_000, 3));

    assert_eq!(daq.set_frequency(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(
        daq.set_oversampling(8).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

#[test]
fn sensors_report_values() {
    let (mut daq, _) = connect(&MockCoreDaq::new());
    assert_eq!(daq.head_temperature_c().unwrap(), 23.5);
    assert_eq!(daq.head_humidity().unwrap(), 41.2);
    assert_eq!(daq.die_temperature_c().unwrap(), 36.1);
}

#[test]
fn rejected_sensor_query_is_device_rejected() {
    let mock = MockCoreDaq::new();
    let (mut daq, _) = connect(&mock);
    mock.inject_fault("HUM?", MockFault::Reject("no sensor".into()));
    assert_eq!(
        daq.head_humidity().unwrap_err().kind(),
        ErrorKind::DeviceRejected
    );
    // sensor faults leave acquisitions alone
    assert_eq!(daq.acquisition_state(), AcquisitionState::Idle);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn close_releases_transport() {
    let (daq, _) = connect(&MockCoreDaq::new());
    assert!(daq.is_open());
    assert!(daq.transport().get_ref().is_some());
    daq.close().unwrap();
}

#[test]
fn closed_connection_reports_not_connected() {
    use daq_driver_coredaq::connection::Connection;
    use daq_driver_coredaq::protocol::Command;

    let mut conn = Connection::new(
        StreamTransport::new(MockCoreDaq::new(), "mock"),
        Duration::from_millis(20),
    );
    assert_eq!(conn.ask(&Command::State).unwrap(), "0");
    conn.close().unwrap();
    assert!(!conn.is_open());
    assert_eq!(
        conn.ask(&Command::State).unwrap_err().kind(),
        ErrorKind::Communication
    );
}
