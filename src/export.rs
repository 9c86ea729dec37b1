//! CSV export of transferred frames.

use crate::error::AppResult;
use daq_driver_coredaq::Channels;
use serde::Serialize;
use std::io::Write;

/// Column header written before the first frame.
pub const CSV_HEADER: [&str; 5] = ["frame", "head1", "head2", "head3", "head4"];

/// Write one row per frame (`frame,head1..head4`) to `sink`.
///
/// Returns the number of frames written. Channels are expected to have equal
/// length; rows stop at the shortest one.
pub fn write_channels<V, W>(channels: &Channels<V>, sink: W) -> AppResult<usize>
where
    V: Serialize + Copy,
    W: Write,
{
    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(CSV_HEADER)?;
    for frame in 0..frames {
        writer.serialize((
            frame,
            channels[0][frame],
            channels[1][frame],
            channels[2][frame],
            channels[3][frame],
        ))?;
    }
    writer.flush()?;
    Ok(frames)
}
