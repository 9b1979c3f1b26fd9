//! Live sample acquisition
//!
//! Wraps `rtl_sdr` as a subprocess piping raw 8-bit I/Q samples over stdout,
//! the same way the teacher drove `rtl_sdr`/`hackrf_transfer`. HackRF support
//! is dropped: one SDR, kept well, beats two kept half-heartedly.

use std::io::{self, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::Ordering;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::debug;

use crate::config::Config;
use crate::decoder::ModesMessage;
use crate::demodulator::Demodulator;
use crate::error::ReceiverError;
use crate::magnitude::{MagnitudeLut, compute_magnitude_vector};
use crate::stats::Stats;

/// Minimum samples carried forward at the end of a chunk, mirroring the
/// overlap the demodulator needs to catch a message spanning a chunk edge.
const OVERLAP_SAMPLES: usize = 240;
const CHUNK_SAMPLES: usize = 16 * 16384;
/// Chunk queue depth between acquisition and the processing worker.
pub const CHUNK_QUEUE_DEPTH: usize = 100;

/// A blocking source of raw interleaved 8-bit I/Q samples.
pub trait SampleSource: Send {
    /// Fill `buf` with up to `buf.len()` bytes, returning the number read.
    /// `0` means end of stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Spawns `rtl_sdr -f <freq> -s <rate> -g <gain> -` and reads its stdout.
pub struct RtlSdrSource {
    child: Child,
    stdout: ChildStdout,
}

impl RtlSdrSource {
    pub fn spawn(config: &Config) -> Result<Self, ReceiverError> {
        let gain_arg = if config.gain <= 0 {
            "0".to_string()
        } else {
            (config.gain / 10).to_string()
        };

        let mut cmd = Command::new("rtl_sdr");
        cmd.arg("-d")
            .arg(config.dev_index.to_string())
            .arg("-f")
            .arg(config.freq.to_string())
            .arg("-s")
            .arg(config.sample_rate.to_string())
            .arg("-g")
            .arg(gain_arg)
            .arg("-")
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|source| ReceiverError::DeviceUnavailable {
            index: config.dev_index,
            source,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| ReceiverError::DeviceConfiguration {
            index: config.dev_index,
            reason: "rtl_sdr produced no stdout pipe".to_string(),
        })?;

        Ok(Self { child, stdout })
    }
}

impl SampleSource for RtlSdrSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl Drop for RtlSdrSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Pull raw chunks from `source`, convert each to a magnitude buffer and
/// enqueue it for the processing worker, until the source reports EOF or an
/// I/O error. A full queue drops the newest chunk and counts it as a sample
/// overrun rather than blocking the acquisition thread on a slow consumer.
pub fn acquire(
    source: &mut dyn SampleSource,
    mag_lut: &MagnitudeLut,
    chunk_tx: &Sender<Vec<u16>>,
    stats: &Stats,
) -> io::Result<()> {
    let overlap_bytes = OVERLAP_SAMPLES * 2;
    let read_bytes = CHUNK_SAMPLES * 2;
    let mut data = vec![127u8; overlap_bytes + read_bytes];

    loop {
        data.copy_within(read_bytes..read_bytes + overlap_bytes, 0);

        let mut total_read = 0;
        while total_read < read_bytes {
            match source.read_chunk(&mut data[overlap_bytes + total_read..overlap_bytes + read_bytes]) {
                Ok(0) => {
                    debug!("sample source reached end of stream");
                    return Ok(());
                }
                Ok(n) => total_read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let magnitude = compute_magnitude_vector(&data[..overlap_bytes + read_bytes], mag_lut);
        match chunk_tx.try_send(magnitude) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                stats.sample_overruns.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("processing worker gone, stopping acquisition");
                return Ok(());
            }
        }
    }
}

/// Drain magnitude chunks from the acquisition queue and run the full
/// demodulate/decode/score pipeline on each, until the queue is closed.
pub fn process_chunks(
    chunk_rx: &Receiver<Vec<u16>>,
    demodulator: &Demodulator,
    tx: &Sender<ModesMessage>,
    known_icao: &mut dyn FnMut(u32) -> bool,
    note_icao: &mut dyn FnMut(u32),
    stats: &Stats,
) {
    while let Ok(magnitude) = chunk_rx.recv() {
        demodulator.process_chunk(&magnitude, tx, known_icao, note_icao, stats);
    }
}
