//! Mode S signal demodulation
//!
//! Scans magnitude samples for the Mode S preamble, demodulates up to five
//! sub-sample phase candidates per hit, and keeps the best-scoring one.

use std::fs::File;
use std::io::{BufReader, Read};

use crossbeam_channel::Sender;
use tracing::debug;

use crate::config::Config;
use crate::crc::{self, df_permitted};
use crate::decoder::{self, MODES_LONG_MSG_BITS, ModesMessage};
use crate::magnitude::{MagnitudeLut, compute_magnitude_vector};
use crate::scorer::{Candidate, CorrectionClass, pick_best, score};
use crate::stats::Stats;

/// Preamble length in magnitude samples: 8us at 2.4 MS/s.
const PREAMBLE_SAMPLES: usize = 19;
/// Full message length (bits) padded to byte boundary for buffer sizing.
const MODES_FULL_LEN: usize = PREAMBLE_SAMPLES + MODES_LONG_MSG_BITS * 3 / 2;
/// Default data buffer length.
const MODES_DATA_LEN: usize = 16 * 16384; // 256K
/// Minimum samples carried forward at the end of a chunk (>= spec floor).
const OVERLAP_SAMPLES: usize = 240;

/// Mode S demodulator: locates preambles and emits validated messages.
pub struct Demodulator {
    config: Config,
    pub mag_lut: MagnitudeLut,
}

impl Demodulator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            mag_lut: MagnitudeLut::new(),
        }
    }

    /// Process data from a file, replaying forever if `--loop` was given.
    pub fn process_file(
        &self,
        filename: &str,
        tx: &Sender<ModesMessage>,
        known_icao: &mut dyn FnMut(u32) -> bool,
        note_icao: &mut dyn FnMut(u32),
        stats: &Stats,
    ) -> std::io::Result<()> {
        let file: Box<dyn Read> = if filename == "-" {
            Box::new(std::io::stdin())
        } else {
            Box::new(File::open(filename)?)
        };

        let mut reader = BufReader::with_capacity(MODES_DATA_LEN, file);

        let overlap_bytes = OVERLAP_SAMPLES * 2;
        let buffer_len = MODES_DATA_LEN + overlap_bytes;
        let mut data = vec![127u8; buffer_len];

        loop {
            data.copy_within(MODES_DATA_LEN..MODES_DATA_LEN + overlap_bytes, 0);

            let bytes_read = reader.read(&mut data[overlap_bytes..overlap_bytes + MODES_DATA_LEN])?;

            if bytes_read == 0 {
                if self.config.loop_file && filename != "-" {
                    drop(reader);
                    if let Ok(file) = File::open(filename) {
                        reader =
                            BufReader::with_capacity(MODES_DATA_LEN, Box::new(file) as Box<dyn Read>);
                        debug!("looping input file");
                        continue;
                    }
                }
                break;
            }

            if bytes_read < MODES_DATA_LEN {
                data[overlap_bytes + bytes_read..].fill(127);
            }

            let magnitude =
                compute_magnitude_vector(&data[..overlap_bytes + bytes_read], &self.mag_lut);
            stats.update_noise_floor(&magnitude);
            self.scan(&magnitude, tx, known_icao, note_icao, stats);
        }

        Ok(())
    }

    /// Process one already-assembled magnitude chunk (used by sample-source
    /// adapters that already produced the I/Q -> magnitude conversion).
    pub fn process_chunk(
        &self,
        magnitude: &[u16],
        tx: &Sender<ModesMessage>,
        known_icao: &mut dyn FnMut(u32) -> bool,
        note_icao: &mut dyn FnMut(u32),
        stats: &Stats,
    ) {
        stats.update_noise_floor(magnitude);
        self.scan(magnitude, tx, known_icao, note_icao, stats);
    }

    /// Scan a magnitude buffer for preambles, demodulate each hit across its
    /// phase trials, score the candidates and forward the best one.
    fn scan(
        &self,
        m: &[u16],
        tx: &Sender<ModesMessage>,
        known_icao: &mut dyn FnMut(u32) -> bool,
        note_icao: &mut dyn FnMut(u32),
        stats: &Stats,
    ) {
        let mlen = m.len();
        if mlen < MODES_FULL_LEN * 2 {
            return;
        }

        let mut j = 0;
        while j < mlen - MODES_FULL_LEN * 2 {
            stats.preambles_scanned.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            if !preamble_shape_ok(m, j) {
                j += 1;
                continue;
            }

            if !snr_gate_ok(m, j) {
                j += 1;
                continue;
            }

            stats.preambles_seen.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            let candidates: Vec<Candidate> = (4..=8)
                .filter_map(|try_phase| demodulate_phase(m, j, try_phase, self.config.fix_errors, self.config.aggressive))
                .collect();

            match pick_best(candidates) {
                Some(best) => {
                    let msg_len = best.msg_bits / 8;
                    let mut mm = decoder::decode_modes_message(
                        &best.msg[..msg_len],
                        self.config.fix_errors,
                        self.config.aggressive,
                    );
                    mm.phase_corrected = best.phase != 4;
                    mm.signal_level = m[j];

                    let icao_in_message = matches!(mm.msg_type, 11 | 17 | 18);
                    let accept = if icao_in_message {
                        mm.crc_ok
                    } else {
                        let recovered = mm.icao_address();
                        let ok = known_icao(recovered);
                        if ok {
                            mm.crc_ok = true;
                        }
                        ok
                    };

                    if accept {
                        if icao_in_message {
                            note_icao(mm.icao_address());
                        }
                        match best.class {
                            CorrectionClass::Valid => {
                                stats.valid.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                            }
                            CorrectionClass::Corrected1 => stats
                                .corrected1
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                            CorrectionClass::Corrected2 => stats
                                .corrected2
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                            CorrectionClass::Invalid => 0,
                        };
                        let _ = tx.send(mm);
                    } else {
                        stats.rejected.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }

                    j += PREAMBLE_SAMPLES + (best.msg_bits * 12) / 5;
                }
                None => {
                    stats.rejected.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    j += 1;
                }
            }
        }
    }
}

/// Coarse + fine preamble shape check, adapted from the classic dump1090
/// correlator: four high-energy spikes at {0,2,7,9} with quiet cells
/// around and between them.
fn preamble_shape_ok(m: &[u16], j: usize) -> bool {
    m[j] > m[j + 1]
        && m[j + 1] < m[j + 2]
        && m[j + 2] > m[j + 3]
        && m[j + 3] < m[j]
        && m[j + 4] < m[j]
        && m[j + 5] < m[j]
        && m[j + 6] < m[j]
        && m[j + 7] > m[j + 8]
        && m[j + 8] < m[j + 9]
        && m[j + 9] > m[j + 6]
}

/// 3.5 dB SNR gate: `2*H < 3*N` rejects. `H` averages the four peak samples,
/// `N` averages the quiet cells between and after them.
fn snr_gate_ok(m: &[u16], j: usize) -> bool {
    let high = (m[j] as u32 + m[j + 2] as u32 + m[j + 7] as u32 + m[j + 9] as u32) / 4;
    let noise = (m[j + 3] as u32 + m[j + 4] as u32 + m[j + 5] as u32 + m[j + 6] as u32) / 4;

    if 2 * high < 3 * noise.max(1) {
        return false;
    }
    if m[j + 4] as u32 >= high || m[j + 5] as u32 >= high {
        return false;
    }
    if j + 14 < m.len()
        && (m[j + 11] as u32 >= high
            || m[j + 12] as u32 >= high
            || m[j + 13] as u32 >= high
            || m[j + 14] as u32 >= high)
    {
        return false;
    }
    true
}

/// Linear interpolation between two adjacent magnitude samples at a 1/5-bit
/// sub-sample phase; phase 0 is sample-aligned.
#[inline]
fn interp(m: &[u16], idx: usize, phase: usize) -> u32 {
    let a = *m.get(idx).unwrap_or(&0) as u32;
    let b = *m.get(idx + 1).unwrap_or(&0) as u32;
    (a * (5 - phase as u32) + b * phase as u32) / 5
}

/// Walks the magnitude stream bit by bit for one phase trial, advancing the
/// sample pointer by a Bresenham-style accumulator that averages 2.4
/// samples/bit (the state cycles P0->P1->P2->P3->P4->P0 exactly as the
/// fractional accumulator's 1/5-sample remainder does).
struct PhaseWalker {
    pos: usize,
    accum: u32,
    state: usize,
}

impl PhaseWalker {
    fn new(preamble_end: usize, try_phase: usize) -> Self {
        Self {
            pos: preamble_end + try_phase / 5,
            accum: 0,
            state: try_phase % 5,
        }
    }

    fn next_bit(&mut self, m: &[u16], prev_bit: u8) -> u8 {
        let first = interp(m, self.pos, self.state);
        let second = interp(m, self.pos + 1, self.state);

        let bit = if first > second {
            1
        } else if first < second {
            0
        } else {
            prev_bit
        };

        self.accum += 12; // 2.4 samples/bit, fifths
        let step = self.accum / 5;
        self.accum -= step * 5;
        self.pos += step as usize;
        self.state = (self.state + 2) % 5;

        bit
    }
}

/// Demodulate one phase trial starting at preamble offset `j`, run CRC
/// validation/correction, and score the result.
fn demodulate_phase(
    m: &[u16],
    j: usize,
    try_phase: usize,
    fix_errors: bool,
    aggressive: bool,
) -> Option<Candidate> {
    let mut walker = PhaseWalker::new(j + PREAMBLE_SAMPLES, try_phase);

    const SHORT_MSG_BITS: usize = 56;
    let mut bits = [0u8; MODES_LONG_MSG_BITS];
    let mut prev = 0u8;
    let mut total_bits = MODES_LONG_MSG_BITS;

    for i in 0..MODES_LONG_MSG_BITS {
        bits[i] = walker.next_bit(m, prev);
        prev = bits[i];

        if i == 7 {
            let df = pack_byte(&bits[0..8]) >> 3;
            if matches!(df, 0 | 4 | 5 | 11) {
                total_bits = SHORT_MSG_BITS;
            }
        }
        if i + 1 == total_bits {
            break;
        }
    }

    let mut msg = [0u8; 14];
    for i in 0..(total_bits / 8) {
        msg[i] = pack_byte(&bits[i * 8..i * 8 + 8]);
    }
    score_candidate(msg, total_bits, try_phase, fix_errors, aggressive)
}

fn pack_byte(bits: &[u8]) -> u8 {
    bits.iter().fold(0u8, |acc, &b| (acc << 1) | b)
}

fn score_candidate(
    mut msg: [u8; 14],
    msg_bits: usize,
    try_phase: usize,
    fix_errors: bool,
    aggressive: bool,
) -> Option<Candidate> {
    let df = msg[0] >> 3;
    if !df_permitted(df) {
        return Some(Candidate {
            msg,
            msg_bits,
            phase: try_phase as u8,
            class: CorrectionClass::Invalid,
            score: -1,
        });
    }

    let valid = if df == 11 {
        (crc::recover_icao_from_crc(&msg, msg_bits) & 0xFFFF_80) == 0
    } else {
        crc::verify_crc(&msg, msg_bits)
    };

    let class = if valid {
        CorrectionClass::Valid
    } else if fix_errors && matches!(df, 11 | 17 | 18) {
        if crc::fix_single_bit_errors(&mut msg, msg_bits).is_some() {
            CorrectionClass::Corrected1
        } else if aggressive && matches!(df, 17 | 18) && msg_bits == 112 {
            if crc::fix_two_bit_errors(&mut msg, msg_bits).is_some() {
                CorrectionClass::Corrected2
            } else {
                CorrectionClass::Invalid
            }
        } else {
            CorrectionClass::Invalid
        }
    } else {
        CorrectionClass::Invalid
    };

    let me_type = if msg_bits == 112 { msg[4] >> 3 } else { 0 };
    let s = score(class, df, me_type);

    Some(Candidate {
        msg,
        msg_bits,
        phase: try_phase as u8,
        class,
        score: s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_byte() {
        assert_eq!(pack_byte(&[1, 0, 0, 0, 1, 1, 0, 1]), 0x8D);
    }

    #[test]
    fn test_phase_walker_advances_2point4_avg() {
        let m = vec![0u16; 64];
        let mut walker = PhaseWalker::new(0, 4);
        let start = walker.pos;
        for _ in 0..40 {
            walker.next_bit(&m, 0);
        }
        // 40 bits at 2.4 samples/bit == 96 samples advanced
        assert_eq!(walker.pos - start, 96);
    }

    #[test]
    fn test_preamble_shape_rejects_flat_signal() {
        let m = vec![100u16; 32];
        assert!(!preamble_shape_ok(&m, 0));
    }

    #[test]
    fn test_snr_gate_rejects_low_snr() {
        let m = vec![105u16; 32];
        assert!(!snr_gate_ok(&m, 0));
    }
}
