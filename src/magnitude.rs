//! Magnitude stage
//!
//! Turns a buffer of interleaved 8-bit I/Q samples into 16-bit magnitude
//! samples for the demodulator. Each sample pair is unsigned with bias 127.5,
//! so the complex value is `(I-127.5, Q-127.5)`; magnitude is `|z|` scaled so
//! a full-scale input lands near the top of the u16 range. A trailing odd
//! byte with no matching partner is dropped rather than treated as an error.
//!
//! Computing `sqrt` per sample would be wasteful at the sample rates this
//! runs at, so the mapping is precomputed once into a 129x129 table indexed
//! by `(|I-127|, |Q-127|)` — both offsets saturate at 128, which is why the
//! table has 129 entries per axis instead of 128.

/// Scales `sqrt(i^2 + q^2)` (max ~181.02 at the table's corner) up into the
/// u16 range.
const MAGNITUDE_GAIN: f64 = 360.0;
const LUT_AXIS: usize = 129;

pub struct MagnitudeLut {
    table: Box<[u16; LUT_AXIS * LUT_AXIS]>,
}

impl MagnitudeLut {
    /// Builds the table once; every worker thread shares the same instance
    /// read-only afterward.
    pub fn new() -> Self {
        let table: Vec<u16> = (0..LUT_AXIS * LUT_AXIS)
            .map(|idx| {
                let i = (idx / LUT_AXIS) as f64;
                let q = (idx % LUT_AXIS) as f64;
                (i.hypot(q) * MAGNITUDE_GAIN).round() as u16
            })
            .collect();

        Self {
            table: table.into_boxed_slice().try_into().unwrap_or_else(|_| {
                unreachable!("table length is fixed at LUT_AXIS * LUT_AXIS")
            }),
        }
    }

    /// `i` and `q` are already the absolute, saturated axis offsets (0..=128).
    #[inline]
    pub fn lookup(&self, i: u8, q: u8) -> u16 {
        self.table[i as usize * LUT_AXIS + q as usize]
    }
}

impl Default for MagnitudeLut {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a raw byte (0..=255, biased at 127) to its saturated axis offset
/// (0..=128) into the lookup table.
#[inline]
fn axis_offset(raw: u8) -> u8 {
    raw.abs_diff(127).min(128)
}

/// Converts interleaved I/Q bytes into one magnitude sample per pair. An
/// unpaired trailing byte is ignored.
pub fn compute_magnitude_vector(data: &[u8], lut: &MagnitudeLut) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| lut.lookup(axis_offset(pair[0]), axis_offset(pair[1])))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude_lut_corner_and_center() {
        let lut = MagnitudeLut::new();

        assert_eq!(lut.lookup(0, 0), 0);

        // sqrt(128^2 + 128^2) * 360 ~= 65175
        let max_mag = lut.lookup(128, 128);
        assert!(max_mag > 65000);

        // sqrt(128^2) * 360 = 46080
        let single_axis = lut.lookup(128, 0);
        assert!((single_axis as i32 - 46080).abs() < 10);
    }

    #[test]
    fn test_axis_offset_saturates_and_reflects() {
        assert_eq!(axis_offset(127), 0);
        assert_eq!(axis_offset(255), 128);
        assert_eq!(axis_offset(0), 127);
    }

    #[test]
    fn test_compute_magnitude_vector() {
        let lut = MagnitudeLut::new();

        let centered = vec![127u8, 127, 127, 127];
        let mag = compute_magnitude_vector(&centered, &lut);
        assert_eq!(mag.len(), 2);
        assert!(mag[0] < 100);

        let extremes = vec![255u8, 255, 0, 0];
        let mag = compute_magnitude_vector(&extremes, &lut);
        assert!(mag[0] > 40000);
    }

    #[test]
    fn test_compute_magnitude_vector_drops_trailing_odd_byte() {
        let lut = MagnitudeLut::new();
        let odd = vec![127u8, 127, 200];
        assert_eq!(compute_magnitude_vector(&odd, &lut).len(), 1);
    }
}
