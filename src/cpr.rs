//! Compact Position Reporting (CPR) decoder
//!
//! Fuses consecutive even/odd position frames for one aircraft into a
//! latitude/longitude pair, with a single-frame fallback and short-horizon
//! reuse of the last good fix when neither path succeeds.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::stats::Stats;

const CPR_MAX: f64 = 131072.0; // 2^17
const AIR_DLAT0: f64 = 360.0 / 60.0;
const AIR_DLAT1: f64 = 360.0 / 59.0;

/// How long a stale fix may be reused when both the both-frames and
/// single-frame paths fail to produce a new one.
const STALE_REUSE_HORIZON: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct CprFrame {
    pub lat: u32,
    pub lon: u32,
    pub time: Instant,
}

/// Per-ICAO CPR state: the most recent frame of each parity, plus the last
/// position that was successfully decoded.
#[derive(Debug, Clone, Default)]
pub struct CprState {
    pub even: Option<CprFrame>,
    pub odd: Option<CprFrame>,
    pub last_position: Option<(f64, f64)>,
    pub last_position_time: Option<Instant>,
}

impl CprState {
    pub fn update(&mut self, is_odd: bool, lat: u32, lon: u32, time: Instant) {
        let frame = CprFrame { lat, lon, time };
        if is_odd {
            self.odd = Some(frame);
        } else {
            self.even = Some(frame);
        }
    }

    /// Attempt to decode a position from current state, trying both-frames
    /// first, then a single-frame fallback anchored on a reference position,
    /// then reuse of the last good fix within the stale horizon.
    pub fn decode(&mut self, reference: Option<(f64, f64)>, stats: &Stats) -> Option<(f64, f64)> {
        if let Some(pos) = self.decode_both_frames(stats) {
            self.last_position = Some(pos);
            self.last_position_time = Some(Instant::now());
            return Some(pos);
        }

        let anchor = reference.or(self.last_position);
        if let Some(pos) = self.decode_single_frame(anchor) {
            self.last_position = Some(pos);
            self.last_position_time = Some(Instant::now());
            return Some(pos);
        }

        if let (Some(pos), Some(t)) = (self.last_position, self.last_position_time) {
            if t.elapsed() <= STALE_REUSE_HORIZON {
                return Some(pos);
            }
        }

        None
    }

    fn decode_both_frames(&self, stats: &Stats) -> Option<(f64, f64)> {
        let even = self.even?;
        let odd = self.odd?;

        let lat0 = even.lat as f64;
        let lat1 = odd.lat as f64;
        let lon0 = even.lon as f64;
        let lon1 = odd.lon as f64;

        let j = ((59.0 * lat0 - 60.0 * lat1) / CPR_MAX + 0.5).floor() as i32;

        let mut rlat0 = AIR_DLAT0 * (cpr_mod(j, 60) as f64 + lat0 / CPR_MAX);
        let mut rlat1 = AIR_DLAT1 * (cpr_mod(j, 59) as f64 + lat1 / CPR_MAX);

        if rlat0 >= 270.0 {
            rlat0 -= 360.0;
        }
        if rlat1 >= 270.0 {
            rlat1 -= 360.0;
        }

        if rlat0.abs() > 90.0 || rlat1.abs() > 90.0 {
            return None;
        }

        if cpr_nl(rlat0) != cpr_nl(rlat1) {
            // The even/odd frames straddle a latitude band boundary and
            // disagree on the number of longitude zones; position is
            // omitted but both frames are kept for the next attempt.
            stats.cpr_ambiguous.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let more_recent_is_even = even.time >= odd.time;
        let (lat, lon) = if more_recent_is_even {
            let ni = cpr_n(rlat0, false);
            let m = ((lon0 * (cpr_nl(rlat0) - 1) as f64 - lon1 * cpr_nl(rlat0) as f64) / CPR_MAX
                + 0.5)
                .floor() as i32;
            let lon = cpr_dlon(rlat0, false) * (cpr_mod(m, ni) as f64 + lon0 / CPR_MAX);
            (rlat0, lon)
        } else {
            let ni = cpr_n(rlat1, true);
            let m = ((lon0 * (cpr_nl(rlat1) - 1) as f64 - lon1 * cpr_nl(rlat1) as f64) / CPR_MAX
                + 0.5)
                .floor() as i32;
            let lon = cpr_dlon(rlat1, true) * (cpr_mod(m, ni) as f64 + lon1 / CPR_MAX);
            (rlat1, lon)
        };

        Some((lat, normalize_lon(lon)))
    }

    /// Reconstruct a position from whichever single frame is most recent,
    /// snapping to the nearest zone around a reference position.
    fn decode_single_frame(&self, reference: Option<(f64, f64)>) -> Option<(f64, f64)> {
        let (ref_lat, ref_lon) = reference?;

        let (frame, is_odd) = match (self.even, self.odd) {
            (Some(e), Some(o)) if o.time > e.time => (o, true),
            (Some(e), Some(_)) => (e, false),
            (Some(e), None) => (e, false),
            (None, Some(o)) => (o, true),
            (None, None) => return None,
        };

        let dlat = if is_odd { AIR_DLAT1 } else { AIR_DLAT0 };
        let lat_fraction = frame.lat as f64 / CPR_MAX;
        let zone = local_zone(ref_lat, dlat, lat_fraction);
        let lat = dlat * (zone + lat_fraction);
        if lat.abs() > 90.0 {
            return None;
        }

        let ni = cpr_n(lat, is_odd);
        let dlon = 360.0 / ni as f64;
        let lon_fraction = frame.lon as f64 / CPR_MAX;
        let lon_zone = local_zone(ref_lon, dlon, lon_fraction);
        let lon = dlon * (lon_zone + lon_fraction);

        Some((lat, normalize_lon(lon)))
    }
}

/// Zone index for the single-frame-with-reference recovery: the zone
/// containing `reference`, nudged by the fractional part the received frame
/// actually encodes so a reference sitting near a zone edge doesn't snap to
/// the wrong side of it. A plain `(reference / width).round()` gets this
/// wrong whenever the reference's offset within its zone and the frame's CPR
/// fraction disagree about which side of 0.5 they're on.
fn local_zone(reference: f64, width: f64, cpr_fraction: f64) -> f64 {
    (reference / width).floor() + (0.5 + (reference.rem_euclid(width)) / width - cpr_fraction).floor()
}

fn normalize_lon(mut lon: f64) -> f64 {
    if lon >= 180.0 {
        lon -= 360.0;
    } else if lon < -180.0 {
        lon += 360.0;
    }
    lon
}

/// CPR modulo function (always non-negative result, matching C's fmod sign
/// convention for this use).
fn cpr_mod(a: i32, b: i32) -> i32 {
    let res = a % b;
    if res < 0 { res + b } else { res }
}

/// Number of longitude zones at a given latitude (the NL staircase).
pub fn cpr_nl(lat: f64) -> i32 {
    let lat = lat.abs();

    const BREAKPOINTS: [f64; 58] = [
        10.47047130, 14.82817437, 18.18626357, 21.02939493, 23.54504487, 25.82924707,
        27.93898710, 29.91135686, 31.77209708, 33.53993436, 35.22899598, 36.85025108,
        38.41241892, 39.92256684, 41.38651832, 42.80914012, 44.19454951, 45.54626723,
        46.86733252, 48.16039128, 49.42776439, 50.67150166, 51.89342469, 53.09516153,
        54.27817472, 55.44378444, 56.59318756, 57.72747354, 58.84763776, 59.95459277,
        61.04917774, 62.13216659, 63.20427479, 64.26616523, 65.31845310, 66.36171008,
        67.39646774, 68.42322022, 69.44242631, 70.45451075, 71.45986473, 72.45884545,
        73.45177442, 74.43893416, 75.42056257, 76.39684391, 77.36789461, 78.33374083,
        79.29428225, 80.24923213, 81.19801349, 82.13956981, 83.07199445, 83.99173563,
        84.89166191, 85.75541621, 86.53536998, 87.00000000,
    ];

    for (i, &bp) in BREAKPOINTS.iter().enumerate() {
        if lat < bp {
            return 59 - i as i32;
        }
    }
    1
}

fn cpr_n(lat: f64, is_odd: bool) -> i32 {
    let nl = cpr_nl(lat) - if is_odd { 1 } else { 0 };
    nl.max(1)
}

fn cpr_dlon(lat: f64, is_odd: bool) -> f64 {
    360.0 / cpr_n(lat, is_odd) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpr_nl_breakpoints() {
        assert_eq!(cpr_nl(0.0), 59);
        assert_eq!(cpr_nl(45.0), 42);
        assert_eq!(cpr_nl(89.0), 1);
        assert_eq!(cpr_nl(86.6), 3);
    }

    #[test]
    fn test_cpr_mod() {
        assert_eq!(cpr_mod(5, 3), 2);
        assert_eq!(cpr_mod(-1, 3), 2);
        assert_eq!(cpr_mod(-5, 3), 1);
    }

    #[test]
    fn test_both_frames_decode() {
        // KLM1023's even/odd position pair.
        let mut state = CprState::default();
        let stats = Stats::new();
        let t0 = Instant::now();
        state.update(false, 93000, 51372, t0);
        state.update(true, 74158, 50194, t0);

        let pos = state.decode(None, &stats);
        assert!(pos.is_some());
        let (lat, lon) = pos.unwrap();
        assert!((lat - 52.2572).abs() < 0.01);
        assert!((lon - 3.9193).abs() < 0.01);
    }

    #[test]
    fn test_missing_one_frame_without_reference_fails() {
        let mut state = CprState::default();
        let stats = Stats::new();
        state.update(false, 93000, 51372, Instant::now());
        assert!(state.decode(None, &stats).is_none());
    }

    #[test]
    fn test_single_frame_with_reference_recovers_correct_zone() {
        // Same even frame as the both-frames case (raw lat 93000, known fix
        // 52.2572N) but decoded alone against a reference close to the true
        // position. A reference/width `.round()` instead of the floor/modulo
        // zone picks zone 9 here (lat ~58.26N), a full 6 degree band off.
        let mut state = CprState::default();
        let stats = Stats::new();
        state.update(false, 93000, 51372, Instant::now());
        let pos = state.decode(Some((52.2572, 3.9193)), &stats);
        let (lat, lon) = pos.expect("single-frame recovery should succeed");
        assert!((lat - 52.2572).abs() < 0.01, "got lat {}", lat);
        assert!((lon - 3.9193).abs() < 0.01, "got lon {}", lon);
    }

    #[test]
    fn test_nl_disagreement_counts_as_ambiguous() {
        // Frames straddling a latitude band boundary so their NL zone counts
        // disagree; `decode` must omit the position but keep both frames.
        let mut state = CprState::default();
        let stats = Stats::new();
        let t0 = Instant::now();
        state.update(false, 0, 51372, t0);
        state.update(true, 100000, 51372, t0);

        let pos = state.decode(None, &stats);
        assert!(pos.is_none());
        assert_eq!(stats.cpr_ambiguous.load(Ordering::Relaxed), 1);
        assert!(state.even.is_some());
        assert!(state.odd.is_some());
    }

    #[test]
    fn test_stale_reuse_within_horizon() {
        let mut state = CprState::default();
        let stats = Stats::new();
        state.last_position = Some((52.0, 4.0));
        state.last_position_time = Some(Instant::now());
        let pos = state.decode(None, &stats);
        assert_eq!(pos, Some((52.0, 4.0)));
    }
}
