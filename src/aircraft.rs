//! Aircraft tracking and position decoding
//!
//! Maintains a database of recently seen aircraft, decodes CPR positions via
//! [`crate::cpr`], and corroborates the ICAO addresses recovered from
//! CRC-in-address messages (DF0/4/5/16/20/21) against ones seen in the clear
//! (DF11/17/18).

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::cpr::CprState;
use crate::decoder::{BdsData, ModesMessage};
use crate::stats::Stats;

/// Tracked aircraft data
#[derive(Debug, Clone)]
pub struct Aircraft {
    /// ICAO 24-bit address
    pub addr: u32,
    /// Hex address string
    pub hex_addr: String,
    /// Small monotonically-assigned id, stable for the life of the process
    pub aircraft_id: u64,
    /// Flight callsign
    pub flight: String,
    /// Altitude in feet
    pub altitude: i32,
    /// Ground speed in knots
    pub speed: u16,
    /// Track/heading in degrees
    pub track: u16,
    /// Vertical rate in feet per minute (signed)
    pub vertical_rate: Option<i32>,
    /// Squawk (identity) code from DF5/DF21
    pub squawk: u16,
    /// Alert flag from the most recent FS-bearing message
    pub alert: bool,
    /// SPI flag from the most recent FS-bearing message
    pub spi: bool,
    /// Ground state derived from FS or DF17/18 TC/CA
    pub on_ground: bool,
    /// Last seen timestamp
    pub seen: Instant,
    /// Message count
    pub messages: u64,
    /// Per-ICAO CPR even/odd frame state
    pub cpr: CprState,
    /// Decoded latitude/longitude, if a position has ever been fixed
    pub position: Option<(f64, f64)>,
    /// Roll angle (from BDS 5,0)
    pub roll_angle: Option<f32>,
    /// True airspeed (from BDS 5,0 or 6,0)
    pub true_airspeed: Option<u16>,
    /// Indicated airspeed (from BDS 6,0)
    pub indicated_airspeed: Option<u16>,
    /// Mach number (from BDS 6,0)
    pub mach: Option<f32>,
    /// Magnetic heading (from BDS 6,0)
    pub magnetic_heading: Option<f32>,
    /// Barometric altitude rate (from BDS 6,0)
    pub baro_altitude_rate: Option<i16>,
    /// MCP/FCU selected altitude (from BDS 4,0)
    pub selected_altitude: Option<u16>,
    /// Barometric pressure setting (from BDS 4,0)
    pub baro_setting: Option<f32>,
    /// Average signal level (magnitude)
    pub signal_level: u16,
    /// Count of phase-corrected messages
    pub phase_corrections: u32,
}

impl Aircraft {
    pub fn new(addr: u32, aircraft_id: u64) -> Self {
        let now = Instant::now();
        Self {
            addr,
            hex_addr: format!("{:06X}", addr),
            aircraft_id,
            flight: String::new(),
            altitude: 0,
            speed: 0,
            track: 0,
            vertical_rate: None,
            squawk: 0,
            alert: false,
            spi: false,
            on_ground: false,
            seen: now,
            messages: 0,
            cpr: CprState::default(),
            position: None,
            roll_angle: None,
            true_airspeed: None,
            indicated_airspeed: None,
            mach: None,
            magnetic_heading: None,
            baro_altitude_rate: None,
            selected_altitude: None,
            baro_setting: None,
            signal_level: 0,
            phase_corrections: 0,
        }
    }
}

/// Store for tracking multiple aircraft, plus the set of ICAO addresses seen
/// in the clear (DF11/17/18), used to corroborate addresses recovered by
/// XORing the CRC residue on DF0/4/5/16/20/21.
pub struct AircraftStore {
    aircraft: HashMap<u32, Aircraft>,
    known_icao: HashSet<u32>,
    ttl: Duration,
    /// Minimum messages required before aircraft is considered confirmed
    min_messages: u64,
    next_aircraft_id: u64,
}

impl AircraftStore {
    #[allow(dead_code)]
    pub fn new(ttl_secs: u64) -> Self {
        Self::with_min_messages(ttl_secs, 2)
    }

    /// Create a new store with custom minimum message threshold
    pub fn with_min_messages(ttl_secs: u64, min_messages: u64) -> Self {
        Self {
            aircraft: HashMap::new(),
            known_icao: HashSet::new(),
            ttl: Duration::from_secs(ttl_secs),
            min_messages,
            next_aircraft_id: 1,
        }
    }

    /// Whether an ICAO address has previously been seen in the clear
    /// (DF11/17/18). Messages with CRC folded into the address (DF0/4/5/16/
    /// 20/21) are only accepted once their recovered address corroborates
    /// against this set.
    pub fn is_known_icao(&self, addr: u32) -> bool {
        self.known_icao.contains(&addr)
    }

    /// Record an ICAO address as seen in the clear.
    pub fn note_known_icao(&mut self, addr: u32) {
        self.known_icao.insert(addr);
    }

    /// Update aircraft from a decoded, CRC-accepted message. Returns the
    /// updated aircraft record.
    pub fn update_from_message(&mut self, mm: &ModesMessage, stats: &Stats) -> Option<&Aircraft> {
        let addr = mm.icao_address();

        if matches!(mm.msg_type, 11 | 17 | 18) {
            self.note_known_icao(addr);
        }

        let next_id = self.next_aircraft_id;
        let aircraft = self.aircraft.entry(addr).or_insert_with(|| {
            let ac = Aircraft::new(addr, next_id);
            ac
        });
        if aircraft.aircraft_id == next_id {
            self.next_aircraft_id += 1;
        }

        aircraft.seen = Instant::now();
        aircraft.messages += 1;

        if mm.signal_level > 0 {
            if aircraft.signal_level == 0 {
                aircraft.signal_level = mm.signal_level;
            } else {
                aircraft.signal_level =
                    ((aircraft.signal_level as u32 * 7 + mm.signal_level as u32) / 8) as u16;
            }
        }
        if mm.phase_corrected {
            aircraft.phase_corrections += 1;
        }

        if matches!(mm.msg_type, 4 | 5 | 20 | 21 | 17 | 18) {
            aircraft.on_ground = mm.on_ground;
        }
        if matches!(mm.msg_type, 4 | 5 | 20 | 21) {
            aircraft.alert = mm.alert();
            aircraft.spi = mm.spi();
        }

        match mm.msg_type {
            0 | 4 | 16 | 20 => {
                aircraft.altitude = mm.altitude;
                if mm.msg_type == 20 {
                    if let Some(ref bds) = mm.bds_data {
                        self.update_from_bds(addr, bds);
                    }
                }
            }
            5 | 21 => {
                if mm.identity != 0 {
                    aircraft.squawk = mm.identity;
                }
                if mm.msg_type == 21 {
                    if let Some(ref bds) = mm.bds_data {
                        self.update_from_bds(addr, bds);
                    }
                }
            }
            17 | 18 => {
                if (1..=4).contains(&mm.me_type) {
                    if !mm.flight.is_empty() {
                        aircraft.flight = mm.flight.clone();
                    }
                } else if (5..=18).contains(&mm.me_type) {
                    if (9..=18).contains(&mm.me_type) {
                        aircraft.altitude = mm.altitude;
                    }

                    aircraft
                        .cpr
                        .update(mm.fflag, mm.raw_latitude, mm.raw_longitude, Instant::now());
                    if let Some(pos) = aircraft.cpr.decode(aircraft.position, stats) {
                        aircraft.position = Some(pos);
                    }
                } else if mm.me_type == 19 {
                    if mm.me_sub == 1 || mm.me_sub == 2 {
                        aircraft.speed = mm.velocity;
                        aircraft.track = mm.heading as u16;
                        aircraft.vertical_rate = Some(decode_vertical_rate(mm));
                    } else if mm.me_sub == 3 || mm.me_sub == 4 {
                        if mm.heading_is_valid {
                            aircraft.track = mm.heading as u16;
                        }
                        aircraft.speed = mm.airspeed;
                        aircraft.vertical_rate = Some(decode_vertical_rate(mm));
                    }
                }
            }
            _ => {}
        }

        self.aircraft.get(&addr)
    }

    /// Update aircraft with BDS data
    fn update_from_bds(&mut self, addr: u32, bds: &BdsData) {
        let aircraft = match self.aircraft.get_mut(&addr) {
            Some(a) => a,
            None => return,
        };

        match bds {
            BdsData::AircraftIdentification { callsign } => {
                if aircraft.flight.is_empty() {
                    aircraft.flight = callsign.clone();
                }
            }
            BdsData::SelectedVerticalIntention {
                mcp_altitude,
                baro_setting,
                ..
            } => {
                if let Some(alt) = mcp_altitude {
                    aircraft.selected_altitude = Some(*alt);
                }
                if let Some(baro) = baro_setting {
                    aircraft.baro_setting = Some(*baro);
                }
            }
            BdsData::TrackAndTurnReport {
                roll_angle,
                ground_speed,
                true_airspeed,
                true_track,
                ..
            } => {
                if let Some(roll) = roll_angle {
                    aircraft.roll_angle = Some(*roll);
                }
                if let Some(gs) = ground_speed {
                    aircraft.speed = *gs;
                }
                if let Some(tas) = true_airspeed {
                    aircraft.true_airspeed = Some(*tas);
                }
                if let Some(track) = true_track {
                    aircraft.track = *track as u16;
                }
            }
            BdsData::HeadingAndSpeedReport {
                magnetic_heading,
                indicated_airspeed,
                mach,
                baro_altitude_rate,
                ..
            } => {
                if let Some(hdg) = magnetic_heading {
                    aircraft.magnetic_heading = Some(*hdg);
                }
                if let Some(ias) = indicated_airspeed {
                    aircraft.indicated_airspeed = Some(*ias);
                }
                if let Some(m) = mach {
                    aircraft.mach = Some(*m);
                }
                if let Some(rate) = baro_altitude_rate {
                    aircraft.baro_altitude_rate = Some(*rate);
                }
            }
            _ => {}
        }
    }

    /// Get aircraft by ICAO address
    pub fn get(&self, addr: u32) -> Option<&Aircraft> {
        self.aircraft.get(&addr)
    }

    /// Get all aircraft that meet the minimum message threshold
    pub fn all(&self) -> impl Iterator<Item = &Aircraft> {
        let min_msg = self.min_messages;
        self.aircraft.values().filter(move |a| a.messages >= min_msg)
    }

    /// Get all aircraft including those below message threshold
    #[allow(dead_code)]
    pub fn all_unfiltered(&self) -> impl Iterator<Item = &Aircraft> {
        self.aircraft.values()
    }

    /// Remove stale aircraft. Known-ICAO corroboration entries are left in
    /// place; they are cheap to keep and re-seeding them costs a DF11/17/18.
    pub fn remove_stale(&mut self) {
        let now = Instant::now();
        self.aircraft
            .retain(|_, a| now.duration_since(a.seen) <= self.ttl);
    }

    /// Number of tracked aircraft (meeting minimum message threshold)
    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.all().count()
    }

    /// Number of all tracked aircraft including below threshold
    #[allow(dead_code)]
    pub fn len_total(&self) -> usize {
        self.aircraft.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sign-extend and scale the raw vertical rate field (ME type 19, subtype 1/2).
fn decode_vertical_rate(mm: &ModesMessage) -> i32 {
    let magnitude = (mm.vert_rate as i32).saturating_sub(1).max(0) * 64;
    if mm.vert_rate_sign != 0 {
        -magnitude
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aircraft_new() {
        let ac = Aircraft::new(0x4840D6, 1);
        assert_eq!(ac.addr, 0x4840D6);
        assert_eq!(ac.hex_addr, "4840D6");
        assert_eq!(ac.messages, 0);
        assert!(ac.roll_angle.is_none());
        assert!(ac.mach.is_none());
        assert!(ac.position.is_none());
    }

    #[test]
    fn test_aircraft_store_empty() {
        let store = AircraftStore::new(60);
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_known_icao_corroboration() {
        let mut store = AircraftStore::new(60);
        assert!(!store.is_known_icao(0x4840D6));
        store.note_known_icao(0x4840D6);
        assert!(store.is_known_icao(0x4840D6));
    }

    #[test]
    fn test_aircraft_id_assigned_once() {
        let mut store = AircraftStore::with_min_messages(60, 1);
        let mut mm = ModesMessage::default();
        mm.msg_type = 17;
        mm.aa = [0x48, 0x40, 0xD6];
        mm.me_type = 4;
        mm.flight = "KLM1023".to_string();
        let stats = Stats::new();
        store.update_from_message(&mm, &stats);
        store.update_from_message(&mm, &stats);
        let ac = store.get(0x4840D6).unwrap();
        assert_eq!(ac.aircraft_id, 1);
        assert_eq!(ac.messages, 2);
    }

    #[test]
    fn test_decode_vertical_rate_down() {
        let mut mm = ModesMessage::default();
        mm.vert_rate = 17;
        mm.vert_rate_sign = 1;
        assert_eq!(decode_vertical_rate(&mm), -1024);
    }
}
