//! BaseStation/SBS line formatting
//!
//! Renders one decoded message as a 22-field SBS record. `session_id` is
//! fixed at 1 for a single receiver run; `aircraft_id`/`flight_id` are the
//! per-ICAO counters assigned by [`crate::aircraft::AircraftStore`].

use chrono::{DateTime, Local, Utc};

use crate::aircraft::Aircraft;
use crate::decoder::ModesMessage;

const SESSION_ID: u64 = 1;

/// Transmission type for a decoded message, per the DF/TC table. `None`
/// means this message does not map to a known BaseStation transmission type
/// and should not be emitted as an SBS line.
pub fn transmission_type(mm: &ModesMessage) -> Option<u8> {
    match mm.msg_type {
        17 | 18 => match mm.me_type {
            1..=4 => Some(1),
            5..=8 => Some(2),
            9..=18 => Some(3),
            19..=22 => Some(4),
            28 => Some(7),
            31 => Some(8),
            _ => None,
        },
        4 | 5 | 20 | 21 => Some(5),
        _ => None,
    }
}

fn emergency_string(squawk: u16) -> &'static str {
    match squawk {
        7500 => "hijack",
        7600 => "radio_failure",
        7700 => "emergency",
        _ => "",
    }
}

fn fmt_opt<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

/// Format one decoded message as a 22-field SBS/BaseStation line, using
/// `now` as both the generated and logged timestamp (no 12 MHz timestamp
/// reconstruction).
pub fn format_line(mm: &ModesMessage, aircraft: &Aircraft, now: DateTime<Utc>, utc: bool) -> Option<String> {
    let transmission_type = transmission_type(mm)?;

    let (date_str, time_str) = if utc {
        (now.format("%Y/%m/%d").to_string(), now.format("%H:%M:%S%.3f").to_string())
    } else {
        let local: DateTime<Local> = now.with_timezone(&Local);
        (local.format("%Y/%m/%d").to_string(), local.format("%H:%M:%S%.3f").to_string())
    };

    let hex_ident = format!("{:06X}", mm.icao_address());

    let callsign = if !mm.flight.is_empty() {
        mm.flight.clone()
    } else {
        aircraft.flight.clone()
    };

    let altitude = if aircraft.altitude != 0 {
        Some(aircraft.altitude)
    } else {
        None
    };
    let speed = if aircraft.speed != 0 { Some(aircraft.speed) } else { None };
    let track = if aircraft.track != 0 {
        Some(format!("{:.1}", aircraft.track as f64))
    } else {
        None
    };
    let (lat, lon) = aircraft
        .position
        .map(|(lat, lon)| (Some(format!("{:.6}", lat)), Some(format!("{:.6}", lon))))
        .unwrap_or((None, None));
    let vrate = aircraft.vertical_rate;
    let squawk = if aircraft.squawk != 0 {
        Some(format!("{:04}", aircraft.squawk))
    } else {
        None
    };

    let fields = [
        "MSG".to_string(),
        transmission_type.to_string(),
        SESSION_ID.to_string(),
        aircraft.aircraft_id.to_string(),
        hex_ident,
        aircraft.aircraft_id.to_string(), // flight_id: same per-ICAO counter, no persistent flight DB
        date_str.clone(),
        time_str.clone(),
        date_str,
        time_str,
        callsign,
        fmt_opt(altitude),
        fmt_opt(speed),
        fmt_opt(track),
        fmt_opt(lat),
        fmt_opt(lon),
        fmt_opt(vrate),
        fmt_opt(squawk),
        if aircraft.alert { "1" } else { "0" }.to_string(),
        emergency_string(aircraft.squawk).to_string(),
        if aircraft.spi { "1" } else { "0" }.to_string(),
        if aircraft.on_ground { "1" } else { "0" }.to_string(),
    ];

    Some(fields.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_aircraft() -> Aircraft {
        let mut ac = Aircraft::new(0x4840D6, 1);
        ac.flight = "KLM1023".to_string();
        ac.altitude = 38000;
        ac.speed = 490;
        ac.track = 92;
        ac.position = Some((52.2572, 3.9193));
        ac.squawk = 1000;
        ac
    }

    #[test]
    fn test_transmission_type_identification() {
        let mut mm = ModesMessage::default();
        mm.msg_type = 17;
        mm.me_type = 4;
        assert_eq!(transmission_type(&mm), Some(1));
    }

    #[test]
    fn test_transmission_type_surveillance() {
        let mut mm = ModesMessage::default();
        mm.msg_type = 20;
        assert_eq!(transmission_type(&mm), Some(5));
    }

    #[test]
    fn test_transmission_type_unmapped_is_none() {
        let mut mm = ModesMessage::default();
        mm.msg_type = 11;
        assert_eq!(transmission_type(&mm), None);
    }

    #[test]
    fn test_format_line_has_22_fields() {
        let mut mm = ModesMessage::default();
        mm.msg_type = 17;
        mm.me_type = 9;
        mm.aa = [0x48, 0x40, 0xD6];
        let ac = sample_aircraft();
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let line = format_line(&mm, &ac, now, true).unwrap();
        assert_eq!(line.split(',').count(), 22);
        assert!(line.starts_with("MSG,3,1,1,4840D6"));
    }

    #[test]
    fn test_emergency_squawk_strings() {
        assert_eq!(emergency_string(7700), "emergency");
        assert_eq!(emergency_string(1200), "");
    }
}
