//! Operating state codes

use serde::Serialize;

/// Decoded `St` register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub code: u16,
    pub alarm: bool,
}

/// Inverter operating state
pub fn decode_status(code: u16) -> StatusInfo {
    let (name, description, alarm) = match code {
        1 => ("OFF", "Off", false),
        2 => ("SLEEPING", "Sleeping (auto-shutdown)", false),
        3 => ("STARTING", "Starting up", false),
        4 => ("MPPT", "Normal operation (MPPT)", false),
        5 => ("THROTTLED", "Power reduction active", false),
        6 => ("SHUTTING_DOWN", "Shutting down", false),
        7 => ("FAULT", "One or more faults exist", true),
        8 => ("STANDBY", "Standby", false),
        _ => ("UNKNOWN", "Unknown state", false),
    };
    StatusInfo {
        name,
        description,
        code,
        alarm,
    }
}

/// Whether the state code means the inverter is feeding power
pub fn is_active(code: u16) -> bool {
    matches!(code, 4 | 5)
}

/// Decoded `ChaSt` register of the storage model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChargeStatus {
    pub name: &'static str,
    pub description: &'static str,
    pub code: u16,
}

pub fn decode_charge_status(code: u16) -> ChargeStatus {
    let (name, description) = match code {
        1 => ("OFF", "Off"),
        2 => ("EMPTY", "Empty"),
        3 => ("DISCHARGING", "Discharging"),
        4 => ("CHARGING", "Charging"),
        5 => ("FULL", "Full"),
        6 => ("HOLDING", "Holding"),
        7 => ("TESTING", "Testing"),
        _ => ("UNKNOWN", "Unknown"),
    };
    ChargeStatus {
        name,
        description,
        code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let mppt = decode_status(4);
        assert_eq!(mppt.name, "MPPT");
        assert!(!mppt.alarm);

        let fault = decode_status(7);
        assert_eq!(fault.name, "FAULT");
        assert!(fault.alarm);

        assert_eq!(decode_status(42).name, "UNKNOWN");
        assert_eq!(decode_status(42).code, 42);
    }

    #[test]
    fn test_active_set() {
        assert!(is_active(4));
        assert!(is_active(5));
        for code in [0, 1, 2, 3, 6, 7, 8] {
            assert!(!is_active(code));
        }
    }

    #[test]
    fn test_charge_status() {
        assert_eq!(decode_charge_status(4).name, "CHARGING");
        assert_eq!(decode_charge_status(0).name, "UNKNOWN");
    }
}
