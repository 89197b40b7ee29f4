//! Event flag decoding
//!
//! `Evt1` carries the standard SunSpec alarm bits. `EvtVnd1..4` carry Fronius
//! state codes, and the bit assignment differs between the classic
//! Symo/Primo/Galvo/Eco line and the GEN24/Tauro line.

use serde::Serialize;

/// Product line, detected from the common-model `Md` string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InverterType {
    SymoGen24,
    PrimoGen24,
    Tauro,
    Symo,
    Primo,
    Galvo,
    Eco,
    #[default]
    Unknown,
}

/// Which vendor event table applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InverterFamily {
    Classic,
    Gen24,
}

impl InverterType {
    pub fn detect(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.contains("gen24") {
            if model.contains("primo") {
                Self::PrimoGen24
            } else {
                Self::SymoGen24
            }
        } else if model.contains("tauro") {
            Self::Tauro
        } else if model.contains("symo") {
            Self::Symo
        } else if model.contains("primo") {
            Self::Primo
        } else if model.contains("galvo") {
            Self::Galvo
        } else if model.contains("eco") {
            Self::Eco
        } else {
            Self::Unknown
        }
    }

    pub fn family(&self) -> InverterFamily {
        match self {
            Self::SymoGen24 | Self::PrimoGen24 | Self::Tauro => InverterFamily::Gen24,
            Self::Symo | Self::Primo | Self::Galvo | Self::Eco | Self::Unknown => {
                InverterFamily::Classic
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SymoGen24 => "symo_gen24",
            Self::PrimoGen24 => "primo_gen24",
            Self::Tauro => "tauro",
            Self::Symo => "symo",
            Self::Primo => "primo",
            Self::Galvo => "galvo",
            Self::Eco => "eco",
            Self::Unknown => "unknown",
        }
    }
}

/// Active events of one class
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub codes: Vec<u16>,
    pub descriptions: Vec<String>,
    pub class: String,
}

/// (vendor register 1..=4, bit, Fronius state code, description, class)
type VendorEntry = (u8, u8, u16, &'static str, &'static str);

const STANDARD_EVENTS: [&str; 16] = [
    "GROUND_FAULT",
    "DC_OVER_VOLT",
    "AC_DISCONNECT",
    "DC_DISCONNECT",
    "GRID_DISCONNECT",
    "CABINET_OPEN",
    "MANUAL_SHUTDOWN",
    "OVER_TEMP",
    "OVER_FREQUENCY",
    "UNDER_FREQUENCY",
    "AC_OVER_VOLT",
    "AC_UNDER_VOLT",
    "BLOWN_STRING_FUSE",
    "UNDER_TEMP",
    "MEMORY_LOSS",
    "HW_TEST_FAILURE",
];

const CLASSIC_EVENTS: &[VendorEntry] = &[
    (1, 0, 102, "AC voltage too high", "grid"),
    (1, 1, 103, "AC voltage too low", "grid"),
    (1, 2, 105, "AC frequency too high", "grid"),
    (1, 3, 106, "AC frequency too low", "grid"),
    (1, 4, 107, "No AC grid detected", "grid"),
    (1, 5, 108, "Islanding detected", "grid"),
    (1, 6, 301, "Overcurrent (AC)", "power_stage"),
    (1, 7, 302, "Overcurrent (DC)", "power_stage"),
    (1, 8, 303, "DC module overtemperature", "power_stage"),
    (1, 9, 304, "AC module overtemperature", "power_stage"),
    (1, 10, 305, "No power fed in despite closed relay", "power_stage"),
    (1, 11, 306, "PV output too low for feeding into the grid", "power_stage"),
    (1, 12, 307, "DC input voltage too low", "power_stage"),
    (1, 13, 308, "Intermediate circuit voltage too high", "power_stage"),
    (1, 14, 309, "DC input voltage MPPT1 too high", "power_stage"),
    (1, 15, 313, "DC input voltage MPPT2 too high", "power_stage"),
    (1, 16, 401, "No communication with power stage set", "internal"),
    (1, 17, 406, "AC module temperature sensor faulty", "internal"),
    (1, 18, 412, "Fixed voltage mode instead of MPP mode", "internal"),
    (1, 19, 415, "Safety cut-out via option card triggered", "internal"),
    (1, 20, 416, "No communication between power stage and control", "internal"),
    (1, 21, 417, "Hardware ID problem", "internal"),
    (1, 22, 419, "Unique ID conflict", "internal"),
    (1, 23, 421, "HID range error", "internal"),
    (1, 24, 425, "No communication with power stage set", "internal"),
    (1, 25, 426, "Possible hardware fault", "internal"),
    (1, 26, 427, "Possible hardware fault", "internal"),
    (1, 27, 431, "Software problem", "internal"),
    (1, 28, 436, "Functional incompatibility", "internal"),
    (1, 29, 437, "Power stage set problem", "internal"),
    (1, 30, 438, "Functional incompatibility", "internal"),
    (1, 31, 443, "Intermediate circuit voltage too low or asymmetric", "internal"),
    (2, 0, 445, "Invalid power stage configuration", "internal"),
    (2, 1, 447, "Insulation fault", "internal"),
    (2, 2, 448, "Neutral conductor not connected", "internal"),
    (2, 3, 450, "Guard cannot be found", "internal"),
    (2, 4, 451, "Memory error detected", "internal"),
    (2, 5, 452, "Communication error between processors", "internal"),
    (2, 6, 453, "Grid voltage and power stage incompatible", "internal"),
    (2, 7, 454, "Grid frequency and power stage incompatible", "internal"),
    (2, 8, 456, "Anti-islanding function fault", "internal"),
    (2, 9, 457, "Grid relay stuck", "internal"),
    (2, 10, 458, "Measuring signal error", "internal"),
    (2, 11, 459, "Insulation test measuring signal error", "internal"),
    (2, 12, 460, "DSP reference voltage out of tolerance", "internal"),
    (2, 13, 461, "DSP data memory fault", "internal"),
    (2, 14, 462, "DC feed-in monitoring error", "internal"),
    (2, 15, 463, "AC polarity reversed", "internal"),
    (2, 16, 474, "RCMU sensor faulty", "internal"),
    (2, 17, 475, "Insulation fault between module and ground", "internal"),
    (2, 18, 476, "Driver supply voltage too low", "internal"),
    (2, 19, 480, "Functional incompatibility", "internal"),
    (2, 20, 481, "Functional incompatibility", "internal"),
    (2, 21, 482, "Setup after initial start-up interrupted", "internal"),
    (2, 22, 483, "Fixed DC voltage outside valid range", "internal"),
    (2, 23, 485, "CAN transmit buffer full", "internal"),
    (2, 24, 489, "Permanent overvoltage on intermediate circuit", "internal"),
    (2, 25, 502, "Insulation error on the solar modules", "warning"),
    (2, 26, 509, "No energy fed in for 24 hours", "warning"),
    (2, 27, 515, "No communication with filter", "warning"),
    (2, 28, 516, "No communication with storage unit", "warning"),
    (2, 29, 517, "Power derating due to high temperature", "warning"),
    (3, 0, 558, "Functional incompatibility", "warning"),
    (3, 1, 559, "Functional incompatibility", "warning"),
    (3, 2, 560, "Power derating caused by overfrequency", "warning"),
    (3, 3, 564, "Functional incompatibility", "warning"),
    (3, 4, 566, "Arc detector switched off", "warning"),
    (3, 5, 567, "Grid voltage dependent power reduction active", "warning"),
];

const GEN24_EVENTS: &[VendorEntry] = &[
    (1, 0, 102, "AC voltage too high", "grid"),
    (1, 1, 103, "AC voltage too low", "grid"),
    (1, 2, 105, "AC frequency too high", "grid"),
    (1, 3, 106, "AC frequency too low", "grid"),
    (1, 4, 107, "No AC grid detected", "grid"),
    (1, 5, 108, "Islanding detected", "grid"),
    (1, 6, 301, "Overcurrent (AC)", "power_stage"),
    (1, 7, 303, "Power module overtemperature", "power_stage"),
    (1, 8, 307, "DC input voltage too low", "power_stage"),
    (1, 9, 309, "DC input voltage MPPT1 too high", "power_stage"),
    (1, 10, 313, "DC input voltage MPPT2 too high", "power_stage"),
    (1, 11, 412, "Fixed voltage mode instead of MPP mode", "internal"),
    (1, 12, 447, "Insulation fault", "internal"),
    (1, 13, 457, "Grid relay stuck", "internal"),
    (1, 14, 463, "AC polarity reversed", "internal"),
    (1, 15, 474, "RCMU sensor faulty", "internal"),
    (2, 0, 502, "Insulation error on the solar modules", "warning"),
    (2, 1, 509, "No energy fed in for 24 hours", "warning"),
    (2, 2, 516, "No communication with storage unit", "warning"),
    (2, 3, 517, "Power derating due to high temperature", "warning"),
    (2, 4, 560, "Power derating caused by overfrequency", "warning"),
    (2, 5, 567, "Grid voltage dependent power reduction active", "warning"),
];

/// Standard `Evt1` bits as a single "sunspec" record, codes are bit positions
pub fn decode_standard_events(evt1: u32) -> Option<EventRecord> {
    let mut codes = Vec::new();
    let mut descriptions = Vec::new();
    for (bit, name) in STANDARD_EVENTS.iter().enumerate() {
        if evt1 & (1 << bit) != 0 {
            codes.push(bit as u16);
            descriptions.push((*name).to_string());
        }
    }
    (!codes.is_empty()).then(|| EventRecord {
        codes,
        descriptions,
        class: "sunspec".to_string(),
    })
}

/// Vendor bitmasks `EvtVnd1..` (up to four) into records grouped by class
///
/// Classes appear in the order their first active bit is found. Bits without a
/// table entry are ignored.
pub fn decode_vendor_events(flags: &[u32], family: InverterFamily) -> Vec<EventRecord> {
    let table = match family {
        InverterFamily::Classic => CLASSIC_EVENTS,
        InverterFamily::Gen24 => GEN24_EVENTS,
    };

    let mut records: Vec<EventRecord> = Vec::new();
    for &(register, bit, code, description, class) in table {
        let Some(mask) = flags.get(usize::from(register) - 1) else {
            continue;
        };
        if mask & (1u32 << bit) == 0 {
            continue;
        }
        match records.iter_mut().find(|r| r.class == class) {
            Some(record) => {
                record.codes.push(code);
                record.descriptions.push(description.to_string());
            },
            None => records.push(EventRecord {
                codes: vec![code],
                descriptions: vec![description.to_string()],
                class: class.to_string(),
            }),
        }
    }
    records
}

/// Standard and vendor events of one inverter reading
pub fn decode_events(evt1: u32, vendor: &[u32], family: InverterFamily) -> Vec<EventRecord> {
    let mut events: Vec<EventRecord> = decode_standard_events(evt1).into_iter().collect();
    events.extend(decode_vendor_events(vendor, family));
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_inverter_type() {
        assert_eq!(InverterType::detect("Symo 10.0-3-M"), InverterType::Symo);
        assert_eq!(InverterType::detect("Symo GEN24 10.0 Plus"), InverterType::SymoGen24);
        assert_eq!(InverterType::detect("Primo GEN24 5.0"), InverterType::PrimoGen24);
        assert_eq!(InverterType::detect("Tauro 50-3-D"), InverterType::Tauro);
        assert_eq!(InverterType::detect("Galvo 3.1-1"), InverterType::Galvo);
        assert_eq!(InverterType::detect("Eco 27.0-3-S"), InverterType::Eco);
        assert_eq!(InverterType::detect("Smart Meter 63A"), InverterType::Unknown);
    }

    #[test]
    fn test_family() {
        assert_eq!(InverterType::Tauro.family(), InverterFamily::Gen24);
        assert_eq!(InverterType::Primo.family(), InverterFamily::Classic);
        assert_eq!(InverterType::Unknown.family(), InverterFamily::Classic);
    }

    #[test]
    fn test_no_flags_no_records() {
        assert!(decode_events(0, &[0, 0, 0, 0], InverterFamily::Classic).is_empty());
        assert!(decode_vendor_events(&[], InverterFamily::Gen24).is_empty());
    }

    #[test]
    fn test_standard_events() {
        let record = decode_standard_events((1 << 0) | (1 << 7)).expect("two bits set");
        assert_eq!(record.codes, vec![0, 7]);
        assert_eq!(record.descriptions, vec!["GROUND_FAULT", "OVER_TEMP"]);
        assert_eq!(record.class, "sunspec");
    }

    #[test]
    fn test_vendor_events_grouped_by_class() {
        // grid: 102, 107; warning: 509 (EvtVnd2 bit 26)
        let flags = [(1 << 0) | (1 << 4), 1 << 26];
        let records = decode_vendor_events(&flags, InverterFamily::Classic);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].class, "grid");
        assert_eq!(records[0].codes, vec![102, 107]);
        assert_eq!(records[1].class, "warning");
        assert_eq!(records[1].codes, vec![509]);
    }

    #[test]
    fn test_families_reuse_bit_positions() {
        let flags = [1 << 7];
        let classic = decode_vendor_events(&flags, InverterFamily::Classic);
        let gen24 = decode_vendor_events(&flags, InverterFamily::Gen24);
        assert_eq!(classic[0].codes, vec![302]);
        assert_eq!(gen24[0].codes, vec![303]);
    }

    #[test]
    fn test_missing_registers_ignored() {
        // Only EvtVnd1 supplied, EvtVnd3 entries must not panic
        let records = decode_vendor_events(&[1 << 1], InverterFamily::Classic);
        assert_eq!(records[0].codes, vec![103]);
    }
}
