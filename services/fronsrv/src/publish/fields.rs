//! Static field tables
//!
//! Each entry pairs the record field name (used as the InfluxDB field key)
//! with its SunSpec point name (used as the MQTT topic leaf).

use sunspec::{InverterMeasurement, MeterMeasurement, StorageReading};

pub struct Field<T> {
    pub name: &'static str,
    pub sunspec: &'static str,
    pub get: fn(&T) -> Option<f64>,
}

macro_rules! fields {
    ($t:ty; $($name:ident => $sunspec:literal),+ $(,)?) => {
        &[$(Field::<$t> {
            name: stringify!($name),
            sunspec: $sunspec,
            get: |m| m.$name,
        }),+]
    };
}

pub static INVERTER_FIELDS: &[Field<InverterMeasurement>] = fields![InverterMeasurement;
    ac_current => "A",
    ac_current_a => "AphA",
    ac_current_b => "AphB",
    ac_current_c => "AphC",
    ac_voltage_ab => "PPVphAB",
    ac_voltage_bc => "PPVphBC",
    ac_voltage_ca => "PPVphCA",
    ac_voltage_an => "PhVphA",
    ac_voltage_bn => "PhVphB",
    ac_voltage_cn => "PhVphC",
    ac_power => "W",
    ac_frequency => "Hz",
    apparent_power => "VA",
    reactive_power => "VAr",
    power_factor => "PF",
    lifetime_energy => "WH",
    dc_current => "DCA",
    dc_voltage => "DCV",
    dc_power => "DCW",
    temp_cabinet => "TmpCab",
    temp_heatsink => "TmpSnk",
    temp_transformer => "TmpTrns",
    temp_other => "TmpOt",
];

pub static METER_FIELDS: &[Field<MeterMeasurement>] = fields![MeterMeasurement;
    current_total => "A",
    current_a => "AphA",
    current_b => "AphB",
    current_c => "AphC",
    voltage_ln_avg => "PhV",
    voltage_an => "PhVphA",
    voltage_bn => "PhVphB",
    voltage_cn => "PhVphC",
    voltage_ll_avg => "PPV",
    voltage_ab => "PPVphAB",
    voltage_bc => "PPVphBC",
    voltage_ca => "PPVphCA",
    frequency => "Hz",
    power_total => "W",
    power_a => "WphA",
    power_b => "WphB",
    power_c => "WphC",
    va_total => "VA",
    va_a => "VAphA",
    va_b => "VAphB",
    va_c => "VAphC",
    var_total => "VAR",
    var_a => "VARphA",
    var_b => "VARphB",
    var_c => "VARphC",
    pf_avg => "PF",
    pf_a => "PFphA",
    pf_b => "PFphB",
    pf_c => "PFphC",
    energy_exported => "TotWhExp",
    energy_exported_a => "TotWhExpPhA",
    energy_exported_b => "TotWhExpPhB",
    energy_exported_c => "TotWhExpPhC",
    energy_imported => "TotWhImp",
    energy_imported_a => "TotWhImpPhA",
    energy_imported_b => "TotWhImpPhB",
    energy_imported_c => "TotWhImpPhC",
];

// Storage mixes scaled values and raw u16 points
pub static STORAGE_FIELDS: &[Field<StorageReading>] = &[
    Field { name: "max_charge_power", sunspec: "WChaMax", get: |s| s.max_charge_power },
    Field { name: "charge_ramp_rate", sunspec: "WChaGra", get: |s| s.charge_ramp_rate },
    Field { name: "discharge_ramp_rate", sunspec: "WDisChaGra", get: |s| s.discharge_ramp_rate },
    Field {
        name: "storage_control_mode",
        sunspec: "StorCtl_Mod",
        get: |s| s.storage_control_mode.map(f64::from),
    },
    Field { name: "max_charge_va", sunspec: "VAChaMax", get: |s| s.max_charge_va },
    Field { name: "min_reserve_pct", sunspec: "MinRsvPct", get: |s| s.min_reserve_pct },
    Field { name: "charge_state_pct", sunspec: "ChaState", get: |s| s.charge_state_pct },
    Field { name: "available_storage_ah", sunspec: "StorAval", get: |s| s.available_storage_ah },
    Field { name: "battery_voltage", sunspec: "InBatV", get: |s| s.battery_voltage },
    Field {
        name: "charge_status_code",
        sunspec: "ChaSt",
        get: |s| s.charge_status_code.map(f64::from),
    },
    Field { name: "discharge_rate_pct", sunspec: "OutWRte", get: |s| s.discharge_rate_pct },
    Field { name: "charge_rate_pct", sunspec: "InWRte", get: |s| s.charge_rate_pct },
    Field {
        name: "rate_window_secs",
        sunspec: "InOutWRte_WinTms",
        get: |s| s.rate_window_secs.map(f64::from),
    },
    Field {
        name: "rate_revert_secs",
        sunspec: "InOutWRte_RvrtTms",
        get: |s| s.rate_revert_secs.map(f64::from),
    },
    Field {
        name: "rate_ramp_secs",
        sunspec: "InOutWRte_RmpTms",
        get: |s| s.rate_ramp_secs.map(f64::from),
    },
    Field {
        name: "grid_charging_code",
        sunspec: "ChaGriSet",
        get: |s| s.grid_charging_code.map(f64::from),
    },
];

/// Present values of `fields`, in table order
pub fn present<'a, T>(
    fields: &'a [Field<T>],
    record: &'a T,
) -> impl Iterator<Item = (&'a Field<T>, f64)> + 'a {
    fields
        .iter()
        .filter_map(move |f| (f.get)(record).map(|value| (f, value)))
}
