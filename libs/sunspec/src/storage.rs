//! Basic storage controls (model 124 body)

use crate::error::{require_len, DecodeResult};
use crate::scale::{signed, uint16, unsigned};
use crate::status::{decode_charge_status, ChargeStatus};
use serde::Serialize;

const STORAGE_LEN: usize = 24;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageReading {
    pub max_charge_power: Option<f64>,
    pub charge_ramp_rate: Option<f64>,
    pub discharge_ramp_rate: Option<f64>,
    pub storage_control_mode: Option<u16>,
    pub charge_limit_active: bool,
    pub discharge_limit_active: bool,
    pub max_charge_va: Option<f64>,
    pub min_reserve_pct: Option<f64>,
    pub charge_state_pct: Option<f64>,
    pub available_storage_ah: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub charge_status_code: Option<u16>,
    pub charge_status: Option<ChargeStatus>,
    pub discharge_rate_pct: Option<f64>,
    pub charge_rate_pct: Option<f64>,
    pub rate_window_secs: Option<u16>,
    pub rate_revert_secs: Option<u16>,
    pub rate_ramp_secs: Option<u16>,
    pub grid_charging_code: Option<u16>,
    /// "PV" or "GRID"
    pub grid_charging: Option<&'static str>,
}

/// Decode the 24 registers following the model 124 header
pub fn decode_storage(r: &[u16]) -> DecodeResult<StorageReading> {
    require_len(r, STORAGE_LEN)?;

    let (wcha_sf, gra_sf, va_sf, rsv_sf) = (r[16], r[17], r[18], r[19]);
    let (state_sf, aval_sf, batv_sf, rte_sf) = (r[20], r[21], r[22], r[23]);

    let control_mode = uint16(r[3]);
    let bits = control_mode.unwrap_or(0);
    let charge_status_code = uint16(r[9]);
    let grid_charging_code = uint16(r[15]);

    Ok(StorageReading {
        max_charge_power: unsigned(r[0], wcha_sf),
        charge_ramp_rate: unsigned(r[1], gra_sf),
        discharge_ramp_rate: unsigned(r[2], gra_sf),
        storage_control_mode: control_mode,
        charge_limit_active: bits & 0x01 != 0,
        discharge_limit_active: bits & 0x02 != 0,
        max_charge_va: unsigned(r[4], va_sf),
        min_reserve_pct: unsigned(r[5], rsv_sf),
        charge_state_pct: unsigned(r[6], state_sf),
        available_storage_ah: unsigned(r[7], aval_sf),
        battery_voltage: unsigned(r[8], batv_sf),
        charge_status_code,
        charge_status: charge_status_code.map(decode_charge_status),
        discharge_rate_pct: signed(r[10], rte_sf),
        charge_rate_pct: signed(r[11], rte_sf),
        rate_window_secs: uint16(r[12]),
        rate_revert_secs: uint16(r[13]),
        rate_ramp_secs: uint16(r[14]),
        grid_charging_code,
        grid_charging: grid_charging_code.and_then(|code| match code {
            0 => Some("PV"),
            1 => Some("GRID"),
            _ => None,
        }),
    })
}
