//! Meter measurement block (models 201-204)

use crate::error::{require_len, DecodeResult};
use crate::scale::{acc32, signed};
use serde::Serialize;

const METER_BLOCK_LEN: usize = 53;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeterMeasurement {
    pub current_total: Option<f64>,
    pub current_a: Option<f64>,
    pub current_b: Option<f64>,
    pub current_c: Option<f64>,
    pub voltage_ln_avg: Option<f64>,
    pub voltage_an: Option<f64>,
    pub voltage_bn: Option<f64>,
    pub voltage_cn: Option<f64>,
    pub voltage_ll_avg: Option<f64>,
    pub voltage_ab: Option<f64>,
    pub voltage_bc: Option<f64>,
    pub voltage_ca: Option<f64>,
    pub frequency: Option<f64>,
    pub power_total: Option<f64>,
    pub power_a: Option<f64>,
    pub power_b: Option<f64>,
    pub power_c: Option<f64>,
    pub va_total: Option<f64>,
    pub va_a: Option<f64>,
    pub va_b: Option<f64>,
    pub va_c: Option<f64>,
    pub var_total: Option<f64>,
    pub var_a: Option<f64>,
    pub var_b: Option<f64>,
    pub var_c: Option<f64>,
    pub pf_avg: Option<f64>,
    pub pf_a: Option<f64>,
    pub pf_b: Option<f64>,
    pub pf_c: Option<f64>,
    pub energy_exported: Option<f64>,
    pub energy_exported_a: Option<f64>,
    pub energy_exported_b: Option<f64>,
    pub energy_exported_c: Option<f64>,
    pub energy_imported: Option<f64>,
    pub energy_imported_a: Option<f64>,
    pub energy_imported_b: Option<f64>,
    pub energy_imported_c: Option<f64>,
}

/// Decode the 53-register body following the meter model header
///
/// All instantaneous points are int16; power is negative when exporting.
pub fn decode_meter(r: &[u16]) -> DecodeResult<MeterMeasurement> {
    require_len(r, METER_BLOCK_LEN)?;

    let (a_sf, v_sf, hz_sf, w_sf) = (r[4], r[13], r[15], r[20]);
    let (va_sf, var_sf, pf_sf, wh_sf) = (r[25], r[30], r[35], r[52]);
    let energy = |offset: usize| acc32(r[offset], r[offset + 1], wh_sf);

    Ok(MeterMeasurement {
        current_total: signed(r[0], a_sf),
        current_a: signed(r[1], a_sf),
        current_b: signed(r[2], a_sf),
        current_c: signed(r[3], a_sf),
        voltage_ln_avg: signed(r[5], v_sf),
        voltage_an: signed(r[6], v_sf),
        voltage_bn: signed(r[7], v_sf),
        voltage_cn: signed(r[8], v_sf),
        voltage_ll_avg: signed(r[9], v_sf),
        voltage_ab: signed(r[10], v_sf),
        voltage_bc: signed(r[11], v_sf),
        voltage_ca: signed(r[12], v_sf),
        frequency: signed(r[14], hz_sf),
        power_total: signed(r[16], w_sf),
        power_a: signed(r[17], w_sf),
        power_b: signed(r[18], w_sf),
        power_c: signed(r[19], w_sf),
        va_total: signed(r[21], va_sf),
        va_a: signed(r[22], va_sf),
        va_b: signed(r[23], va_sf),
        va_c: signed(r[24], va_sf),
        var_total: signed(r[26], var_sf),
        var_a: signed(r[27], var_sf),
        var_b: signed(r[28], var_sf),
        var_c: signed(r[29], var_sf),
        pf_avg: signed(r[31], pf_sf),
        pf_a: signed(r[32], pf_sf),
        pf_b: signed(r[33], pf_sf),
        pf_c: signed(r[34], pf_sf),
        energy_exported: energy(36),
        energy_exported_a: energy(38),
        energy_exported_b: energy(40),
        energy_exported_c: energy(42),
        energy_imported: energy(44),
        energy_imported_a: energy(46),
        energy_imported_b: energy(48),
        energy_imported_c: energy(50),
    })
}
