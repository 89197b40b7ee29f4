//! Inverter measurement block (models 101-103 and 111-113)

use crate::error::{require_len, DecodeError, DecodeResult};
use crate::model::{is_float_inverter_model, is_int_inverter_model};
use crate::scale::{acc32, float32, signed, u32_from, uint16, unsigned};
use serde::Serialize;

const INT_BLOCK_LEN: usize = 50;
const FLOAT_BLOCK_LEN: usize = 60;

/// Decoded inverter block; every point is independently optional
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InverterMeasurement {
    pub ac_current: Option<f64>,
    pub ac_current_a: Option<f64>,
    pub ac_current_b: Option<f64>,
    pub ac_current_c: Option<f64>,
    pub ac_voltage_ab: Option<f64>,
    pub ac_voltage_bc: Option<f64>,
    pub ac_voltage_ca: Option<f64>,
    pub ac_voltage_an: Option<f64>,
    pub ac_voltage_bn: Option<f64>,
    pub ac_voltage_cn: Option<f64>,
    pub ac_power: Option<f64>,
    pub ac_frequency: Option<f64>,
    pub apparent_power: Option<f64>,
    pub reactive_power: Option<f64>,
    pub power_factor: Option<f64>,
    pub lifetime_energy: Option<f64>,
    pub dc_current: Option<f64>,
    pub dc_voltage: Option<f64>,
    pub dc_power: Option<f64>,
    pub temp_cabinet: Option<f64>,
    pub temp_heatsink: Option<f64>,
    pub temp_transformer: Option<f64>,
    pub temp_other: Option<f64>,
    pub status_code: Option<u16>,
    pub status_vendor: Option<u16>,
    /// `Evt1`
    pub event_flags: u32,
    /// `Evt2`
    pub event_flags_2: u32,
    /// `EvtVnd1..4`
    pub vendor_event_flags: [u32; 4],
}

/// Decode the block read at the first register after the model header
pub fn decode_inverter(regs: &[u16], model_id: u16) -> DecodeResult<InverterMeasurement> {
    if is_int_inverter_model(model_id) {
        decode_int_sf(regs)
    } else if is_float_inverter_model(model_id) {
        decode_float(regs)
    } else {
        Err(DecodeError::UnsupportedModel(model_id))
    }
}

fn decode_int_sf(r: &[u16]) -> DecodeResult<InverterMeasurement> {
    require_len(r, INT_BLOCK_LEN)?;

    let (a_sf, v_sf, w_sf, hz_sf) = (r[4], r[11], r[13], r[15]);
    let (va_sf, var_sf, pf_sf, wh_sf) = (r[17], r[19], r[21], r[24]);
    let (dca_sf, dcv_sf, dcw_sf, tmp_sf) = (r[26], r[28], r[30], r[35]);

    Ok(InverterMeasurement {
        ac_current: unsigned(r[0], a_sf),
        ac_current_a: unsigned(r[1], a_sf),
        ac_current_b: unsigned(r[2], a_sf),
        ac_current_c: unsigned(r[3], a_sf),
        ac_voltage_ab: unsigned(r[5], v_sf),
        ac_voltage_bc: unsigned(r[6], v_sf),
        ac_voltage_ca: unsigned(r[7], v_sf),
        ac_voltage_an: unsigned(r[8], v_sf),
        ac_voltage_bn: unsigned(r[9], v_sf),
        ac_voltage_cn: unsigned(r[10], v_sf),
        ac_power: signed(r[12], w_sf),
        ac_frequency: unsigned(r[14], hz_sf),
        apparent_power: signed(r[16], va_sf),
        reactive_power: signed(r[18], var_sf),
        power_factor: signed(r[20], pf_sf),
        lifetime_energy: acc32(r[22], r[23], wh_sf),
        dc_current: unsigned(r[25], dca_sf),
        dc_voltage: unsigned(r[27], dcv_sf),
        dc_power: signed(r[29], dcw_sf),
        temp_cabinet: signed(r[31], tmp_sf),
        temp_heatsink: signed(r[32], tmp_sf),
        temp_transformer: signed(r[33], tmp_sf),
        temp_other: signed(r[34], tmp_sf),
        status_code: uint16(r[36]),
        status_vendor: uint16(r[37]),
        event_flags: u32_from(r[38], r[39]),
        event_flags_2: u32_from(r[40], r[41]),
        vendor_event_flags: [
            u32_from(r[42], r[43]),
            u32_from(r[44], r[45]),
            u32_from(r[46], r[47]),
            u32_from(r[48], r[49]),
        ],
    })
}

fn decode_float(r: &[u16]) -> DecodeResult<InverterMeasurement> {
    require_len(r, FLOAT_BLOCK_LEN)?;

    let f = |offset: usize| float32(r[offset], r[offset + 1]);

    Ok(InverterMeasurement {
        ac_current: f(0),
        ac_current_a: f(2),
        ac_current_b: f(4),
        ac_current_c: f(6),
        ac_voltage_ab: f(8),
        ac_voltage_bc: f(10),
        ac_voltage_ca: f(12),
        ac_voltage_an: f(14),
        ac_voltage_bn: f(16),
        ac_voltage_cn: f(18),
        ac_power: f(20),
        ac_frequency: f(22),
        apparent_power: f(24),
        reactive_power: f(26),
        power_factor: f(28),
        lifetime_energy: f(30),
        dc_current: f(32),
        dc_voltage: f(34),
        dc_power: f(36),
        temp_cabinet: f(38),
        temp_heatsink: f(40),
        temp_transformer: f(42),
        temp_other: f(44),
        status_code: uint16(r[46]),
        status_vendor: uint16(r[47]),
        event_flags: u32_from(r[48], r[49]),
        event_flags_2: u32_from(r[50], r[51]),
        vendor_event_flags: [
            u32_from(r[52], r[53]),
            u32_from(r[54], r[55]),
            u32_from(r[56], r[57]),
            u32_from(r[58], r[59]),
        ],
    })
}
