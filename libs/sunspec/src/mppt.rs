//! Multiple MPPT extension (model 160)
//!
//! Layout of the 48-register read: header (id, length), four scale factors,
//! a global event bitfield, the module count, a timestamp period and then
//! 20-register module sub-blocks. Only two modules fit the read.

use crate::error::{require_len, DecodeError, DecodeResult};
use crate::model::MODEL_MPPT;
use crate::scale::{acc32, int16, u32_from, unsigned, NOT_IMPLEMENTED_U16};
use serde::Serialize;

const HEADER_LEN: usize = 10;
const MODULE_LEN: usize = 20;
/// Last module offset the decoder reads (Tmp)
const MODULE_USED_LEN: usize = 17;
const MAX_MODULES: usize = 2;

/// One DC input
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MpptModule {
    pub id: u16,
    pub dc_current: Option<f64>,
    pub dc_voltage: Option<f64>,
    pub dc_power: Option<f64>,
    pub dc_energy: Option<f64>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MpptReading {
    pub num_modules: u16,
    pub events: u32,
    pub modules: Vec<MpptModule>,
}

/// Decode the 48-register read; `None` when every module is an unused input
pub fn decode_mppt(r: &[u16]) -> DecodeResult<Option<MpptReading>> {
    require_len(r, HEADER_LEN)?;
    if r[0] != MODEL_MPPT {
        return Err(DecodeError::ModelMismatch {
            expected: MODEL_MPPT,
            found: r[0],
        });
    }

    let (dca_sf, dcv_sf, dcw_sf, dcwh_sf) = (r[2], r[3], r[4], r[5]);
    let num_modules = r[8];

    let mut modules = Vec::new();
    for index in 0..usize::from(num_modules).min(MAX_MODULES) {
        let base = HEADER_LEN + index * MODULE_LEN;
        if r.len() < base + MODULE_USED_LEN {
            break;
        }
        let m = &r[base..];
        // A module without DC voltage is an unused input
        if m[10] == NOT_IMPLEMENTED_U16 {
            continue;
        }
        modules.push(MpptModule {
            id: (index + 1) as u16,
            dc_current: unsigned(m[9], dca_sf),
            dc_voltage: unsigned(m[10], dcv_sf),
            dc_power: unsigned(m[11], dcw_sf),
            dc_energy: acc32(m[12], m[13], dcwh_sf),
            temperature: int16(m[16]).map(f64::from),
        });
    }

    if modules.is_empty() {
        return Ok(None);
    }
    Ok(Some(MpptReading {
        num_modules,
        events: u32_from(r[6], r[7]),
        modules,
    }))
}
