//! Immediate controls (model 123), read-only view

use crate::error::{require_len, DecodeError, DecodeResult};
use crate::model::MODEL_CONTROLS;
use crate::scale::{apply_scale, scale_factor, signed, uint16, unsigned, NOT_IMPLEMENTED_I16};
use serde::Serialize;

const CONTROLS_LEN: usize = 26;

/// Exponent for PF setpoints reported with four decimals
const PF_HIGH_PRECISION_SF: i32 = -4;
/// Exponent for legacy firmware that reports SF 0 for a two-decimal PF
const PF_LEGACY_SF: i32 = -2;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImmediateControls {
    pub conn_win_tms: Option<u16>,
    pub conn_rvrt_tms: Option<u16>,
    pub connected: bool,
    pub power_limit_pct: Option<f64>,
    pub power_limit_win_tms: Option<u16>,
    pub power_limit_rvrt_tms: Option<u16>,
    pub power_limit_rmp_tms: Option<u16>,
    pub power_limit_enabled: bool,
    pub power_factor: Option<f64>,
    pub pf_win_tms: Option<u16>,
    pub pf_rvrt_tms: Option<u16>,
    pub pf_rmp_tms: Option<u16>,
    pub power_factor_enabled: bool,
    pub var_wmax_pct: Option<f64>,
    pub var_max_pct: Option<f64>,
    pub var_aval_pct: Option<f64>,
    pub var_win_tms: Option<u16>,
    pub var_rvrt_tms: Option<u16>,
    pub var_rmp_tms: Option<u16>,
    pub var_mode: Option<u16>,
    pub var_enabled: bool,
}

/// Decode the 26 registers starting at the model 123 id register
pub fn decode_controls(r: &[u16]) -> DecodeResult<ImmediateControls> {
    require_len(r, CONTROLS_LEN)?;
    if r[0] != MODEL_CONTROLS {
        return Err(DecodeError::ModelMismatch {
            expected: MODEL_CONTROLS,
            found: r[0],
        });
    }

    let (wmax_sf, pf_sf, var_sf) = (r[23], r[24], r[25]);

    Ok(ImmediateControls {
        conn_win_tms: uint16(r[2]),
        conn_rvrt_tms: uint16(r[3]),
        connected: r[4] == 1,
        power_limit_pct: unsigned(r[5], wmax_sf),
        power_limit_win_tms: uint16(r[6]),
        power_limit_rvrt_tms: uint16(r[7]),
        power_limit_rmp_tms: uint16(r[8]),
        power_limit_enabled: r[9] == 1,
        power_factor: power_factor(r[10], pf_sf),
        pf_win_tms: uint16(r[11]),
        pf_rvrt_tms: uint16(r[12]),
        pf_rmp_tms: uint16(r[13]),
        power_factor_enabled: r[14] == 1,
        var_wmax_pct: signed(r[15], var_sf),
        var_max_pct: signed(r[16], var_sf),
        var_aval_pct: signed(r[17], var_sf),
        var_win_tms: uint16(r[18]),
        var_rvrt_tms: uint16(r[19]),
        var_rmp_tms: uint16(r[20]),
        var_mode: uint16(r[21]),
        var_enabled: r[22] == 1,
    })
}

/// `OutPFSet` with the precision correction
///
/// Two firmware lines share the SF register but encode PF differently: a
/// magnitude above 100 can only be the four-decimal encoding, and a stored
/// SF of 0 means the two-decimal encoding with a wrong SF.
pub fn power_factor(raw: u16, sf_reg: u16) -> Option<f64> {
    if raw == 0xFFFF || raw == NOT_IMPLEMENTED_I16 {
        return None;
    }
    let value = raw as i16;
    let exponent = if value.unsigned_abs() > 100 {
        PF_HIGH_PRECISION_SF
    } else {
        match scale_factor(sf_reg)? {
            0 => PF_LEGACY_SF,
            sf => sf,
        }
    };
    Some(apply_scale(f64::from(value), exponent))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> Vec<u16> {
        let mut r = vec![0u16; CONTROLS_LEN];
        r[0] = 123;
        r[1] = 24;
        r[4] = 1; // connected
        r[5] = 10000; // 100.00 %
        r[9] = 0;
        r[10] = 95;
        r[14] = 1;
        r[15] = (-2500i16) as u16;
        r[21] = 2;
        r[23] = (-2i16) as u16;
        r[24] = (-2i16) as u16;
        r[25] = (-2i16) as u16;
        r
    }

    #[test]
    fn test_decode_controls() {
        let c = decode_controls(&block()).expect("decodes");
        assert!(c.connected);
        assert_eq!(c.power_limit_pct, Some(100.0));
        assert!(!c.power_limit_enabled);
        assert_eq!(c.power_factor, Some(0.95));
        assert!(c.power_factor_enabled);
        assert_eq!(c.var_wmax_pct, Some(-25.0));
        assert_eq!(c.var_mode, Some(2));
    }

    #[test]
    fn test_pf_high_precision_ignores_sf() {
        // 0.9500 encoded with four decimals, SF register still says -2
        assert_eq!(power_factor(9500, (-2i16) as u16), Some(0.95));
        assert_eq!(power_factor((-9800i16) as u16, 0), Some(-0.98));
    }

    #[test]
    fn test_pf_zero_sf_means_two_decimals() {
        assert_eq!(power_factor(100, 0), Some(1.0));
        assert_eq!(power_factor(85, 0), Some(0.85));
    }

    #[test]
    fn test_pf_regular_sf() {
        assert_eq!(power_factor(9, (-1i16) as u16), Some(0.9));
    }

    #[test]
    fn test_pf_sentinels() {
        assert_eq!(power_factor(0xFFFF, 0), None);
        assert_eq!(power_factor(0x8000, (-2i16) as u16), None);
    }

    #[test]
    fn test_model_mismatch() {
        let mut r = block();
        r[0] = 7;
        assert!(matches!(
            decode_controls(&r),
            Err(DecodeError::ModelMismatch { expected: 123, found: 7 })
        ));
    }
}
