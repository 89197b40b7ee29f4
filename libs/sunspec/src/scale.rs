//! Scale factors and "not implemented" sentinels
//!
//! SunSpec stores physical quantities as integers paired with a signed
//! power-of-ten exponent register. Devices mark unsupported points with
//! reserved raw values, which must surface as `None` rather than as numbers.

/// uint16 "not implemented"
pub const NOT_IMPLEMENTED_U16: u16 = 0xFFFF;
/// int16 "not implemented" (-32768)
pub const NOT_IMPLEMENTED_I16: u16 = 0x8000;
/// acc32 "not accumulated"
pub const NOT_ACCUMULATED_U32: u32 = 0xFFFF_FFFF;
/// sunssf "not implemented"
pub const NOT_IMPLEMENTED_SF: u16 = 0x8000;

/// Combine a big-endian register pair
#[inline]
pub fn u32_from(hi: u16, lo: u16) -> u32 {
    (u32::from(hi) << 16) | u32::from(lo)
}

/// Apply a power-of-ten exponent
///
/// Negative exponents divide so that e.g. `2301 * 10^-1` lands on the
/// nearest double to `230.1` instead of accumulating the error of `0.1`.
#[inline]
pub fn apply_scale(raw: f64, exponent: i32) -> f64 {
    if exponent >= 0 {
        raw * 10f64.powi(exponent)
    } else {
        raw / 10f64.powi(-exponent)
    }
}

/// Read a scale-factor register
#[inline]
pub fn scale_factor(reg: u16) -> Option<i32> {
    if reg == NOT_IMPLEMENTED_SF {
        None
    } else {
        Some(i32::from(reg as i16))
    }
}

/// Unscaled uint16 with sentinel
#[inline]
pub fn uint16(raw: u16) -> Option<u16> {
    (raw != NOT_IMPLEMENTED_U16).then_some(raw)
}

/// Unscaled int16 with sentinel
#[inline]
pub fn int16(raw: u16) -> Option<i16> {
    (raw != NOT_IMPLEMENTED_I16).then_some(raw as i16)
}

/// Scaled uint16 point
pub fn unsigned(raw: u16, sf: u16) -> Option<f64> {
    let value = uint16(raw)?;
    Some(apply_scale(f64::from(value), scale_factor(sf)?))
}

/// Scaled int16 point
pub fn signed(raw: u16, sf: u16) -> Option<f64> {
    let value = int16(raw)?;
    Some(apply_scale(f64::from(value), scale_factor(sf)?))
}

/// Scaled acc32 point spread over two registers
pub fn acc32(hi: u16, lo: u16, sf: u16) -> Option<f64> {
    let value = u32_from(hi, lo);
    if value == NOT_ACCUMULATED_U32 {
        return None;
    }
    Some(apply_scale(f64::from(value), scale_factor(sf)?))
}

/// IEEE-754 float32 point spread over two registers (NaN means absent)
pub fn float32(hi: u16, lo: u16) -> Option<f64> {
    let value = f32::from_bits(u32_from(hi, lo));
    value.is_finite().then_some(f64::from(value))
}
