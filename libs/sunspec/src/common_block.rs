//! Common model (model 1) at the base address

use crate::error::{require_len, DecodeError, DecodeResult};
use crate::model::SUNSPEC_MARKER;
use crate::scale::u32_from;
use crate::strings::decode_string;
use serde::Serialize;

/// Registers in marker + common model
pub const COMMON_BLOCK_LEN: usize = 69;

/// Identity strings from the common model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommonBlock {
    pub manufacturer: String,
    pub model: String,
    pub options: String,
    pub version: String,
    pub serial_number: String,
    pub device_address: u16,
}

/// Decode the 69-register block read at the SunSpec base address
pub fn decode_common(regs: &[u16]) -> DecodeResult<CommonBlock> {
    require_len(regs, COMMON_BLOCK_LEN)?;

    let marker = u32_from(regs[0], regs[1]);
    if marker != SUNSPEC_MARKER {
        return Err(DecodeError::BadMarker(marker));
    }

    Ok(CommonBlock {
        manufacturer: decode_string(&regs[4..20]),
        model: decode_string(&regs[20..36]),
        options: decode_string(&regs[36..44]),
        version: decode_string(&regs[44..52]),
        serial_number: decode_string(&regs[52..68]),
        device_address: regs[68],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strings::encode_string;

    fn common_regs(manufacturer: &str, model: &str) -> Vec<u16> {
        let mut regs = vec![0x5375, 0x6E53, 1, 65];
        regs.extend(encode_string(manufacturer, 16));
        regs.extend(encode_string(model, 16));
        regs.extend(encode_string("", 8));
        regs.extend(encode_string("1.28.7-1", 8));
        regs.extend(encode_string("34119102", 16));
        regs.push(1);
        regs
    }

    #[test]
    fn test_decode_identity() {
        let regs = common_regs("Fronius", "Symo 10.0-3-M");
        assert_eq!(regs.len(), COMMON_BLOCK_LEN);

        let block = decode_common(&regs).expect("valid block");
        assert_eq!(block.manufacturer, "Fronius");
        assert_eq!(block.model, "Symo 10.0-3-M");
        assert_eq!(block.version, "1.28.7-1");
        assert_eq!(block.serial_number, "34119102");
        assert_eq!(block.device_address, 1);
    }

    #[test]
    fn test_bad_marker() {
        let mut regs = common_regs("Fronius", "Symo");
        regs[1] = 0x0000;
        assert_eq!(decode_common(&regs), Err(DecodeError::BadMarker(0x5375_0000)));
    }

    #[test]
    fn test_short_block() {
        let regs = common_regs("Fronius", "Symo");
        assert!(matches!(
            decode_common(&regs[..40]),
            Err(DecodeError::ShortBlock { needed: 69, actual: 40 })
        ));
    }
}
