//! Decode failures

use errors::BridgeError;
use thiserror::Error;

/// Reasons a register block cannot be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("block too short: need {needed} registers, got {actual}")]
    ShortBlock { needed: usize, actual: usize },

    #[error("missing SunSpec marker (found 0x{0:08X})")]
    BadMarker(u32),

    #[error("model mismatch: expected {expected}, found {found}")]
    ModelMismatch { expected: u16, found: u16 },

    #[error("unsupported model id {0}")]
    UnsupportedModel(u16),

    #[error("invalid register map: {0}")]
    InvalidMap(String),
}

pub type DecodeResult<T> = Result<T, DecodeError>;

impl From<DecodeError> for BridgeError {
    fn from(err: DecodeError) -> Self {
        BridgeError::Decode(err.to_string())
    }
}

/// Fail with [`DecodeError::ShortBlock`] unless `regs` holds at least `needed` words
pub(crate) fn require_len(regs: &[u16], needed: usize) -> DecodeResult<()> {
    if regs.len() < needed {
        return Err(DecodeError::ShortBlock {
            needed,
            actual: regs.len(),
        });
    }
    Ok(())
}
