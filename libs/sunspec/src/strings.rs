//! Packed ASCII strings

/// Decode a run of registers holding two ASCII characters each (high byte first)
///
/// Non-ASCII bytes are dropped and trailing NUL/space padding is removed.
pub fn decode_string(regs: &[u16]) -> String {
    let bytes: Vec<u8> = regs
        .iter()
        .flat_map(|r| r.to_be_bytes())
        .filter(u8::is_ascii)
        .collect();

    String::from_utf8_lossy(&bytes)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

/// Pack text into registers, NUL padded to `len` registers (simulators and tests)
pub fn encode_string(text: &str, len: usize) -> Vec<u16> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(len * 2, 0);
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}
