//! Unsigned LEB128, the encoding of nat leaves (certified time, reject
//! codes) inside the hash tree.

use crate::error::{CertificateError, Result};

/// Encode a value as unsigned LEB128.
pub fn encode(mut value: u128) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Decode an unsigned LEB128 value occupying the whole input.
pub fn decode(bytes: &[u8]) -> Result<u128> {
    let mut value: u128 = 0;
    let mut shift = 0u32;
    for (i, byte) in bytes.iter().enumerate() {
        if shift >= 128 {
            return Err(CertificateError::malformed("leb128 value overflows u128"));
        }
        value |= u128::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            if i + 1 != bytes.len() {
                return Err(CertificateError::malformed("trailing bytes after leb128 value"));
            }
            return Ok(value);
        }
        shift += 7;
    }
    Err(CertificateError::malformed("truncated leb128 value"))
}
