//! Write-key derivation.
//!
//! Write commands are authorized by a `key` field: the gateway's current
//! token encrypted with AES-128-CBC under the gateway password and IV, hex
//! encoded. The gateway derives the same value on its side and rejects the
//! write on mismatch.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};

/// Cipher block width. Tokens, passwords and IVs are all one block wide.
pub const BLOCK_LEN: usize = 16;

/// Derive the authorization key for a write command.
///
/// Deterministic: the same `(token, password, iv)` triple always yields the
/// same 32-character lowercase hex string. The token and password are
/// gateway-issued ASCII strings, zero-padded or truncated to one block.
pub fn write_key(token: &str, password: &str, iv: &[u8; BLOCK_LEN]) -> String {
    let key = to_block(password);
    let mut block = to_block(token);
    // CBC over a single block: XOR the IV into the plaintext, then encrypt.
    for (byte, iv_byte) in block.iter_mut().zip(iv) {
        *byte ^= iv_byte;
    }
    let cipher = Aes128::new(&GenericArray::from(key));
    let mut block = GenericArray::from(block);
    cipher.encrypt_block(&mut block);
    hex::encode(block)
}

/// Zero-pad or truncate an ASCII secret to one cipher block.
fn to_block(secret: &str) -> [u8; BLOCK_LEN] {
    let mut block = [0u8; BLOCK_LEN];
    for (slot, byte) in block.iter_mut().zip(secret.bytes()) {
        *slot = byte;
    }
    block
}
