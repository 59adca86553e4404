//! VNC challenge-response authentication (RFC 6143 §7.2.2).
//!
//! The password keys a single-DES cipher and the 16-byte challenge is
//! encrypted as two independent blocks. Passwords shorter than 8 bytes are
//! zero-padded, longer ones truncated. VNC keys the cipher with every
//! password byte bit-reversed.

use des::Des;
use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use shared::protocol::CHALLENGE_SIZE;

const KEY_SIZE: usize = 8;
const BLOCK_SIZE: usize = 8;

/// Compute the response a client holding `password` must return for
/// `challenge`.
pub fn encrypt_challenge(password: &str, challenge: &[u8; CHALLENGE_SIZE]) -> [u8; CHALLENGE_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    for (slot, byte) in key.iter_mut().zip(password.bytes()) {
        *slot = byte.reverse_bits();
    }

    let cipher = Des::new(&key.into());

    let mut response = *challenge;
    for block in response.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }

    response
}
