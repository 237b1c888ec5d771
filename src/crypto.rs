// MIT License - Copyright (c) 2026 Peter Wright
// Frame checksum and the XOR cipher used on status, light and button frames

use crate::constants::{CIPHER_KEYS, KEY_OFFSET};
use crate::protocol::Frame;
use tracing::trace;

const CRC_POLY: u8 = 0x07;
const CRC_SEED: u8 = 0x02;
const CRC_XOR_OUT: u8 = 0x02;
/// Seed of the augmented bit-serial form; reduces to `CRC_SEED` after 8 zero bits.
const SERIAL_SEED: u8 = 0xB5;

const fn build_crc_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ CRC_POLY } else { crc << 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u8; 256] = build_crc_table();

/// Checksum over `[length] ++ type ++ payload` (everything between the
/// leading sentinel and the checksum byte).
pub fn checksum(data: &[u8]) -> u8 {
    let crc = data
        .iter()
        .fold(CRC_SEED, |crc, &b| CRC_TABLE[(crc ^ b) as usize]);
    crc ^ CRC_XOR_OUT
}

/// Bit-serial form of [`checksum`], as the panel firmware computes it.
///
/// Shifts each input bit in MSB-first, then flushes the register with
/// eight zero bits. Always equal to [`checksum`].
pub fn serial_checksum(data: &[u8]) -> u8 {
    let mut reg = SERIAL_SEED;
    let mut shift = |bit: u8| {
        let feedback = reg & 0x80 != 0;
        reg = (reg << 1) | bit;
        if feedback {
            reg ^= CRC_POLY;
        }
    };
    for &byte in data {
        for i in (0..8).rev() {
            shift((byte >> i) & 1);
        }
    }
    for _ in 0..8 {
        shift(0);
    }
    reg ^ CRC_XOR_OUT
}

/// First-key constant for an enciphered type, `None` for plaintext types.
pub fn cipher_key(kind: [u8; 3]) -> Option<u8> {
    CIPHER_KEYS
        .iter()
        .find(|(t, _)| *t == kind)
        .map(|(_, key)| *key)
}

pub fn is_enciphered(kind: [u8; 3]) -> bool {
    cipher_key(kind).is_some()
}

/// Apply the XOR transform in place. Encrypting and decrypting are the
/// same operation.
///
/// The key byte at offset 5 is folded into the first key and then zeroed;
/// the checksum is recomputed afterwards. Returns false (frame untouched)
/// for plaintext types and for frames too short to carry a key byte.
pub fn transform(frame: &mut Frame) -> bool {
    let Some(base) = cipher_key(frame.kind()) else {
        return false;
    };
    let end = frame.checksum_index();
    if end <= KEY_OFFSET {
        return false;
    }

    let bytes = frame.bytes_mut();
    let key1 = base ^ bytes[KEY_OFFSET];
    let count = end - (KEY_OFFSET + 1);
    let mut key2 = (count as u8).wrapping_sub(1);
    for b in &mut bytes[KEY_OFFSET + 1..end] {
        key2 = key2.wrapping_sub(1) & 0x3F;
        *b ^= key1 ^ key2;
    }
    bytes[KEY_OFFSET] = 0;
    frame.refresh_checksum();
    true
}

/// Decrypt an inbound frame. Plaintext types pass through unchanged.
pub fn decrypt(mut frame: Frame) -> Frame {
    if transform(&mut frame) {
        trace!("Decrypted frame {frame}");
    }
    frame
}

/// Make an outbound template wire-ready.
///
/// Enciphered types get a zero key byte inserted ahead of the payload
/// before the transform; every other type is sent as-is.
pub fn encrypt(frame: &Frame) -> Frame {
    let mut out = frame.clone();
    if is_enciphered(out.kind()) {
        out.insert_payload_byte(0);
        transform(&mut out);
    }
    out
}
