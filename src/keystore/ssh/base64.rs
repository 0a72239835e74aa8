//! Lenient base64 decoder for OpenSSH key payloads
//!
//! Bytes outside the base64 alphabet (including `=` padding and line
//! breaks) are skipped. Valid characters are consumed in groups of four;
//! a group of `n` characters yields `n - 1` bytes, so a short final group
//! produces one or two bytes. Garbage input gives a short result rather
//! than an error; callers validate the decoded structure.

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Character value plus one; zero marks a byte outside the alphabet
const DECODE_TABLE: [u8; 256] = build_table();

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8 + 1;
        i += 1;
    }
    table
}

pub fn decode_base64(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() / 4 * 3 + 2);
    let mut group = [0u8; 4];
    let mut count = 0;

    for &c in input {
        let v = DECODE_TABLE[c as usize];
        if v == 0 {
            continue;
        }
        group[count] = v - 1;
        count += 1;
        if count == 4 {
            flush(&mut out, &group, count);
            count = 0;
        }
    }
    if count > 0 {
        group[count..].fill(0);
        flush(&mut out, &group, count);
    }
    out
}

fn flush(out: &mut Vec<u8>, group: &[u8; 4], count: usize) {
    let bytes = [
        group[0] << 2 | group[1] >> 4,
        group[1] << 4 | group[2] >> 2,
        (group[2] << 6) | group[3],
    ];
    out.extend_from_slice(&bytes[..count - 1]);
}
