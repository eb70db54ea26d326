//! Initial sequence numbers after rfc6528.
//!
//! The four tuple is hashed with SipHash-2-4 under a secret key and offset by a clock that ticks
//! every 4µs. SipHash is described in:
//!
//! > SipHash: a fast short-input PRF, Jean-Philippe Aumasson and Daniel J. Bernstein
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};

use super::FourTuple;
use crate::time::Instant;
use crate::wire::{IpAddress, TcpSeqNumber};

/// Derives initial sequence numbers from a secret key.
pub struct IsnGenerator {
    k0: u64,
    k1: u64,
}

impl IsnGenerator {
    /// A generator with a fixed key.
    pub fn new(k0: u64, k1: u64) -> Self {
        IsnGenerator { k0, k1 }
    }

    /// A generator keyed from the per-process random source of the standard library.
    pub fn from_entropy() -> Self {
        let random = RandomState::new();
        let key = |salt: u8| {
            let mut hasher = random.build_hasher();
            hasher.write_u8(salt);
            hasher.finish()
        };
        IsnGenerator::new(key(0), key(1))
    }

    /// The initial sequence number of a connection starting at `now`.
    ///
    /// Numbers of one tuple advance by 250 per millisecond. Different tuples or keys give
    /// unrelated numbers.
    pub fn get_isn(&self, connection: &FourTuple, now: Instant) -> TcpSeqNumber {
        let mut hasher = Sip24::new(self.k0, self.k1);
        hasher.write(address_bytes(&connection.local));
        hasher.write(address_bytes(&connection.remote));
        hasher.write_u16(connection.local_port.to_be());
        hasher.write_u16(connection.remote_port.to_be());

        let offset = hasher.finish() as u32;
        let clock = (now.total_millis() as u32).wrapping_mul(250);
        TcpSeqNumber::from(offset.wrapping_add(clock))
    }
}

fn address_bytes(address: &IpAddress) -> &[u8] {
    match address {
        IpAddress::Unspecified => &[0; 4],
        other => other.as_bytes(),
    }
}

/// SipHash-2-4 over a byte stream.
#[derive(Clone)]
struct Sip24 {
    v: [u64; 4],
    /// Bytes not yet forming a full word, little endian.
    tail: u64,
    length: usize,
}

impl Sip24 {
    /// "somepseudorandomlygeneratedbytes"
    const INIT: [u64; 4] = [
        0x736f_6d65_7073_6575,
        0x646f_7261_6e64_6f6d,
        0x6c79_6765_6e65_7261,
        0x7465_6462_7974_6573,
    ];

    fn new(k0: u64, k1: u64) -> Self {
        let [a, b, c, d] = Self::INIT;
        Sip24 {
            v: [a ^ k0, b ^ k1, c ^ k0, d ^ k1],
            tail: 0,
            length: 0,
        }
    }

    fn rounds(&mut self, count: usize) {
        let v = &mut self.v;
        for _ in 0..count {
            v[0] = v[0].wrapping_add(v[1]);
            v[1] = v[1].rotate_left(13) ^ v[0];
            v[0] = v[0].rotate_left(32);
            v[2] = v[2].wrapping_add(v[3]);
            v[3] = v[3].rotate_left(16) ^ v[2];
            v[0] = v[0].wrapping_add(v[3]);
            v[3] = v[3].rotate_left(21) ^ v[0];
            v[2] = v[2].wrapping_add(v[1]);
            v[1] = v[1].rotate_left(17) ^ v[2];
            v[2] = v[2].rotate_left(32);
        }
    }

    fn compress(&mut self, word: u64) {
        self.v[3] ^= word;
        self.rounds(2);
        self.v[0] ^= word;
    }
}

impl Hasher for Sip24 {
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let shift = 8 * (self.length % 8);
            self.tail |= u64::from(byte) << shift;
            self.length += 1;
            if self.length % 8 == 0 {
                let word = self.tail;
                self.compress(word);
                self.tail = 0;
            }
        }
    }

    fn finish(&self) -> u64 {
        let mut last = self.clone();
        // The final word carries the message length in its top byte.
        last.compress(self.tail | (self.length as u64) << 56);
        last.v[2] ^= 0xff;
        last.rounds(4);
        last.v.iter().fold(0, |hash, v| hash ^ v)
    }
}
