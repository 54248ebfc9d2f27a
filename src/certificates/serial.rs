use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use x509_cert::serial_number::SerialNumber;

/// Hands out serial numbers that never repeat under one issuer.
///
/// Each serial is a leading 0x01 (keeping the DER integer positive and
/// minimally encoded), a 64-bit counter seeded from the clock at startup,
/// and 64 random bits.
#[derive(Debug)]
pub struct SerialGenerator {
    counter: AtomicU64,
}

impl SerialGenerator {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        SerialGenerator {
            counter: AtomicU64::new(seed),
        }
    }

    pub fn next_serial(&self) -> der::Result<SerialNumber> {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);

        let mut serial = [0u8; 17];
        serial[0] = 0x01;
        serial[1..9].copy_from_slice(&count.to_be_bytes());
        rand::thread_rng().fill_bytes(&mut serial[9..]);

        SerialNumber::new(&serial)
    }
}

impl Default for SerialGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// A standalone random serial, for self-signed identities.
pub fn random_serial() -> der::Result<SerialNumber> {
    let mut serial = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut serial);
    // Positive, and without a leading zero octet.
    serial[0] = (serial[0] & 0x7f) | 0x40;
    SerialNumber::new(&serial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn serials_never_repeat() {
        let generator = SerialGenerator::new();
        let serials: HashSet<Vec<u8>> = (0..10_000)
            .map(|_| generator.next_serial().unwrap().as_bytes().to_vec())
            .collect();
        assert_eq!(serials.len(), 10_000);
    }

    #[test]
    fn serials_are_positive() {
        let serial = SerialGenerator::new().next_serial().unwrap();
        assert_eq!(serial.as_bytes()[0], 0x01);
        assert!(random_serial().unwrap().as_bytes()[0] < 0x80);
    }
}
