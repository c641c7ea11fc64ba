//! A rolling weak checksum over a fixed-size window, used to find
//! candidate block boundaries cheaply before confirming a match with the
//! strong (BLAKE3) hash. Adler-style: two accumulators mod a prime-ish
//! modulus, updated in O(1) as the window slides by one byte.

const MOD_ADLER: u32 = 65521;

#[derive(Debug, Clone)]
pub struct RollingChecksum {
    window: usize,
    a: u32,
    b: u32,
}

impl RollingChecksum {
    pub fn new(window: usize) -> Self {
        Self { window, a: 1, b: 0 }
    }

    /// Computes the checksum of `data` (which must have length `window`)
    /// from scratch.
    pub fn of_window(window: &[u8]) -> u32 {
        let mut rc = RollingChecksum::new(window.len());
        for &byte in window {
            rc.a = (rc.a + byte as u32) % MOD_ADLER;
            rc.b = (rc.b + rc.a) % MOD_ADLER;
        }
        rc.value()
    }

    pub fn value(&self) -> u32 {
        (self.b << 16) | self.a
    }

    /// Slides the window forward by one byte: `leaving` exits at the front,
    /// `entering` enters at the back.
    pub fn roll(&mut self, leaving: u8, entering: u8) {
        self.a = (self.a + MOD_ADLER - leaving as u32 % MOD_ADLER + entering as u32) % MOD_ADLER;
        self.b = (self.b + MOD_ADLER
            - (self.window as u32 * leaving as u32) % MOD_ADLER
            + self.a)
            % MOD_ADLER;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_matches_from_scratch_recompute() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let window = 8;
        let mut rc = RollingChecksum::new(window);
        for &b in &data[0..window] {
            rc.a = (rc.a + b as u32) % MOD_ADLER;
            rc.b = (rc.b + rc.a) % MOD_ADLER;
        }
        assert_eq!(rc.value(), RollingChecksum::of_window(&data[0..window]));

        for i in window..data.len() {
            rc.roll(data[i - window], data[i]);
            let expected = RollingChecksum::of_window(&data[i + 1 - window..i + 1]);
            assert_eq!(rc.value(), expected, "mismatch at position {i}");
        }
    }
}
