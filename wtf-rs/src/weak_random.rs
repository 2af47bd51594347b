/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/// xorshift128+ generator. Not suitable for anything security related; the
/// point is a cheap and fully reproducible sequence for a given seed.
#[derive(Clone, Debug)]
pub struct WeakRandom {
    seed: u32,
    low: u64,
    high: u64,
}

impl WeakRandom {
    pub const fn next_state(mut x: u64, y: u64) -> u64 {
        x ^= x << 23;
        x ^= x >> 17;
        x ^= y ^ (y >> 26);
        x
    }

    pub fn new(seed: u32) -> Self {
        let mut this = Self {
            seed: 0,
            low: 0,
            high: 0,
        };
        this.set_seed(seed);
        this
    }

    fn advance(&mut self) -> u64 {
        let x = self.low;
        let y = self.high;
        self.low = y;
        self.high = Self::next_state(x, y);
        self.high.wrapping_add(self.low)
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn set_seed(&mut self, seed: u32) {
        self.seed = seed;
        let state = if seed == 0 { 1 } else { seed as u64 };
        self.low = state;
        self.high = state;
        self.advance();
    }

    pub fn get_u32(&mut self) -> u32 {
        self.advance() as u32
    }

    /// Uniform value in `0..limit` without modulo bias.
    pub fn get_u32_with_limit(&mut self, limit: u32) -> u32 {
        if limit <= 1 {
            return 0;
        }
        let cutoff = (u32::MAX as u64 + 1) / limit as u64 * limit as u64;
        loop {
            let value = self.get_u32();
            if (value as u64) < cutoff {
                return value % limit;
            }
        }
    }

    /// Next value that is non-zero and fits in 31 bits.
    pub fn get_nonzero_u31(&mut self) -> u32 {
        loop {
            let value = self.get_u32() & 0x7fff_ffff;
            if value != 0 {
                return value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = WeakRandom::new(1234);
        let mut b = WeakRandom::new(1234);
        for _ in 0..64 {
            assert_eq!(a.get_u32(), b.get_u32());
        }
    }

    #[test]
    fn nonzero_u31_stays_in_range() {
        let mut rng = WeakRandom::new(0);
        for _ in 0..1000 {
            let value = rng.get_nonzero_u31();
            assert!(value != 0 && value <= 0x7fff_ffff);
        }
    }

    #[test]
    fn limit_is_respected() {
        let mut rng = WeakRandom::new(7);
        for _ in 0..1000 {
            assert!(rng.get_u32_with_limit(10) < 10);
        }
    }
}
