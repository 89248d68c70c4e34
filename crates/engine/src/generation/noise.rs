//! Seeded 2D value noise.
//!
//! Every `ValueNoise` owns its permutation table, so two generations running
//! with different seeds at the same time never share state.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const TABLE_SIZE: usize = 256;

/// Lattice value noise over a seeded permutation table.
pub struct ValueNoise {
    /// Doubled so `perm[perm[x] + z]` never needs wrapping.
    perm: [u8; TABLE_SIZE * 2],
    values: [f64; TABLE_SIZE],
}

impl ValueNoise {
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut base: [u8; TABLE_SIZE] = std::array::from_fn(|i| i as u8);
        base.shuffle(&mut rng);

        let mut perm = [0u8; TABLE_SIZE * 2];
        perm[..TABLE_SIZE].copy_from_slice(&base);
        perm[TABLE_SIZE..].copy_from_slice(&base);

        let values = std::array::from_fn(|_| rng.gen_range(-1.0..=1.0));
        Self { perm, values }
    }

    #[inline]
    fn lattice(&self, x: i64, z: i64) -> f64 {
        let xi = (x & 0xFF) as usize;
        let zi = (z & 0xFF) as usize;
        let hash = self.perm[self.perm[xi] as usize + zi];
        self.values[hash as usize]
    }

    /// Noise at a point, in [-1, 1]. Smooth between integer lattice points.
    pub fn sample(&self, x: f64, z: f64) -> f64 {
        let x0 = x.floor();
        let z0 = z.floor();
        let tx = smoothstep(x - x0);
        let tz = smoothstep(z - z0);
        let (xi, zi) = (x0 as i64, z0 as i64);

        let a = self.lattice(xi, zi);
        let b = self.lattice(xi + 1, zi);
        let c = self.lattice(xi, zi + 1);
        let d = self.lattice(xi + 1, zi + 1);

        lerp(lerp(a, b, tx), lerp(c, d, tx), tz)
    }

    /// Fractal sum of `octaves` samples, halving amplitude and doubling
    /// frequency each octave. Normalised back into [-1, 1].
    pub fn fractal(&self, x: f64, z: f64, octaves: u32, base_frequency: f64) -> f64 {
        let mut total = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = base_frequency;
        let mut max = 0.0;
        for _ in 0..octaves {
            total += self.sample(x * frequency, z * frequency) * amplitude;
            max += amplitude;
            amplitude *= 0.5;
            frequency *= 2.0;
        }
        if max > 0.0 { total / max } else { 0.0 }
    }
}

#[inline]
fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

#[inline]
fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_field() {
        let a = ValueNoise::new(7);
        let b = ValueNoise::new(7);
        for i in 0..64 {
            let (x, z) = (i as f64 * 3.7, i as f64 * -1.3);
            assert_eq!(a.fractal(x, z, 4, 0.01), b.fractal(x, z, 4, 0.01));
        }
    }

    #[test]
    fn different_seeds_differ() {
        let a = ValueNoise::new(1);
        let b = ValueNoise::new(2);
        let differs = (0..64).any(|i| a.sample(i as f64 + 0.5, 0.5) != b.sample(i as f64 + 0.5, 0.5));
        assert!(differs);
    }

    #[test]
    fn output_stays_in_range_and_hits_lattice() {
        let n = ValueNoise::new(42);
        for i in -200..200 {
            let v = n.fractal(i as f64 * 0.77, i as f64 * 1.31, 4, 0.05);
            assert!((-1.0..=1.0).contains(&v), "{v}");
        }
        assert_eq!(n.sample(3.0, 5.0), n.lattice(3, 5));
    }
}
