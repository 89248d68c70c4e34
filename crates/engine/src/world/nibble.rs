//! 4-bit value storage: metadata and light levels are kept two per byte.
//!
//! Element `i` lives in byte `i / 2`; even elements occupy the low nibble.

/// Split every byte into its two nibbles, low nibble first.
pub fn unpack_nibbles(packed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(packed.len() * 2);
    for &byte in packed {
        out.push(byte & 0x0F);
        out.push(byte >> 4);
    }
    out
}

/// Pair consecutive nibbles back into bytes. Values above 15 are masked; a
/// trailing odd element is packed with a zero high nibble.
pub fn pack_nibbles(nibbles: &[u8]) -> Vec<u8> {
    nibbles
        .chunks(2)
        .map(|pair| {
            let low = pair[0] & 0x0F;
            let high = pair.get(1).copied().unwrap_or(0) & 0x0F;
            low | (high << 4)
        })
        .collect()
}

/// A fixed-length array of 4-bit values stored packed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NibbleArray {
    data: Box<[u8]>,
}

impl NibbleArray {
    /// An array holding `len` zero nibbles. `len` must be even.
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0u8; len / 2].into_boxed_slice(),
        }
    }

    /// An array holding `len` copies of `value`.
    pub fn filled(len: usize, value: u8) -> Self {
        let v = value & 0x0F;
        Self {
            data: vec![v | (v << 4); len / 2].into_boxed_slice(),
        }
    }

    /// Wrap already-packed bytes.
    pub fn from_packed(data: Vec<u8>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }

    /// Number of nibbles.
    pub fn len(&self) -> usize {
        self.data.len() * 2
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> u8 {
        let byte = self.data[index >> 1];
        if index & 1 == 0 { byte & 0x0F } else { byte >> 4 }
    }

    #[inline]
    pub fn set(&mut self, index: usize, value: u8) {
        let byte = &mut self.data[index >> 1];
        let v = value & 0x0F;
        if index & 1 == 0 {
            *byte = (*byte & 0xF0) | v;
        } else {
            *byte = (*byte & 0x0F) | (v << 4);
        }
    }

    /// The packed backing bytes.
    pub fn as_packed(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpack_then_pack_is_identity() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        assert_eq!(pack_nibbles(&unpack_nibbles(&bytes)), bytes);
    }

    #[test]
    fn unpack_orders_low_nibble_first() {
        assert_eq!(unpack_nibbles(&[0xA3, 0x0F]), vec![0x3, 0xA, 0xF, 0x0]);
    }

    #[test]
    fn pack_handles_odd_tail() {
        assert_eq!(pack_nibbles(&[1, 2, 3]), vec![0x21, 0x03]);
    }

    #[test]
    fn array_get_set_matches_unpacked_view() {
        let mut arr = NibbleArray::new(8);
        arr.set(0, 5);
        arr.set(1, 9);
        arr.set(6, 15);
        assert_eq!(unpack_nibbles(arr.as_packed()), vec![5, 9, 0, 0, 0, 0, 15, 0]);
        assert_eq!(arr.get(1), 9);
        assert_eq!(arr.get(7), 0);
    }
}
