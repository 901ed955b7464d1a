//! Polynomial arithmetic over GF(2).
//!
//! Every constant the loop synthesiser needs (fold multipliers, Barrett
//! reduction constants) is a power of `x` reduced modulo the chosen CRC
//! polynomial. This module computes those powers directly rather than
//! going through a general-purpose `p32` type, since the generator only
//! ever needs `x^n mod P` and `x^n div P` for a single fixed `P` per run.
//!
//! A polynomial here is always in *reversed* form: the lowest-order
//! coefficient sits in the MSB of the word and the `x^32` term is
//! implicit. See [`Polynomial`] and [`reverse32`].

use std::fmt;

/// A 32-bit CRC polynomial, reversed (bit-reflected) form.
///
/// The `x^32` coefficient is implicit; the remaining 32 coefficients are
/// packed into the word with the lowest-order term in the most
/// significant bit.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Polynomial(pub u32);

impl fmt::Debug for Polynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Polynomial(0x{:08x})", self.0)
    }
}

impl Polynomial {
    /// `x^n mod P`, computed in O(log n) time.
    ///
    /// The first 32 doublings are absorbed into a loop of single-bit
    /// reductions (`r = (r>>1) ^ (P & -(r&1))`), which is the exact shape
    /// the emitted runtime `xnmodp` helper must also take (see
    /// [`crate::scalar::emit_xnmodp`]) so that generation-time constants
    /// and runtime-computed constants agree bit-for-bit.
    pub fn x_n_mod_p(&self, n: u64) -> u32 {
        let p = self.0;

        // r starts as a one-hot word representing x^(n mod 32), then we
        // fold in the remaining bits of n one at a time, squaring and
        // reducing at each step (the classic square-and-reduce ladder for
        // GF(2) exponentiation, specialised to this bit-reflected
        // representation).
        let mut r: u32 = 0x8000_0000u32 >> (n % 32);

        let mut n = n / 32;
        while n != 0 {
            // One squaring step, reduced modulo p bit-at-a-time: this
            // inner loop of 32 single-bit reductions is exactly what the
            // emitted runtime `xnmodp` helper performs.
            for _ in 0..32 {
                r = (r >> 1) ^ (p & 0u32.wrapping_sub(r & 1));
            }
            if n & 1 != 0 {
                r = (r >> 1) ^ (p & 0u32.wrapping_sub(r & 1));
            }
            n >>= 1;
        }

        r
    }

    /// `x^n div P` for `n <= 95`, as a 64-bit constant used to parameterise
    /// Barrett reduction.
    ///
    /// Division doesn't have the tidy bit-reflected recurrence that
    /// modulo does, so this works in the forward (non-reflected) domain,
    /// where polynomial long division is the familiar MSB-first
    /// shift-and-subtract (xor) process, then returns the quotient.
    pub fn x_n_div_p(&self, n: u32) -> u64 {
        assert!(n <= 95, "x_n_div_p is only defined for n <= 95");

        let forward = reverse32(self.0);
        // Restore the implicit x^32 term to get the full 33-bit divisor.
        let divisor: u128 = (1u128 << 32) | (forward as u128);
        let mut rem: u128 = 1u128 << n;
        let mut quot: u64 = 0;

        // A degree-n dividend divided by a degree-32 divisor has a
        // quotient of degree n-32 <= 63, so 64 long-division steps
        // suffice.
        for step in (0..64).rev() {
            let bit = 32 + step;
            if bit <= n && (rem >> bit) & 1 != 0 {
                rem ^= divisor << (bit - 32);
                quot |= 1u64 << step;
            }
        }

        quot
    }

    /// Emit `x^n mod P` via the naive bit-reversed recurrence, applied one
    /// bit of `n` at a time. Used only as a reference implementation in
    /// tests.
    #[cfg(test)]
    fn naive_x_n_mod_p(&self, n: u64) -> u32 {
        let p = self.0;
        let mut r: u32 = 1;
        for _ in 0..n {
            r = (r >> 1) ^ (p & 0u32.wrapping_sub(r & 1));
        }
        r
    }
}

/// Reverses the bit ordering of a 32-bit word.
///
/// Used at the CLI boundary to convert a user-supplied forward polynomial
/// literal into the reversed representation used everywhere else in the
/// generator.
pub const fn reverse32(p: u32) -> u32 {
    let p = ((p & 0x5555_5555) << 1) | ((p >> 1) & 0x5555_5555);
    let p = ((p & 0x3333_3333) << 2) | ((p >> 2) & 0x3333_3333);
    let p = ((p & 0x0f0f_0f0f) << 4) | ((p >> 4) & 0x0f0f_0f0f);
    let p = ((p & 0x00ff_00ff) << 8) | ((p >> 8) & 0x00ff_00ff);
    (p << 16) | (p >> 16)
}

/// Carry-less (GF(2)) multiplication of two values, widened to `u128`.
///
/// Not used by the generator itself (which only needs division and
/// modulo), but useful for checking the division/modulo identities in
/// tests.
#[cfg(test)]
fn gf2_mul(a: u128, b: u128) -> u128 {
    let mut acc = 0u128;
    for bit in 0..128 {
        if (b >> bit) & 1 != 0 {
            acc ^= a << bit;
        }
    }
    acc
}

/// Canonical, well-known CRC-32 polynomials, by name.
///
/// Values are given in reversed form, matching [`Polynomial`]'s
/// representation.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum NamedPolynomial {
    /// The classic CRC-32 used by zlib/gzip/PNG/Ethernet.
    Crc32,
    /// CRC-32C (Castagnoli), used by iSCSI, ext4, SCTP.
    Crc32C,
    /// CRC-32K (Koopman).
    Crc32K,
    /// A second Koopman polynomial, distinct from `Crc32K`.
    Crc32K2,
    /// CRC-32Q, used by aviation (ARINC-629).
    Crc32Q,
}

impl NamedPolynomial {
    /// Parse a canonical name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "crc32" => Some(Self::Crc32),
            "crc32c" => Some(Self::Crc32C),
            "crc32k" => Some(Self::Crc32K),
            "crc32k2" => Some(Self::Crc32K2),
            "crc32q" => Some(Self::Crc32Q),
            _ => None,
        }
    }

    /// The reversed-form polynomial constant this name resolves to.
    pub fn polynomial(&self) -> Polynomial {
        match self {
            // 0x04C11DB7 forward, reversed:
            Self::Crc32 => Polynomial(0xEDB8_8320),
            // 0x1EDC6F41 forward, reversed:
            Self::Crc32C => Polynomial(0x8265_4329),
            // 0x741B8CD7 forward, reversed:
            Self::Crc32K => Polynomial(0xEB31_D82E),
            // 0x32583499 forward, reversed:
            Self::Crc32K2 => Polynomial(0x992C_1A4C),
            // 0x814141AB forward, reversed:
            Self::Crc32Q => Polynomial(0xD582_8281),
        }
    }
}
