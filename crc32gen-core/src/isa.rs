//! ISA dispatch: the instruction-set tag and the per-ISA shape of every
//! hardware primitive the loop synthesiser needs (§4.D).
//!
//! `Isa` only carries *which* shape to use; the actual C text for a
//! primitive is produced by the functions in this module, which are pure
//! string builders (no hidden state) so that memoisation of "has this
//! helper function already been emitted" stays entirely in
//! [`crate::driver::Context`].

use std::fmt;

/// One of the six instruction-set flavours the generator can target.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum Isa {
    /// Scalar-only, table-driven. No vector work permitted.
    None,
    /// AArch64 NEON, without the `eor3` three-way xor instruction.
    Neon,
    /// AArch64 NEON with `eor3` (from the SHA3/crypto extension).
    NeonEor3,
    /// x86_64 SSE/AVX/AVX2 — all share the same 128-bit PCLMULQDQ-based
    /// intrinsics.
    Sse,
    /// x86_64 AVX-512, 128-bit lanes but with ternary-logic (`vpternlogq`)
    /// available for the xor-triple.
    Avx512,
    /// x86_64 AVX-512 with VPCLMULQDQ: 512-bit carry-less multiply
    /// spanning four 128-bit lanes at once.
    Avx512Vpclmulqdq,
}

impl Isa {
    /// Parses the CLI's ISA name, including the `sse`/`avx`/`avx2` alias.
    pub fn from_name(name: &str) -> Option<Isa> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(Isa::None),
            "neon" => Some(Isa::Neon),
            "neon_eor3" => Some(Isa::NeonEor3),
            "sse" | "avx" | "avx2" => Some(Isa::Sse),
            "avx512" => Some(Isa::Avx512),
            "avx512_vpclmulqdq" => Some(Isa::Avx512Vpclmulqdq),
            _ => None,
        }
    }

    /// Stable lowercase name, used in diagnostics and the emitted file's
    /// header comment.
    pub fn name(&self) -> &'static str {
        match self {
            Isa::None => "none",
            Isa::Neon => "neon",
            Isa::NeonEor3 => "neon_eor3",
            Isa::Sse => "sse",
            Isa::Avx512 => "avx512",
            Isa::Avx512Vpclmulqdq => "avx512_vpclmulqdq",
        }
    }

    /// Whether this ISA has any vector capability at all.
    pub fn has_vectors(&self) -> bool {
        !matches!(self, Isa::None)
    }

    /// Whether this ISA is one of the two NEON flavours.
    pub fn is_neon(&self) -> bool {
        matches!(self, Isa::Neon | Isa::NeonEor3)
    }

    /// Whether a fused three-way xor (`eor3`/`vpternlogq`) is available
    /// for the xor-triple primitive.
    pub fn has_ternary_xor(&self) -> bool {
        matches!(self, Isa::NeonEor3 | Isa::Avx512 | Isa::Avx512Vpclmulqdq)
    }

    /// Bytes moved by one vector load/fold step.
    pub fn vector_bytes(&self) -> usize {
        match self {
            Isa::None => 0,
            Isa::Avx512Vpclmulqdq => 64,
            _ => 16,
        }
    }

    /// Bytes moved by one scalar CRC application.
    pub fn scalar_bytes(&self) -> usize {
        match self {
            Isa::None => 4,
            _ => 8,
        }
    }

    /// The intrinsic/builtin header this ISA needs for vector work, if
    /// any (`None` under ISA=NONE, which only uses a lookup table).
    pub fn intrinsic_header(&self) -> Option<&'static str> {
        match self {
            Isa::None => None,
            Isa::Neon | Isa::NeonEor3 => Some("arm_neon.h"),
            Isa::Sse | Isa::Avx512 | Isa::Avx512Vpclmulqdq => Some("immintrin.h"),
        }
    }

    /// C type used to hold one vector accumulator.
    pub fn vector_type(&self) -> &'static str {
        match self {
            Isa::None => "",
            Isa::Neon | Isa::NeonEor3 => "uint64x2_t",
            Isa::Sse | Isa::Avx512 => "__m128i",
            Isa::Avx512Vpclmulqdq => "__m512i",
        }
    }

    /// The 128-bit-lane ISA that shares this ISA's scalar/128-bit CLMUL
    /// shape. Every ISA's final reduction collapses down to a single
    /// 128-bit (or, on NEON, `uint64x2_t`) accumulator before the
    /// Barrett step, including `Avx512Vpclmulqdq` whose *main* fold
    /// works on 512-bit lanes but whose scalar helpers and final
    /// reduction always operate 128 bits at a time, using the same
    /// `_mm_clmulepi64_si128` plain AVX-512 uses.
    pub fn narrow128(&self) -> Isa {
        match self {
            Isa::Avx512Vpclmulqdq => Isa::Avx512,
            other => *other,
        }
    }
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Expression-level builders for the primitives of §4.D.
///
/// Each function takes operand expression text and returns a single C
/// expression. They never emit standalone helper *definitions* (those
/// live behind [`crate::driver::Context`]'s once-flags and are emitted by
/// [`crate::scalar`]/[`crate::loopgen`] the first time they're needed);
/// these are the inline call-site forms.
pub mod expr {
    use super::Isa;
    use crate::error::GenError;

    /// `clmul_lo(a, b)`: carry-less multiply of the low 64-bit lanes.
    pub fn clmul_lo(isa: Isa, a: &str, b: &str) -> Result<String, GenError> {
        match isa {
            Isa::Neon | Isa::NeonEor3 => Ok(format!("clmul_lo({a}, {b})")),
            Isa::Sse | Isa::Avx512 => {
                Ok(format!("_mm_clmulepi64_si128({a}, {b}, 0x00)"))
            }
            Isa::Avx512Vpclmulqdq => {
                Ok(format!("_mm512_clmulepi64_epi128({a}, {b}, 0x00)"))
            }
            Isa::None => Err(GenError::UnsupportedPrimitive {
                primitive: "clmul_lo",
                isa: isa.name(),
            }),
        }
    }

    /// `clmul_hi(a, b)`: carry-less multiply of the high 64-bit lanes.
    pub fn clmul_hi(isa: Isa, a: &str, b: &str) -> Result<String, GenError> {
        match isa {
            Isa::Neon | Isa::NeonEor3 => Ok(format!("clmul_hi({a}, {b})")),
            Isa::Sse | Isa::Avx512 => {
                Ok(format!("_mm_clmulepi64_si128({a}, {b}, 0x11)"))
            }
            Isa::Avx512Vpclmulqdq => {
                Ok(format!("_mm512_clmulepi64_epi128({a}, {b}, 0x11)"))
            }
            Isa::None => Err(GenError::UnsupportedPrimitive {
                primitive: "clmul_hi",
                isa: isa.name(),
            }),
        }
    }

    /// Combines three vector operands with xor, using a fused
    /// ternary-logic instruction where the ISA provides one.
    pub fn xor3(isa: Isa, a: &str, b: &str, c: &str) -> String {
        match isa {
            Isa::NeonEor3 => format!("veor3q_u64({a}, {b}, {c})"),
            Isa::Avx512 => format!("_mm_ternarylogic_epi64({a}, {b}, {c}, 0x96)"),
            Isa::Avx512Vpclmulqdq => {
                format!("_mm512_ternarylogic_epi64({a}, {b}, {c}, 0x96)")
            }
            // NEON (no eor3) and SSE fall back to two plain xors.
            Isa::Neon => format!("veorq_u64({a}, veorq_u64({b}, {c}))"),
            Isa::Sse => format!("_mm_xor_si128({a}, _mm_xor_si128({b}, {c}))"),
            Isa::None => format!("({a} ^ {b} ^ {c})"),
        }
    }

    /// Loads one vector's worth of bytes from `ptr`.
    pub fn vector_load(isa: Isa, ptr: &str) -> String {
        match isa {
            Isa::Neon | Isa::NeonEor3 => format!("vld1q_u64((const uint64_t *) {ptr})"),
            Isa::Sse | Isa::Avx512 => {
                format!("_mm_loadu_si128((const __m128i *) {ptr})")
            }
            Isa::Avx512Vpclmulqdq => {
                format!("_mm512_loadu_si512((const void *) {ptr})")
            }
            Isa::None => ptr.to_owned(),
        }
    }

    /// Builds a constant vector from a pair of 64-bit fold multipliers
    /// `(k_lo, k_hi)`, replicated across lanes for the wide AVX-512
    /// VPCLMULQDQ case.
    pub fn const_vector(isa: Isa, k_lo: u64, k_hi: u64) -> String {
        match isa {
            Isa::Neon | Isa::NeonEor3 => {
                format!("(uint64x2_t) {{ 0x{k_lo:016x}ULL, 0x{k_hi:016x}ULL }}")
            }
            Isa::Sse | Isa::Avx512 => {
                format!("_mm_set_epi64x((int64_t) 0x{k_hi:016x}ULL, (int64_t) 0x{k_lo:016x}ULL)")
            }
            Isa::Avx512Vpclmulqdq => format!(
                "_mm512_set4_epi64((int64_t) 0x{k_hi:016x}ULL, (int64_t) 0x{k_lo:016x}ULL, \
                 (int64_t) 0x{k_hi:016x}ULL, (int64_t) 0x{k_lo:016x}ULL)"
            ),
            Isa::None => format!("0x{k_lo:016x}ULL"),
        }
    }

    /// Embeds a 64-bit scalar expression into the low lane of a 128-bit
    /// (or `uint64x2_t`) vector, zeroing the rest. Used by the scalar
    /// Barrett CRC path to lift `crc` and a just-loaded data word into
    /// the same vector shape the main fold loop works in, only ever
    /// called with a narrow128-mapped ISA (never `Avx512Vpclmulqdq`).
    pub fn scalar_embed(isa: Isa, expr: &str) -> String {
        match isa {
            Isa::Neon | Isa::NeonEor3 => format!("(uint64x2_t) {{ (uint64_t) ({expr}), 0 }}"),
            Isa::Sse | Isa::Avx512 => format!("_mm_set_epi64x(0, (int64_t) ({expr}))"),
            Isa::Avx512Vpclmulqdq => format!("_mm512_set4_epi64(0, 0, 0, (int64_t) ({expr}))"),
            Isa::None => expr.to_owned(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn aliases_resolve_to_sse() {
        assert_eq!(Isa::from_name("avx"), Some(Isa::Sse));
        assert_eq!(Isa::from_name("avx2"), Some(Isa::Sse));
        assert_eq!(Isa::from_name("SSE"), Some(Isa::Sse));
    }

    #[test]
    fn unknown_name_is_none() {
        assert_eq!(Isa::from_name("mmx"), None);
    }

    #[test]
    fn vector_bytes_match_spec() {
        assert_eq!(Isa::None.vector_bytes(), 0);
        assert_eq!(Isa::Neon.vector_bytes(), 16);
        assert_eq!(Isa::Sse.vector_bytes(), 16);
        assert_eq!(Isa::Avx512.vector_bytes(), 16);
        assert_eq!(Isa::Avx512Vpclmulqdq.vector_bytes(), 64);
    }

    #[test]
    fn scalar_bytes_match_spec() {
        assert_eq!(Isa::None.scalar_bytes(), 4);
        assert_eq!(Isa::Neon.scalar_bytes(), 8);
        assert_eq!(Isa::Sse.scalar_bytes(), 8);
    }

    #[test]
    fn clmul_lo_unsupported_under_isa_none() {
        assert!(expr::clmul_lo(Isa::None, "a", "b").is_err());
    }

    #[test]
    fn narrow128_only_changes_avx512_vpclmulqdq() {
        assert_eq!(Isa::Avx512Vpclmulqdq.narrow128(), Isa::Avx512);
        assert_eq!(Isa::Avx512.narrow128(), Isa::Avx512);
        assert_eq!(Isa::Sse.narrow128(), Isa::Sse);
        assert_eq!(Isa::Neon.narrow128(), Isa::Neon);
        assert_eq!(Isa::None.narrow128(), Isa::None);
    }

    #[test]
    fn scalar_embed_wraps_the_expression_per_isa() {
        assert!(expr::scalar_embed(Isa::Sse, "crc").starts_with("_mm_set_epi64x"));
        assert!(expr::scalar_embed(Isa::Neon, "crc").starts_with("(uint64x2_t)"));
        assert_eq!(expr::scalar_embed(Isa::None, "crc"), "crc");
    }

    #[test]
    fn xor3_uses_fused_form_when_available() {
        assert!(expr::xor3(Isa::NeonEor3, "a", "b", "c").starts_with("veor3q_u64"));
        assert!(expr::xor3(Isa::Avx512, "a", "b", "c").contains("ternarylogic"));
        assert!(expr::xor3(Isa::Sse, "a", "b", "c").contains("_mm_xor_si128"));
    }
}
