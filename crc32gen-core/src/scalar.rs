//! Scalar CRC helpers (§4.E).
//!
//! Binds the three names `crc_u8`, `crc_u32`, `crc_u64` to one of three
//! implementations for the selected `(isa, poly)` pair, and emits
//! whichever of `xnmodp`/`crc_shift`/the CRC lookup table are actually
//! needed. Every helper here is emitted into the driver's shared
//! `includes`/`helpers` buffers at most once, guarded by
//! [`crate::driver::Context`]'s once-flags.

use crate::buffer::{Arena, SBuf};
use crate::driver::Context;
use crate::isa::{expr, Isa};
use crate::loopgen;
use crate::poly::NamedPolynomial;

/// Which underlying strategy backs the three `crc_*` helper names.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ScalarStrategy {
    /// A hardware single-instruction CRC (`__crc32b`/`_mm_crc32_u8`, …).
    /// Only available for polynomials with native support: CRC-32 and
    /// CRC-32C on ARM (`__crc32*`), CRC-32C on x86 (`_mm_crc32_u*`).
    HardwareCrc,
    /// PCLMULQDQ-based Barrett reduction, for ISAs with vector CLMUL but
    /// no native scalar CRC instruction for this polynomial.
    Barrett,
    /// A 256-entry-per-byte lookup table, for ISA=NONE.
    Table,
}

/// Picks the strategy a given `(isa, poly)` pair resolves to.
pub fn strategy_for(isa: Isa, poly_name: Option<NamedPolynomial>) -> ScalarStrategy {
    if isa == Isa::None {
        return ScalarStrategy::Table;
    }

    let has_hw_crc = match (isa, poly_name) {
        (Isa::Neon | Isa::NeonEor3, Some(NamedPolynomial::Crc32 | NamedPolynomial::Crc32C)) => {
            true
        }
        (
            Isa::Sse | Isa::Avx512 | Isa::Avx512Vpclmulqdq,
            Some(NamedPolynomial::Crc32C),
        ) => true,
        _ => false,
    };

    if has_hw_crc {
        ScalarStrategy::HardwareCrc
    } else {
        ScalarStrategy::Barrett
    }
}

/// Emits (idempotently) the `crc_u8`/`crc_u32`/`crc_u64` helper functions
/// for the context's ISA/polynomial, widening the CRC lookup table if a
/// table-driven strategy needs a plane it hasn't emitted yet.
pub fn ensure_scalar_helpers(arena: &mut Arena, ctx: &mut Context, helpers: SBuf, width: u8) {
    let strategy = strategy_for(ctx.isa, ctx.poly_name);
    log::debug!("binding crc_u{width} to {strategy:?} for isa {}", ctx.isa);

    match strategy {
        ScalarStrategy::HardwareCrc => ensure_hardware_crc(arena, ctx, helpers, width),
        ScalarStrategy::Barrett => ensure_barrett_crc(arena, ctx, helpers, width),
        ScalarStrategy::Table => ensure_table_crc(arena, ctx, helpers, width),
    }
}

fn ensure_hardware_crc(arena: &mut Arena, ctx: &mut Context, helpers: SBuf, width: u8) {
    if ctx.guards.hw_crc_emitted.contains(&width) {
        return;
    }
    ctx.guards.hw_crc_emitted.push(width);
    log::debug!("emitting hardware crc_u{width} helper (once-flag: hw_crc_emitted[{width}])");

    let (ret_ty, builtin) = match (ctx.isa.is_neon(), width) {
        (true, 8) => ("uint32_t", "__crc32b(crc, *(const uint8_t *) buf)"),
        (true, 32) => ("uint32_t", "__crc32w(crc, *(const uint32_t *) buf)"),
        (true, 64) => ("uint32_t", "__crc32d(crc, *(const uint64_t *) buf)"),
        (false, 8) => ("uint32_t", "_mm_crc32_u8(crc, *(const uint8_t *) buf)"),
        (false, 32) => ("uint32_t", "_mm_crc32_u32(crc, *(const uint32_t *) buf)"),
        (false, _) => (
            "uint32_t",
            "(uint32_t) _mm_crc32_u64(crc, *(const uint64_t *) buf)",
        ),
        _ => ("uint32_t", "0 /* unreachable width */"),
    };

    arena.put_str(
        helpers,
        &format!(
            "static CRC_AINLINE {ret_ty} crc_u{width}(uint32_t crc, const char *buf) {{\n\
             \x20\x20return {builtin};\n\
             }}\n"
        ),
    );
}

/// A PCLMULQDQ-based Barrett-reduced scalar CRC, for ISAs with vector
/// CLMUL but no native scalar CRC instruction for this polynomial. Folds
/// `width` bits of new data into `crc` the same way the main vector loop
/// folds one block: multiply `crc` by `k = x^width mod P` (split into the
/// `(k_lo, k_hi)` halves a 128-bit CLMUL wants), XOR in the data word,
/// then reduce 128 -> 32 bits with the shared [`loopgen::ensure_barrett_reduce128`]
/// helper.
fn ensure_barrett_crc(arena: &mut Arena, ctx: &mut Context, helpers: SBuf, width: u8) {
    if ctx.guards.barrett_emitted.contains(&width) {
        return;
    }
    ctx.guards.barrett_emitted.push(width);
    log::debug!("emitting barrett-reduced crc_u{width} helper (once-flag: barrett_emitted[{width}])");

    loopgen::ensure_clmul_prelude(arena, ctx, helpers);
    loopgen::ensure_barrett_reduce128(arena, ctx, helpers);

    let isa = ctx.isa.narrow128();
    let vty = isa.vector_type();
    let bits = width as u64;
    let k_lo = ctx.poly.x_n_mod_p(bits);
    let k_hi = ctx.poly.x_n_mod_p(bits + 64);
    let k_const = expr::const_vector(isa, k_lo as u64, k_hi as u64);
    let x_embed = expr::scalar_embed(isa, "crc");
    let d_embed = expr::scalar_embed(isa, "word");
    let lo = expr::clmul_lo(isa, "x", "k").unwrap_or_default();
    let hi = expr::clmul_hi(isa, "x", "k").unwrap_or_default();
    let folded = expr::xor3(isa, &lo, &hi, "d");

    let mu63 = ctx.poly.x_n_div_p(63);
    let mu95 = ctx.poly.x_n_div_p(95);

    arena.put_str(
        helpers,
        &format!(
            "static CRC_AINLINE uint32_t crc_u{width}(uint32_t crc, const char *buf) {{\n\
             \x20\x20uint64_t word = 0;\n\
             \x20\x20memcpy(&word, buf, {bytes});\n\
             \x20\x20{vty} k = {k_const};\n\
             \x20\x20{vty} x = {x_embed};\n\
             \x20\x20{vty} d = {d_embed};\n\
             \x20\x20{vty} folded = {folded};\n\
             \x20\x20return barrett_reduce128(folded, 0x{mu63:016x}ULL, 0x{mu95:016x}ULL);\n\
             }}\n",
            bytes = width / 8
        ),
    );
}

fn ensure_table_crc(arena: &mut Arena, ctx: &mut Context, helpers: SBuf, width: u8) {
    let planes_needed: u8 = match width {
        8 => 1,
        32 => 4,
        _ => 1,
    };
    ensure_crc_table(arena, ctx, helpers, planes_needed);

    if ctx.guards.table_fn_emitted.contains(&width) {
        return;
    }
    ctx.guards.table_fn_emitted.push(width);

    let body = if width == 32 {
        // Slicing-by-4: one 32-bit load instead of four single-byte
        // table lookups, using the three extra planes built alongside
        // plane 0 in emit_crc_table_body.
        "static CRC_AINLINE uint32_t crc_u32(uint32_t crc, const char *buf) {\n\
         \x20\x20uint32_t word;\n\
         \x20\x20memcpy(&word, buf, sizeof(word));\n\
         \x20\x20uint32_t c = crc ^ word;\n\
         \x20\x20return g_crc_table[3][c & 0xff]\n\
         \x20\x20\x20\x20\x20^ g_crc_table[2][(c >> 8) & 0xff]\n\
         \x20\x20\x20\x20\x20^ g_crc_table[1][(c >> 16) & 0xff]\n\
         \x20\x20\x20\x20\x20^ g_crc_table[0][(c >> 24) & 0xff];\n\
         }\n"
            .to_owned()
    } else {
        format!(
            "static CRC_AINLINE uint32_t crc_u{width}(uint32_t crc, const char *buf) {{\n\
             \x20\x20const unsigned char *p = (const unsigned char *) buf;\n\
             \x20\x20for (size_t i = 0; i < {bytes}; i++) {{\n\
             \x20\x20\x20\x20crc = (crc >> 8) ^ g_crc_table[0][(crc ^ p[i]) & 0xff];\n\
             \x20\x20}}\n\
             \x20\x20return crc;\n\
             }}\n",
            bytes = width / 8
        )
    };
    arena.put_str(helpers, &body);
}

fn ensure_crc_table(arena: &mut Arena, ctx: &mut Context, helpers: SBuf, planes: u8) {
    if ctx.guards.crc_table_planes >= planes {
        return;
    }
    ctx.guards.crc_table_planes = planes;

    // Reserved once, early, via deferred_fn so its position in the
    // output (above every consumer) is fixed before we know whether
    // crc_u8 or crc_u32 (or both) will end up wanting it. The callback
    // always builds all 4 planes; crc_u8 just never reads past plane 0.
    if ctx.guards.crc_table_buf.is_none() {
        let buf = arena.splice(helpers);
        ctx.guards.crc_table_buf = Some(buf);
        let poly = ctx.poly;
        arena.deferred_fn(buf, move |arena, child| {
            emit_crc_table_body(arena, child, poly);
        });
    }
}

/// Builds the slicing-by-4 lookup table: plane 0 is the ordinary
/// byte-at-a-time CRC table; each subsequent plane folds one more byte
/// of a little-endian 32-bit word in, so `crc_u32` can combine four
/// byte positions with four independent table reads instead of four
/// sequential single-byte steps.
fn emit_crc_table_body(arena: &mut Arena, buf: SBuf, poly: crate::poly::Polynomial) {
    let mut planes = [[0u32; 256]; 4];
    for (n, slot) in planes[0].iter_mut().enumerate() {
        let mut crc = n as u32;
        for _ in 0..8 {
            let mask = 0u32.wrapping_sub(crc & 1);
            crc = (crc >> 1) ^ (poly.0 & mask);
        }
        *slot = crc;
    }
    for n in 0..256 {
        let mut c = planes[0][n];
        for k in 1..4 {
            c = planes[0][(c & 0xff) as usize] ^ (c >> 8);
            planes[k][n] = c;
        }
    }

    arena.put_str(buf, "static const uint32_t g_crc_table[4][256] = {\n");
    for plane in &planes {
        arena.put_str(buf, "  {\n    ");
        for (byte, crc) in plane.iter().enumerate() {
            arena.put_str(buf, &format!("0x{crc:08x}u, "));
            if byte % 8 == 7 {
                arena.put_str(buf, "\n    ");
            }
        }
        arena.put_str(buf, "\n  },\n");
    }
    arena.put_str(buf, "};\n");
}

/// Emits the runtime `xnmodp` helper (§4.A), which performs `x^n mod P`
/// using the identical bit-at-a-time reduction
/// [`crate::poly::Polynomial::x_n_mod_p`] uses at generation time, so
/// that generation-time and runtime-computed fold constants agree.
pub fn ensure_xnmodp(arena: &mut Arena, ctx: &mut Context, helpers: SBuf) {
    if ctx.guards.xnmodp_emitted {
        return;
    }
    ctx.guards.xnmodp_emitted = true;

    arena.put_str(
        helpers,
        &format!(
            "static uint32_t xnmodp(uint64_t n) {{\n\
             \x20\x20uint32_t stack = ~(uint32_t) 1;\n\
             \x20\x20uint32_t acc, low;\n\
             \x20\x20for (; n > 191; n = (n >> 1) - 16) {{\n\
             \x20\x20\x20\x20stack = (stack << 1) + (n & 1);\n\
             \x20\x20}}\n\
             \x20\x20stack = ~stack;\n\
             \x20\x20acc = ((uint32_t) 0x80000000u) >> (n & 31);\n\
             \x20\x20for (n >>= 5; n; --n) {{\n\
             \x20\x20\x20\x20for (low = 0; low < 32; low++) {{\n\
             \x20\x20\x20\x20\x20\x20acc = (acc >> 1) ^ (0x{poly:08x}u & -(acc & 1));\n\
             \x20\x20\x20\x20}}\n\
             \x20\x20}}\n\
             \x20\x20while (stack) {{\n\
             \x20\x20\x20\x20uint32_t top = stack & 1;\n\
             \x20\x20\x20\x20stack >>= 1;\n\
             \x20\x20\x20\x20for (low = 0; low < 32; low++) {{\n\
             \x20\x20\x20\x20\x20\x20acc = (acc >> 1) ^ (0x{poly:08x}u & -(acc & 1));\n\
             \x20\x20\x20\x20}}\n\
             \x20\x20\x20\x20if (top) {{\n\
             \x20\x20\x20\x20\x20\x20acc = (acc >> 1) ^ (0x{poly:08x}u & -(acc & 1));\n\
             \x20\x20\x20\x20}}\n\
             \x20\x20}}\n\
             \x20\x20return acc;\n\
             }}\n",
            poly = ctx.poly.0
        ),
    );
}

/// Emits `clmul_scalar(a, b)`: multiplies two reflected degree-<32
/// polynomials over GF(2) and reduces the (degree <= 62) product back to
/// 32 bits, by embedding both operands in the low lane of a 128-bit
/// vector and reusing the same `clmul_lo`/[`loopgen::ensure_barrett_reduce128`]
/// machinery the main vector fold and the Barrett scalar CRC path share.
fn ensure_clmul_scalar(arena: &mut Arena, ctx: &mut Context, helpers: SBuf) {
    if ctx.guards.clmul_scalar_emitted {
        return;
    }
    ctx.guards.clmul_scalar_emitted = true;

    loopgen::ensure_clmul_prelude(arena, ctx, helpers);
    loopgen::ensure_barrett_reduce128(arena, ctx, helpers);

    let isa = ctx.isa.narrow128();
    let vty = isa.vector_type();
    let a_embed = expr::scalar_embed(isa, "a");
    let b_embed = expr::scalar_embed(isa, "b");
    let prod = expr::clmul_lo(isa, "va", "vb").unwrap_or_default();

    let mu63 = ctx.poly.x_n_div_p(63);
    let mu95 = ctx.poly.x_n_div_p(95);

    arena.put_str(
        helpers,
        &format!(
            "static CRC_AINLINE uint32_t clmul_scalar(uint32_t a, uint32_t b) {{\n\
             \x20\x20{vty} va = {a_embed};\n\
             \x20\x20{vty} vb = {b_embed};\n\
             \x20\x20{vty} prod = {prod};\n\
             \x20\x20return barrett_reduce128(prod, 0x{mu63:016x}ULL, 0x{mu95:016x}ULL);\n\
             }}\n"
        ),
    );
}

/// Emits `crc_shift(crc, nbytes)`, a thin wrapper that calls `xnmodp` and
/// folds the result back onto `crc` via a scalar carry-less multiply.
/// Only needed when a phase has a non-constant kernel and more than one
/// scalar accumulator (the combination that needs a data-dependent
/// distance between accumulators at runtime).
pub fn ensure_crc_shift(arena: &mut Arena, ctx: &mut Context, helpers: SBuf) {
    ensure_xnmodp(arena, ctx, helpers);
    ensure_clmul_scalar(arena, ctx, helpers);

    if ctx.guards.crc_shift_emitted {
        return;
    }
    ctx.guards.crc_shift_emitted = true;

    // A zero-length shift must be the identity: `8 * 0 - 33` underflows
    // `size_t` and would otherwise hand xnmodp an exponent nowhere near
    // -33 mod the true multiplicative order of x, corrupting the crc a
    // caller expected to pass through unchanged (the contiguous-region
    // scalar merge in loopgen.rs does exactly this whenever a middle
    // region degenerates to zero bytes on a short input).
    arena.put_str(
        helpers,
        "static uint32_t crc_shift(uint32_t crc, size_t nbytes) {\n\
         \x20\x20if (nbytes == 0) {\n\
         \x20\x20\x20\x20return crc;\n\
         \x20\x20}\n\
         \x20\x20return clmul_scalar(crc, xnmodp(8 * nbytes - 33));\n\
         }\n",
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::Context;
    use crate::poly::NamedPolynomial;

    fn ctx(isa: Isa) -> Context {
        Context {
            isa,
            poly: NamedPolynomial::Crc32.polynomial(),
            poly_name: Some(NamedPolynomial::Crc32),
            guards: Default::default(),
        }
    }

    #[test]
    fn crc32c_on_sse_picks_hardware_strategy() {
        assert_eq!(
            strategy_for(Isa::Sse, Some(NamedPolynomial::Crc32C)),
            ScalarStrategy::HardwareCrc
        );
    }

    #[test]
    fn plain_crc32_on_sse_falls_back_to_barrett() {
        assert_eq!(
            strategy_for(Isa::Sse, Some(NamedPolynomial::Crc32)),
            ScalarStrategy::Barrett
        );
    }

    #[test]
    fn isa_none_always_uses_table() {
        assert_eq!(strategy_for(Isa::None, Some(NamedPolynomial::Crc32C)), ScalarStrategy::Table);
    }

    #[test]
    fn barrett_crc_calls_only_helpers_it_also_defines() {
        let mut c = ctx(Isa::Sse);
        let mut arena = Arena::new();
        let root = arena.root();
        let helpers = arena.splice(root);
        ensure_barrett_crc(&mut arena, &mut c, helpers, 64);
        let out = arena.flush(root).unwrap();
        assert!(out.contains("barrett_reduce128"));
        assert!(out.contains("crc_u64"));
        // Every helper barrett_reduce128 depends on must appear before its
        // first call: clmul_lo/clmul_hi are inline expressions under SSE,
        // so the only emitted dependency is barrett_reduce128 itself.
        assert!(out.find("static CRC_AINLINE uint32_t barrett_reduce128").unwrap()
            < out.find("crc_u64(uint32_t crc").unwrap());
    }

    #[test]
    fn table_crc_u32_reads_all_four_distinct_planes() {
        let mut c = ctx(Isa::None);
        let mut arena = Arena::new();
        let root = arena.root();
        let helpers = arena.splice(root);
        ensure_table_crc(&mut arena, &mut c, helpers, 32);
        let out = arena.flush(root).unwrap();
        assert!(out.contains("g_crc_table[3]"));
        assert!(out.contains("g_crc_table[2]"));
        assert!(out.contains("g_crc_table[1]"));
        assert!(out.contains("g_crc_table[0]"));

        // Planes are genuinely distinct, not four copies of the same
        // table: render just the table body and check plane 0 and plane 1
        // differ somewhere.
        let mut planes = [[0u32; 256]; 4];
        emit_crc_table_body_for_test(&mut planes, NamedPolynomial::Crc32.polynomial());
        assert_ne!(planes[0], planes[1]);
        assert_ne!(planes[1], planes[2]);
        assert_ne!(planes[2], planes[3]);
    }

    fn emit_crc_table_body_for_test(planes: &mut [[u32; 256]; 4], poly: crate::poly::Polynomial) {
        for (n, slot) in planes[0].iter_mut().enumerate() {
            let mut crc = n as u32;
            for _ in 0..8 {
                let mask = 0u32.wrapping_sub(crc & 1);
                crc = (crc >> 1) ^ (poly.0 & mask);
            }
            *slot = crc;
        }
        for n in 0..256 {
            let mut c = planes[0][n];
            for k in 1..4 {
                c = planes[0][(c & 0xff) as usize] ^ (c >> 8);
                planes[k][n] = c;
            }
        }
    }

    #[test]
    fn clmul_scalar_and_crc_shift_each_emit_once() {
        let mut c = ctx(Isa::Sse);
        let mut arena = Arena::new();
        let root = arena.root();
        let helpers = arena.splice(root);
        ensure_crc_shift(&mut arena, &mut c, helpers);
        ensure_crc_shift(&mut arena, &mut c, helpers);
        let out = arena.flush(root).unwrap();
        assert_eq!(out.matches("uint32_t clmul_scalar(").count(), 1);
        assert_eq!(out.matches("uint32_t crc_shift(").count(), 1);
        assert_eq!(out.matches("static uint32_t xnmodp(").count(), 1);
    }
}
