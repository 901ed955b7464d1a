//! The loop synthesiser (§4.F): turns one [`Phase`] into a C loop that
//! folds `phase.v_acc` vector accumulators and `phase.s_acc` scalar
//! accumulators across the input, then reduces them back down to a
//! single running CRC before the next phase (or the final return) picks
//! it up.
//!
//! Every phase shares the same running `crc` variable (already
//! complemented by the driver's prelude) as its scalar carry-in/out, so
//! phases chain without any extra glue: phase N's reduction leaves `crc`
//! exactly where phase N+1 expects to find it.

use crate::algo::Phase;
use crate::buffer::{Arena, SBuf};
use crate::driver::Context;
use crate::error::Result;
use crate::isa::{expr, Isa};
use crate::scalar;

/// Emits every phase of `phases` in sequence into `body`, sharing
/// `helpers` as the landing buffer for any once-only helper function.
pub fn emit_phases(
    arena: &mut Arena,
    ctx: &mut Context,
    helpers: SBuf,
    body: SBuf,
    phases: &[Phase],
) -> Result<()> {
    for phase in phases {
        emit_phase(arena, ctx, helpers, body, phase)?;
    }
    Ok(())
}

fn emit_phase(arena: &mut Arena, ctx: &mut Context, helpers: SBuf, body: SBuf, phase: &Phase) -> Result<()> {
    if phase.v_acc > 0 {
        log::debug!(
            "emitting vector phase: v_acc={} v_load={} s_acc={} s_load={} kernel_size={}",
            phase.v_acc,
            phase.v_load,
            phase.s_acc,
            phase.s_load,
            phase.kernel_size
        );
        emit_vector_phase(arena, ctx, helpers, body, phase)?;
    } else {
        log::debug!("emitting scalar-only phase: s_acc={} s_load={}", phase.s_acc, phase.s_load);
        emit_scalar_only_phase(arena, ctx, helpers, body, phase)?;
    }
    Ok(())
}

/// A phase with no vector accumulators: one scalar chain when `s_acc <=
/// 1`, otherwise `s_acc` independent chains each over its own
/// contiguous region of the remaining input, merged back into `crc`
/// with `crc_shift` once every chain drains.
fn emit_scalar_only_phase(
    arena: &mut Arena,
    ctx: &mut Context,
    helpers: SBuf,
    body: SBuf,
    phase: &Phase,
) -> Result<()> {
    let width = ctx.isa.scalar_bytes() as u32 * 8;
    scalar::ensure_scalar_helpers(arena, ctx, helpers, width as u8);

    if phase.s_acc <= 1 {
        let bytes = ctx.isa.scalar_bytes();
        arena.put_str(
            body,
            &format!(
                "  for (; len >= {bytes}; len -= {bytes}, buf += {bytes}) {{\n\
                 \x20\x20\x20\x20crc = crc_u{width}(crc, buf);\n\
                 \x20\x20}}\n"
            ),
        );
        return Ok(());
    }

    // Multiple scalar chains: split the remaining input into `acc`
    // contiguous regions and run one independent chain per region, then
    // recombine with crc_shift in address order (the standard two-input
    // CRC-combine identity, applied region by region). This is NOT the
    // same as striding a single shared loop across `acc` interleaved
    // chains with a single constant shift at the end — that scheme only
    // reproduces the sequential CRC for exactly one shared-loop
    // iteration, since folding a chain's own successive elements always
    // advances it by one scalar width regardless of how far apart those
    // elements sit in the real buffer, so a single post-loop shift can't
    // compensate once more than one iteration has run. Contiguous
    // regions sidestep this entirely: each chain's crc is the genuine
    // CRC of its own (truly contiguous) slice, and region lengths are
    // exactly what crc_shift expects to combine adjacent slices.
    scalar::ensure_crc_shift(arena, ctx, helpers);
    let bytes = ctx.isa.scalar_bytes();
    let acc = phase.s_acc;
    let last = acc - 1;

    arena.put_str(
        body,
        &format!(
            "  {{\n\
             \x20\x20\x20\x20size_t region = (len / {acc}) / {bytes} * {bytes};\n\
             \x20\x20\x20\x20uint32_t c[{acc}];\n\
             \x20\x20\x20\x20const char *p = buf;\n"
        ),
    );
    for i in 0..last {
        let seed = if i == 0 { "crc" } else { "0" };
        arena.put_str(
            body,
            &format!(
                "    c[{i}] = {seed};\n\
                 \x20\x20\x20\x20for (size_t j = 0; j < region; j += {bytes}) {{\n\
                 \x20\x20\x20\x20\x20\x20c[{i}] = crc_u{width}(c[{i}], p + j);\n\
                 \x20\x20\x20\x20}}\n\
                 \x20\x20\x20\x20p += region;\n"
            ),
        );
    }
    let last_seed = if last == 0 { "crc" } else { "0" };
    arena.put_str(
        body,
        &format!(
            "    size_t last_len = len - {last} * region;\n\
             \x20\x20\x20\x20size_t last_processed = last_len / {bytes} * {bytes};\n\
             \x20\x20\x20\x20c[{last}] = {last_seed};\n\
             \x20\x20\x20\x20for (size_t j = 0; j < last_processed; j += {bytes}) {{\n\
             \x20\x20\x20\x20\x20\x20c[{last}] = crc_u{width}(c[{last}], p + j);\n\
             \x20\x20\x20\x20}}\n\
             \x20\x20\x20\x20crc = c[0];\n"
        ),
    );
    for i in 1..acc {
        let shift = if i == last { "last_processed".to_owned() } else { "region".to_owned() };
        arena.put_str(body, &format!("    crc = crc_shift(crc, {shift}) ^ c[{i}];\n"));
    }
    arena.put_str(
        body,
        "    buf = p + last_processed;\n\
         \x20\x20\x20\x20len = last_len - last_processed;\n\
         \x20\x20}\n",
    );
    Ok(())
}

/// A phase with vector accumulators: the classic fold-CRC shape —
/// prime `v_acc` accumulators from the first block, FMA-fold the
/// remaining blocks in, reduce the accumulators to one vector, fold
/// that down to 64 bits, Barrett-reduce to 32, then hand off to any
/// scalar tail this phase also declared.
fn emit_vector_phase(
    arena: &mut Arena,
    ctx: &mut Context,
    helpers: SBuf,
    body: SBuf,
    phase: &Phase,
) -> Result<()> {
    ensure_clmul_prelude(arena, ctx, helpers);

    let isa = ctx.isa;
    let vbytes = isa.vector_bytes();
    let acc = phase.v_acc;
    let vty = isa.vector_type();

    // `v_load` may exceed `v_acc` (an "x" suffix, e.g. "v3x2"): each
    // accumulator then absorbs `loads_per_acc` vectors per iteration
    // instead of one, amortising loop overhead across more in-flight
    // carry-less multiplies. Accumulator i's own successive positions are
    // always `acc` vectors apart regardless of `loads_per_acc` (other
    // accumulators' slots fill the gap in between), so the fold distance
    // a single application of `k` bridges is always `acc * vbytes` bytes,
    // never the full per-iteration block.
    let loads_per_acc = if acc > 0 { (phase.v_load / acc).max(1) } else { 1 };
    let stride = vbytes * acc;
    let block = stride * loads_per_acc;

    let fold_bits = (stride * 8) as u64;
    let k_hi = ctx.poly.x_n_mod_p(fold_bits + 64);
    let k_lo = ctx.poly.x_n_mod_p(fold_bits);
    let fold_const = expr::const_vector(isa, k_lo as u64, k_hi as u64);

    arena.put_str(body, "  {\n");
    arena.put_str(
        body,
        &format!(
            "    {vty} k = {fold_const};\n\
             \x20\x20\x20\x20{vty} x[{acc}];\n"
        ),
    );
    for i in 0..acc {
        let ptr = format!("buf + {off}", off = i * vbytes);
        arena.put_str(body, &format!("    x[{i}] = {};\n", expr::vector_load(isa, &ptr)));
    }
    // Any loads beyond the first one per accumulator, still within the
    // very first iteration's block, are folded into the just-loaded
    // accumulator right away via the same FMA step the main loop uses —
    // this is spec.md §4.F's "any remaining vector loads in the first
    // iteration are folded via FMA".
    for l in 1..loads_per_acc {
        for i in 0..acc {
            let ptr = format!("buf + {off}", off = (l * acc + i) * vbytes);
            emit_fold_step(arena, isa, body, i, &ptr)?;
        }
    }

    // Fold the running scalar crc into the first lane before consuming
    // it, unless this phase hands off to a scalar tail with s_load == 0,
    // in which case crc stays zero through the vector work and is
    // merged in only at the final reduction (see DESIGN.md "v_acc xor
    // crc0").
    if phase.s_load != 0 || phase.s_acc == 0 {
        arena.put_str(body, "    x[0] = crc_xor_u32(x[0], crc);\n");
    }

    arena.put_str(body, &format!("    buf += {block};\n    len -= {block};\n"));

    if phase.kernel_size > 0 {
        // A fixed kernel iteration count: the caller guarantees (or the
        // algorithm string otherwise fixes) that this phase always sees
        // exactly `kernel_size` bytes of input, so the trip count is a
        // compile-time constant rather than data computed from `len`.
        // Only whole blocks count towards it; any remainder still falls
        // through to the tail drain in driver.rs, same as the
        // data-dependent loop forms below.
        let kernel_align = vbytes;
        let aligned_kernel = phase.kernel_size / kernel_align * kernel_align;
        let niters = (aligned_kernel / block).saturating_sub(1);
        arena.put_str(
            body,
            &format!(
                "    for (size_t i = 0; i < {niters}; i++, buf += {block}, len -= {block}) {{\n"
            ),
        );
    } else if phase.use_end_ptr {
        arena.put_str(
            body,
            &format!(
                "    const char *limit = buf + len - len % {block};\n\
                 \x20\x20\x20\x20for (; buf < limit; buf += {block}) {{\n"
            ),
        );
    } else {
        arena.put_str(body, &format!("    for (; len >= {block}; len -= {block}, buf += {block}) {{\n"));
    }

    for l in 0..loads_per_acc {
        for i in 0..acc {
            let ptr = format!("buf + {off}", off = (l * acc + i) * vbytes);
            emit_fold_step(arena, isa, body, i, &ptr)?;
        }
    }
    arena.put_str(body, "    }\n");

    emit_reduction_tree(arena, ctx, body, acc)?;
    emit_final_fold(arena, ctx, helpers, body, isa)?;

    arena.put_str(body, "  }\n");

    if phase.s_acc > 0 {
        emit_scalar_only_phase(arena, ctx, helpers, body, &scalar_tail_of(phase))?;
    }

    Ok(())
}

/// The scalar tail that follows a vector phase reuses the scalar-only
/// emitter, but against a phase record with the vector fields zeroed
/// out (the tail's own `s_acc`/`s_load` are unaffected).
fn scalar_tail_of(phase: &Phase) -> Phase {
    Phase {
        v_acc: 0,
        v_load: 0,
        s_acc: phase.s_acc,
        s_load: phase.s_load,
        kernel_size: 0,
        use_end_ptr: false,
    }
}

/// Folds `acc` accumulators down to a single vector via repeated
/// pairwise folds (§4.F). Accumulator `i`'s own successive loads are
/// always `acc` vectors apart, so at loop exit `x[i]` and `x[i+half]`
/// sit `half` vector-widths apart in the stream and are *not*
/// degree-aligned: `x[i]` must be clmul-folded forward by the
/// distance-`half` constant `k_d` (§4.A: `x^(half*vbytes*8) mod P`)
/// before it can be xored with `x[i+half]`. Each round's leftover
/// (odd `live`) merges into `x[0]` at that same round's `half`
/// distance — `x[0]` has just been re-aligned to `x[half]`'s degree,
/// which in a run of consecutive indices is always exactly `half`
/// short of the leftover index `live - 1`.
fn emit_reduction_tree(arena: &mut Arena, ctx: &mut Context, body: SBuf, acc: usize) -> Result<()> {
    if acc <= 1 {
        return Ok(());
    }
    let isa = ctx.isa;
    let vbytes = isa.vector_bytes();
    let mut live = acc;
    while live > 1 {
        let half = live / 2;
        let fold_bits = (half * vbytes * 8) as u64;
        let k_hi = ctx.poly.x_n_mod_p(fold_bits + 64);
        let k_lo = ctx.poly.x_n_mod_p(fold_bits);
        let k_const = expr::const_vector(isa, k_lo as u64, k_hi as u64);
        let vty = isa.vector_type();
        let k_var = format!("rk{half}");
        arena.put_str(body, &format!("    {vty} {k_var} = {k_const};\n"));

        for i in 0..half {
            let lo = expr::clmul_lo(isa, &format!("x[{i}]"), &k_var)?;
            let hi = expr::clmul_hi(isa, &format!("x[{i}]"), &k_var)?;
            let folded = expr::xor3(isa, &lo, &hi, &format!("x[{}]", i + half));
            arena.put_str(body, &format!("    x[{i}] = {folded};\n"));
        }
        if live % 2 != 0 {
            let lo = expr::clmul_lo(isa, "x[0]", &k_var)?;
            let hi = expr::clmul_hi(isa, "x[0]", &k_var)?;
            let folded = expr::xor3(isa, &lo, &hi, &format!("x[{}]", live - 1));
            arena.put_str(body, &format!("    x[0] = {folded};\n"));
        }
        live = half;
    }
    Ok(())
}

/// Folds one loaded vector at `ptr` into accumulator `x[idx]` in place:
/// `x[idx] = clmul_lo(x[idx],k) ^ clmul_hi(x[idx],k) ^ load(ptr)`. Shared
/// by the pre-loop's extra-load absorption and the main loop's per-
/// accumulator fold step, since both are the same FMA operation against
/// the fold constant `k` already in scope.
fn emit_fold_step(arena: &mut Arena, isa: Isa, body: SBuf, idx: usize, ptr: &str) -> Result<()> {
    let load = expr::vector_load(isa, ptr);
    let lo = expr::clmul_lo(isa, &format!("x[{idx}]"), "k")?;
    let hi = expr::clmul_hi(isa, &format!("x[{idx}]"), "k")?;
    let folded = expr::xor3(isa, &lo, &hi, &load);
    arena.put_str(body, &format!("      x[{idx}] = {folded};\n"));
    Ok(())
}

fn plain_xor(isa: Isa, a: &str, b: &str) -> String {
    match isa {
        Isa::Neon | Isa::NeonEor3 => format!("veorq_u64({a}, {b})"),
        Isa::Sse | Isa::Avx512 => format!("_mm_xor_si128({a}, {b})"),
        Isa::Avx512Vpclmulqdq => format!("_mm512_xor_si512({a}, {b})"),
        Isa::None => format!("({a} ^ {b})"),
    }
}

/// Folds the surviving single vector accumulator (possibly 512 bits wide
/// under AVX-512+VPCLMULQDQ, which needs an extra four-way ternary-xor
/// step down to 128 bits first) down through 64 bits and finally to a
/// 32-bit CRC via Barrett reduction, leaving the result in `crc`.
fn emit_final_fold(arena: &mut Arena, ctx: &mut Context, helpers: SBuf, body: SBuf, isa: Isa) -> Result<()> {
    if isa == Isa::Avx512Vpclmulqdq {
        // 512 -> 128: each of the four 128-bit lanes extracted from the
        // wide accumulator sits at its own fixed degree offset (§4.F
        // names x^{415,351,287,223}), so each lane is clmul-folded by
        // its own constant before the four results are xor-combined —
        // a plain ternary-xor with no multiply would combine four
        // differently-scaled values as if they were degree-aligned.
        let isa128 = isa.narrow128();
        arena.put_str(
            body,
            "    __m128i lane0 = _mm512_extracti32x4_epi32(x[0], 0);\n\
             \x20\x20\x20\x20__m128i lane1 = _mm512_extracti32x4_epi32(x[0], 1);\n\
             \x20\x20\x20\x20__m128i lane2 = _mm512_extracti32x4_epi32(x[0], 2);\n\
             \x20\x20\x20\x20__m128i lane3 = _mm512_extracti32x4_epi32(x[0], 3);\n",
        );

        let lanes = [("lane0", 415u64), ("lane1", 351u64), ("lane2", 287u64), ("lane3", 223u64)];
        let mut folded = Vec::with_capacity(lanes.len());
        for (name, exp) in lanes {
            let k_lo = ctx.poly.x_n_mod_p(exp);
            let k_hi = ctx.poly.x_n_mod_p(exp + 64);
            let k_const = expr::const_vector(isa128, k_lo as u64, k_hi as u64);
            let k_var = format!("k_{name}");
            arena.put_str(body, &format!("    __m128i {k_var} = {k_const};\n"));
            let lo = expr::clmul_lo(isa128, name, &k_var)?;
            let hi = expr::clmul_hi(isa128, name, &k_var)?;
            let f_var = format!("f_{name}");
            arena.put_str(body, &format!("    __m128i {f_var} = {};\n", plain_xor(isa128, &lo, &hi)));
            folded.push(f_var);
        }
        let triple = expr::xor3(isa128, &folded[0], &folded[1], &folded[2]);
        arena.put_str(
            body,
            &format!("    __m128i folded128 = {};\n", plain_xor(isa128, &triple, &folded[3])),
        );
        arena.put_str(body, "    uint32_t crc_tmp = barrett_reduce128(folded128");
    } else {
        let vty = isa.vector_type();
        arena.put_str(body, &format!("    {vty} folded128 = x[0];\n"));
        arena.put_str(body, "    uint32_t crc_tmp = barrett_reduce128(folded128");
    }

    let mu63 = ctx.poly.x_n_div_p(63);
    let mu95 = ctx.poly.x_n_div_p(95);
    ensure_barrett_reduce128(arena, ctx, helpers);
    arena.put_str(body, &format!(", 0x{mu63:016x}ULL, 0x{mu95:016x}ULL);\n"));
    arena.put_str(body, "    crc = crc_tmp;\n");
    Ok(())
}

/// Emits the 128-bit Barrett reduction helper once, shared across every
/// vector phase's final fold and [`crate::scalar`]'s Barrett-based
/// scalar CRC / `clmul_scalar` helpers, which feed it a 128-bit value
/// with only the low lane populated.
pub(crate) fn ensure_barrett_reduce128(arena: &mut Arena, ctx: &mut Context, helpers: SBuf) {
    if ctx.guards.clmul_helpers_emitted {
        return;
    }
    ctx.guards.clmul_helpers_emitted = true;
    log::debug!("emitting barrett_reduce128 helper (once-flag: clmul_helpers_emitted)");

    // Always the 128-bit sibling ISA: Avx512Vpclmulqdq's 512-bit main
    // fold has already been collapsed to a single 128-bit lane by the
    // time this runs (see emit_final_fold), so the Barrett step itself
    // is always a plain 128-bit CLMUL, never the 512-bit form.
    let isa = ctx.isa.narrow128();
    let vty = isa.vector_type();
    let build_mu = match isa {
        Isa::Neon | Isa::NeonEor3 => "(uint64x2_t) { mu63, mu95 }".to_owned(),
        Isa::Sse | Isa::Avx512 => "_mm_set_epi64x((int64_t) mu95, (int64_t) mu63)".to_owned(),
        Isa::Avx512Vpclmulqdq => {
            "_mm512_set4_epi64((int64_t) mu95, (int64_t) mu63, (int64_t) mu95, (int64_t) mu63)"
                .to_owned()
        }
        Isa::None => "mu63".to_owned(),
    };
    let t1_lo = expr::clmul_lo(isa, "v", "mu").unwrap_or_default();
    let t1_hi = expr::clmul_hi(isa, "t1", "mu").unwrap_or_default();

    arena.put_str(
        helpers,
        &format!(
            "static CRC_AINLINE uint32_t barrett_reduce128({vty} v, uint64_t mu63, uint64_t mu95) {{\n\
             \x20\x20/* Reduces the 128-bit fold accumulator to a 32-bit CRC using the\n\
             \x20\x20\x20* x^63 div P / x^95 div P Barrett constants computed for this\n\
             \x20\x20\x20* polynomial at generation time. */\n\
             \x20\x20{vty} mu = {build_mu};\n\
             \x20\x20{vty} t1 = {t1_lo};\n\
             \x20\x20{vty} t2 = {t1_hi};\n\
             \x20\x20uint64_t v_lanes[2];\n\
             \x20\x20uint64_t t2_lanes[2];\n\
             \x20\x20memcpy(v_lanes, &v, sizeof(v_lanes));\n\
             \x20\x20memcpy(t2_lanes, &t2, sizeof(t2_lanes));\n\
             \x20\x20uint64_t c = v_lanes[0] ^ t2_lanes[0];\n\
             \x20\x20return (uint32_t) (c >> 32);\n\
             }}\n"
        ),
    );
}

/// Emits the shared CLMUL-based helpers (`clmul_lo`/`clmul_hi` for NEON,
/// which — unlike x86/AVX-512 — has no single intrinsic covering both
/// halves and needs these as named wrappers) and `crc_xor_u32`, used to
/// fold the running scalar CRC into the first vector lane before the
/// main loop starts.
pub(crate) fn ensure_clmul_prelude(arena: &mut Arena, ctx: &mut Context, helpers: SBuf) {
    if ctx.guards.clmul_prelude_emitted {
        return;
    }
    ctx.guards.clmul_prelude_emitted = true;
    log::debug!("emitting clmul prelude (once-flag: clmul_prelude_emitted)");

    if ctx.isa.is_neon() {
        arena.put_str(
            helpers,
            "static CRC_AINLINE uint64x2_t clmul_lo(uint64x2_t a, uint64x2_t b) {\n\
             \x20\x20return (uint64x2_t) vmull_p64((poly64_t) vget_low_u64(a), (poly64_t) vget_low_u64(b));\n\
             }\n\
             static CRC_AINLINE uint64x2_t clmul_hi(uint64x2_t a, uint64x2_t b) {\n\
             \x20\x20return (uint64x2_t) vmull_high_p64((poly64x2_t) a, (poly64x2_t) b);\n\
             }\n",
        );
    }

    let vty = ctx.isa.vector_type();
    let load_scalar = match ctx.isa {
        Isa::Neon | Isa::NeonEor3 => "(uint64x2_t) { crc, 0 }",
        Isa::Sse | Isa::Avx512 => "_mm_set_epi64x(0, crc)",
        Isa::Avx512Vpclmulqdq => "_mm512_set4_epi64(0, 0, 0, crc)",
        Isa::None => "crc",
    };
    arena.put_str(
        helpers,
        &format!(
            "static CRC_AINLINE {vty} crc_xor_u32({vty} v, uint32_t crc) {{\n\
             \x20\x20return {};\n\
             }}\n",
            plain_xor(ctx.isa, "v", load_scalar)
        ),
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::poly::NamedPolynomial;

    #[test]
    fn vector_only_phase_emits_fold_loop() {
        let mut ctx = Context {
            isa: Isa::Sse,
            poly: NamedPolynomial::Crc32.polynomial(),
            poly_name: Some(NamedPolynomial::Crc32),
            guards: Default::default(),
        };
        let mut arena = Arena::new();
        let root = arena.root();
        let helpers = arena.splice(root);
        let body = arena.splice(root);
        let phase = Phase {
            v_acc: 2,
            v_load: 2,
            s_acc: 0,
            s_load: 0,
            kernel_size: 0,
            use_end_ptr: false,
        };
        emit_phase(&mut arena, &mut ctx, helpers, body, &phase).unwrap();
        let out = arena.flush(root).unwrap();
        assert!(out.contains("_mm_clmulepi64_si128"));
        assert!(out.contains("barrett_reduce128"));
    }

    #[test]
    fn avx512_vpclmulqdq_barrett_helper_uses_128_bit_type() {
        // emit_final_fold always collapses the 512-bit accumulator to a
        // __m128i before calling barrett_reduce128, so the helper itself
        // must be declared to take __m128i, not __m512i, or the call
        // wouldn't typecheck.
        let mut ctx = Context {
            isa: Isa::Avx512Vpclmulqdq,
            poly: NamedPolynomial::Crc32.polynomial(),
            poly_name: Some(NamedPolynomial::Crc32),
            guards: Default::default(),
        };
        let mut arena = Arena::new();
        let root = arena.root();
        let helpers = arena.splice(root);
        let body = arena.splice(root);
        let phase = Phase {
            v_acc: 1,
            v_load: 1,
            s_acc: 0,
            s_load: 0,
            kernel_size: 0,
            use_end_ptr: false,
        };
        emit_phase(&mut arena, &mut ctx, helpers, body, &phase).unwrap();
        let out = arena.flush(root).unwrap();
        assert!(out.contains("static CRC_AINLINE uint32_t barrett_reduce128(__m128i v"));
        assert!(!out.contains("barrett_reduce128(__m512i"));
        assert!(out.contains("barrett_reduce128(folded128"));
    }

    #[test]
    fn two_vector_phases_share_one_clmul_prelude() {
        let mut ctx = Context {
            isa: Isa::Sse,
            poly: NamedPolynomial::Crc32.polynomial(),
            poly_name: Some(NamedPolynomial::Crc32),
            guards: Default::default(),
        };
        let mut arena = Arena::new();
        let root = arena.root();
        let helpers = arena.splice(root);
        let body = arena.splice(root);
        let phase = Phase {
            v_acc: 1,
            v_load: 1,
            s_acc: 0,
            s_load: 0,
            kernel_size: 0,
            use_end_ptr: false,
        };
        emit_phases(&mut arena, &mut ctx, helpers, body, &[phase.clone(), phase]).unwrap();
        let out = arena.flush(root).unwrap();
        assert_eq!(out.matches("uint32_t crc_xor_u32(").count(), 1);
    }

    #[test]
    fn scalar_only_multi_acc_phase_uses_crc_shift() {
        let mut ctx = Context {
            isa: Isa::Sse,
            poly: NamedPolynomial::Crc32.polynomial(),
            poly_name: Some(NamedPolynomial::Crc32),
            guards: Default::default(),
        };
        let mut arena = Arena::new();
        let root = arena.root();
        let helpers = arena.splice(root);
        let body = arena.splice(root);
        let phase = Phase {
            v_acc: 0,
            v_load: 0,
            s_acc: 2,
            s_load: 2,
            kernel_size: 0,
            use_end_ptr: false,
        };
        emit_phase(&mut arena, &mut ctx, helpers, body, &phase).unwrap();
        let out = arena.flush(root).unwrap();
        assert!(out.contains("crc_shift"));
        assert!(out.contains("xnmodp"));
    }

    #[test]
    fn scalar_only_multi_acc_phase_uses_contiguous_regions() {
        // Each chain but the last owns a `region`-byte contiguous slice;
        // the last owns whatever remains. No chain's loop body reads
        // from an offset into another chain's slice.
        let mut ctx = Context {
            isa: Isa::Sse,
            poly: NamedPolynomial::Crc32.polynomial(),
            poly_name: Some(NamedPolynomial::Crc32),
            guards: Default::default(),
        };
        let mut arena = Arena::new();
        let root = arena.root();
        let helpers = arena.splice(root);
        let body = arena.splice(root);
        let phase = Phase {
            v_acc: 0,
            v_load: 0,
            s_acc: 3,
            s_load: 3,
            kernel_size: 0,
            use_end_ptr: false,
        };
        emit_phase(&mut arena, &mut ctx, helpers, body, &phase).unwrap();
        let out = arena.flush(root).unwrap();
        assert!(out.contains("size_t region ="));
        assert!(out.contains("c[0] = crc;"));
        assert!(out.contains("c[1] = 0;"));
        assert!(out.contains("c[2] = 0;"));
        assert!(out.contains("p += region;"));
        assert!(out.contains("crc_shift(crc, region)"));
        assert!(out.contains("crc_shift(crc, last_processed)"));
    }

    #[test]
    fn kernel_size_emits_a_fixed_trip_count_loop() {
        let mut ctx = Context {
            isa: Isa::Sse,
            poly: NamedPolynomial::Crc32.polynomial(),
            poly_name: Some(NamedPolynomial::Crc32),
            guards: Default::default(),
        };
        let mut arena = Arena::new();
        let root = arena.root();
        let helpers = arena.splice(root);
        let body = arena.splice(root);
        // vector_bytes(Sse) == 16, v_acc == 4 -> block == 64. kernel_size
        // 4096 aligns exactly, giving 64 total blocks, one of which is
        // the pre-loaded first block, leaving 63 loop iterations.
        let phase = Phase {
            v_acc: 4,
            v_load: 4,
            s_acc: 0,
            s_load: 0,
            kernel_size: 4096,
            use_end_ptr: true,
        };
        emit_phase(&mut arena, &mut ctx, helpers, body, &phase).unwrap();
        let out = arena.flush(root).unwrap();
        assert!(out.contains("for (size_t i = 0; i < 63; i++, buf += 64, len -= 64)"));
        assert!(!out.contains("const char *limit"));
    }

    #[test]
    fn v_load_exceeding_v_acc_doubles_the_block_and_folds_extra_loads() {
        // "v3x2": v_acc=3, v_load=6, so each of the 3 accumulators absorbs
        // 2 vectors per iteration (loads_per_acc=2). block = vbytes * 6 =
        // 96 on Sse (vbytes=16), not vbytes * v_acc = 48.
        let mut ctx = Context {
            isa: Isa::Sse,
            poly: NamedPolynomial::Crc32.polynomial(),
            poly_name: Some(NamedPolynomial::Crc32),
            guards: Default::default(),
        };
        let mut arena = Arena::new();
        let root = arena.root();
        let helpers = arena.splice(root);
        let body = arena.splice(root);
        let phase = Phase {
            v_acc: 3,
            v_load: 6,
            s_acc: 0,
            s_load: 0,
            kernel_size: 0,
            use_end_ptr: false,
        };
        emit_phase(&mut arena, &mut ctx, helpers, body, &phase).unwrap();
        let out = arena.flush(root).unwrap();
        assert!(out.contains("for (; len >= 96; len -= 96, buf += 96)"));
        // The pre-loop absorbs the second load per accumulator (offsets
        // 3,4,5 vectors in) via an immediate fold, before the main loop.
        assert!(out.contains("buf + 48"));
        assert!(out.contains("buf + 64"));
        assert!(out.contains("buf + 80"));
        // The main loop folds both the first-slot and second-slot loads
        // for every accumulator each iteration.
        assert!(out.matches("x[0] = ").count() >= 3);
    }
}
