//! Top-level orchestration (§4.G).
//!
//! [`generate`] is the crate's single public entry point: it validates
//! the `(isa, polynomial, algorithm)` triple, then drives the buffer
//! arena through a fixed prelude, the per-phase loop synthesis in
//! [`crate::loopgen`], and a final flush.

use crate::algo;
use crate::buffer::Arena;
use crate::error::Result;
use crate::isa::Isa;
use crate::loopgen;
use crate::poly::{NamedPolynomial, Polynomial};
use crate::scalar;

/// Once-only emission guards threaded through every module that can emit
/// a shared helper. Centralising these on `Context` (rather than one
/// flag per call site) is what makes "emit this helper the first time
/// it's needed, never again" composable across `scalar`/`loopgen`.
#[derive(Default)]
pub struct Guards {
    pub xnmodp_emitted: bool,
    pub crc_shift_emitted: bool,
    pub hw_crc_emitted: Vec<u8>,
    pub barrett_emitted: Vec<u8>,
    pub table_fn_emitted: Vec<u8>,
    pub crc_table_planes: u8,
    pub crc_table_buf: Option<crate::buffer::SBuf>,
    pub clmul_helpers_emitted: bool,
    pub clmul_prelude_emitted: bool,
    pub clmul_scalar_emitted: bool,
}

/// Carries the run's fixed inputs and mutable emission state through
/// every stage of generation.
pub struct Context {
    pub isa: Isa,
    pub poly: Polynomial,
    pub poly_name: Option<NamedPolynomial>,
    pub guards: Guards,
}

impl Context {
    fn new(isa: Isa, poly: Polynomial, poly_name: Option<NamedPolynomial>) -> Self {
        Context {
            isa,
            poly,
            poly_name,
            guards: Guards::default(),
        }
    }
}

/// Generates a complete, self-contained C source file implementing a
/// CRC-32 update function for `polynomial`, specialised for `isa`, whose
/// inner loop shape follows `algo_text` (§3's mini-grammar).
///
/// Returns the full file text on success. Any malformed input, or any
/// combination the chosen ISA cannot support, is reported as a single
/// [`crate::error::GenError`] — there is no partial-output contract.
pub fn generate(
    isa: Isa,
    poly: Polynomial,
    poly_name: Option<NamedPolynomial>,
    algo_text: &str,
) -> Result<String> {
    let phases = algo::parse(algo_text, isa)?;
    let mut ctx = Context::new(isa, poly, poly_name);

    let mut arena = Arena::new();
    let root = arena.root();

    emit_prelude(&mut arena, root, &ctx, algo_text);

    let helpers = arena.splice(root);
    let body = arena.splice(root);

    arena.put_str(
        body,
        "CRC_EXPORT uint32_t\ncrc32_impl(uint32_t crc, const char *buf, size_t len) {\n\
         \x20\x20crc = ~crc;\n",
    );

    loopgen::emit_phases(&mut arena, &mut ctx, helpers, body, &phases)?;

    emit_remainder(&mut arena, &mut ctx, helpers, body);

    arena.put_str(body, "  return ~crc;\n}\n");

    arena.flush(root)
}

/// After every phase has run, `len` may still hold up to one phase's
/// worth of bytes short of a full block (a vector-only phase in
/// particular leaves anything smaller than its block size untouched).
/// Drains it down to zero with the ISA's natural scalar width, then a
/// final byte-at-a-time loop — the two trailing steps of §4.F's
/// top-level sketch, shared by every phase combination rather than
/// threaded through each phase emitter individually.
fn emit_remainder(arena: &mut Arena, ctx: &mut Context, helpers: crate::buffer::SBuf, body: crate::buffer::SBuf) {
    let natural_width = (ctx.isa.scalar_bytes() * 8) as u8;
    scalar::ensure_scalar_helpers(arena, ctx, helpers, natural_width);
    let natural_bytes = ctx.isa.scalar_bytes();
    arena.put_str(
        body,
        &format!(
            "  for (; len >= {natural_bytes}; len -= {natural_bytes}, buf += {natural_bytes}) {{\n\
             \x20\x20\x20\x20crc = crc_u{natural_width}(crc, buf);\n\
             \x20\x20}}\n"
        ),
    );

    {
        scalar::ensure_scalar_helpers(arena, ctx, helpers, 8);
        arena.put_str(
            body,
            "  for (; len >= 1; len -= 1, buf += 1) {\n\
             \x20\x20\x20\x20crc = crc_u8(crc, buf);\n\
             \x20\x20}\n",
        );
    }
}

/// Writes the fixed file header: a comment reproducing the generating
/// invocation (§6 "Output format": "a comment header reproducing the
/// full invocation"), the always-needed standard headers, the ISA's
/// intrinsic header if any, then the `CRC_AINLINE`/`CRC_ALIGN`/
/// `CRC_EXPORT` macro block.
///
/// The polynomial is rendered as its canonical name when one was given,
/// else the forward (non-reflected) 8-hex-digit literal a user would
/// have typed on the command line — `generate`'s three parameters
/// (`isa`, `poly`, `algo_text`) are exactly the CLI's `-i`/`-p`/`-a`
/// flags; `-o` has no bearing on the emitted text itself.
fn emit_prelude(arena: &mut Arena, root: crate::buffer::SBuf, ctx: &Context, algo_text: &str) {
    let poly_text = match ctx.poly_name {
        Some(named) => format!("{named:?}").to_ascii_lowercase(),
        None => format!("0x{:08x}", crate::poly::reverse32(ctx.poly.0)),
    };
    arena.put_str(
        root,
        &format!(
            "// Generated by crc32gen -i {isa} -p {poly_text} -a {algo_text}\n\
             // Do not edit by hand.\n\
             #include <stddef.h>\n\
             #include <stdint.h>\n\
             #include <string.h>\n\n",
            isa = ctx.isa
        ),
    );

    if let Some(header) = ctx.isa.intrinsic_header() {
        arena.put_str(root, &format!("#include <{header}>\n\n"));
    }

    arena.put_str(
        root,
        "#if defined(__GNUC__) || defined(__clang__)\n\
         #define CRC_AINLINE static inline __attribute__((always_inline))\n\
         #define CRC_ALIGN(n) __attribute__((aligned(n)))\n\
         #else\n\
         #define CRC_AINLINE static inline\n\
         #define CRC_ALIGN(n)\n\
         #endif\n\n\
         #if defined(_WIN32) && defined(CRC_DLL)\n\
         #define CRC_EXPORT __declspec(dllexport)\n\
         #else\n\
         #define CRC_EXPORT\n\
         #endif\n\n",
    );
}
