//! Error types for the generator.
//!
//! Every fallible entry point in this crate returns `Result<_, GenError>`.
//! There is exactly one error channel: generation either fully succeeds
//! or fails with one diagnostic (§7 of the design: "no error is
//! recoverable; there is no partial-output contract").

use thiserror::Error;

/// All ways generation can fail.
///
/// The first group of variants are input-validation errors (malformed
/// user-supplied ISA/polynomial/algorithm text); the second group are
/// internal invariant violations that indicate a bug in the generator
/// itself rather than bad input. Both are fatal and non-recoverable.
#[derive(Debug, Error)]
pub enum GenError {
    /// An ISA name didn't match any of the known tags.
    #[error("unknown ISA {0:?}")]
    UnknownIsa(String),

    /// A polynomial literal wasn't a known name and didn't parse as hex.
    #[error("malformed polynomial literal {0:?}")]
    BadPolynomial(String),

    /// A 9-hex-digit polynomial literal didn't have a leading `1`.
    #[error("9-digit polynomial literal {0:?} must have an implicit leading 1 (x^32 term)")]
    BadPolynomialLeadingDigit(String),

    /// The algorithm string has a `v`/`s`/`k`/`x` term with no digits
    /// after it.
    #[error("algorithm string {algo:?}: expected digits after '{term}' at offset {offset}")]
    MissingDigits {
        algo: String,
        term: char,
        offset: usize,
    },

    /// The algorithm string contains a character outside `[vskxe0-9_]`.
    #[error("algorithm string {algo:?}: unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar { algo: String, ch: char, offset: usize },

    /// An `x` term followed a `k` term, which the grammar forbids.
    #[error("algorithm string {algo:?}: 'x' cannot follow 'k' at offset {offset}")]
    XAfterK { algo: String, offset: usize },

    /// `v_load`/`v_acc` or `s_load`/`s_acc` failed their divisibility
    /// constraint.
    #[error(
        "algorithm string {algo:?}: {kind} load count {load} is not a multiple of {kind} \
         accumulator count {acc}"
    )]
    NotDivisible {
        algo: String,
        kind: &'static str,
        load: usize,
        acc: usize,
    },

    /// A phase asked for vector lanes, or more than one scalar
    /// accumulator, under `Isa::None`.
    #[error(
        "algorithm string {algo:?}: phase requires vector lanes or multiple scalar \
         accumulators, which ISA `none` cannot provide"
    )]
    UnsupportedUnderIsaNone { algo: String },

    /// The indent-applying writer's brace nesting exceeded the bound (16).
    #[error("indent nesting depth exceeded (max 16)")]
    IndentDepthExceeded,

    /// The deferred-buffer flush walker encountered a tag byte it didn't
    /// recognise. This can only happen if a buffer was corrupted by a
    /// bug in this crate.
    #[error("unrecognised control-record tag {0} in deferred buffer")]
    BadControlTag(u8),

    /// A primitive emitter (e.g. a specific `clmul` shape) was asked for
    /// on an ISA that cannot provide it. Indicates a bug in the loop
    /// synthesiser's ISA dispatch, not bad user input.
    #[error("primitive {primitive} is not available on ISA {isa}")]
    UnsupportedPrimitive {
        primitive: &'static str,
        isa: &'static str,
    },

    /// Writing the generated source to its output path failed.
    #[error("writing output to {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, GenError>;
