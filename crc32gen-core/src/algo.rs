//! Algorithm-string parser.
//!
//! Grammar (whitespace-free):
//!
//! ```text
//! algo   := phase ("_" phase)*
//! phase  := term*
//! term   := ("v"|"s") N ("x" M)?   |   "k" N   |   "e"
//! N, M   := [0-9]+
//! ```
//!
//! Each phase accumulates terms independently; `_` starts a fresh phase
//! and links it after the previous one. See [`Phase`] for the resulting
//! record and its invariants.

use crate::error::{GenError, Result};
use crate::isa::Isa;

/// One self-contained inner-loop shape, parsed out of one `_`-separated
/// segment of an algorithm string.
///
/// Immutable after parsing. A configuration with multiple phases chains
/// them: the first phase's loop runs while its block size fits in the
/// remaining input, the remainder flows into the next phase.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Phase {
    /// Number of vector accumulators (0 if this phase has no vector work).
    pub v_acc: usize,
    /// Number of vector loads per iteration; a multiple of `v_acc` when
    /// `v_acc != 0`.
    pub v_load: usize,
    /// Number of scalar accumulators.
    pub s_acc: usize,
    /// Number of scalar loads per iteration; a multiple of `s_acc` when
    /// `s_acc != 0`.
    pub s_load: usize,
    /// If nonzero, fixes the iteration count so the inner loop runs a
    /// constant number of times over `kernel_size` bytes of input.
    pub kernel_size: usize,
    /// When true, inner loop termination compares a pointer against a
    /// precomputed limit (`buf <= limit`) instead of counting down `len`.
    pub use_end_ptr: bool,
}

impl Phase {
    fn empty() -> Self {
        Phase {
            v_acc: 0,
            v_load: 0,
            s_acc: 0,
            s_load: 0,
            kernel_size: 0,
            use_end_ptr: false,
        }
    }

    /// A phase with neither vector nor scalar terms defaults to one
    /// scalar accumulator processing one load per iteration.
    fn finish(mut self, algo: &str, isa: Isa) -> Result<Self> {
        if self.v_acc == 0 && self.s_acc == 0 {
            self.s_acc = 1;
            self.s_load = 1;
        }

        if self.v_load % self.v_acc.max(1) != 0 {
            return Err(GenError::NotDivisible {
                algo: algo.to_owned(),
                kind: "vector",
                load: self.v_load,
                acc: self.v_acc,
            });
        }
        if self.s_load % self.s_acc.max(1) != 0 {
            return Err(GenError::NotDivisible {
                algo: algo.to_owned(),
                kind: "scalar",
                load: self.s_load,
                acc: self.s_acc,
            });
        }

        if isa == Isa::None && (self.v_acc != 0 || self.s_acc > 1) {
            return Err(GenError::UnsupportedUnderIsaNone {
                algo: algo.to_owned(),
            });
        }

        Ok(self)
    }
}

/// Parses a full algorithm string into its phase list.
///
/// `isa` is needed at parse time because ISA=NONE forbids vector work
/// and multi-accumulator scalar chains (§3).
pub fn parse(algo: &str, isa: Isa) -> Result<Vec<Phase>> {
    let mut phases = Vec::new();
    for segment in algo.split('_') {
        phases.push(parse_phase(algo, segment, isa)?);
    }
    Ok(phases)
}

fn parse_phase(full_algo: &str, segment: &str, isa: Isa) -> Result<Phase> {
    let chars: Vec<char> = segment.chars().collect();
    let mut i = 0;
    let mut phase = Phase::empty();

    while i < chars.len() {
        let c = chars[i];
        match c {
            'v' | 's' => {
                i += 1;
                let (n, next) = read_digits(full_algo, segment, &chars, i, c)?;
                i = next;

                // optional "x M" suffix
                let mut m = 1usize;
                if i < chars.len() && chars[i] == 'x' {
                    i += 1;
                    let (xm, next) = read_digits(full_algo, segment, &chars, i, 'x')?;
                    m = xm;
                    i = next;
                }

                if c == 'v' {
                    phase.v_acc = phase.v_acc.max(n);
                    phase.v_load += n * m;
                } else {
                    phase.s_acc = phase.s_acc.max(n);
                    phase.s_load += n * m;
                }
            }
            'k' => {
                i += 1;
                let (n, next) = read_digits(full_algo, segment, &chars, i, 'k')?;
                i = next;
                phase.kernel_size = n;

                // "x" is not permitted after "k"
                if i < chars.len() && chars[i] == 'x' {
                    return Err(GenError::XAfterK {
                        algo: full_algo.to_owned(),
                        offset: i,
                    });
                }
            }
            'e' => {
                // The scanner tolerates 'e' appearing anywhere in a
                // phase, interleaved freely with 'k' or accumulator
                // terms. See SPEC_FULL.md / DESIGN.md "Open Questions"
                // for why this laxity is preserved rather than tightened.
                phase.use_end_ptr = true;
                i += 1;
            }
            other => {
                return Err(GenError::UnexpectedChar {
                    algo: full_algo.to_owned(),
                    ch: other,
                    offset: i,
                });
            }
        }
    }

    phase.finish(full_algo, isa)
}

/// Reads a run of ASCII digits starting at `start`, returning the parsed
/// value and the index just past the digits. `term` names which term
/// character the digits are expected to follow, for error messages.
fn read_digits(
    full_algo: &str,
    _segment: &str,
    chars: &[char],
    start: usize,
    term: char,
) -> Result<(usize, usize)> {
    let mut end = start;
    while end < chars.len() && chars[end].is_ascii_digit() {
        end += 1;
    }
    if end == start {
        return Err(GenError::MissingDigits {
            algo: full_algo.to_owned(),
            term,
            offset: start,
        });
    }
    let text: String = chars[start..end].iter().collect();
    let n = text.parse::<usize>().unwrap_or(usize::MAX);
    Ok((n, end))
}

#[cfg(test)]
mod test {
    use super::*;

    fn p(v_acc: usize, v_load: usize, s_acc: usize, s_load: usize) -> Phase {
        Phase {
            v_acc,
            v_load,
            s_acc,
            s_load,
            kernel_size: 0,
            use_end_ptr: false,
        }
    }

    #[test]
    fn s1_defaults_to_one_scalar_chain() {
        let phases = parse("s1", Isa::Sse).unwrap();
        assert_eq!(phases, vec![p(0, 0, 1, 1)]);
    }

    #[test]
    fn v4_sets_four_vector_accumulators() {
        let phases = parse("v4", Isa::Sse).unwrap();
        assert_eq!(phases, vec![p(4, 4, 0, 0)]);
    }

    #[test]
    fn v3x2_multiplies_load_by_the_x_suffix() {
        let phases = parse("v3x2", Isa::Sse).unwrap();
        assert_eq!(phases, vec![p(3, 6, 0, 0)]);
    }

    #[test]
    fn two_phase_algorithm_with_kernel_and_end_ptr() {
        let phases = parse("v4s3x3k4096e_s1", Isa::Sse).unwrap();
        assert_eq!(phases.len(), 2);
        assert_eq!(
            phases[0],
            Phase {
                v_acc: 4,
                v_load: 4,
                s_acc: 3,
                s_load: 9,
                kernel_size: 4096,
                use_end_ptr: true,
            }
        );
        assert_eq!(phases[1], p(0, 0, 1, 1));
    }

    #[test]
    fn vectors_rejected_under_isa_none() {
        let err = parse("v3x2", Isa::None).unwrap_err();
        assert!(matches!(err, GenError::UnsupportedUnderIsaNone { .. }));
    }

    #[test]
    fn multiple_scalar_accumulators_rejected_under_isa_none() {
        let err = parse("s2", Isa::None).unwrap_err();
        assert!(matches!(err, GenError::UnsupportedUnderIsaNone { .. }));
    }

    #[test]
    fn single_scalar_accumulator_allowed_under_isa_none() {
        let phases = parse("s1", Isa::None).unwrap();
        assert_eq!(phases, vec![p(0, 0, 1, 1)]);
    }

    #[test]
    fn missing_digits_is_an_error() {
        let err = parse("v", Isa::Sse).unwrap_err();
        assert!(matches!(err, GenError::MissingDigits { .. }));
    }

    #[test]
    fn unknown_character_is_an_error() {
        let err = parse("z3", Isa::Sse).unwrap_err();
        assert!(matches!(err, GenError::UnexpectedChar { .. }));
    }

    #[test]
    fn x_after_k_is_an_error() {
        let err = parse("k4096x2", Isa::Sse).unwrap_err();
        assert!(matches!(err, GenError::XAfterK { .. }));
    }

    #[test]
    fn non_divisible_load_is_an_error() {
        // Two v-terms with different N accumulate into v_acc=max(3,5)=5
        // but v_load=3+5=8, which 5 doesn't divide.
        let err = parse("v3v5", Isa::Sse).unwrap_err();
        assert!(matches!(err, GenError::NotDivisible { .. }));
    }

    #[test]
    fn e_anywhere_in_a_phase_is_tolerated() {
        // The scanner is deliberately lax about where 'e' sits relative
        // to other terms; both orderings below must parse identically.
        let a = parse("v4k1024e", Isa::Sse).unwrap();
        let b = parse("v4ek1024", Isa::Sse).unwrap();
        assert_eq!(a, b);
    }

    proptest::proptest! {
        #[test]
        fn parse_never_panics_on_arbitrary_input(s in "[a-z0-9_]{0,24}") {
            let _ = parse(&s, Isa::Sse);
            let _ = parse(&s, Isa::None);
        }

        #[test]
        fn well_formed_terms_always_parse(
            v in 1usize..8, vm in 1usize..4,
            s in 1usize..8, sm in 1usize..4,
        ) {
            let algo = format!("v{v}x{vm}s{s}x{sm}");
            let phases = parse(&algo, Isa::Sse).unwrap();
            proptest::prop_assert_eq!(phases.len(), 1);
            proptest::prop_assert_eq!(phases[0].v_acc, v);
            proptest::prop_assert_eq!(phases[0].s_acc, s);
        }
    }
}
