//! `crc32gen-core`: a specialising code generator for CRC-32 inner
//! loops.
//!
//! Given an instruction-set tag, a 32-bit polynomial, and a short
//! algorithm string describing the desired loop shape, [`generate`]
//! emits a self-contained C translation unit implementing
//! `uint32_t crc32_impl(uint32_t crc, const char *buf, size_t len)`
//! specialised for all three.
//!
//! The modules mirror the pipeline a run goes through:
//!
//! - [`poly`] — GF(2) polynomial arithmetic (`x^n mod P`, `x^n div P`).
//! - [`algo`] — parses the algorithm mini-grammar into [`algo::Phase`]s.
//! - [`isa`] — per-ISA shape of every hardware primitive.
//! - [`buffer`] — the deferred, DAG-shaped text buffer emission goes
//!   through.
//! - [`scalar`] — scalar `crc_u8`/`crc_u32`/`crc_u64` helper emission.
//! - [`loopgen`] — the loop synthesiser proper.
//! - [`driver`] — top-level orchestration ([`generate`]).

pub mod algo;
pub mod buffer;
pub mod driver;
pub mod error;
pub mod isa;
pub mod loopgen;
pub mod poly;
pub mod scalar;

pub use driver::generate;
pub use error::{GenError, Result};
pub use isa::Isa;
pub use poly::{NamedPolynomial, Polynomial};
