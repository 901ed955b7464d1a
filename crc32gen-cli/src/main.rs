//! Command-line front end for `crc32gen-core` (§6).
//!
//! ```text
//! crc32gen -i <isa> -p <polynomial> -a <algorithm> [-o <output>]
//! ```
//!
//! `-p` accepts a canonical name (`crc32`, `crc32c`, `crc32k`, `crc32k2`,
//! `crc32q`, case-insensitive) or a hex literal: 8 digits for a forward
//! 32-bit polynomial with the `x^32` term implicit, or 9 digits with an
//! explicit leading `1` making that term explicit.

use clap::Parser;
use crc32gen_core::error::GenError;
use crc32gen_core::poly::{reverse32, NamedPolynomial, Polynomial};
use crc32gen_core::{generate, Isa};
use std::fs;
use std::io::Write as _;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "crc32gen", about = "Specialising CRC-32 inner-loop generator")]
struct Args {
    /// Target instruction set: none, neon, neon_eor3, sse (alias: avx,
    /// avx2), avx512, avx512_vpclmulqdq.
    #[arg(short = 'i', long = "isa")]
    isa: String,

    /// CRC-32 polynomial: a canonical name, or an 8/9-hex-digit literal.
    #[arg(short = 'p', long = "polynomial")]
    polynomial: String,

    /// Algorithm string describing the inner-loop shape (§3).
    #[arg(short = 'a', long = "algorithm")]
    algorithm: String,

    /// Output path; '-' or omitted writes to stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<String>,
}

fn parse_polynomial(text: &str) -> Result<(Polynomial, Option<NamedPolynomial>), GenError> {
    if let Some(named) = NamedPolynomial::from_name(text) {
        return Ok((named.polynomial(), Some(named)));
    }

    let hex = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text);
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) || hex.is_empty() {
        return Err(GenError::BadPolynomial(text.to_owned()));
    }

    let forward: u32 = match hex.len() {
        8 => u32::from_str_radix(hex, 16).map_err(|_| GenError::BadPolynomial(text.to_owned()))?,
        9 => {
            if !hex.starts_with('1') {
                return Err(GenError::BadPolynomialLeadingDigit(text.to_owned()));
            }
            let low8 = &hex[1..];
            u32::from_str_radix(low8, 16).map_err(|_| GenError::BadPolynomial(text.to_owned()))?
        }
        _ => return Err(GenError::BadPolynomial(text.to_owned())),
    };

    Ok((Polynomial(reverse32(forward)), None))
}

fn run() -> Result<(), GenError> {
    env_logger::init();
    let args = Args::parse();

    let isa = Isa::from_name(&args.isa).ok_or_else(|| GenError::UnknownIsa(args.isa.clone()))?;
    let (poly, poly_name) = parse_polynomial(&args.polynomial)?;

    log::info!(
        "generating isa={} polynomial={} algorithm={:?}",
        isa,
        args.polynomial,
        args.algorithm
    );

    let source = generate(isa, poly, poly_name, &args.algorithm)?;

    match args.output.as_deref() {
        None | Some("-") => {
            print!("{source}");
        }
        Some(path) => {
            fs::write(path, source).map_err(|e| GenError::Io {
                path: path.to_owned(),
                source: e,
            })?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ = writeln!(std::io::stderr(), "FATAL error at crc32gen: {err}");
            ExitCode::FAILURE
        }
    }
}
