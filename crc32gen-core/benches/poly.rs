//! Let's compare the two ways of computing `x^n mod P`: the O(log n)
//! square-and-reduce ladder we actually ship, against the naive
//! bit-at-a-time reference used to check it in tests.

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::BatchSize;
use criterion::Criterion;
use crc32gen_core::poly::NamedPolynomial;
use std::iter;

fn naive_x_n_mod_p(p: u32, n: u64) -> u32 {
    let mut r: u32 = 1;
    for _ in 0..n {
        r = (r >> 1) ^ (p & 0u32.wrapping_sub(r & 1));
    }
    r
}

fn bench_poly(c: &mut Criterion) {
    let mut group = c.benchmark_group("poly");

    // xorshift64 for deterministic random numbers
    fn xorshift64(seed: u64) -> impl Iterator<Item = u64> {
        let mut x = seed;
        iter::repeat_with(move || {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            x
        })
    }

    let poly = NamedPolynomial::Crc32.polynomial();

    let mut ns = xorshift64(42).map(|n| n % 65536);
    group.bench_function("x_n_mod_p", |b| {
        b.iter_batched(
            || ns.next().unwrap(),
            |n| poly.x_n_mod_p(n),
            BatchSize::SmallInput,
        )
    });

    let mut ns = xorshift64(42).map(|n| n % 65536);
    group.bench_function("naive_x_n_mod_p", |b| {
        b.iter_batched(
            || ns.next().unwrap(),
            |n| naive_x_n_mod_p(poly.0, n),
            BatchSize::SmallInput,
        )
    });

    let mut ns = xorshift64(42 * 42).map(|n| (n % 64) as u32);
    group.bench_function("x_n_div_p", |b| {
        b.iter_batched(
            || ns.next().unwrap(),
            |n| poly.x_n_div_p(n),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_poly);
criterion_main!(benches);
