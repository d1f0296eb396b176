//! Small number-theory helpers: exponent primality, the known Mersenne
//! primes, digit counts and factor verification.

const WHEEL_OFFSETS: [u64; 8] = [0, 4, 6, 10, 12, 16, 22, 24];

pub const KNOWN_MERSENNE_PRIME_EXPONENTS: [u64; 51] = [
    2, 3, 5, 7, 13, 17, 19, 31, 61, 89, 107, 127, 521, 607, 1279, 2203, 2281, 3217, 4253, 4423,
    9689, 9941, 11213, 19937, 21701, 23209, 44497, 86243, 110503, 132049, 216091, 756839, 859433,
    1257787, 1398269, 2976221, 3021377, 6972593, 13466917, 20996011, 24036583, 25964951, 30402457,
    32582657, 37156667, 42643801, 43112609, 57885161, 74207281, 77232917, 82589933,
];

/// Trial division over a mod-30 wheel.
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if matches!(n, 2 | 3 | 5) {
        return true;
    }
    if n % 2 == 0 || n % 3 == 0 || n % 5 == 0 {
        return false;
    }
    let mut p: u64 = 7;
    while p.saturating_mul(p) <= n {
        for offset in WHEEL_OFFSETS {
            let candidate = p + offset;
            if candidate.saturating_mul(candidate) > n {
                return true;
            }
            if n % candidate == 0 {
                return false;
            }
        }
        p += 30;
    }
    true
}

pub fn is_known_mersenne_prime(exponent: u64) -> bool {
    KNOWN_MERSENNE_PRIME_EXPONENTS.binary_search(&exponent).is_ok()
}

/// Decimal digits of `2^p - 1`, as `floor(p·log10 2 + 1)`.
pub fn digits(exponent: u64) -> u64 {
    (exponent as f64 * std::f64::consts::LOG10_2 + 1.0) as u64
}

/// Whether `factor` divides `2^exponent - 1`, or `None` when the factor is
/// not a number this check can handle.
pub fn divides_mersenne(exponent: u64, factor: &str) -> Option<bool> {
    let modulus: u128 = factor.trim().parse().ok()?;
    if modulus < 2 {
        return None;
    }
    Some(pow_mod(2, exponent, modulus) == 1 % modulus)
}

fn add_mod(a: u128, b: u128, m: u128) -> u128 {
    if a >= m - b {
        a - (m - b)
    } else {
        a + b
    }
}

fn mul_mod(a: u128, b: u128, m: u128) -> u128 {
    if let Some(product) = a.checked_mul(b) {
        return product % m;
    }
    let mut result = 0;
    let mut a = a % m;
    let mut b = b % m;
    while b > 0 {
        if b & 1 == 1 {
            result = add_mod(result, a, m);
        }
        a = add_mod(a, a, m);
        b >>= 1;
    }
    result
}

fn pow_mod(base: u128, mut exponent: u64, m: u128) -> u128 {
    let mut result = 1 % m;
    let mut base = base % m;
    while exponent > 0 {
        if exponent & 1 == 1 {
            result = mul_mod(result, base, m);
        }
        base = mul_mod(base, base, m);
        exponent >>= 1;
    }
    result
}
