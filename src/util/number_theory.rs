use crate::util;
use crate::modulus::Modulus;

/** Witnesses making Miller-Rabin deterministic below 2^64. */
const MILLER_RABIN_BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

pub fn gcd(mut x: u64, mut y: u64) -> u64 {
    while y != 0 {
        let r = x % y;
        x = y;
        y = r;
    }
    x
}

/** Extended GCD:
Returns (gcd, x, y) where gcd is the greatest common divisor of a and b.
The numbers x, y are such that gcd = ax + by.
*/
pub fn xgcd(mut x: u64, mut y: u64) -> (u64, i64, i64) {
    let (mut prev_a, mut a) = (1i64, 0i64);
    let (mut prev_b, mut b) = (0i64, 1i64);
    while y != 0 {
        let q = (x / y) as i64;
        let r = x % y;
        x = y;
        y = r;
        (prev_a, a) = (a, prev_a - q * a);
        (prev_b, b) = (b, prev_b - q * b);
    }
    (x, prev_a, prev_b)
}

pub fn try_invert_u64_mod_u64(value: u64, modulus: u64, result: &mut u64) -> bool {
    if value == 0 {return false;}
    let (cd, a, _) = xgcd(value, modulus);
    if cd != 1 {
        false
    } else if a < 0 {
        *result = (modulus as i64 + a) as u64;
        true
    } else {
        *result = a as u64;
        true
    }
}

pub fn is_prime(modulus: &Modulus) -> bool {
    let value = modulus.value();
    if value < 2 {return false;}
    for &p in MILLER_RABIN_BASES.iter() {
        if value == p {return true;}
        if value % p == 0 {return false;}
    }
    // value - 1 = 2^r * d with d odd
    let mut d = value - 1;
    let mut r = 0;
    while d & 1 == 0 {d >>= 1; r += 1;}
    'witness: for &a in MILLER_RABIN_BASES.iter() {
        let mut x = util::exponentiate_u64_mod(a, d, modulus);
        if x == 1 || x == value - 1 {continue;}
        for _ in 1..r {
            x = util::multiply_u64_mod(x, x, modulus);
            if x == value - 1 {continue 'witness;}
        }
        return false;
    }
    true
}

/**
Returns `count` distinct primes of `bit_size` bits congruent to 1 modulo `factor`,
in decreasing order, skipping the values listed in `exclude`.
*/
pub fn get_primes_excluding(factor: u64, bit_size: usize, mut count: usize, exclude: &[u64]) -> Vec<Modulus> {
    let mut destination = vec![];
    let mut value = ((0x1u64 << bit_size) - 1) / factor * factor + 1;
    let lower_bound = 0x1 << (bit_size - 1);
    while count > 0 && value > lower_bound {
        let new_mod = Modulus::new(value);
        if new_mod.is_prime() && !exclude.contains(&value) {
            destination.push(new_mod);
            count -= 1;
        }
        value -= factor;
    }
    if count > 0 {
        panic!("[Logic error] Failed to find enough qualifying primes.");
    }
    destination
}

pub fn get_primes(factor: u64, bit_size: usize, count: usize) -> Vec<Modulus> {
    get_primes_excluding(factor, bit_size, count, &[])
}

pub fn is_primitive_root(root: u64, degree: u64, modulus: &Modulus) -> bool {
    // degree is a power of two, so it suffices that root^(degree/2) = -1
    root != 0 && util::exponentiate_u64_mod(root, degree >> 1, modulus) == modulus.value() - 1
}

/**
Finds the smallest primitive `degree`-th root of unity modulo a prime.
Returns false when none exists.
*/
pub fn try_minimal_primitive_root(degree: u64, modulus: &Modulus, destination: &mut u64) -> bool {
    let group_order = modulus.value() - 1;
    if group_order % degree != 0 {return false;}
    let cofactor = group_order / degree;

    let mut root = None;
    for candidate in 2..modulus.value() {
        let r = util::exponentiate_u64_mod(candidate, cofactor, modulus);
        if is_primitive_root(r, degree, modulus) {
            root = Some(r);
            break;
        }
    }
    let root = match root {
        Some(r) => r,
        None => return false,
    };

    // The primitive roots are the odd powers of any one of them.
    let generator_sq = util::multiply_u64_mod(root, root, modulus);
    let mut current = root;
    let mut minimal = root;
    for _ in 0..(degree / 2) {
        minimal = minimal.min(current);
        current = util::multiply_u64_mod(current, generator_sq, modulus);
    }
    *destination = minimal;
    true
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_gcd() {
        assert_eq!(1, gcd(1, 1));
        assert_eq!(2, gcd(2, 2));
        assert_eq!(3, gcd(6, 15));
        assert_eq!(1, gcd(7, 15));
        assert_eq!(3, gcd(11112, 44445));

        assert_eq!(xgcd(5, 6), (1, -1, 1));
        assert_eq!(xgcd(13, 19), (1, 3, -2));
        assert_eq!(xgcd(14, 21), (7, -1, 1));
    }

    #[test]
    fn test_try_invert() {
        let mut r = 0;
        assert!(try_invert_u64_mod_u64(5, 19, &mut r));
        assert_eq!(r, 4);
        assert!(!try_invert_u64_mod_u64(12345, 3, &mut r));
        assert!(try_invert_u64_mod_u64(3, 65537, &mut r));
        assert_eq!(3 * r % 65537, 1);
    }

    #[test]
    fn test_is_prime() {
        assert!(!is_prime(&Modulus::new(0)));
        assert!(is_prime(&Modulus::new(2)));
        assert!(!is_prime(&Modulus::new(221)));
        assert!(is_prime(&Modulus::new(65537)));
        assert!(!is_prime(&Modulus::new(72307 * 59399)));
        assert!(is_prime(&Modulus::new(36893488147419103)));
        assert!(!is_prime(&Modulus::new(36893488147419107)));
    }

    #[test]
    fn test_get_primes() {
        let primes = get_primes(32, 20, 3);
        assert_eq!(primes.len(), 3);
        for p in &primes {
            assert_eq!(p.value() % 32, 1);
            assert_eq!(util::get_significant_bit_count(p.value()), 20);
        }
        let skipped = get_primes_excluding(32, 20, 2, &[primes[0].value()]);
        assert_eq!(skipped[0], primes[1]);
    }

    #[test]
    fn test_minimal_primitive_root() {
        let mut r = 0;
        assert!(try_minimal_primitive_root(2, &Modulus::new(11), &mut r));
        assert_eq!(r, 10);
        assert!(try_minimal_primitive_root(4, &Modulus::new(29), &mut r));
        assert_eq!(r, 12);
        assert!(try_minimal_primitive_root(8, &Modulus::new(1234565441), &mut r));
        assert_eq!(r, 249725733);
        assert!(!try_minimal_primitive_root(64, &Modulus::new(29), &mut r));
    }
}
