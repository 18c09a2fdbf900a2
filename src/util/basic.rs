pub const HE_MOD_BIT_COUNT_MAX: usize = 61;

pub const HE_POLY_MOD_DEGREE_MAX: usize = 131072;
pub const HE_POLY_MOD_DEGREE_MIN: usize = 2;

pub const HE_COEFF_MOD_COUNT_MAX: usize = 64;
pub const HE_COEFF_MOD_COUNT_MIN: usize = 1;

pub const HE_USER_MOD_BIT_COUNT_MAX: usize = 60;
pub const HE_USER_MOD_BIT_COUNT_MIN: usize = 2;

/// Bit size of the primes of the auxiliary tensoring basis.
pub const HE_INTERNAL_MOD_BIT_COUNT: usize = 61;

pub const HE_PRNG_SEED_BYTES: usize = 64;

#[inline]
pub fn get_significant_bit_count(value: u64) -> usize {
    if value == 0 {0}
    else {64 - value.leading_zeros() as usize}
}

#[inline]
pub fn get_power_of_two(value: u64) -> isize {
    if value == 0 || (value & (value - 1)) != 0 {-1}
    else {63 - value.leading_zeros() as isize}
}

#[inline]
pub fn reverse_bits_u32(operand: u32, bit_count: usize) -> u32 {
    if bit_count == 0 {
        0
    } else {
        operand.reverse_bits() >> (32 - bit_count)
    }
}

#[inline]
pub fn reverse_bits_u64(operand: u64, bit_count: usize) -> u64 {
    if bit_count == 0 {
        0
    } else {
        operand.reverse_bits() >> (64 - bit_count)
    }
}

#[inline]
pub fn divide_round_up_usize(value: usize, divisor: usize) -> usize {
    (value + divisor - 1) / divisor
}

/** Number of significant bits of the product of the given values. */
pub fn product_bit_count(values: &[u64]) -> usize {
    // Multiprecision product, little-endian words.
    let mut product = vec![1u64];
    for &v in values {
        let mut carry = 0u128;
        for word in product.iter_mut() {
            let t = (*word as u128) * (v as u128) + carry;
            *word = t as u64;
            carry = t >> 64;
        }
        if carry > 0 {product.push(carry as u64);}
    }
    let top = product.len() - 1;
    64 * top + get_significant_bit_count(product[top])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_helpers() {
        assert_eq!(get_significant_bit_count(0), 0);
        assert_eq!(get_significant_bit_count(1), 1);
        assert_eq!(get_significant_bit_count(0x8000_0000_0000_0000), 64);
        assert_eq!(get_power_of_two(16), 4);
        assert_eq!(get_power_of_two(12), -1);
        assert_eq!(reverse_bits_u64(1, 3), 4);
        assert_eq!(reverse_bits_u32(6, 3), 3);
    }

    #[test]
    fn test_product_bit_count() {
        assert_eq!(product_bit_count(&[]), 1);
        assert_eq!(product_bit_count(&[3, 5]), 4);
        assert_eq!(product_bit_count(&[1 << 40, 1 << 40, 1 << 40]), 121);
    }
}
