use crate::modulus::Modulus;

use super::try_invert_u64_mod_u64;

/** `operand` must be at most modulus */
#[inline]
pub fn negate_u64_mod(operand: u64, modulus: &Modulus) -> u64 {
    if operand == 0 {0} else {modulus.value() - operand}
}

/** Both operands must be less than modulus. */
#[inline]
pub fn add_u64_mod(operand1: u64, operand2: u64, modulus: &Modulus) -> u64 {
    let sum = operand1 + operand2;
    if sum >= modulus.value() {sum - modulus.value()} else {sum}
}

/** Both operands must be less than modulus. */
#[inline]
pub fn sub_u64_mod(operand1: u64, operand2: u64, modulus: &Modulus) -> u64 {
    if operand1 >= operand2 {operand1 - operand2} else {operand1 + modulus.value() - operand2}
}

/**
Reduces a 128-bit input with base 2^64 Barrett reduction.
Any 128-bit value is accepted.
*/
#[inline]
pub fn barrett_reduce_u128(input: u128, modulus: &Modulus) -> u64 {
    let (lo, hi) = (input as u64, (input >> 64) as u64);
    let ratio = modulus.const_ratio();

    // Round 1
    let carry = ((lo as u128 * ratio[0] as u128) >> 64) as u64;
    let t = lo as u128 * ratio[1] as u128 + carry as u128;
    let (mid, upper) = (t as u64, (t >> 64) as u64);

    // Round 2
    let t = hi as u128 * ratio[0] as u128 + mid as u128;
    let carry = (t >> 64) as u64;

    let quotient = hi.wrapping_mul(ratio[1]).wrapping_add(upper).wrapping_add(carry);
    let r = lo.wrapping_sub(quotient.wrapping_mul(modulus.value()));
    if r >= modulus.value() {r - modulus.value()} else {r}
}

#[inline]
pub fn barrett_reduce_u64(input: u64, modulus: &Modulus) -> u64 {
    let ratio = modulus.const_ratio();
    let quotient = ((input as u128 * ratio[1] as u128) >> 64) as u64;
    let r = input - quotient * modulus.value();
    if r >= modulus.value() {r - modulus.value()} else {r}
}

#[inline]
pub fn multiply_u64_mod(operand1: u64, operand2: u64, modulus: &Modulus) -> u64 {
    barrett_reduce_u128(operand1 as u128 * operand2 as u128, modulus)
}

/**
An operand together with the precomputed quotient (operand << 64) / modulus.
Multiplying by it is a Shoup-style variant of Barrett reduction.
Operand must be less than modulus.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MultiplyU64ModOperand {
    pub operand: u64,
    pub quotient: u64,
}

impl MultiplyU64ModOperand {

    pub fn new(operand: u64, modulus: &Modulus) -> Self {
        let quotient = (((operand as u128) << 64) / modulus.value() as u128) as u64;
        MultiplyU64ModOperand { operand, quotient }
    }

}

/** Returns x * y mod modulus; y must be less than modulus. */
#[inline]
pub fn multiply_u64operand_mod(x: u64, y: &MultiplyU64ModOperand, modulus: &Modulus) -> u64 {
    let r = multiply_u64operand_mod_lazy(x, y, modulus);
    if r >= modulus.value() {r - modulus.value()} else {r}
}

/** Returns x * y mod modulus in [0, 2 * modulus). */
#[inline]
pub fn multiply_u64operand_mod_lazy(x: u64, y: &MultiplyU64ModOperand, modulus: &Modulus) -> u64 {
    let hw = ((x as u128 * y.quotient as u128) >> 64) as u64;
    y.operand.wrapping_mul(x).wrapping_sub(hw.wrapping_mul(modulus.value()))
}

#[inline]
pub fn try_invert_u64_mod(operand: u64, modulus: &Modulus, result: &mut u64) -> bool {
    try_invert_u64_mod_u64(operand, modulus.value(), result)
}

/** Returns operand^exponent mod modulus. */
pub fn exponentiate_u64_mod(operand: u64, mut exponent: u64, modulus: &Modulus) -> u64 {
    let mut power = barrett_reduce_u64(operand, modulus);
    let mut result = 1 % modulus.value();
    while exponent > 0 {
        if exponent & 1 == 1 {
            result = multiply_u64_mod(result, power, modulus);
        }
        power = multiply_u64_mod(power, power, modulus);
        exponent >>= 1;
    }
    result
}

/**
Montgomery reduction: returns x * 2^-64 mod modulus.
Correctness: x must be less than modulus * 2^64.
*/
#[inline]
pub fn montgomery_reduce(x: u128, modulus: &Modulus) -> u64 {
    let r = montgomery_reduce_lazy(x, modulus);
    if r >= modulus.value() {r - modulus.value()} else {r}
}

/** Montgomery reduction with output in [0, 2 * modulus). */
#[inline]
pub fn montgomery_reduce_lazy(x: u128, modulus: &Modulus) -> u64 {
    let (lo, hi) = (x as u64, (x >> 64) as u64);
    let m = lo.wrapping_mul(modulus.montgomery_inv());
    let r = ((m as u128 * modulus.value() as u128) >> 64) as u64;
    hi + modulus.value() - r
}

/** Returns a * 2^64 mod modulus. */
#[inline]
pub fn to_montgomery(a: u64, modulus: &Modulus) -> u64 {
    barrett_reduce_u128((a as u128) << 64, modulus)
}
