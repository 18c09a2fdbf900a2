//! Hybrid key switching over the extended basis QP.
//!
//! A polynomial c modulo Q_l is split into `beta` digits, one per group of
//! `level_p + 1` consecutive primes of Q. Digit i is the centered
//! representative of c modulo its group, extended exactly to every other
//! prime of Q and to P. The inner product of the digits with a
//! [GadgetCiphertext] yields P times the switched ciphertext over QP, and
//! [mod_down_qp_to_q_ntt] divides by P with rounding.
//!
//! Accumulations over digits are lazy: products are reduced into `[0, q)`
//! and summed without reduction, flushing every `overflow_margin` terms.

use tracing::trace;

use crate::{
    GadgetCiphertext,
    Parameters,
    Poly,
    PolyQP,
};

/// Scratch space of the key switching routines.
#[derive(Clone, Debug)]
pub(crate) struct KeySwitchScratch {
    coeff_q: Poly,
    coeff_p: Poly,
    ext: Vec<u64>,
}

impl KeySwitchScratch {

    pub(crate) fn new(params: &Parameters) -> Self {
        let n = params.n();
        let count = params.max_level() + 1 + params.max_level_p() + 1;
        KeySwitchScratch {
            coeff_q: params.ring_q().new_poly_max(),
            coeff_p: params.ring_p().new_poly_max(),
            ext: vec![0; n * count],
        }
    }

}

/// Writes the `beta(level_q)` digits of `c`, in NTT representation, into `decomp`.
pub(crate) fn decompose_ntt(
    params: &Parameters, scratch: &mut KeySwitchScratch, level_q: usize, c: &Poly, decomp: &mut [PolyQP],
) {
    let n = params.n();
    let (ring_q, ring_p) = (params.ring_q(), params.ring_p());
    let level_p = params.max_level_p();

    scratch.coeff_q.copy_from(level_q, c);
    ring_q.intt_assign(level_q, &mut scratch.coeff_q);

    for (i, digit) in decomp.iter_mut().enumerate().take(params.beta(level_q)) {
        let group = params.decomposition_group(level_q, i);
        let converter = params.decomposition_converter(level_q, i);
        let ext = &mut scratch.ext[..converter.dst().len() * n];
        converter.mod_up(n, &scratch.coeff_q.data()[group.start * n..group.end * n], ext);

        // destination order: Q below the group, Q above the group, then P
        let mut k = 0;
        for j in 0..=level_q {
            let residue = digit.q.residue_mut(j);
            if group.contains(&j) {
                residue.copy_from_slice(c.residue(j));
            } else {
                residue.copy_from_slice(&ext[k * n..(k + 1) * n]);
                ring_q.ntt_residue(j, residue);
                k += 1;
            }
        }
        for j in 0..=level_p {
            let residue = digit.p.residue_mut(j);
            residue.copy_from_slice(&ext[k * n..(k + 1) * n]);
            ring_p.ntt_residue(j, residue);
            k += 1;
        }
    }
}

/// Accumulates the digits against the gadget into `out[0]` and `out[1]`,
/// over QP and without dividing by P. Outputs are reduced.
pub(crate) fn gadget_product_hoisted_lazy(
    params: &Parameters, level_q: usize, decomp: &[PolyQP], gadget: &GadgetCiphertext, out: &mut [PolyQP],
) {
    let (ring_q, ring_p) = (params.ring_q(), params.ring_p());
    let level_p = gadget.level_p();
    let qi_margin = params.qi_overflow_margin();
    let pi_margin = params.pi_overflow_margin();
    let beta = params.beta(level_q);

    for (i, (digit, key)) in decomp.iter().zip(gadget.value()).take(beta).enumerate() {
        for (acc, component) in out.iter_mut().zip(key.iter()) {
            if i == 0 {
                ring_q.mul_coeffs_montgomery(level_q, &component.q, &digit.q, &mut acc.q);
                ring_p.mul_coeffs_montgomery(level_p, &component.p, &digit.p, &mut acc.p);
            } else {
                ring_q.mul_coeffs_montgomery_then_add_lazy(level_q, &component.q, &digit.q, &mut acc.q);
                ring_p.mul_coeffs_montgomery_then_add_lazy(level_p, &component.p, &digit.p, &mut acc.p);
            }
            if i % qi_margin == qi_margin - 1 {
                ring_q.reduce_assign(level_q, &mut acc.q);
            }
            if i % pi_margin == pi_margin - 1 {
                ring_p.reduce_assign(level_p, &mut acc.p);
            }
        }
    }

    for acc in out.iter_mut().take(2) {
        if beta % qi_margin != 0 {
            ring_q.reduce_assign(level_q, &mut acc.q);
        }
        if beta % pi_margin != 0 {
            ring_p.reduce_assign(level_p, &mut acc.p);
        }
    }
}

/// Decomposes `c` into `decomp` and accumulates it against the gadget, see [gadget_product_hoisted_lazy].
pub(crate) fn gadget_product_lazy(
    params: &Parameters, scratch: &mut KeySwitchScratch, level_q: usize, c: &Poly,
    gadget: &GadgetCiphertext, decomp: &mut [PolyQP], out: &mut [PolyQP],
) {
    decompose_ntt(params, scratch, level_q, c, decomp);
    gadget_product_hoisted_lazy(params, level_q, decomp, gadget, out);
}

/// poly_q = round((poly_q, poly_p) / P) modulo Q_level, all in NTT representation.
/// Inputs must be reduced.
pub(crate) fn mod_down_qp_to_q_ntt(
    params: &Parameters, scratch: &mut KeySwitchScratch, level_q: usize, poly_q: &mut Poly, poly_p: &Poly,
) {
    let n = params.n();
    let (ring_q, ring_p) = (params.ring_q(), params.ring_p());
    let level_p = params.max_level_p();

    scratch.coeff_p.copy_from(level_p, poly_p);
    ring_p.intt_assign(level_p, &mut scratch.coeff_p);

    let converter = params.p_to_q(level_q);
    let ext = &mut scratch.ext[..(level_q + 1) * n];
    converter.mod_up(n, scratch.coeff_p.data_at_level(level_p), ext);
    for (j, residue) in ext.chunks_exact_mut(n).enumerate() {
        ring_q.ntt_residue(j, residue);
    }
    converter.mod_down_finish(n, ext, &mut poly_q.data_mut()[..(level_q + 1) * n]);
}

/// Key switches `c` with the gadget and divides by P: `out[k].q` receives the
/// two components modulo Q_level. `tmp` holds two QP polynomials of scratch.
pub(crate) fn gadget_product(
    params: &Parameters, scratch: &mut KeySwitchScratch, level_q: usize, c: &Poly,
    gadget: &GadgetCiphertext, decomp: &mut [PolyQP], out: &mut [PolyQP],
) {
    gadget_product_lazy(params, scratch, level_q, c, gadget, decomp, out);
    for acc in out.iter_mut().take(2) {
        let PolyQP { q, p } = acc;
        mod_down_qp_to_q_ntt(params, scratch, level_q, q, p);
    }
    trace!(level_q, "gadget product");
}

/// Key switches the hoisted decomposition of c1 with `gadget` and applies the
/// automorphism given by `index`, without dividing by P:
/// `out = (phi(P * c0 + d0), phi(d1))` over QP.
pub(crate) fn automorphism_hoisted_lazy(
    params: &Parameters, level_q: usize, c0: &Poly, decomp: &[PolyQP], gadget: &GadgetCiphertext,
    index: &[usize], tmp: &mut [PolyQP], out: &mut [PolyQP],
) {
    let (ring_q, ring_p) = (params.ring_q(), params.ring_p());
    let level_p = gadget.level_p();

    gadget_product_hoisted_lazy(params, level_q, decomp, gadget, tmp);

    let [tmp0, tmp1, ..] = tmp else {
        panic!("[Logic error] Hoisted automorphism needs two scratch polynomials.");
    };
    let [out0, out1, ..] = out else {
        panic!("[Logic error] Hoisted automorphism needs two output polynomials.");
    };

    ring_q.automorphism_ntt_with_index(level_q, &tmp1.q, index, &mut out1.q);
    ring_p.automorphism_ntt_with_index(level_p, &tmp1.p, index, &mut out1.p);

    ring_q.mul_rns_scalar_montgomery(level_q, c0, params.p_mod_q_montgomery(), &mut tmp1.q);
    ring_q.add_assign(level_q, &tmp1.q, &mut tmp0.q);

    ring_q.automorphism_ntt_with_index(level_q, &tmp0.q, index, &mut out0.q);
    ring_p.automorphism_ntt_with_index(level_p, &tmp0.p, index, &mut out0.p);
}
