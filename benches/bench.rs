use criterion::{black_box, criterion_group, criterion_main, Criterion};
use heathcliff_lintrans::{
    create_bgv_suite,
    BgvSuite,
    BsgsRatio,
    Ciphertext,
    Diagonals,
    LinearTransformation,
    LinearTransformationEvaluator,
    LinearTransformationParameters,
    Scale,
};

const T: u64 = 786433;

fn encrypt(suite: &mut BgvSuite, values: &[u64]) -> Ciphertext {
    let plain = suite.encoder.encode_new(values, Scale::one(), suite.params.max_level()).unwrap();
    suite.encryptor.encrypt_new(&plain).unwrap()
}

fn arithmetic_suite<F: Fn(&str) -> String>(c: &mut Criterion, get_name: F, log_n: usize) {
    let mut suite = create_bgv_suite(log_n, vec![60, 50, 50, 50], vec![60, 60], T, &[]);
    let galois_element = suite.params.galois_element(1);
    let keys = suite.keygen.gen_evaluation_key_set(&suite.secret_key, &[galois_element]).unwrap();
    let mut evaluator = suite.evaluator.with_keys(keys.into_shared());

    let values: Vec<u64> = (0..suite.params.max_slots() as u64).map(|x| x % T).collect();
    let cipher1 = encrypt(&mut suite, &values);
    let cipher2 = encrypt(&mut suite, &values);
    let mut cipher = Ciphertext::new(&suite.params, 2, suite.params.max_level());

    c.bench_function(&get_name("Add"), |b| b.iter(|| evaluator.add(black_box(&cipher1), &cipher2, &mut cipher)));
    c.bench_function(&get_name("Mul"), |b| b.iter(|| evaluator.mul(black_box(&cipher1), &cipher2, &mut cipher)));
    c.bench_function(&get_name("MulRelin"), |b| b.iter(|| evaluator.mul_relin(black_box(&cipher1), &cipher2, &mut cipher)));
    c.bench_function(&get_name("MulRelinScaleInvariant"), |b| b.iter(|| {
        evaluator.mul_relin_scale_invariant(black_box(&cipher1), &cipher2, &mut cipher)
    }));

    let product = evaluator.mul_relin_new(&cipher1, &cipher2).unwrap();
    c.bench_function(&get_name("Rescale"), |b| b.iter(|| evaluator.rescale(black_box(&product), &mut cipher)));
    c.bench_function(&get_name("RotateColumns"), |b| b.iter(|| evaluator.rotate_columns(black_box(&cipher1), 1, &mut cipher)));
}

fn lintrans_suite<F: Fn(&str) -> String>(c: &mut Criterion, get_name: F, log_n: usize, band: isize) {
    let mut suite = create_bgv_suite(log_n, vec![60, 50, 50, 50], vec![60, 60], T, &[]);
    let params = suite.params.clone();
    let slots = params.max_log_dimensions().slots();
    let diagonals: Diagonals = (-band..=band).map(|k| (k, vec![1u64; 2 * slots])).collect();

    let lts: Vec<LinearTransformation> = [BsgsRatio::Disabled, BsgsRatio::Optimal].into_iter().map(|ratio| {
        let lt_params = LinearTransformationParameters::new(&params, diagonals.index_list(), Scale::one(), ratio);
        LinearTransformation::new(&params, &lt_params).encode(&suite.encoder, &diagonals).unwrap()
    }).collect();
    let mut elements: Vec<u64> = lts.iter().flat_map(|lt| lt.galois_elements(&params)).collect();
    elements.sort();
    elements.dedup();
    let keys = suite.keygen.gen_evaluation_key_set(&suite.secret_key, &elements).unwrap();
    let mut lt_eval = LinearTransformationEvaluator::new(suite.evaluator.with_keys(keys.into_shared()));

    let values: Vec<u64> = (0..params.max_slots() as u64).collect();
    let cipher = encrypt(&mut suite, &values);
    let mut out = Ciphertext::new(&params, 1, params.max_level());

    c.bench_function(&get_name("LinearTransformationNaive"), |b| b.iter(|| lt_eval.evaluate(black_box(&cipher), &lts[0], &mut out)));
    c.bench_function(&get_name("LinearTransformationBsgs"), |b| b.iter(|| lt_eval.evaluate(black_box(&cipher), &lts[1], &mut out)));
}

fn criterion_benchmark(c: &mut Criterion) {
    for log_n in [12, 13] {
        arithmetic_suite(c, |name| format!("BGV/N={}/{}", 1 << log_n, name), log_n);
        lintrans_suite(c, |name| format!("BGV/N={}/Band=15/{}", 1 << log_n, name), log_n, 15);
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
