//! End-to-end activation semantics, checked across every host backend.

use corten::activation::Activation;
use corten::approx::{assert_close, BACKEND_TOLERANCE};
use corten::backend::{set_backend, Backend};
use corten::error::EngineError;
use corten::opdef::OpDefBuilder;
use corten::ops::{ActivationOp, OpKernel};
use corten::tensors::Tensor;

const INPUT: [f32; 16] = [
    -7.0, 7.0, -6.0, 6.0, -5.0, 5.0, -4.0, 4.0, -3.0, 3.0, -2.0, 2.0, -1.0, 1.0, 0.0, 0.0,
];

/// The default backend is process-global, and the harness runs tests on
/// parallel threads; every set-then-run sequence holds this lock so each
/// assertion exercises the backend it names.
static BACKEND_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn run_on(backend: Backend, op: &ActivationOp) -> Vec<f32> {
    let _guard = BACKEND_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    set_backend(backend);
    let input = Tensor::new(vec![2, 2, 2, 2], INPUT.to_vec());
    let mut output = Tensor::zeros(vec![2, 2, 2, 2]);
    let result = op.run(&[&input], &mut output);
    set_backend(Backend::Cpu);
    result.unwrap();
    output.host_data().unwrap().to_vec()
}

fn check_all_backends(op: ActivationOp, expected: &[f32]) {
    for backend in [Backend::Cpu, Backend::Simd] {
        let got = run_on(backend, &op);
        assert_close(&got, expected, BACKEND_TOLERANCE);
    }
}

#[test]
fn relu_clamps_negatives_to_zero() {
    let def = OpDefBuilder::new("Activation").str_arg("activation", "RELU").build();
    let expected = [
        0.0, 7.0, 0.0, 6.0, 0.0, 5.0, 0.0, 4.0, 0.0, 3.0, 0.0, 2.0, 0.0, 1.0, 0.0, 0.0,
    ];
    check_all_backends(ActivationOp::from_def(&def).unwrap(), &expected);
}

#[test]
fn capped_relu_clamps_both_ends() {
    let def = OpDefBuilder::new("Activation")
        .str_arg("activation", "RELUX")
        .f32_arg("max_limit", 6.0)
        .build();
    let expected = [
        0.0, 6.0, 0.0, 6.0, 0.0, 5.0, 0.0, 4.0, 0.0, 3.0, 0.0, 2.0, 0.0, 1.0, 0.0, 0.0,
    ];
    check_all_backends(ActivationOp::from_def(&def).unwrap(), &expected);
}

#[test]
fn parametric_relu_scales_negatives() {
    let def = OpDefBuilder::new("Activation")
        .str_arg("activation", "PRELU")
        .f32_arg("alpha", 2.0)
        .build();
    let expected = [
        -14.0, 7.0, -12.0, 6.0, -10.0, 5.0, -8.0, 4.0, -6.0, 3.0, -4.0, 2.0, -2.0, 1.0, 0.0, 0.0,
    ];
    check_all_backends(ActivationOp::from_def(&def).unwrap(), &expected);
}

#[test]
fn tanh_and_sigmoid_match_reference_math() {
    for (name, f) in [
        ("TANH", f32::tanh as fn(f32) -> f32),
        ("SIGMOID", (|x: f32| 1.0 / (1.0 + (-x).exp())) as fn(f32) -> f32),
    ] {
        let def = OpDefBuilder::new("Activation").str_arg("activation", name).build();
        let expected: Vec<f32> = INPUT.iter().map(|&x| f(x)).collect();
        check_all_backends(ActivationOp::from_def(&def).unwrap(), &expected);
    }
}

#[test]
fn noop_passes_values_through() {
    let def = OpDefBuilder::new("Activation").build();
    check_all_backends(ActivationOp::from_def(&def).unwrap(), &INPUT);
}

/// The device path must agree with the scalar reference on the same
/// vectors the host backends are checked against.
#[cfg(feature = "wgpu")]
#[test]
fn device_backend_matches_the_reference_vectors() {
    if !Backend::Wgpu.is_available() {
        eprintln!("no usable wgpu adapter, skipping");
        return;
    }
    for act in [
        Activation::Noop,
        Activation::Relu,
        Activation::Relux { max_limit: 6.0 },
        Activation::Prelu { alpha: 2.0 },
        Activation::Tanh,
        Activation::Sigmoid,
    ] {
        let expected: Vec<f32> = INPUT.iter().map(|&x| act.apply(x)).collect();
        let got = run_on(Backend::Wgpu, &ActivationOp::new(act));
        assert_close(&got, &expected, BACKEND_TOLERANCE);
    }
}

#[test]
fn unknown_activation_name_is_a_typed_error() {
    let def = OpDefBuilder::new("Activation").str_arg("activation", "GELU").build();
    let err = ActivationOp::from_def(&def).unwrap_err();
    assert!(err.is_graph_defect());
    assert!(matches!(err, EngineError::UnknownActivation(ref name) if name == "GELU"));
}

#[test]
fn backends_agree_on_random_data() {
    use rand::Rng;
    let mut rng = rand::rng();
    let values: Vec<f32> = (0..1000).map(|_| rng.random_range(-10.0..10.0)).collect();
    let input = Tensor::new(vec![values.len()], values.clone());

    let _guard = BACKEND_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    for act in [
        Activation::Relu,
        Activation::Relux { max_limit: 4.0 },
        Activation::Prelu { alpha: 0.1 },
        Activation::Tanh,
        Activation::Sigmoid,
    ] {
        let op = ActivationOp::new(act);
        set_backend(Backend::Cpu);
        let mut cpu_out = Tensor::zeros(vec![values.len()]);
        op.run(&[&input], &mut cpu_out).unwrap();

        set_backend(Backend::Simd);
        let mut simd_out = Tensor::zeros(vec![values.len()]);
        op.run(&[&input], &mut simd_out).unwrap();
        set_backend(Backend::Cpu);

        assert_close(
            simd_out.host_data().unwrap(),
            cpu_out.host_data().unwrap(),
            BACKEND_TOLERANCE,
        );
    }
}

#[test]
fn output_shape_must_match_input() {
    let op = ActivationOp::new(Activation::Relu);
    let input = Tensor::new(vec![4], vec![1.0; 4]);
    let mut output = Tensor::zeros(vec![5]);
    let err = op.run(&[&input], &mut output).unwrap_err();
    assert!(matches!(err, EngineError::ShapeMismatch(_)));
}
