//! Engine-level behavior: tensors, operator construction, tiling, and the
//! fused convolution path.

use corten::approx::{assert_close, BACKEND_TOLERANCE};
use corten::error::EngineError;
use corten::opdef::OpDefBuilder;
use corten::ops::{conv_1x1_global_size, FusedConv2dOp, OpKernel};
use corten::tensor;
use corten::tensors::Tensor;

#[test]
fn dimension_lookup_past_rank_is_a_typed_error() {
    let t = Tensor::zeros(vec![2, 3]);
    assert_eq!(t.dim(1).unwrap(), 3);
    let err = t.dim(2).unwrap_err();
    assert!(matches!(err, EngineError::DimOutOfRange { index: 2, rank: 2 }));
    assert!(err.is_graph_defect());
}

#[test]
fn in_place_update_requires_matching_shape() {
    let mut t = Tensor::zeros(vec![2, 2]);
    t.update(Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0])).unwrap();
    assert_eq!(t.host_data().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    assert!(t.update(Tensor::zeros(vec![4])).is_err());
}

#[test]
fn host_storage_wrapping_checks_the_element_count() {
    use corten::tensors::{DataType, TensorStorage};
    let t = Tensor::from_storage(vec![2, 2], DataType::F32, TensorStorage::Host(vec![0.5; 4]));
    assert_eq!(t.host_data().unwrap(), &[0.5; 4]);
}

#[test]
#[should_panic(expected = "shape/buffer mismatch")]
fn host_storage_wrapping_rejects_a_short_buffer() {
    use corten::tensors::{DataType, TensorStorage};
    Tensor::from_storage(vec![2, 2], DataType::F32, TensorStorage::Host(vec![0.0; 3]));
}

#[test]
fn tensor_literal_macro_infers_shape() {
    let t = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    assert_eq!(t.shape(), &[2, 3]);
    assert_eq!(t.host_data().unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn conv_tiling_matches_the_output_shape() {
    // Channel and width tiles round up by four; depth is height * batch.
    let gws = conv_1x1_global_size(&[2, 2, 2, 2]).unwrap();
    assert_eq!(gws, [1, 1, 4]);
    let gws = conv_1x1_global_size(&[1, 7, 9, 13]).unwrap();
    assert_eq!(gws, [4, 3, 7]);
}

#[test]
fn pointwise_conv_with_fused_activation_end_to_end() {
    let def = OpDefBuilder::new("Conv2D")
        .str_arg("activation", "RELUX")
        .f32_arg("max_limit", 6.0)
        .ints_arg("strides", vec![1, 1])
        .build();
    let op = FusedConv2dOp::from_def(&def, true).unwrap();
    assert_eq!(op.input_arity(), 3);

    // 1x1x2x2 input, two output channels: [sum, difference] of the two
    // input channels, then bias, then the capped ReLU.
    let input = Tensor::new(vec![1, 1, 2, 2], vec![3.0, 5.0, -1.0, 2.0]);
    let filter = Tensor::new(vec![2, 2], vec![1.0, 1.0, 1.0, -1.0]);
    let bias = Tensor::new(vec![2], vec![0.0, 1.0]);
    let mut output = Tensor::zeros(vec![1, 1, 2, 2]);

    let mut token = op.run(&[&input, &filter, &bias], &mut output).unwrap();
    assert!(token.is_complete());
    token.wait().unwrap();

    // Pixel 0: sum 8 (capped to 6), diff -2 + 1 = -1 (clamped to 0).
    // Pixel 1: sum 1, diff -3 + 1 = -2 (clamped to 0).
    assert_close(output.host_data().unwrap(), &[6.0, 0.0, 1.0, 0.0], BACKEND_TOLERANCE);
}

#[test]
fn strided_conv_subsamples_the_input() {
    let def = OpDefBuilder::new("Conv2D").ints_arg("strides", vec![2, 2]).build();
    let op = FusedConv2dOp::from_def(&def, false).unwrap();

    let input = Tensor::new(vec![1, 2, 2, 1], vec![1.0, 2.0, 3.0, 4.0]);
    let filter = Tensor::new(vec![1, 1], vec![10.0]);
    let mut output = Tensor::zeros(vec![1, 1, 1, 1]);
    op.run(&[&input, &filter], &mut output).unwrap();
    assert_close(output.host_data().unwrap(), &[10.0], BACKEND_TOLERANCE);
}

#[test]
fn zero_sized_spatial_dimension_completes_without_work() {
    // NHWC admits zero-sized dimensions; a run over one produces no
    // elements but must still resolve its token normally.
    let op = FusedConv2dOp::from_def(&OpDefBuilder::new("Conv2D").build(), false).unwrap();
    let input = Tensor::zeros(vec![1, 1, 0, 1]);
    let filter = Tensor::new(vec![1, 1], vec![1.0]);
    let mut output = Tensor::zeros(vec![1, 1, 0, 1]);
    let mut token = op.run(&[&input, &filter], &mut output).unwrap();
    assert!(token.is_complete());
    token.wait().unwrap();
    assert!(output.host_data().unwrap().is_empty());
}

#[test]
fn batch_mismatch_is_rejected_before_execution() {
    let op = FusedConv2dOp::from_def(&OpDefBuilder::new("Conv2D").build(), false).unwrap();
    let input = Tensor::zeros(vec![2, 1, 1, 1]);
    let filter = Tensor::new(vec![1, 1], vec![1.0]);
    let mut output = Tensor::zeros(vec![1, 1, 1, 1]);
    let err = op.run(&[&input, &filter], &mut output).unwrap_err();
    assert!(matches!(err, EngineError::ShapeMismatch(_)));
}

#[test]
fn malformed_strides_are_a_construction_defect() {
    let short = OpDefBuilder::new("Conv2D").ints_arg("strides", vec![1]).build();
    assert!(FusedConv2dOp::from_def(&short, false).is_err());

    let negative = OpDefBuilder::new("Conv2D").ints_arg("strides", vec![1, -1]).build();
    assert!(FusedConv2dOp::from_def(&negative, false).is_err());

    let dilated = OpDefBuilder::new("Conv2D").ints_arg("dilations", vec![2, 2]).build();
    assert!(FusedConv2dOp::from_def(&dilated, false).is_err());
}

#[test]
fn wrong_input_count_is_rejected() {
    let op = FusedConv2dOp::from_def(&OpDefBuilder::new("Conv2D").build(), false).unwrap();
    let input = Tensor::zeros(vec![1, 1, 1, 1]);
    let mut output = Tensor::zeros(vec![1, 1, 1, 1]);
    assert!(op.run(&[&input], &mut output).is_err());
}
