//! Weight layout conversion from burn (NCHW, OIHW kernels) to Keras (NHWC, HWIO kernels).

/// Reorder a conv kernel from `[out, in, kh, kw]` to `[kh, kw, in, out]`.
pub fn conv_kernel_oihw_to_hwio(data: &[f32], dims: [usize; 4]) -> Vec<f32> {
    let [out_c, in_c, kh, kw] = dims;
    debug_assert_eq!(data.len(), out_c * in_c * kh * kw);
    let mut hwio = vec![0.0f32; data.len()];
    for o in 0..out_c {
        for i in 0..in_c {
            for h in 0..kh {
                for w in 0..kw {
                    let src = ((o * in_c + i) * kh + h) * kw + w;
                    let dst = ((h * kw + w) * in_c + i) * out_c + o;
                    hwio[dst] = data[src];
                }
            }
        }
    }
    hwio
}

/// Permute the rows of a dense kernel `[features, units]` that follows a flatten.
///
/// Burn flattens NCHW feature maps (row `c*H*W + y*W + x`); Keras flattens NHWC
/// (row `(y*W + x)*C + c`). Row contents are unchanged.
pub fn dense_rows_chw_to_hwc(
    data: &[f32],
    channels: usize,
    height: usize,
    width: usize,
    units: usize,
) -> Vec<f32> {
    debug_assert_eq!(data.len(), channels * height * width * units);
    let mut out = vec![0.0f32; data.len()];
    for c in 0..channels {
        for y in 0..height {
            for x in 0..width {
                let src_row = (c * height + y) * width + x;
                let dst_row = (y * width + x) * channels + c;
                out[dst_row * units..(dst_row + 1) * units]
                    .copy_from_slice(&data[src_row * units..(src_row + 1) * units]);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_kernel_moves_out_channel_last() {
        // out=2, in=1, 1x2 kernel: o0 = [1, 2], o1 = [3, 4]
        let oihw = [1.0, 2.0, 3.0, 4.0];
        let hwio = conv_kernel_oihw_to_hwio(&oihw, [2, 1, 1, 2]);
        // [h=0][w=0][i=0][o=0..2] then [w=1]
        assert_eq!(hwio, vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn conv_kernel_3x3_spot_check() {
        let dims = [4, 3, 3, 3];
        let data: Vec<f32> = (0..4 * 3 * 3 * 3).map(|v| v as f32).collect();
        let hwio = conv_kernel_oihw_to_hwio(&data, dims);
        // element (o=2, i=1, h=0, w=2)
        let src = ((2 * 3 + 1) * 3) * 3 + 2;
        let dst = ((2) * 3 + 1) * 4 + 2;
        assert_eq!(hwio[dst], data[src]);
    }

    #[test]
    fn dense_rows_follow_nhwc_flatten() {
        // C=2, H=1, W=2, units=1: burn rows = [c0x0, c0x1, c1x0, c1x1]
        let rows = [10.0, 11.0, 20.0, 21.0];
        let out = dense_rows_chw_to_hwc(&rows, 2, 1, 2, 1);
        // keras rows = [x0c0, x0c1, x1c0, x1c1]
        assert_eq!(out, vec![10.0, 20.0, 11.0, 21.0]);
    }

    #[test]
    fn single_pixel_feature_map_is_unchanged() {
        let rows: Vec<f32> = (0..8 * 3).map(|v| v as f32).collect();
        assert_eq!(dense_rows_chw_to_hwc(&rows, 8, 1, 1, 3), rows);
    }
}
