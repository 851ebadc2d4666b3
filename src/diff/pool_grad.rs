//! Gradients for 2×2 stride-2 pooling.

use crate::core::FeatureMap;
use crate::extract::ops::PoolKind;

/// dL/d(input) of `pool2x2`.
///
/// Max pooling routes each output gradient to the first maximal input of its
/// window (row-major scan). Rows/columns dropped by the floor get zero.
pub fn pool2x2_backward(input: &FeatureMap, d_output: &FeatureMap, kind: PoolKind) -> FeatureMap {
    let (c, h, w) = (input.channels(), input.height(), input.width());
    let (oh, ow) = (h / 2, w / 2);
    assert_eq!(d_output.dims(), [c, oh, ow]);

    let mut d_input = vec![0.0f32; c * h * w];
    for ci in 0..c {
        for y in 0..oh {
            for x in 0..ow {
                let g = d_output.get(ci, y, x);
                let window = [
                    (2 * y, 2 * x),
                    (2 * y, 2 * x + 1),
                    (2 * y + 1, 2 * x),
                    (2 * y + 1, 2 * x + 1),
                ];
                match kind {
                    PoolKind::Avg => {
                        for (yy, xx) in window {
                            d_input[(ci * h + yy) * w + xx] += 0.25 * g;
                        }
                    }
                    PoolKind::Max => {
                        let mut best = window[0];
                        let mut best_v = input.get(ci, best.0, best.1);
                        for &(yy, xx) in &window[1..] {
                            let v = input.get(ci, yy, xx);
                            if v > best_v {
                                best_v = v;
                                best = (yy, xx);
                            }
                        }
                        d_input[(ci * h + best.0) * w + best.1] += g;
                    }
                }
            }
        }
    }
    FeatureMap::from_raw(c, h, w, d_input)
}
