//! Identity extractor: the image is its own single "layer".
//!
//! Useful for matching statistics directly in pixel space and for
//! exercising the synthesis loop without a pretrained backbone.

use super::{check_gradient, Activations, ExtractError, FeatureExtractor};
use crate::core::FeatureMap;
use std::collections::HashMap;

pub const INPUT_LAYER: &str = "input";

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityExtractor;

#[derive(Debug, Clone)]
pub struct IdentityTrace {
    image: FeatureMap,
}

impl Activations for IdentityTrace {
    fn get(&self, layer: &str) -> Option<&FeatureMap> {
        (layer == INPUT_LAYER).then_some(&self.image)
    }
}

impl FeatureExtractor for IdentityExtractor {
    type Trace = IdentityTrace;

    fn has_layer(&self, name: &str) -> bool {
        name == INPUT_LAYER
    }

    fn forward(&self, image: &FeatureMap, layers: &[String]) -> Result<IdentityTrace, ExtractError> {
        self.check_layers(layers)?;
        Ok(IdentityTrace {
            image: image.clone(),
        })
    }

    fn backward(
        &self,
        trace: &IdentityTrace,
        grads: &HashMap<String, FeatureMap>,
    ) -> Result<FeatureMap, ExtractError> {
        for (layer, grad) in grads {
            if layer != INPUT_LAYER {
                return Err(ExtractError::UnknownLayer(layer.clone()));
            }
            check_gradient(layer, &trace.image, grad)?;
        }
        let [c, h, w] = trace.image.dims();
        Ok(grads
            .get(INPUT_LAYER)
            .cloned()
            .unwrap_or_else(|| FeatureMap::zeros(c, h, w)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_returns_input() {
        let image = FeatureMap::filled(3, 2, 2, 0.5);
        let out = IdentityExtractor.extract(&image, &[INPUT_LAYER.to_string()]).unwrap();
        assert_eq!(out[INPUT_LAYER], image);
    }

    #[test]
    fn test_unknown_layer_fails() {
        let image = FeatureMap::zeros(1, 1, 1);
        let err = IdentityExtractor.forward(&image, &["r11".to_string()]).unwrap_err();
        assert!(matches!(err, ExtractError::UnknownLayer(name) if name == "r11"));
    }

    #[test]
    fn test_backward_passes_gradient_through() {
        let image = FeatureMap::zeros(1, 1, 2);
        let trace = IdentityExtractor.forward(&image, &[]).unwrap();
        let grad = FeatureMap::new(1, 1, 2, vec![1.0, -1.0]).unwrap();
        let grads = HashMap::from([(INPUT_LAYER.to_string(), grad.clone())]);
        assert_eq!(IdentityExtractor.backward(&trace, &grads).unwrap(), grad);
        assert_eq!(
            IdentityExtractor.backward(&trace, &HashMap::new()).unwrap(),
            FeatureMap::zeros(1, 1, 2)
        );
    }
}
