//! Feature map tensor (batch fixed at 1).
//!
//! A `FeatureMap` is the 1×C×H×W array that flows through the whole system:
//! normalized images, layer activations, and their gradients all share it.
//! Storage is channel-major (CHW), so each channel is a contiguous run of
//! `height * width` values. Read as a matrix, that is the F×(H·W) filter
//! matrix used by the statistic transforms.

use thiserror::Error;

/// Shape violations when building or combining feature maps.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("expected {expected} values for shape 1x{channels}x{height}x{width}, got {actual}")]
    Length {
        channels: usize,
        height: usize,
        width: usize,
        expected: usize,
        actual: usize,
    },

    #[error("expected {expected} channels, got {actual}")]
    Channels { expected: usize, actual: usize },

    #[error("shape mismatch: [C, H, W] {left:?} vs {right:?}")]
    Mismatch { left: [usize; 3], right: [usize; 3] },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl FeatureMap {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self, ShapeError> {
        let expected = channels * height * width;
        if data.len() != expected {
            return Err(ShapeError::Length {
                channels,
                height,
                width,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    /// Wrap a buffer whose length is known to match by construction.
    pub(crate) fn from_raw(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), channels * height * width);
        Self {
            channels,
            height,
            width,
            data,
        }
    }

    pub fn zeros(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
            data: vec![0.0; channels * height * width],
        }
    }

    pub fn filled(channels: usize, height: usize, width: usize, value: f32) -> Self {
        Self {
            channels,
            height,
            width,
            data: vec![value; channels * height * width],
        }
    }

    /// Build a map by evaluating `f(channel, y, x)` at every position.
    pub fn from_fn<F>(channels: usize, height: usize, width: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize, usize) -> f32,
    {
        let mut data = Vec::with_capacity(channels * height * width);
        for c in 0..channels {
            for y in 0..height {
                for x in 0..width {
                    data.push(f(c, y, x));
                }
            }
        }
        Self {
            channels,
            height,
            width,
            data,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of spatial positions (H·W).
    pub fn spatial(&self) -> usize {
        self.height * self.width
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `[channels, height, width]`; the batch dimension is always 1.
    pub fn dims(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    /// Full 4D shape `[1, C, H, W]`.
    pub fn shape(&self) -> [usize; 4] {
        [1, self.channels, self.height, self.width]
    }

    pub fn same_shape(&self, other: &FeatureMap) -> bool {
        self.dims() == other.dims()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Values of one channel (one row of the filter matrix).
    pub fn channel(&self, c: usize) -> &[f32] {
        let n = self.spatial();
        &self.data[c * n..(c + 1) * n]
    }

    pub fn get(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[(c * self.height + y) * self.width + x]
    }

    /// Same values under a different spatial factorization (H·W preserved).
    pub fn reshaped(&self, height: usize, width: usize) -> Result<FeatureMap, ShapeError> {
        FeatureMap::new(self.channels, height, width, self.data.clone())
    }

    pub fn add_assign(&mut self, other: &FeatureMap) -> Result<(), ShapeError> {
        if !self.same_shape(other) {
            return Err(ShapeError::Mismatch {
                left: self.dims(),
                right: other.dims(),
            });
        }
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += *b;
        }
        Ok(())
    }

    pub fn scale(&mut self, factor: f32) {
        for v in &mut self.data {
            *v *= factor;
        }
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    pub fn require_channels(&self, expected: usize) -> Result<(), ShapeError> {
        if self.channels != expected {
            return Err(ShapeError::Channels {
                expected,
                actual: self.channels,
            });
        }
        Ok(())
    }
}
