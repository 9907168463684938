use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("tensor shape {shape:?} holds {expected} values but {actual} were given")]
    LengthMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("tensor shape must not be empty")]
    Empty,
}

/// Dense host tensor of `f32` values.
///
/// Images are row-major and channel-last (`[B, H, W, C]` or `[H, W, C]`) with values in `[0, 1]`.
/// Audio waveforms are `[B, C, S]`, `[C, S]` or samples-first `[S, C]` with values roughly in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ShapeError> {
        if shape.is_empty() {
            return Err(ShapeError::Empty);
        }
        let expected = shape.iter().product::<usize>();
        if expected != data.len() {
            return Err(ShapeError::LengthMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Result<Self, ShapeError> {
        let len = shape.iter().product::<usize>();
        Self::new(shape, vec![0.0; len])
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Leading batch dimension for rank-4 image tensors and rank-3 waveforms; 1 otherwise.
    pub fn batch_len(&self, unbatched_rank: usize) -> usize {
        if self.shape.len() == unbatched_rank + 1 {
            self.shape[0]
        } else {
            1
        }
    }

    /// First element of the batch, or the tensor itself when it has no batch dimension.
    /// `None` when the batch is empty.
    pub fn first_of_batch(&self, unbatched_rank: usize) -> Option<Tensor> {
        if self.shape.len() != unbatched_rank + 1 {
            return Some(self.clone());
        }
        let inner_shape = self.shape[1..].to_vec();
        let inner_len = inner_shape.iter().product::<usize>();
        let data = self.data.get(..inner_len).filter(|_| self.shape[0] > 0)?;
        Some(Tensor {
            shape: inner_shape,
            data: data.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub waveform: Tensor,
    pub sample_rate: u32,
}

/// A reference image is either host pixels or a URL the vendor can fetch itself.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceImage {
    Pixels(Tensor),
    Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AudioInput {
    Waveform(AudioClip),
    Url(String),
}

#[cfg(test)]
mod tests {
    use super::{ShapeError, Tensor};

    #[test]
    fn tensor_rejects_mismatched_length() {
        let err = Tensor::new(vec![2, 2, 3], vec![0.0; 11]).unwrap_err();
        assert_eq!(
            err,
            ShapeError::LengthMismatch {
                shape: vec![2, 2, 3],
                expected: 12,
                actual: 11,
            }
        );
        assert_eq!(Tensor::new(Vec::new(), Vec::new()), Err(ShapeError::Empty));
    }

    #[test]
    fn first_of_batch_slices_leading_frame() -> Result<(), ShapeError> {
        let data = (0..24).map(|value| value as f32).collect::<Vec<f32>>();
        let batch = Tensor::new(vec![2, 2, 2, 3], data)?;
        assert_eq!(batch.batch_len(3), 2);

        let first = batch.first_of_batch(3).ok_or(ShapeError::Empty)?;
        assert_eq!(first.shape(), &[2, 2, 3]);
        assert_eq!(first.data().len(), 12);
        assert_eq!(first.data()[11], 11.0);
        Ok(())
    }

    #[test]
    fn unbatched_tensor_is_its_own_first_frame() -> Result<(), ShapeError> {
        let frame = Tensor::zeros(vec![4, 4, 3])?;
        assert_eq!(frame.batch_len(3), 1);
        assert_eq!(frame.first_of_batch(3), Some(frame));
        Ok(())
    }

    #[test]
    fn empty_batch_has_no_first_frame() -> Result<(), ShapeError> {
        let waveform = Tensor::zeros(vec![0, 2, 3])?;
        assert_eq!(waveform.batch_len(2), 0);
        assert_eq!(waveform.first_of_batch(2), None);
        Ok(())
    }
}
