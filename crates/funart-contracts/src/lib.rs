pub mod media;
pub mod modality;
pub mod request;
pub mod task;

pub use media::{AudioClip, AudioInput, ReferenceImage, ShapeError, Tensor};
pub use modality::{DispatchKind, Modality, ModalityProfile, PixelBounds, PresetField};
pub use request::{GenerationRequest, SizeSpec};
pub use task::{GenerationResult, GenerationTask, TaskStatus};
