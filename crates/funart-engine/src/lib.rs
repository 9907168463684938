pub mod adapter;
pub mod config;
pub mod dispatch;
pub mod dryrun;
pub mod error;
pub mod materialize;
pub mod normalize;
pub mod payload;
pub mod transport;
pub mod validate;

#[cfg(test)]
mod testing;

pub use adapter::{GeneratedMedia, GenerationAdapter, GenerationOutput};
pub use config::{ApiConfig, BatchPolicy};
pub use dispatch::{CancelToken, Clock, ManualClock, PollState, SystemClock, TaskPoller};
pub use dryrun::DryrunTransport;
pub use error::{ApiStage, ErrorKind, GenerationError, Result};
pub use transport::{ApiCall, ApiResponse, HttpTransport, Transport};
