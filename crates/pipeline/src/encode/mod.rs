//! External encoder invocation boundary
//!
//! The core treats the encoder as an opaque producer of a V3C container: an
//! external process is launched per job and its exit code plus output file are
//! the entire contract. The invoker is a trait so the scheduler can be
//! exercised without a TMC2 installation.

pub mod tmc2;

pub use tmc2::{
    build_tmc2_command, derive_frame_sequence, run_encoder_process, EncodeError, FrameSequence,
    Tmc2Encoder,
};

use crate::jobs::EncodeJob;
use std::future::Future;
use tokio::sync::watch;

/// Cancellable external encode of one job
///
/// Implementations launch the external encoder process for `job` and resolve
/// when it exits or is killed. A raised stop signal must terminate the
/// process promptly and resolve with [`EncodeError::Cancelled`].
pub trait EncoderInvoker: Send + Sync + 'static {
    fn encode(
        &self,
        job: &EncodeJob,
        stop: watch::Receiver<bool>,
    ) -> impl Future<Output = Result<(), EncodeError>> + Send;
}
