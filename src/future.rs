//! Completion tokens for in-flight device work.
//!
//! Enqueueing GPU work returns immediately; the returned token stands for
//! the unit of work until the device finishes it. Dependent operators rely
//! on the queue's in-order execution to sequence against earlier work and
//! only block on a token when a result must be read back into host memory
//! or when tuning needs a per-candidate time.
//!
//! The synchronous CPU backends run to completion inside the operator
//! call, so their tokens are born finished and carry the measured wall
//! time for profiling.

use std::time::Duration;

use crate::error::Result;

#[cfg(feature = "wgpu")]
use crate::error::EngineError;
#[cfg(feature = "wgpu")]
use crate::runtime::WgpuRuntime;
#[cfg(feature = "wgpu")]
use std::sync::Arc;
#[cfg(feature = "wgpu")]
use std::time::Instant;

#[derive(Debug)]
enum Inner {
    /// Work already finished (synchronous backends, or after a wait).
    Done { elapsed: Duration },
    /// Work submitted to the device queue and possibly still running.
    #[cfg(feature = "wgpu")]
    Device {
        runtime: Arc<WgpuRuntime>,
        submitted_at: Instant,
    },
}

/// Handle to one enqueued unit of device work.
#[derive(Debug)]
pub struct CompletionToken {
    inner: Inner,
}

impl CompletionToken {
    /// A token for work that completed before the call returned.
    pub fn already_done() -> Self {
        Self::done(Duration::ZERO)
    }

    /// A finished token carrying a measured execution time.
    pub fn done(elapsed: Duration) -> Self {
        Self {
            inner: Inner::Done { elapsed },
        }
    }

    /// A token for work just submitted to the device queue.
    #[cfg(feature = "wgpu")]
    pub(crate) fn device(runtime: Arc<WgpuRuntime>) -> Self {
        Self {
            inner: Inner::Device {
                runtime,
                submitted_at: Instant::now(),
            },
        }
    }

    /// Whether the work has finished. Never blocks.
    pub fn is_complete(&self) -> bool {
        match &self.inner {
            Inner::Done { .. } => true,
            #[cfg(feature = "wgpu")]
            Inner::Device { runtime, .. } => matches!(
                runtime.device().poll(wgpu::PollType::Poll),
                Ok(wgpu::PollStatus::QueueEmpty)
            ),
        }
    }

    /// Blocks until the work completes and returns its elapsed time.
    ///
    /// Waiting resolves the token; later calls return the recorded time
    /// without touching the device again.
    pub fn wait(&mut self) -> Result<Duration> {
        match &self.inner {
            Inner::Done { elapsed } => Ok(*elapsed),
            #[cfg(feature = "wgpu")]
            Inner::Device {
                runtime,
                submitted_at,
            } => {
                if let Err(err) = runtime.device().poll(wgpu::PollType::Wait) {
                    tracing::error!(error = %err, "device wait failed");
                    return Err(EngineError::Device { code: -1 });
                }
                let elapsed = submitted_at.elapsed();
                self.inner = Inner::Done { elapsed };
                Ok(elapsed)
            }
        }
    }

    /// Elapsed-time statistics, if the work has been resolved.
    pub fn elapsed(&self) -> Option<Duration> {
        match &self.inner {
            Inner::Done { elapsed } => Some(*elapsed),
            #[cfg(feature = "wgpu")]
            Inner::Device { .. } => None,
        }
    }
}

impl Default for CompletionToken {
    fn default() -> Self {
        Self::already_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synchronous_tokens_are_born_complete() {
        let mut token = CompletionToken::done(Duration::from_micros(42));
        assert!(token.is_complete());
        assert_eq!(token.elapsed(), Some(Duration::from_micros(42)));
        assert_eq!(token.wait().unwrap(), Duration::from_micros(42));
    }

    #[test]
    fn default_token_reports_zero_elapsed() {
        let token = CompletionToken::default();
        assert!(token.is_complete());
        assert_eq!(token.elapsed(), Some(Duration::ZERO));
    }
}
