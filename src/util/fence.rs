//! Submission Fences
//!
//! Completion tracking for GPU submissions. wgpu signals completion
//! through a callback; the fence latches that into a flag the render
//! thread can poll against a deadline, so a wedged queue surfaces as a
//! bounded error instead of a hang.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::errors::{MixerError, Result};

/// Fence signaled when all work submitted before its creation completes.
#[derive(Clone)]
pub struct SubmissionFence {
    device: wgpu::Device,
    done: Arc<AtomicBool>,
}

impl SubmissionFence {
    /// Register a fence for everything submitted so far on `queue`.
    #[must_use]
    pub fn after_submit(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        queue.on_submitted_work_done(move || flag.store(true, Ordering::Release));
        Self {
            device: device.clone(),
            done,
        }
    }

    /// A fence that is already signaled.
    #[must_use]
    pub fn signaled(device: &wgpu::Device) -> Self {
        Self {
            device: device.clone(),
            done: Arc::new(AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Pump the device once so pending callbacks can run.
    pub fn poll(&self) {
        let _ = self.device.poll(wgpu::PollType::Poll);
    }

    /// Wait for the fence with a deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_signaled() {
                return Ok(());
            }
            self.poll();
            if self.is_signaled() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(MixerError::ResourceExhausted(
                    "timeout waiting for submission fence".into(),
                ));
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }
}
