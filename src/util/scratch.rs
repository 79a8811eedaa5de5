//! Per-Frame Scratch Arena
//!
//! Bump allocations for transient per-frame data (vertex and index
//! assembly). The arena is reset at every frame boundary; nothing
//! allocated from it survives the frame.

use bumpalo::Bump;

/// Frame-scoped bump arena.
#[derive(Default)]
pub struct ScratchArena {
    bump: Bump,
}

impl ScratchArena {
    #[must_use]
    pub fn new() -> Self {
        Self { bump: Bump::new() }
    }

    /// A growable vector backed by the arena.
    #[must_use]
    pub fn vec<T>(&self) -> bumpalo::collections::Vec<'_, T> {
        bumpalo::collections::Vec::new_in(&self.bump)
    }

    /// Reclaim everything allocated this frame.
    pub fn reset(&mut self) {
        self.bump.reset();
    }

    /// Bytes currently allocated from the arena.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }
}
