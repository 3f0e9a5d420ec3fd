use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a [`FramePlayer`](super::FramePlayer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Running,
    Paused,
}

impl PlaybackState {
    fn to_u8(self) -> u8 {
        match self {
            PlaybackState::Stopped => 0,
            PlaybackState::Running => 1,
            PlaybackState::Paused => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Running,
            2 => PlaybackState::Paused,
            _ => PlaybackState::Stopped,
        }
    }
}

/// Playback state readable from the ticker and the audio loop without locking.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: PlaybackState) -> Self {
        Self(AtomicU8::new(state.to_u8()))
    }

    pub(crate) fn load(&self) -> PlaybackState {
        PlaybackState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn store(&self, state: PlaybackState) {
        self.0.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Moves to `to` only if currently in `from`.
    pub(crate) fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_requires_source_state() {
        let cell = StateCell::new(PlaybackState::Stopped);
        assert!(!cell.transition(PlaybackState::Running, PlaybackState::Paused));
        assert_eq!(cell.load(), PlaybackState::Stopped);

        cell.store(PlaybackState::Running);
        assert!(cell.transition(PlaybackState::Running, PlaybackState::Paused));
        assert_eq!(cell.load(), PlaybackState::Paused);
    }
}
