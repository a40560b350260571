//! Feed lifecycle: Uninitialized → InitialLoading → Ready ⇄ (LoadingMore | SwitchingLanguage)
//! with Refreshing and Empty on the side.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::poem::{Language, Poem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FeedState {
    Uninitialized,
    InitialLoading,
    Ready,
    LoadingMore,
    SwitchingLanguage,
    Refreshing,
    Empty,
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedState::Uninitialized => write!(f, "Uninitialized"),
            FeedState::InitialLoading => write!(f, "InitialLoading"),
            FeedState::Ready => write!(f, "Ready"),
            FeedState::LoadingMore => write!(f, "LoadingMore"),
            FeedState::SwitchingLanguage => write!(f, "SwitchingLanguage"),
            FeedState::Refreshing => write!(f, "Refreshing"),
            FeedState::Empty => write!(f, "Empty"),
        }
    }
}

impl FeedState {
    pub fn can_transition_to(self, next: FeedState) -> bool {
        use FeedState::*;
        self == next
            || matches!(
                (self, next),
                (Uninitialized | Refreshing | SwitchingLanguage | Empty, InitialLoading)
                    | (InitialLoading | SwitchingLanguage | LoadingMore, Ready)
                    | (InitialLoading | SwitchingLanguage, Empty)
                    | (Ready, LoadingMore)
                    // any state can be superseded
                    | (_, SwitchingLanguage)
                    | (_, Refreshing)
                    | (_, Uninitialized)
            )
    }

    /// Whether the feed is waiting on its first poems.
    pub fn is_loading(self) -> bool {
        matches!(
            self,
            FeedState::InitialLoading | FeedState::SwitchingLanguage | FeedState::Refreshing
        )
    }
}

/// What subscribers see after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub state: FeedState,
    pub poems: Vec<Arc<Poem>>,
    pub has_more: bool,
    pub language: Language,
    pub degraded: bool,
    pub generation: u64,
}

/// Mutable per-session state, owned by the controller.
pub(crate) struct Session {
    pub state: FeedState,
    pub language: Language,
    pub poems: Vec<Arc<Poem>>,
    /// Source-language poems acquired this session, replayed on language switch.
    pub originals: Vec<Poem>,
    pub has_more: bool,
    pub degraded: bool,
}

impl Session {
    pub fn new(language: Language) -> Self {
        Self {
            state: FeedState::Uninitialized,
            language,
            poems: Vec::new(),
            originals: Vec::new(),
            has_more: true,
            degraded: false,
        }
    }

    /// Applies a validated transition. Invalid ones are logged and ignored.
    pub fn transition(&mut self, next: FeedState) -> bool {
        let current = self.state;
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "invalid feed transition");
            return false;
        }
        self.state = next;
        if current != next {
            info!(from = %current, to = %next, "feed_state");
        }
        true
    }

    /// Ready when poems are showing, Empty otherwise.
    pub fn settle(&mut self) {
        let next = if self.poems.is_empty() {
            FeedState::Empty
        } else {
            FeedState::Ready
        };
        self.transition(next);
    }

    pub fn reset(&mut self) {
        self.poems.clear();
        self.originals.clear();
        self.has_more = true;
        self.degraded = false;
    }

    pub fn snapshot(&self, generation: u64) -> FeedSnapshot {
        FeedSnapshot {
            state: self.state,
            poems: self.poems.clone(),
            has_more: self.has_more,
            language: self.language,
            degraded: self.degraded,
            generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_more_only_from_ready() {
        assert!(FeedState::Ready.can_transition_to(FeedState::LoadingMore));
        assert!(!FeedState::InitialLoading.can_transition_to(FeedState::LoadingMore));
        assert!(!FeedState::Empty.can_transition_to(FeedState::LoadingMore));
    }

    #[test]
    fn everything_can_be_refreshed() {
        for state in [
            FeedState::Uninitialized,
            FeedState::InitialLoading,
            FeedState::Ready,
            FeedState::LoadingMore,
            FeedState::SwitchingLanguage,
            FeedState::Empty,
        ] {
            assert!(state.can_transition_to(FeedState::Refreshing), "{state}");
        }
    }

    #[test]
    fn settle_picks_empty_without_poems() {
        let mut s = Session::new(Language::Persian);
        s.transition(FeedState::InitialLoading);
        s.settle();
        assert_eq!(s.state, FeedState::Empty);
    }
}
