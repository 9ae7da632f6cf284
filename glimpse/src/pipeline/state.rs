//! Request lifecycle states.
//!
//! ```text
//!   Idle ──► Dispatching ──► FetchingLocal ──► Decoding ──► Completed
//!    │            │   │          │    ▲           ▲
//!    │            │   │          ▼    │           │
//!    │            │   └─────► FetchingNetwork ────┘
//!    │            ▼                               │
//!    └──────► CacheHit ───────────────────────────┘
//!
//!   Cancelled: from any non-terminal state
//!   Failed:    from Dispatching, Fetching*, CacheHit, Decoding
//! ```

use std::fmt;

/// Where a delivered image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Resident decoded image; no work done
    MemoryCache,
    /// Decoded from bytes on the disk cache
    DiskCache,
    /// Fetched through the byte fetcher
    Network,
    /// Read from a local file
    Local,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MemoryCache => "memory",
            Self::DiskCache => "disk",
            Self::Network => "network",
            Self::Local => "local",
        })
    }
}

/// State of an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Idle,
    Dispatching,
    FetchingNetwork,
    FetchingLocal,
    CacheHit,
    Decoding,
    Completed,
    Cancelled,
    Failed,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Legal transitions of the lifecycle.
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Cancelled) => true,
            (Idle, Dispatching | CacheHit) => true,
            (Dispatching, FetchingNetwork | FetchingLocal | CacheHit | Failed) => true,
            // a disk probe that misses hands over to the network
            (FetchingLocal, FetchingNetwork | Decoding | Failed) => true,
            (FetchingNetwork, Decoding | Failed) => true,
            (CacheHit, Decoding | Completed | Failed) => true,
            (Decoding, Completed | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestState::*;

    const ALL: [RequestState; 9] = [
        Idle,
        Dispatching,
        FetchingNetwork,
        FetchingLocal,
        CacheHit,
        Decoding,
        Completed,
        Cancelled,
        Failed,
    ];

    #[test]
    fn test_happy_paths() {
        let network = [Idle, Dispatching, FetchingLocal, FetchingNetwork, Decoding, Completed];
        let memory = [Idle, CacheHit, Completed];
        let recheck = [Idle, Dispatching, CacheHit, Completed];

        for path in [&network[..], &memory[..], &recheck[..]] {
            for pair in path.windows(2) {
                assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
            }
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [Completed, Cancelled, Failed] {
            for to in ALL {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_cancel_from_any_live_state() {
        for from in ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(from.can_transition_to(Cancelled), "{:?}", from);
        }
    }

    #[test]
    fn test_idle_cannot_fail_or_complete() {
        assert!(!Idle.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Completed));
        assert!(!Dispatching.can_transition_to(Completed));
        assert!(!FetchingNetwork.can_transition_to(Completed));
    }
}
