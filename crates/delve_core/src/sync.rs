//! Host/peer turn barrier.
//!
//! In a networked game one world is authoritative (the host) and the others
//! (peers) only apply the states it publishes. After running turn `T - 1`
//! the host publishes the state for turn `T`; a peer that has applied it
//! acknowledges `T`, the turn its own world is now on. The host may not run
//! turn `T` until every peer has acknowledged `T`, so it never gets more than
//! the one published turn ahead of its slowest peer. The barrier is shared
//! with the network layer, which feeds acknowledgements from its own thread.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Identifier of a connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Role of this world in a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    /// Single-player; never waits.
    #[default]
    Standalone,
    /// Authoritative; waits for every listed peer.
    Host {
        /// Connected peers.
        peers: Vec<PeerId>,
    },
    /// Follows a host; never runs turns itself.
    Peer,
}

/// Tracks peer acknowledgements for a hosting world.
#[derive(Debug, Default)]
pub struct PeerBarrier {
    role: PeerRole,
    /// Latest acknowledged turn per peer.
    acks: Mutex<BTreeMap<PeerId, u64>>,
}

impl PeerBarrier {
    /// Create a barrier for `role`.
    #[must_use]
    pub fn new(role: PeerRole) -> Self {
        Self {
            role,
            acks: Mutex::new(BTreeMap::new()),
        }
    }

    fn acks(&self) -> MutexGuard<'_, BTreeMap<PeerId, u64>> {
        self.acks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Role of this world.
    #[must_use]
    pub const fn role(&self) -> &PeerRole {
        &self.role
    }

    /// True unless this world is a peer.
    #[must_use]
    pub const fn is_authoritative(&self) -> bool {
        !matches!(self.role, PeerRole::Peer)
    }

    /// Record that `peer` has applied the state published for `turn` and is
    /// now on that turn. Older acknowledgements than the latest recorded are
    /// ignored. Returns `false` for unknown peers.
    pub fn acknowledge(&self, peer: PeerId, turn: u64) -> bool {
        let PeerRole::Host { peers } = &self.role else {
            warn!(%peer, turn, "Acknowledgement received by a non-host world");
            return false;
        };
        if !peers.contains(&peer) {
            warn!(%peer, turn, "Acknowledgement from unknown peer");
            return false;
        }
        let mut acks = self.acks();
        let latest = acks.entry(peer).or_insert(turn);
        *latest = (*latest).max(turn);
        true
    }

    /// Peers that are not yet on `turn`.
    ///
    /// Empty when the host may run `turn`. Turn zero never waits, since
    /// nothing has been published yet.
    #[must_use]
    pub fn missing_for(&self, turn: u64) -> Vec<PeerId> {
        let PeerRole::Host { peers } = &self.role else {
            return Vec::new();
        };
        if turn == 0 {
            return Vec::new();
        }
        let acks = self.acks();
        peers
            .iter()
            .copied()
            .filter(|peer| acks.get(peer).map_or(true, |&acked| acked < turn))
            .collect()
    }
}
