//! Anchor identities and link directions

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a node in the link graph.
///
/// An id names a conceptual node whether or not a [`LinkAnchor`] has been
/// materialized for it yet.
///
/// Ordering: context id descending, then local id ascending.
///
/// [`LinkAnchor`]: crate::LinkAnchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorId {
    /// Context the local id is unique within (usually a map)
    pub context_id: u32,
    /// Id within the context
    pub local_id: u64,
}

impl AnchorId {
    /// Placeholder for "no anchor"
    pub const UNINITIALIZED: Self = Self {
        context_id: u32::MAX,
        local_id: u64::MAX,
    };

    /// Create a new anchor id
    pub const fn new(context_id: u32, local_id: u64) -> Self {
        Self {
            context_id,
            local_id,
        }
    }

    /// Check whether this is a real id rather than [`AnchorId::UNINITIALIZED`]
    pub fn is_initialized(&self) -> bool {
        *self != Self::UNINITIALIZED
    }
}

impl Ord for AnchorId {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .context_id
            .cmp(&self.context_id)
            .then_with(|| self.local_id.cmp(&other.local_id))
    }
}

impl PartialOrd for AnchorId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:016x}", self.context_id, self.local_id)
    }
}

/// The two ends of a directed link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkDirection {
    /// Seen from the source anchor
    Forward,
    /// Seen from the target anchor
    Backward,
}

impl LinkDirection {
    /// Both directions, forward first
    pub const ALL: [LinkDirection; 2] = [LinkDirection::Forward, LinkDirection::Backward];

    /// Array slot for per-direction storage
    pub fn index(self) -> usize {
        match self {
            Self::Forward => 0,
            Self::Backward => 1,
        }
    }

    /// The other direction
    pub fn opposite(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_context_descending_then_local_ascending() {
        let mut ids = vec![
            AnchorId::new(1, 5),
            AnchorId::new(2, 9),
            AnchorId::new(1, 3),
            AnchorId::new(2, 1),
        ];
        ids.sort();

        assert_eq!(
            ids,
            vec![
                AnchorId::new(2, 1),
                AnchorId::new(2, 9),
                AnchorId::new(1, 3),
                AnchorId::new(1, 5),
            ]
        );
    }

    #[test]
    fn test_uninitialized_sentinel() {
        assert!(!AnchorId::UNINITIALIZED.is_initialized());
        assert!(AnchorId::new(0, 0).is_initialized());
    }

    #[test]
    fn test_direction_opposite() {
        assert_eq!(LinkDirection::Forward.opposite(), LinkDirection::Backward);
        assert_eq!(LinkDirection::Backward.opposite(), LinkDirection::Forward);
        assert_eq!(LinkDirection::Backward.index(), 1);
    }
}
