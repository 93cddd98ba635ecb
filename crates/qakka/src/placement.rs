use std::hash::{Hash, Hasher};

use hashring::HashRing;

use crate::types::QueueName;

/// Virtual nodes per member. Consistent hashing needs ~100+ virtual nodes
/// per real node for even distribution.
const VNODES_PER_MEMBER: u32 = 100;

/// A wrapper around a member name that implements Hash for use with HashRing.
#[derive(Debug, Clone, Eq, PartialEq)]
struct MemberNode {
    name: String,
    replica: u32,
}

impl Hash for MemberNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.replica.hash(state);
    }
}

/// Consistent assignment of queue names to cluster members within a region.
///
/// Exactly one member hosts the actor for a given (queue, region); every
/// member computes the same assignment from the same member list, so
/// at-most-one is enforced cooperatively. Membership changes (discovery,
/// failure detection) are an external concern — callers rebuild the
/// placement from the new member list.
pub struct QueuePlacement {
    ring: HashRing<MemberNode>,
    local_member: String,
}

impl QueuePlacement {
    pub fn new(members: &[String], local_member: impl Into<String>) -> Self {
        let mut ring = HashRing::new();
        for member in members {
            for replica in 0..VNODES_PER_MEMBER {
                ring.add(MemberNode {
                    name: member.clone(),
                    replica,
                });
            }
        }
        Self {
            ring,
            local_member: local_member.into(),
        }
    }

    /// The member that hosts the actor for `queue`, or `None` when the
    /// member list is empty.
    pub fn owner(&self, queue: &QueueName) -> Option<&str> {
        self.ring.get(&queue.as_ref()).map(|n| n.name.as_str())
    }

    /// Whether this process hosts the actor for `queue`.
    pub fn is_local(&self, queue: &QueueName) -> bool {
        self.owner(queue).is_some_and(|o| o == self.local_member)
    }
}
