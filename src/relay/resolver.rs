//! Reply resolver
//!
//! Turns "this message replies to X on its own platform" into a reply target
//! per destination platform. Lookup order for each destination:
//!
//! 1. the in-memory cross-reference maps
//! 2. the identity store record that holds X
//!
//! A miss on both is not an error: the destination gets a top-level message.

use super::crossref::CrossRefMaps;
use super::types::{NativeId, Platform};
use crate::store::{IdentityStore, MessageRecord};
use std::collections::HashMap;
use std::sync::Arc;

/// Reply targets resolved for one outgoing message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedReply {
    /// Internal id of the replied-to record, when the store knows it
    pub reply_to_id: Option<String>,
    /// Native reply target per platform
    pub targets: HashMap<Platform, NativeId>,
}

impl ResolvedReply {
    /// Reply target on `platform`, or `None` for a top-level send
    pub fn target(&self, platform: Platform) -> Option<&NativeId> {
        self.targets.get(&platform)
    }

    /// Native ids to store in the new record's `reply_to_*` fields
    pub fn reply_to_platform_ids(&self) -> Vec<NativeId> {
        Platform::ALL
            .iter()
            .filter_map(|p| self.targets.get(p).cloned())
            .collect()
    }

    /// Targets taken directly from a known parent record
    pub fn from_parent(parent: &MessageRecord) -> Self {
        let targets = Platform::ALL
            .iter()
            .filter_map(|p| parent.platform_id(*p).map(|id| (*p, id)))
            .collect();
        Self {
            reply_to_id: Some(parent.internal_id.clone()),
            targets,
        }
    }
}

/// Resolves platform reply targets through the maps with store fallback
#[derive(Clone)]
pub struct ReplyResolver {
    store: Arc<dyn IdentityStore>,
    maps: CrossRefMaps,
}

impl ReplyResolver {
    pub fn new(store: Arc<dyn IdentityStore>, maps: CrossRefMaps) -> Self {
        Self { store, maps }
    }

    /// Resolve an origin-platform reply target.
    ///
    /// The origin id itself is kept as the origin platform's target so the
    /// new record remembers what it replied to locally.
    pub async fn resolve(&self, reply_to: &NativeId) -> ResolvedReply {
        let origin = reply_to.platform();
        let parent = match self.store.find_by_platform_id(reply_to).await {
            Ok(parent) => parent,
            Err(e) => {
                // Treated as a miss: the reply degrades, the message still goes out
                tracing::warn!(reply_to = %reply_to, "Store lookup failed during reply resolution: {}", e);
                None
            }
        };

        let mut resolved = ResolvedReply {
            reply_to_id: parent.as_ref().map(|p| p.internal_id.clone()),
            targets: HashMap::new(),
        };
        resolved.targets.insert(origin, reply_to.clone());

        for target in origin.others() {
            let found = match self.maps.lookup(reply_to, target).await {
                Some(id) => Some(id),
                None => parent.as_ref().and_then(|p| p.platform_id(target)),
            };
            match found {
                Some(id) => {
                    resolved.targets.insert(target, id);
                }
                None => {
                    tracing::debug!(
                        reply_to = %reply_to,
                        target = %target,
                        "No reply mapping, sending top-level"
                    );
                }
            }
        }

        resolved
    }
}
