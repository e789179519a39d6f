//! Load intents and their coalescing into a single pending request.
//!
//! Callers describe what they want ([`LoadIntent`]); the coordinator folds
//! every intent registered between two builds into one [`LoadRequest`].
//! Higher-priority load types win, id sets union, reuse permissions only
//! narrow, and a reset is sticky until a request carrying it is built.

use std::collections::HashSet;

use tracing::trace;

use tsuzuri_types::EntryId;

use crate::window::LoadDirection;

/// Coordinator-level load kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadType {
    /// First load of the conversation, optionally centered on an entry.
    InitialMapping { focus: Option<EntryId> },
    /// Jump to an entry.
    PageAround(EntryId),
    /// Jump to the newest page.
    Newest,
    Older,
    Newer,
    /// Refresh in place.
    SameLocation,
}

impl LoadType {
    /// Higher wins when intents coalesce.
    pub fn priority(&self) -> u8 {
        match self {
            LoadType::InitialMapping { .. } => 4,
            LoadType::PageAround(_) => 3,
            LoadType::Newest => 2,
            LoadType::Older | LoadType::Newer => 1,
            LoadType::SameLocation => 0,
        }
    }

    /// The window direction this load asks the loader for.
    pub fn direction(&self) -> LoadDirection {
        match self {
            LoadType::InitialMapping { focus: Some(id) } => LoadDirection::Around(*id),
            LoadType::InitialMapping { focus: None } => LoadDirection::Newest,
            LoadType::PageAround(id) => LoadDirection::Around(*id),
            LoadType::Newest => LoadDirection::Newest,
            LoadType::Older => LoadDirection::Older,
            LoadType::Newer => LoadDirection::Newer,
            LoadType::SameLocation => LoadDirection::SameLocation,
        }
    }

    pub fn is_pagination(&self) -> bool {
        matches!(self, LoadType::Older | LoadType::Newer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadType::InitialMapping { .. } => "initial_mapping",
            LoadType::PageAround(_) => "page_around",
            LoadType::Newest => "newest",
            LoadType::Older => "older",
            LoadType::Newer => "newer",
            LoadType::SameLocation => "same_location",
        }
    }
}

impl std::fmt::Display for LoadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the consumer should scroll once the load lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollIntent {
    /// Restore the initial position (focus entry or bottom).
    InitialPosition,
    BottomOfWindow { animated: bool },
    Entry { id: EntryId, animated: bool },
}

/// Something a caller wants the window to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadIntent {
    /// First load, optionally centered on `focus`.
    Initial { focus: Option<EntryId> },
    LoadOlder,
    LoadNewer,
    /// Refresh in place after the given ids changed or disappeared.
    Reload {
        updated: HashSet<EntryId>,
        deleted: HashSet<EntryId>,
    },
    /// Page around an entry and scroll to it.
    JumpTo { id: EntryId, animated: bool },
    /// Load the newest page and scroll to the bottom.
    ScrollToNewest { animated: bool },
    /// The store was rewritten externally; re-query everything, reuse nothing.
    ResetAndReload,
    /// Viewport or appearance changed; entities stay valid, layout does not.
    StyleChanged,
    /// Refresh in place with explicit reuse permissions.
    ReloadWithReuse {
        can_reuse_entities: bool,
        can_reuse_rendered_state: bool,
    },
}

impl LoadIntent {
    pub fn reload_updated(ids: impl IntoIterator<Item = EntryId>) -> Self {
        LoadIntent::Reload {
            updated: ids.into_iter().collect(),
            deleted: HashSet::new(),
        }
    }

    pub fn reload_deleted(ids: impl IntoIterator<Item = EntryId>) -> Self {
        LoadIntent::Reload {
            updated: HashSet::new(),
            deleted: ids.into_iter().collect(),
        }
    }

    /// Load type this intent maps to.
    pub fn load_type(&self) -> LoadType {
        match self {
            LoadIntent::Initial { focus } => LoadType::InitialMapping { focus: *focus },
            LoadIntent::LoadOlder => LoadType::Older,
            LoadIntent::LoadNewer => LoadType::Newer,
            LoadIntent::JumpTo { id, .. } => LoadType::PageAround(*id),
            LoadIntent::ScrollToNewest { .. } => LoadType::Newest,
            LoadIntent::Reload { .. }
            | LoadIntent::ResetAndReload
            | LoadIntent::StyleChanged
            | LoadIntent::ReloadWithReuse { .. } => LoadType::SameLocation,
        }
    }
}

/// A frozen load request, handed to exactly one build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadRequest {
    pub request_id: u64,
    pub load_type: LoadType,
    pub updated_ids: HashSet<EntryId>,
    pub deleted_ids: HashSet<EntryId>,
    pub can_reuse_entities: bool,
    pub can_reuse_rendered_state: bool,
    pub did_reset: bool,
    pub scroll_intent: Option<ScrollIntent>,
}

impl LoadRequest {
    pub fn direction(&self) -> LoadDirection {
        self.load_type.direction()
    }
}

// ── Pending state ───────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct PendingRequest {
    load_type: LoadType,
    updated_ids: HashSet<EntryId>,
    deleted_ids: HashSet<EntryId>,
    can_reuse_entities: bool,
    can_reuse_rendered_state: bool,
    did_reset: bool,
    scroll_intent: Option<ScrollIntent>,
}

impl Default for PendingRequest {
    fn default() -> Self {
        Self {
            load_type: LoadType::SameLocation,
            updated_ids: HashSet::new(),
            deleted_ids: HashSet::new(),
            can_reuse_entities: true,
            can_reuse_rendered_state: true,
            did_reset: false,
            scroll_intent: None,
        }
    }
}

impl PendingRequest {
    fn set_load_type(&mut self, load_type: LoadType, scroll_intent: Option<ScrollIntent>) {
        let current = self.load_type.priority();
        let incoming = load_type.priority();
        let replace = if incoming != current {
            incoming > current
        } else {
            // a bare refresh never drops a pending scroll
            !(load_type == LoadType::SameLocation
                && scroll_intent.is_none()
                && self.scroll_intent.is_some())
        };
        if replace {
            self.load_type = load_type;
            self.scroll_intent = scroll_intent;
        } else {
            trace!(kept = %self.load_type, ignored = %load_type, "load type not replaced");
        }
    }

    fn apply(&mut self, intent: LoadIntent) {
        let load_type = intent.load_type();
        match intent {
            LoadIntent::Initial { .. } => {
                self.set_load_type(load_type, Some(ScrollIntent::InitialPosition));
                self.can_reuse_entities = false;
                self.can_reuse_rendered_state = false;
            }
            LoadIntent::LoadOlder | LoadIntent::LoadNewer => {
                self.set_load_type(load_type, None);
            }
            LoadIntent::Reload { updated, deleted } => {
                self.set_load_type(load_type, None);
                self.updated_ids.extend(updated);
                self.deleted_ids.extend(deleted);
            }
            LoadIntent::JumpTo { id, animated } => {
                self.set_load_type(load_type, Some(ScrollIntent::Entry { id, animated }));
            }
            LoadIntent::ScrollToNewest { animated } => {
                self.set_load_type(load_type, Some(ScrollIntent::BottomOfWindow { animated }));
            }
            LoadIntent::ResetAndReload => {
                self.set_load_type(load_type, None);
                self.did_reset = true;
                self.can_reuse_entities = false;
                self.can_reuse_rendered_state = false;
            }
            LoadIntent::StyleChanged => {
                self.set_load_type(load_type, None);
                self.can_reuse_rendered_state = false;
            }
            LoadIntent::ReloadWithReuse {
                can_reuse_entities,
                can_reuse_rendered_state,
            } => {
                self.set_load_type(load_type, None);
                self.can_reuse_entities &= can_reuse_entities;
                self.can_reuse_rendered_state &= can_reuse_rendered_state;
            }
        }
    }

    fn from_request(request: LoadRequest) -> Self {
        Self {
            load_type: request.load_type,
            updated_ids: request.updated_ids,
            deleted_ids: request.deleted_ids,
            can_reuse_entities: request.can_reuse_entities,
            can_reuse_rendered_state: request.can_reuse_rendered_state,
            did_reset: request.did_reset,
            scroll_intent: request.scroll_intent,
        }
    }

    /// Merge a restored request under intents registered after it.
    ///
    /// The restored request is older than anything pending, so its load
    /// type only wins on strictly higher priority.
    fn fold(&mut self, request: LoadRequest) {
        if request.load_type.priority() > self.load_type.priority() {
            self.load_type = request.load_type;
            self.scroll_intent = request.scroll_intent;
        } else if self.scroll_intent.is_none() && request.load_type == self.load_type {
            self.scroll_intent = request.scroll_intent;
        }
        self.updated_ids.extend(request.updated_ids);
        self.deleted_ids.extend(request.deleted_ids);
        self.can_reuse_entities &= request.can_reuse_entities;
        self.can_reuse_rendered_state &= request.can_reuse_rendered_state;
        self.did_reset |= request.did_reset;
    }
}

/// Accumulates intents into at most one pending request.
#[derive(Debug, Default)]
pub struct RequestCoordinator {
    pending: Option<PendingRequest>,
    next_request_id: u64,
}

impl RequestCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an intent.
    pub fn register(&mut self, intent: LoadIntent) {
        trace!(?intent, "intent registered");
        self.pending.get_or_insert_with(PendingRequest::default).apply(intent);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Load type of the pending request, if any.
    pub fn pending_load_type(&self) -> Option<LoadType> {
        self.pending.as_ref().map(|p| p.load_type)
    }

    /// Take the pending request, freezing it under a new request id.
    pub fn build(&mut self) -> Option<LoadRequest> {
        let pending = self.pending.take()?;
        self.next_request_id += 1;
        Some(LoadRequest {
            request_id: self.next_request_id,
            load_type: pending.load_type,
            updated_ids: pending.updated_ids,
            deleted_ids: pending.deleted_ids,
            can_reuse_entities: pending.can_reuse_entities,
            can_reuse_rendered_state: pending.can_reuse_rendered_state,
            did_reset: pending.did_reset,
            scroll_intent: pending.scroll_intent,
        })
    }

    /// Fold a request that failed to build back into the pending state.
    pub fn restore(&mut self, request: LoadRequest) {
        trace!(request_id = request.request_id, load_type = %request.load_type, "request restored");
        match self.pending.as_mut() {
            Some(pending) => pending.fold(request),
            None => self.pending = Some(PendingRequest::from_request(request)),
        }
    }
}
