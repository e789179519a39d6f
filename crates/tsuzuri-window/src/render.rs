//! Immutable render states.
//!
//! A [`RenderState`] is what the consumer displays: the rendered items for
//! one window, an id → position index, and the window's edge flags. States
//! are never mutated; each landing replaces the previous `Arc<RenderState>`.
//!
//! Building a state also classifies every id present in both the previous
//! and the new state. An entity change is a *state* change; a change in the
//! computed layout state alone (cluster boundaries, style) is an
//! *appearance* change. The diff engine uses this to pick update ops and to
//! decide whether the transition may animate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use tsuzuri_types::{Entry, EntryId, EntryKind, EntryStatus};

use crate::error::RenderError;
use crate::request::LoadType;
use crate::window::WindowBatch;

/// Viewport and appearance inputs to layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Style {
    pub viewport_width: f64,
    pub viewport_height: f64,
    /// Bumped whenever fonts, theme or other appearance inputs change.
    pub generation: u64,
}

impl Style {
    pub fn new(viewport_width: f64, viewport_height: f64) -> Self {
        Self {
            viewport_width,
            viewport_height,
            generation: 0,
        }
    }

    /// Layout needs a real width before anything can be loaded.
    pub fn is_ready(&self) -> bool {
        self.viewport_width > 0.0
    }
}

/// Transient view inputs that are not stored entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewSnapshot {
    /// Someone is typing; rendered as a trailing indicator item.
    pub typing_author: Option<String>,
}

/// Layout-relevant state computed for one item.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemState {
    pub kind: EntryKind,
    pub status: EntryStatus,
    pub author: String,
    pub text: String,
    /// First item of a run of messages from the same author.
    pub starts_cluster: bool,
    pub style_generation: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderedItem {
    pub id: EntryId,
    pub entity: Entry,
    pub computed_state: ItemState,
    /// Estimated height in points.
    pub stable_size: f64,
}

/// How an id present in both states changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The entity itself changed.
    State,
    /// Only the computed layout state changed.
    Appearance,
}

/// An immutable rendered window.
#[derive(Clone, Debug)]
pub struct RenderState {
    pub id: u64,
    pub items: Vec<RenderedItem>,
    id_to_position: HashMap<EntryId, usize>,
    pub can_load_older: bool,
    pub can_load_newer: bool,
    /// Request that produced this state; 0 for the initial state.
    pub request_id: u64,
    pub load_type: LoadType,
    pub window: WindowBatch,
    pub style: Style,
}

impl RenderState {
    /// The empty state every pipeline starts from.
    pub fn initial() -> Self {
        Self {
            id: 0,
            items: Vec::new(),
            id_to_position: HashMap::new(),
            can_load_older: false,
            can_load_newer: false,
            request_id: 0,
            load_type: LoadType::InitialMapping { focus: None },
            window: WindowBatch::empty(),
            style: Style::default(),
        }
    }

    pub fn is_empty_initial(&self) -> bool {
        self.id == 0
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn position_of(&self, id: &EntryId) -> Option<usize> {
        self.id_to_position.get(id).copied()
    }

    pub fn item(&self, id: &EntryId) -> Option<&RenderedItem> {
        self.position_of(id).and_then(|pos| self.items.get(pos))
    }

    pub fn ids(&self) -> Vec<EntryId> {
        self.items.iter().map(|item| item.id).collect()
    }

    /// Entities keyed by id, for reuse by the next hydration.
    ///
    /// The typing indicator is synthesized per build and never reused.
    pub fn entity_map(&self) -> HashMap<EntryId, Entry> {
        self.items
            .iter()
            .filter(|item| !item.id.is_typing_indicator())
            .map(|item| (item.id, item.entity.clone()))
            .collect()
    }
}

/// Inputs for one render state build.
pub struct RenderInputs<'a> {
    pub id: u64,
    pub request_id: u64,
    pub load_type: LoadType,
    pub window: WindowBatch,
    /// One entity per window id, in window order.
    pub entities: Vec<Entry>,
    pub style: Style,
    pub view: &'a ViewSnapshot,
    pub avg_item_height: f64,
    pub prior: &'a RenderState,
    /// Prior rendered items may be kept when nothing about them changed.
    pub reuse_rendered: bool,
}

/// A new render state plus the classification of shared ids.
pub struct BuiltRenderState {
    pub state: RenderState,
    pub changes: HashMap<EntryId, ChangeKind>,
    pub dropped: Vec<RenderError>,
}

/// Build a render state from a hydrated window.
pub fn build_render_state(inputs: RenderInputs<'_>) -> BuiltRenderState {
    let RenderInputs {
        id,
        request_id,
        load_type,
        window,
        entities,
        style,
        view,
        avg_item_height,
        prior,
        reuse_rendered,
    } = inputs;

    let mut dropped = Vec::new();
    let mut items: Vec<RenderedItem> = Vec::with_capacity(entities.len() + 1);
    let mut changes = HashMap::new();
    let mut reused = 0usize;

    let mut entities = entities;
    if let (Some(author), false) = (view.typing_author.as_ref(), window.can_load_newer) {
        entities.push(
            Entry::builder(EntryId::typing_indicator(), EntryKind::TypingIndicator)
                .author(author.clone())
                .created_at(0)
                .build(),
        );
    }

    for entity in entities {
        if let Err(err) = check_renderable(&entity) {
            warn!(%err, "dropping item");
            dropped.push(err);
            continue;
        }

        let starts_cluster = starts_cluster(items.last().map(|item| &item.entity), &entity);
        let computed_state = ItemState {
            kind: entity.kind,
            status: entity.status,
            author: entity.author.clone(),
            text: entity.body.clone(),
            starts_cluster,
            style_generation: style.generation,
        };

        let previous = prior.item(&entity.id);
        if let Some(previous) = previous {
            if previous.entity.state_differs(&entity) {
                changes.insert(entity.id, ChangeKind::State);
            } else if previous.computed_state != computed_state {
                changes.insert(entity.id, ChangeKind::Appearance);
            } else if reuse_rendered {
                items.push(previous.clone());
                reused += 1;
                continue;
            }
        }

        let stable_size = estimate_height(&entity, avg_item_height);
        items.push(RenderedItem {
            id: entity.id,
            entity,
            computed_state,
            stable_size,
        });
    }

    let id_to_position = items
        .iter()
        .enumerate()
        .map(|(pos, item)| (item.id, pos))
        .collect();

    trace!(
        render_state_id = id,
        items = items.len(),
        reused,
        changed = changes.len(),
        dropped = dropped.len(),
        "render state built"
    );

    let state = RenderState {
        id,
        items,
        id_to_position,
        can_load_older: window.can_load_older,
        can_load_newer: window.can_load_newer,
        request_id,
        load_type,
        window,
        style,
    };
    BuiltRenderState {
        state,
        changes,
        dropped,
    }
}

fn check_renderable(entity: &Entry) -> Result<(), RenderError> {
    match entity.kind {
        EntryKind::Unknown => Err(RenderError::UnsupportedKind {
            id: entity.id,
            kind: entity.kind,
        }),
        _ => Ok(()),
    }
}

fn starts_cluster(previous: Option<&Entry>, entity: &Entry) -> bool {
    match previous {
        Some(prev) => {
            !(entity.kind.is_message() && prev.kind == entity.kind && prev.author == entity.author)
        }
        None => true,
    }
}

fn estimate_height(entity: &Entry, avg_item_height: f64) -> f64 {
    const CHARS_PER_LINE: usize = 40;
    let lines = 1 + entity.body.chars().count() / CHARS_PER_LINE;
    avg_item_height * lines as f64
}
