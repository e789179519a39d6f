//! Random conversation activity.

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::trace;

use tsuzuri_types::{Entry, EntryId, EntryKind, EntryStatus};
use tsuzuri_window::{LoadIntent, MemoryStore, Style, ViewSnapshot};

const AUTHORS: &[&str] = &["amy", "bob", "chidi", "dana"];

/// One simulated step.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Write a new message at the newest end.
    Append(Entry),
    /// Rewrite an existing entry's status or body.
    Edit(Entry),
    Delete(EntryId),
    /// Delete without a change notification.
    DeleteSilently(EntryId),
    Submit(LoadIntent),
    SetView(ViewSnapshot),
    SetStyle(Style),
}

/// Generates actions from a seeded RNG.
pub struct Script {
    rng: StdRng,
    style: Style,
    typing: bool,
}

impl Script {
    pub fn new(rng: StdRng, style: Style) -> Self {
        Self {
            rng,
            style,
            typing: false,
        }
    }

    pub fn message(rng: &mut StdRng) -> Entry {
        let kind = if rng.gen_bool(0.5) {
            EntryKind::IncomingMessage
        } else {
            EntryKind::OutgoingMessage
        };
        let author = AUTHORS.choose(rng).copied().unwrap_or("amy");
        let words = rng.gen_range(1..40);
        Entry::builder(EntryId::new(), kind)
            .author(author)
            .body("lorem ".repeat(words))
            .build()
    }

    /// Pick the next action given the current store contents.
    pub fn next(&mut self, store: &MemoryStore) -> Action {
        let ids = store.ids();
        let roll = self.rng.gen_range(0..100);
        let action = match roll {
            0..=29 => Action::Append(Self::message(&mut self.rng)),
            30..=39 if !ids.is_empty() => {
                let Some(mut entry) = ids.choose(&mut self.rng).and_then(|id| store.get(id))
                else {
                    return Action::Submit(LoadIntent::ScrollToNewest { animated: false });
                };
                entry.status = *[
                    EntryStatus::Delivered,
                    EntryStatus::Read,
                    EntryStatus::Failed,
                ]
                .choose(&mut self.rng)
                .unwrap_or(&EntryStatus::Read);
                if self.rng.gen_bool(0.2) {
                    entry.body.push_str(" (edited)");
                }
                Action::Edit(entry)
            }
            40..=45 if !ids.is_empty() => match ids.choose(&mut self.rng) {
                Some(id) => Action::Delete(*id),
                None => Action::Submit(LoadIntent::LoadOlder),
            },
            46 if !ids.is_empty() => match ids.choose(&mut self.rng) {
                Some(id) => Action::DeleteSilently(*id),
                None => Action::Submit(LoadIntent::LoadOlder),
            },
            47..=64 => Action::Submit(LoadIntent::LoadOlder),
            65..=79 => Action::Submit(LoadIntent::LoadNewer),
            80..=86 if !ids.is_empty() => match ids.choose(&mut self.rng) {
                Some(id) => Action::Submit(LoadIntent::JumpTo {
                    id: *id,
                    animated: self.rng.gen_bool(0.5),
                }),
                None => Action::Submit(LoadIntent::ScrollToNewest { animated: false }),
            },
            87..=91 => Action::Submit(LoadIntent::ScrollToNewest {
                animated: self.rng.gen_bool(0.5),
            }),
            92..=96 => {
                self.typing = !self.typing;
                Action::SetView(ViewSnapshot {
                    typing_author: self.typing.then(|| "bob".to_string()),
                })
            }
            97 => {
                self.style.generation += 1;
                self.style.viewport_height = self.rng.gen_range(300.0..1200.0);
                Action::SetStyle(self.style)
            }
            _ => Action::Submit(LoadIntent::reload_updated(std::iter::empty())),
        };
        trace!(?action, "next action");
        action
    }
}
