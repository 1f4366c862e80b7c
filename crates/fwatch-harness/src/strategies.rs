#![forbid(unsafe_code)]

//! Proptest strategies for declaration plans.
//!
//! A plan is a sequence of render passes. Every pass declares the same
//! number of slots with the same kinds (positional stability), but each pass
//! draws its sources from one shared pool. Sources are distinct within a
//! pass, so a valid plan never watches an object twice, yet an object may
//! move to another slot from one pass to the next.

use proptest::prelude::*;

/// What one slot of one pass declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotChoice {
    /// `watch` on pool notifier `n`.
    Watch(usize),
    /// `register_handler` on pool observable `n`.
    Handler(usize),
}

impl SlotChoice {
    #[must_use]
    pub fn source(self) -> usize {
        match self {
            Self::Watch(n) | Self::Handler(n) => n,
        }
    }
}

/// A sequence of passes over the same slot shape.
#[derive(Debug, Clone)]
pub struct DeclarationPlan {
    /// Size of the shared source pool.
    pub sources: usize,
    /// `passes[p][slot]`.
    pub passes: Vec<Vec<SlotChoice>>,
}

impl DeclarationPlan {
    #[must_use]
    pub fn slots(&self) -> usize {
        self.passes.first().map_or(0, Vec::len)
    }
}

/// Spare sources beyond the slot count, so passes can swap in new objects.
const SPARE_SOURCES: usize = 2;

/// Plans with up to `max_slots` slots and `max_passes` passes. Slot `i`
/// always has the same kind across passes; every pass picks distinct sources
/// from a pool of `slots + 2`.
pub fn declaration_plan(
    max_slots: usize,
    max_passes: usize,
) -> impl Strategy<Value = DeclarationPlan> {
    (1..=max_slots, 1..=max_passes)
        .prop_flat_map(|(slots, passes)| {
            (proptest::collection::vec(any::<bool>(), slots), Just(passes))
        })
        .prop_flat_map(|(kinds, passes)| {
            let sources = kinds.len() + SPARE_SOURCES;
            let pass = Just((0..sources).collect::<Vec<_>>())
                .prop_shuffle()
                .prop_map(move |order| {
                    order
                        .iter()
                        .zip(&kinds)
                        .map(|(&source, &is_watch)| {
                            if is_watch {
                                SlotChoice::Watch(source)
                            } else {
                                SlotChoice::Handler(source)
                            }
                        })
                        .collect::<Vec<_>>()
                });
            (Just(sources), proptest::collection::vec(pass, passes))
        })
        .prop_map(|(sources, passes)| DeclarationPlan { sources, passes })
}
