// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Capability-based S-CSCF selection.
//!
//! A candidate qualifies when it declares every mandatory capability and its
//! key is not excluded. Qualifying candidates rank by the number of optional
//! capabilities they declare, then by priority (higher first). Remaining ties
//! go to the candidate listed first in the pool.

use std::collections::BTreeSet;

use smol_str::SmolStr;

use crate::pool::Candidate;

/// Integer-coded capabilities a directory answer asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityRequirement {
    pub mandatory: BTreeSet<u32>,
    pub optional: BTreeSet<u32>,
}

impl CapabilityRequirement {
    pub fn new(
        mandatory: impl IntoIterator<Item = u32>,
        optional: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            mandatory: mandatory.into_iter().collect(),
            optional: optional.into_iter().collect(),
        }
    }

    pub fn is_satisfied_by(&self, candidate: &Candidate) -> bool {
        self.mandatory.is_subset(&candidate.capabilities)
    }

    pub fn optional_matches(&self, candidate: &Candidate) -> usize {
        self.optional.intersection(&candidate.capabilities).count()
    }
}

/// Picks the best candidate for `requirement`, skipping keys in `excluded`.
pub fn select<'a>(
    requirement: &CapabilityRequirement,
    pool: &'a [Candidate],
    excluded: &BTreeSet<SmolStr>,
) -> Option<&'a Candidate> {
    let mut best: Option<(&Candidate, (usize, i32))> = None;
    for candidate in pool {
        if excluded.contains(&candidate.key) || !requirement.is_satisfied_by(candidate) {
            continue;
        }
        let rank = (requirement.optional_matches(candidate), candidate.priority);
        // Strictly greater only, so the earliest candidate keeps a tie.
        if best.map_or(true, |(_, best_rank)| rank > best_rank) {
            best = Some((candidate, rank));
        }
    }
    best.map(|(candidate, _)| candidate)
}
