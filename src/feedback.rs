//! Coaching messages
//!
//! A catalog of message variants per state, and a selector that picks one
//! deterministically. Variants the pattern learner has seen work are preferred;
//! otherwise selection rotates through the least recently used.

use crate::types::{FeedbackMessage, UserState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bias assumed for variants the learner has no verdict on
const NEUTRAL_BIAS: f64 = 0.5;

/// Identifier of one message variant, stable across sessions
pub fn variant_key(state: UserState, index: usize) -> String {
    format!("{}/{}", state.as_str(), index)
}

/// Message variants per state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCatalog {
    pub entries: BTreeMap<UserState, Vec<String>>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        let mut add = |state: UserState, texts: &[&str]| {
            entries.insert(state, texts.iter().map(|t| t.to_string()).collect());
        };

        add(
            UserState::HighlyFocusedEngaged,
            &[
                "You're all set and ready to win! Keep that energy up!",
                "In the zone! Amazing focus!",
                "Crushing it! Your engagement is top-tier!",
            ],
        );
        add(
            UserState::Focused,
            &[
                "Great focus! Keep it steady.",
                "Looking sharp and focused!",
                "Maintaining good concentration. Well done!",
            ],
        );
        add(
            UserState::SlightlyDistracted,
            &[
                "Eyes off the prize! Focus up, champion.",
                "A little distracted? Bring your attention back to the game.",
                "Regain that laser focus!",
            ],
        );
        add(
            UserState::HighlyDistracted,
            &[
                "Losing focus! Try to minimize distractions.",
                "Major distraction detected. Time to refocus hard!",
                "Zone back in! The game needs your full attention.",
            ],
        );
        add(
            UserState::SlightlyFatigued,
            &[
                "Feeling tired? A quick stretch will power you up!",
                "Energy levels dipping a bit? Consider a short break soon.",
                "A little fatigue setting in. Stay mindful of your energy.",
            ],
        );
        add(
            UserState::HighlyFatigued,
            &[
                "Fatigue is high. Consider taking a break to refresh!",
                "Seriously tired. A proper break is highly recommended!",
                "Don't push through extreme fatigue. Rest and come back stronger!",
            ],
        );
        add(
            UserState::SlightlyFrustrated,
            &[
                "Feeling a bit tense? Remember to breathe.",
                "A little frustration? Take a deep breath and reset.",
                "Keep cool. You can overcome this challenge.",
            ],
        );
        add(
            UserState::HighlyFrustrated,
            &[
                "Game getting tough? Take a walk outside and return stronger.",
                "High frustration! Step away for a moment to clear your head.",
                "Deep breaths. Don't let frustration take over. A short break might help.",
            ],
        );
        add(
            UserState::NeutralCalm,
            &[
                "Stay cool and collected.",
                "Maintaining a calm focus.",
                "Ready for whatever comes next.",
            ],
        );

        Self { entries }
    }
}

impl MessageCatalog {
    pub fn variants(&self, state: UserState) -> &[String] {
        self.entries.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Keys of every variant for a state, in catalog order
    pub fn variant_keys(&self, state: UserState) -> Vec<String> {
        (0..self.variants(state).len())
            .map(|i| variant_key(state, i))
            .collect()
    }
}

/// Deterministic variant selection with least-recently-used rotation
#[derive(Debug, Clone, Default)]
pub struct MessageSelector {
    tick: u64,
    last_used: BTreeMap<String, u64>,
    previous: BTreeMap<UserState, usize>,
}

impl MessageSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick a variant for `state`.
    ///
    /// `bias` maps variant keys to learned improvement ratios. Highest bias
    /// wins; ties go to the least recently used variant, then the lowest index.
    /// The previous variant for the state is never repeated while another exists.
    pub fn select(
        &mut self,
        catalog: &MessageCatalog,
        state: UserState,
        bias: &BTreeMap<String, f64>,
    ) -> Option<FeedbackMessage> {
        let variants = catalog.variants(state);
        if variants.is_empty() {
            return None;
        }

        let previous = self.previous.get(&state).copied();
        let candidates = (0..variants.len())
            .filter(|i| variants.len() == 1 || Some(*i) != previous)
            .map(|i| {
                let key = variant_key(state, i);
                let score = bias.get(&key).copied().unwrap_or(NEUTRAL_BIAS);
                let last_used = self.last_used.get(&key).copied();
                (i, key, score, last_used)
            });

        // Higher score first, then never-used, then oldest use, then lowest index
        let (index, key, _, _) = candidates.min_by(|a, b| {
            b.2.total_cmp(&a.2)
                .then_with(|| a.3.cmp(&b.3))
                .then_with(|| a.0.cmp(&b.0))
        })?;

        self.tick += 1;
        self.last_used.insert(key, self.tick);
        self.previous.insert(state, index);

        Some(FeedbackMessage {
            state,
            category: state.category(),
            variant: index,
            text: variants[index].clone(),
        })
    }
}
