// Milestone tiers: the levels that carry a named role.
//
// Crossing detection is pure so the discord layer can stay a dumb driver:
// given the levels before and after an award, `crossed` returns every tier
// in `(before, after]`, in ascending order, and the caller fires the side
// effects per tier.

use serde::Deserialize;

/// One named tier on the ladder.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MilestoneTier {
    pub level: u32,
    pub role: String,
}

/// The full ladder, kept sorted by level with unique levels.
#[derive(Debug, Clone)]
pub struct MilestoneTable {
    tiers: Vec<MilestoneTier>,
}

impl MilestoneTable {
    /// Build a table from (level, role) pairs. Input order does not matter;
    /// duplicate levels keep the last definition.
    pub fn new<S: Into<String>>(pairs: impl IntoIterator<Item = (u32, S)>) -> Self {
        Self::from_tiers(
            pairs
                .into_iter()
                .map(|(level, role)| MilestoneTier {
                    level,
                    role: role.into(),
                })
                .collect(),
        )
    }

    pub fn from_tiers(mut tiers: Vec<MilestoneTier>) -> Self {
        tiers.sort_by_key(|tier| tier.level);
        tiers.dedup_by(|later, earlier| {
            if later.level == earlier.level {
                earlier.role = std::mem::take(&mut later.role);
                true
            } else {
                false
            }
        });
        Self { tiers }
    }

    /// Every tier strictly above `before` and at or below `after`, ascending.
    /// Empty when no threshold sits in that window.
    pub fn crossed(&self, before: u32, after: u32) -> Vec<&MilestoneTier> {
        self.tiers
            .iter()
            .filter(|tier| tier.level > before && tier.level <= after)
            .collect()
    }

    /// The highest tier at or below `level`, if any.
    pub fn tier_for_level(&self, level: u32) -> Option<&MilestoneTier> {
        self.tiers.iter().rev().find(|tier| tier.level <= level)
    }

    /// Role names of every tier strictly below `level`. These are the roles a
    /// member outgrows when they reach the tier at `level`.
    pub fn roles_below(&self, level: u32) -> Vec<String> {
        self.tiers
            .iter()
            .filter(|tier| tier.level < level)
            .map(|tier| tier.role.clone())
            .collect()
    }

    pub fn tiers(&self) -> &[MilestoneTier] {
        &self.tiers
    }
}

impl Default for MilestoneTable {
    fn default() -> Self {
        Self::new([
            (1, "Recruit"),
            (5, "Regular"),
            (10, "Settled In"),
            (20, "Full Member"),
            (30, "Seasoned"),
            (40, "Expert"),
            (50, "Veteran"),
            (75, "Battle-Hardened"),
            (100, "Captain"),
        ])
    }
}
