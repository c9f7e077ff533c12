use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::backtrack::DecLvl;

/// Search statistics, updated by the core as it splits and backtracks.
#[derive(Clone, Default)]
pub struct Stats {
    pub num_splits: u64,
    pub num_pops: u64,
    pub num_visited_tree_states: u64,
    pub current_decision_level: u32,
    pub max_decision_level: u32,
    /// Total time spent inside the search core itself.
    pub time_in_core: Duration,
}

impl Stats {
    pub fn new() -> Stats {
        Stats::default()
    }

    pub(crate) fn set_current_decision_level(&mut self, level: DecLvl) {
        self.current_decision_level = level.to_int();
        self.max_decision_level = self.max_decision_level.max(level.to_int());
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "splits:              {}", self.num_splits)?;
        writeln!(f, "pops:                {}", self.num_pops)?;
        writeln!(f, "visited tree states: {}", self.num_visited_tree_states)?;
        writeln!(f, "max decision level:  {}", self.max_decision_level)?;
        writeln!(f, "time in core:        {:.3}s", self.time_in_core.as_secs_f64())
    }
}
