use env_param::EnvParam;

/// Split when some constraint has been reported violated this many times.
static DEFAULT_VIOLATION_THRESHOLD: EnvParam<u32> = EnvParam::new("SPLINTER_VIOLATION_THRESHOLD", "20");

static DEFAULT_USE_LEAST_FIX: EnvParam<bool> = EnvParam::new("SPLINTER_USE_LEAST_FIX", "false");

/// How the constraint to split on is selected once the violation threshold
/// is reached.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SplittingHeuristic {
    /// Split on the most recently reported constraint.
    ReluViolation,
    /// Ask the engine; fall back to the most recently reported constraint
    /// when it has no preference.
    EngineGuided,
}

/// Configuration of the search core. Passed at construction; the core keeps
/// no hidden global state.
#[derive(Copy, Clone, Debug)]
pub struct SmtConfig {
    pub violation_threshold: u32,
    pub splitting_heuristic: SplittingHeuristic,
    /// Repair the least-often-violated constraint first when choosing a
    /// constraint to fix without splitting.
    pub use_least_fix: bool,
}

impl Default for SmtConfig {
    fn default() -> Self {
        SmtConfig {
            violation_threshold: DEFAULT_VIOLATION_THRESHOLD.get(),
            splitting_heuristic: SplittingHeuristic::ReluViolation,
            use_least_fix: DEFAULT_USE_LEAST_FIX.get(),
        }
    }
}
