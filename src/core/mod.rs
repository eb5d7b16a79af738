mod aggregate;
mod engine;
mod error;
mod summary;
pub mod tax;
mod types;

pub use aggregate::{average, filtered_average, run_aggregate, success_rate};
pub use engine::{simulate_path, simulate_path_seeded};
pub use error::{SimError, SimResult};
pub use summary::{
    DEFAULT_MILESTONES, describe_run, milestones, summarize_aggregate, summarize_run,
    years_between,
};
pub use types::{
    AggregateResult, AggregateSummary, BracketIndexing, Granularity, Milestone, PeriodPoint,
    RunSummary, SimulationParameters, SimulationResult, TaxBands, TransitionPolicy,
    WithdrawalMode,
};
