use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::Normal;
use tracing::debug;

use super::error::{SimError, SimResult};
use super::tax::{bands_for_period, net_income, required_gross_for_net};
use super::types::{
    PeriodPoint, SimulationParameters, SimulationResult, TaxBands, TransitionPolicy,
    WithdrawalMode,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Accumulating,
    Retired,
}

#[derive(Debug)]
struct PortfolioState {
    value: f64,
    deposit: f64,
    living_cost: f64,
    phase: Phase,
    retirement_period: Option<usize>,
    total_withdrawn: f64,
}

/// Everything about a run that does not depend on the random stream.
/// Built once and shared by every run of an aggregate.
#[derive(Debug, Clone)]
pub(crate) struct PathPlan {
    dates: Vec<NaiveDate>,
    periods_per_year: f64,
    deposit_growth: f64,
    mean_return: f64,
    return_vol: f64,
    inflation: f64,
    withdrawal_rate: f64,
    target_cost: f64,
    initial_deposit: f64,
    periodic_deposit: f64,
    mode: WithdrawalMode,
    transition: TransitionPolicy,
    base_bands: TaxBands,
    reindex_periods: u32,
    standard_normal: Normal,
}

impl PathPlan {
    pub(crate) fn new(params: &SimulationParameters) -> SimResult<Self> {
        params.validate()?;
        let standard_normal = Normal::new(0.0, 1.0)
            .map_err(|e| SimError::invalid("annual_volatility", format!("{e}")))?;

        Ok(Self {
            dates: params.period_dates()?,
            periods_per_year: params.granularity.periods_per_year() as f64,
            deposit_growth: params.deposit_growth_rate,
            mean_return: params.period_mean_return(),
            return_vol: params.period_volatility(),
            inflation: params.period_inflation_rate(),
            withdrawal_rate: params.annual_withdrawal_rate,
            target_cost: params.target_annual_living_cost,
            initial_deposit: params.initial_deposit,
            periodic_deposit: params.periodic_deposit,
            mode: params.withdrawal_mode,
            transition: params.transition,
            base_bands: params.tax_bands,
            reindex_periods: params
                .bracket_indexing
                .reindex_periods(params.granularity),
            standard_normal,
        })
    }

    pub(crate) fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub(crate) fn transition(&self) -> TransitionPolicy {
        self.transition
    }

    pub(crate) fn run(&self, rng: &mut StdRng) -> SimulationResult {
        let mut state = PortfolioState {
            value: self.initial_deposit,
            deposit: self.periodic_deposit,
            living_cost: self.target_cost,
            phase: Phase::Accumulating,
            retirement_period: None,
            total_withdrawn: 0.0,
        };
        let mut points = Vec::with_capacity(self.dates.len());

        for (period, &date) in self.dates.iter().enumerate() {
            if state.phase == Phase::Accumulating {
                state.value += state.deposit;
                state.deposit *= 1.0 + self.deposit_growth;
            }

            state.value *= 1.0 + self.sample_return(rng);

            if period > 0 {
                state.living_cost *= 1.0 + self.inflation;
            }
            let bands = bands_for_period(
                self.base_bands,
                period,
                self.inflation,
                self.reindex_periods,
            );

            let mut just_retired = false;
            if state.phase == Phase::Accumulating
                && self.can_retire(state.value, state.living_cost, &bands)
            {
                state.phase = Phase::Retired;
                state.retirement_period = Some(period);
                just_retired = true;
                debug!(period, %date, portfolio = state.value, "retirement threshold reached");
            }

            let skip = just_retired && self.transition == TransitionPolicy::SkipWithdrawal;
            let withdrawal = if state.phase == Phase::Retired && !skip {
                let needed = self.needed_withdrawal(state.value, state.living_cost, &bands);
                needed.min(state.value.max(0.0)).max(0.0)
            } else {
                0.0
            };
            state.value -= withdrawal;
            state.total_withdrawn += withdrawal;

            points.push(PeriodPoint {
                date,
                portfolio_value: state.value,
                withdrawal,
                retired: state.phase == Phase::Retired,
            });
        }

        SimulationResult {
            points,
            retirement_date: state.retirement_period.map(|p| self.dates[p]),
            retirement_period: state.retirement_period,
            total_withdrawn: state.total_withdrawn,
        }
    }

    fn sample_return(&self, rng: &mut StdRng) -> f64 {
        let z: f64 = rng.sample(self.standard_normal);
        self.mean_return + self.return_vol * z
    }

    /// A sustainable draw at the configured rate must net the current cost.
    fn can_retire(&self, portfolio: f64, annual_cost: f64, bands: &TaxBands) -> bool {
        net_income(self.withdrawal_rate * portfolio, bands) >= annual_cost
    }

    fn needed_withdrawal(&self, portfolio: f64, annual_cost: f64, bands: &TaxBands) -> f64 {
        match self.mode {
            WithdrawalMode::Strict => {
                required_gross_for_net(annual_cost, bands) / self.periods_per_year
            }
            WithdrawalMode::FixedRate => self.withdrawal_rate * portfolio / self.periods_per_year,
        }
    }
}

/// Runs one path seeded from `params.seed`, or from entropy when unset.
pub fn simulate_path(params: &SimulationParameters) -> SimResult<SimulationResult> {
    simulate_path_seeded(params, base_seed(params))
}

pub fn simulate_path_seeded(
    params: &SimulationParameters,
    seed: u64,
) -> SimResult<SimulationResult> {
    let plan = PathPlan::new(params)?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(plan.run(&mut rng))
}

pub(crate) fn base_seed(params: &SimulationParameters) -> u64 {
    params.seed.unwrap_or_else(rand::random)
}

pub(crate) fn derive_seed(base_seed: u64, run_id: u32) -> u64 {
    splitmix64(base_seed ^ (run_id as u64))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
