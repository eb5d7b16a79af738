use chrono::{Months, NaiveDate};
use serde::Serialize;

use super::error::{SimError, SimResult};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Monthly,
    Annual,
}

impl Granularity {
    pub fn periods_per_year(self) -> u32 {
        match self {
            Granularity::Monthly => 12,
            Granularity::Annual => 1,
        }
    }

    pub fn months_per_period(self) -> u32 {
        12 / self.periods_per_year()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WithdrawalMode {
    /// Withdraw the gross amount that nets exactly the inflated living cost.
    Strict,
    /// Withdraw `withdrawal_rate` of the current portfolio every year.
    FixedRate,
}

/// How the tax band cutoffs follow inflation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum BracketIndexing {
    Stepped { every_years: u32 },
    Continuous,
}

impl BracketIndexing {
    pub fn reindex_periods(self, granularity: Granularity) -> u32 {
        match self {
            BracketIndexing::Stepped { every_years } => {
                every_years.saturating_mul(granularity.periods_per_year())
            }
            BracketIndexing::Continuous => 1,
        }
    }
}

/// Withdrawal behaviour in the period the retirement test first passes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionPolicy {
    SkipWithdrawal,
    WithdrawImmediately,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBands {
    pub personal_allowance: f64,
    pub basic_rate_limit: f64,
    pub higher_rate_limit: f64,
}

impl TaxBands {
    pub const UK_2024: TaxBands = TaxBands {
        personal_allowance: 12_570.0,
        basic_rate_limit: 50_270.0,
        higher_rate_limit: 125_140.0,
    };

    pub fn scaled(self, factor: f64) -> TaxBands {
        TaxBands {
            personal_allowance: self.personal_allowance * factor,
            basic_rate_limit: self.basic_rate_limit * factor,
            higher_rate_limit: self.higher_rate_limit * factor,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationParameters {
    pub initial_deposit: f64,
    pub periodic_deposit: f64,
    pub deposit_growth_rate: f64,
    pub annual_return_rate: f64,
    pub annual_volatility: f64,
    pub annual_inflation_rate: f64,
    pub annual_withdrawal_rate: f64,
    pub target_annual_living_cost: f64,
    pub years: u32,
    pub start_date: NaiveDate,
    pub granularity: Granularity,
    pub withdrawal_mode: WithdrawalMode,
    pub transition: TransitionPolicy,
    pub tax_bands: TaxBands,
    pub bracket_indexing: BracketIndexing,
    pub seed: Option<u64>,
}

impl SimulationParameters {
    pub fn total_periods(&self) -> usize {
        self.years as usize * self.granularity.periods_per_year() as usize
    }

    pub fn period_mean_return(&self) -> f64 {
        period_rate(self.annual_return_rate, self.granularity)
    }

    pub fn period_volatility(&self) -> f64 {
        self.annual_volatility / (self.granularity.periods_per_year() as f64).sqrt()
    }

    pub fn period_inflation_rate(&self) -> f64 {
        period_rate(self.annual_inflation_rate, self.granularity)
    }

    /// Calendar date of every simulated period, starting at `start_date`.
    pub fn period_dates(&self) -> SimResult<Vec<NaiveDate>> {
        let step = self.granularity.months_per_period();
        (0..self.total_periods())
            .map(|period| {
                u32::try_from(period)
                    .ok()
                    .and_then(|p| p.checked_mul(step))
                    .and_then(|months| self.start_date.checked_add_months(Months::new(months)))
                    .ok_or_else(|| {
                        SimError::invalid("start_date", "simulation horizon exceeds calendar range")
                    })
            })
            .collect()
    }

    pub fn validate(&self) -> SimResult<()> {
        for (field, value) in [
            ("initial_deposit", self.initial_deposit),
            ("periodic_deposit", self.periodic_deposit),
            ("deposit_growth_rate", self.deposit_growth_rate),
            ("annual_return_rate", self.annual_return_rate),
            ("annual_volatility", self.annual_volatility),
            ("annual_inflation_rate", self.annual_inflation_rate),
            ("annual_withdrawal_rate", self.annual_withdrawal_rate),
            ("target_annual_living_cost", self.target_annual_living_cost),
            ("personal_allowance", self.tax_bands.personal_allowance),
            ("basic_rate_limit", self.tax_bands.basic_rate_limit),
            ("higher_rate_limit", self.tax_bands.higher_rate_limit),
        ] {
            if !value.is_finite() {
                return Err(SimError::invalid(field, "must be a finite number"));
            }
        }

        if self.initial_deposit < 0.0 {
            return Err(SimError::invalid("initial_deposit", "must be >= 0"));
        }
        if self.periodic_deposit < 0.0 {
            return Err(SimError::invalid("periodic_deposit", "must be >= 0"));
        }
        if self.deposit_growth_rate <= -1.0 {
            return Err(SimError::invalid("deposit_growth_rate", "must be > -1"));
        }
        if self.annual_return_rate <= -1.0 {
            return Err(SimError::invalid("annual_return_rate", "must be > -1"));
        }
        if self.annual_volatility < 0.0 {
            return Err(SimError::invalid("annual_volatility", "must be >= 0"));
        }
        if self.annual_inflation_rate <= -1.0 {
            return Err(SimError::invalid("annual_inflation_rate", "must be > -1"));
        }
        if self.annual_withdrawal_rate < 0.0 {
            return Err(SimError::invalid("annual_withdrawal_rate", "must be >= 0"));
        }
        if self.withdrawal_mode == WithdrawalMode::FixedRate && self.annual_withdrawal_rate <= 0.0
        {
            return Err(SimError::invalid(
                "annual_withdrawal_rate",
                "must be > 0 in fixed-rate mode",
            ));
        }
        if self.target_annual_living_cost < 0.0 {
            return Err(SimError::invalid("target_annual_living_cost", "must be >= 0"));
        }
        if self.years == 0 {
            return Err(SimError::invalid("years", "must be > 0"));
        }

        let bands = self.tax_bands;
        if bands.personal_allowance < 0.0 {
            return Err(SimError::invalid("personal_allowance", "must be >= 0"));
        }
        if bands.basic_rate_limit < bands.personal_allowance {
            return Err(SimError::invalid(
                "basic_rate_limit",
                "must be >= personal_allowance",
            ));
        }
        if bands.higher_rate_limit < bands.basic_rate_limit {
            return Err(SimError::invalid(
                "higher_rate_limit",
                "must be >= basic_rate_limit",
            ));
        }
        if let BracketIndexing::Stepped { every_years: 0 } = self.bracket_indexing {
            return Err(SimError::invalid("bracket_indexing", "re-index period must be > 0"));
        }

        u32::try_from(self.total_periods() - 1)
            .ok()
            .and_then(|last_period| last_period.checked_mul(self.granularity.months_per_period()))
            .and_then(|months| self.start_date.checked_add_months(Months::new(months)))
            .ok_or_else(|| {
                SimError::invalid("start_date", "simulation horizon exceeds calendar range")
            })?;

        Ok(())
    }
}

fn period_rate(annual_rate: f64, granularity: Granularity) -> f64 {
    (1.0 + annual_rate).powf(1.0 / granularity.periods_per_year() as f64) - 1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodPoint {
    pub date: NaiveDate,
    pub portfolio_value: f64,
    pub withdrawal: f64,
    pub retired: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub points: Vec<PeriodPoint>,
    pub retirement_date: Option<NaiveDate>,
    pub retirement_period: Option<usize>,
    pub total_withdrawn: f64,
}

impl SimulationResult {
    pub fn final_value(&self) -> f64 {
        self.points.last().map(|p| p.portfolio_value).unwrap_or(0.0)
    }

    pub fn succeeded(&self) -> bool {
        self.retirement_date.is_some() && self.final_value() > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub runs: u32,
    pub dates: Vec<NaiveDate>,
    pub mean_portfolio: Vec<f64>,
    pub mean_withdrawal: Vec<f64>,
    pub filtered_withdrawal: Option<Vec<f64>>,
    pub retired_runs: u32,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub threshold: f64,
    pub period: usize,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub retirement_date: Option<NaiveDate>,
    pub years_to_retirement: Option<f64>,
    pub final_value: f64,
    pub total_withdrawn: f64,
    pub milestones: Vec<Milestone>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSummary {
    pub runs: u32,
    pub success_rate: f64,
    pub final_mean_value: f64,
    pub total_mean_withdrawn: f64,
    pub milestones: Vec<Milestone>,
}
