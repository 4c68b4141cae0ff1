//! Quote generator: samples insurers and prices comparable offers.
//!
//! All randomness comes from the caller's [`Rng`], so a seeded generator
//! gives repeatable offers.

use std::ops::RangeInclusive;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{Catalog, ProductType};

/// Multiplier applied to the base premium, drawn uniformly per offer.
pub const PREMIUM_FACTOR_RANGE: RangeInclusive<f64> = 0.82..=1.28;

/// Annual premium is eleven monthly payments.
pub const ANNUAL_MULTIPLIER: f64 = 11.0;

pub const DEDUCTIBLE_BASE: u32 = 250;
pub const DEDUCTIBLE_STEP: u32 = 50;
/// Number of deductible steps: 250, 300, ..., 1000.
pub const DEDUCTIBLE_STEPS: u32 = 16;

/// Chance an optional coverage item is included in an offer.
pub const OPTIONAL_COVERAGE_PROBABILITY: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageItem {
    pub label: String,
    pub included: bool,
}

/// One insurer's priced quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: Uuid,
    pub product_type: ProductType,
    pub insurer_name: String,
    pub plan_name: String,
    pub monthly_premium: f64,
    pub annual_premium: f64,
    pub deductible: u32,
    pub coverage_items: Vec<CoverageItem>,
}

impl Offer {
    pub fn included_coverage(&self) -> impl Iterator<Item = &str> {
        self.coverage_items
            .iter()
            .filter(|c| c.included)
            .map(|c| c.label.as_str())
    }
}

/// Rounds a currency amount to cents.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

pub fn annual_premium(monthly_premium: f64) -> f64 {
    round_cents(monthly_premium * ANNUAL_MULTIPLIER)
}

/// Cent-valued bounds that stay inside `base * PREMIUM_FACTOR_RANGE`, so a
/// rounded premium never leaves the factor range.
pub fn premium_bounds(base: f64) -> (f64, f64) {
    let lower = base * *PREMIUM_FACTOR_RANGE.start();
    let upper = base * *PREMIUM_FACTOR_RANGE.end();

    let mut low = (lower * 100.0).ceil() / 100.0;
    if low < lower {
        low = ((lower * 100.0).ceil() + 1.0) / 100.0;
    }
    let mut high = (upper * 100.0).floor() / 100.0;
    if high > upper {
        high = ((upper * 100.0).floor() - 1.0) / 100.0;
    }
    (low, high)
}

/// Every deductible value an offer can carry.
pub fn deductible_values() -> impl Iterator<Item = u32> {
    (0..DEDUCTIBLE_STEPS).map(|s| DEDUCTIBLE_BASE + DEDUCTIBLE_STEP * s)
}

/// Generates `count` offers for `product`.
///
/// Insurers are sampled without replacement and plan names are assigned by
/// position, so the result is not ordered by price. When the catalog has
/// fewer insurers or plan names than requested the result is shortened to
/// what it can serve; [`Catalog::validate`] rules that out for configured
/// catalogs.
pub fn generate<R: Rng + ?Sized>(
    product: ProductType,
    catalog: &Catalog,
    count: usize,
    rng: &mut R,
) -> Vec<Offer> {
    let base = catalog.base_premium(product);
    let template = catalog.coverage_template(product);
    let (low, high) = premium_bounds(base);

    let mut pool: Vec<&String> = catalog.insurers.iter().collect();
    pool.shuffle(rng);

    pool.into_iter()
        .take(count)
        .zip(catalog.plan_names.iter())
        .map(|(insurer, plan)| {
            let factor = rng.random_range(PREMIUM_FACTOR_RANGE);
            let mut monthly_premium = round_cents(base * factor);
            if low <= high {
                monthly_premium = monthly_premium.clamp(low, high);
            }
            let step = rng.random_range(0..DEDUCTIBLE_STEPS);
            let coverage_items = template
                .iter()
                .map(|item| CoverageItem {
                    label: item.label.clone(),
                    included: item.mandatory || rng.random_bool(OPTIONAL_COVERAGE_PROBABILITY),
                })
                .collect();

            Offer {
                id: Uuid::new_v4(),
                product_type: product,
                insurer_name: insurer.clone(),
                plan_name: plan.clone(),
                monthly_premium,
                annual_premium: annual_premium(monthly_premium),
                deductible: DEDUCTIBLE_BASE + DEDUCTIBLE_STEP * step,
                coverage_items,
            }
        })
        .collect()
}

/// Cheapest-first ordering for comparison tables. The generator never sorts.
pub fn sort_by_monthly_premium(offers: &mut [Offer]) {
    offers.sort_by(|a, b| a.monthly_premium.total_cmp(&b.monthly_premium));
}
