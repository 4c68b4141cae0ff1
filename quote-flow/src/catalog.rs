//! Pricing catalog: read-only reference data shared by every session.
//!
//! Holds per-product base premiums, the insurer pool, plan names, coverage
//! templates, the attribute questions asked for each product and the
//! documents each product requires. The built-in catalog is returned by
//! [`Catalog::default`]; deployments can swap it for a JSON document.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FlowError, Result};

/// Compiled attribute patterns, keyed by their source text.
static PATTERNS: LazyLock<DashMap<String, Regex>> = LazyLock::new(DashMap::new);

/// Compiles `pattern` once and hands out cheap clones afterwards.
fn compiled_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    if let Some(re) = PATTERNS.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    PATTERNS.insert(pattern.to_string(), re.clone());
    Ok(re)
}

/// Longest free-text answer accepted for a text attribute.
pub const MAX_TEXT_ANSWER_LEN: usize = 60;

/// Base premium used for products missing from `base_premiums`.
pub const DEFAULT_BASE_PREMIUM: f64 = 75.0;

/// Insurance product a session is quoting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Auto,
    Moto,
    Health,
    Home,
    Travel,
    Business,
}

impl ProductType {
    pub const ALL: [ProductType; 6] = [
        ProductType::Auto,
        ProductType::Moto,
        ProductType::Health,
        ProductType::Home,
        ProductType::Travel,
        ProductType::Business,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Moto => "moto",
            Self::Health => "health",
            Self::Home => "home",
            Self::Travel => "travel",
            Self::Business => "business",
        }
    }

    /// Human label used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Auto => "Car insurance",
            Self::Moto => "Motorcycle insurance",
            Self::Health => "Health insurance",
            Self::Home => "Home insurance",
            Self::Travel => "Travel insurance",
            Self::Business => "Business insurance",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        ProductType::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown product type: {wanted}"))
    }
}

/// One entry of a product's coverage template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageTemplateItem {
    pub label: String,
    /// Mandatory items are included in every offer.
    pub mandatory: bool,
}

/// How an attribute answer is constrained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeKind {
    /// Selection from an enumerated list, matched case-insensitively.
    Choice { options: Vec<String> },
    /// Short free text, optionally matched against a regex.
    Text {
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        hint: Option<String>,
    },
}

/// A single question of the attribute-collection stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeStep {
    pub key: String,
    pub prompt: String,
    #[serde(flatten)]
    pub kind: AttributeKind,
}

impl AttributeStep {
    pub fn choice(key: &str, prompt: &str, options: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            prompt: prompt.to_string(),
            kind: AttributeKind::Choice {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
        }
    }

    pub fn text(key: &str, prompt: &str, pattern: Option<&str>, hint: Option<&str>) -> Self {
        Self {
            key: key.to_string(),
            prompt: prompt.to_string(),
            kind: AttributeKind::Text {
                pattern: pattern.map(str::to_string),
                hint: hint.map(str::to_string),
            },
        }
    }

    /// Quick-reply options for this step; empty for free text.
    pub fn options(&self) -> Vec<String> {
        match &self.kind {
            AttributeKind::Choice { options } => options.clone(),
            AttributeKind::Text { .. } => Vec::new(),
        }
    }

    /// Validates `input` and returns the value to store, or `None` when the
    /// input is outside the step's valid set.
    ///
    /// Choices are stored in their canonical spelling; text is trimmed.
    pub fn accept(&self, input: &str) -> Option<String> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        match &self.kind {
            AttributeKind::Choice { options } => options
                .iter()
                .find(|o| o.eq_ignore_ascii_case(trimmed))
                .cloned(),
            AttributeKind::Text { pattern, .. } => {
                if trimmed.chars().count() > MAX_TEXT_ANSWER_LEN {
                    return None;
                }
                if let Some(pattern) = pattern {
                    let re = compiled_pattern(pattern).ok()?;
                    if !re.is_match(trimmed) {
                        return None;
                    }
                }
                Some(trimmed.to_string())
            }
        }
    }

    /// Corrective text shown when `accept` rejects an answer.
    pub fn correction(&self) -> String {
        match &self.kind {
            AttributeKind::Choice { .. } => "Please pick one of the options below.".to_string(),
            AttributeKind::Text { hint: Some(hint), .. } => {
                format!("That doesn't look right. Please enter {hint}.")
            }
            AttributeKind::Text { hint: None, .. } => format!(
                "Please enter a short answer (up to {MAX_TEXT_ANSWER_LEN} characters)."
            ),
        }
    }
}

/// A document the customer has to hand over after choosing an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSlotSpec {
    pub id: String,
    pub label: String,
}

/// Everything the engine needs to know about one product besides its price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductProfile {
    pub coverage: Vec<CoverageTemplateItem>,
    pub attributes: Vec<AttributeStep>,
    #[serde(default)]
    pub documents: Vec<DocumentSlotSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Products offered at product selection, in display order.
    pub products: Vec<ProductType>,
    pub base_premiums: HashMap<ProductType, f64>,
    #[serde(default = "default_base_premium")]
    pub default_base_premium: f64,
    pub insurers: Vec<String>,
    pub plan_names: Vec<String>,
    pub profiles: HashMap<ProductType, ProductProfile>,
}

fn default_base_premium() -> f64 {
    DEFAULT_BASE_PREMIUM
}

impl Catalog {
    /// Parses a catalog from JSON. Call [`Catalog::validate`] before use.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Monthly base premium for `product`.
    ///
    /// Products missing from the premium table fall back to the default base
    /// premium instead of failing.
    pub fn base_premium(&self, product: ProductType) -> f64 {
        match self.base_premiums.get(&product) {
            Some(premium) => *premium,
            None => {
                debug!(product = %product, "No base premium configured, using default");
                self.default_base_premium
            }
        }
    }

    pub fn offers_product(&self, product: ProductType) -> bool {
        self.products.contains(&product)
    }

    pub fn coverage_template(&self, product: ProductType) -> &[CoverageTemplateItem] {
        self.profiles
            .get(&product)
            .map(|p| p.coverage.as_slice())
            .unwrap_or_default()
    }

    pub fn attribute_steps(&self, product: ProductType) -> &[AttributeStep] {
        self.profiles
            .get(&product)
            .map(|p| p.attributes.as_slice())
            .unwrap_or_default()
    }

    pub fn document_slots(&self, product: ProductType) -> &[DocumentSlotSpec] {
        self.profiles
            .get(&product)
            .map(|p| p.documents.as_slice())
            .unwrap_or_default()
    }

    /// Checks the catalog can serve sessions generating `offer_count` offers.
    pub fn validate(&self, offer_count: usize) -> Result<()> {
        let invalid = |msg: String| Err(FlowError::InvalidCatalog(msg));

        if offer_count == 0 {
            return invalid("offer count must be at least 1".to_string());
        }
        if self.insurers.len() <= offer_count {
            return invalid(format!(
                "insurer pool has {} names, needs more than {offer_count}",
                self.insurers.len()
            ));
        }
        let mut names = self.insurers.clone();
        names.sort();
        names.dedup();
        if names.len() != self.insurers.len() {
            return invalid("insurer names must be unique".to_string());
        }
        if self.plan_names.len() < offer_count {
            return invalid(format!(
                "{} plan names configured, need {offer_count}",
                self.plan_names.len()
            ));
        }
        if self.products.is_empty() {
            return invalid("no products listed".to_string());
        }
        if self.default_base_premium <= 0.0 {
            return invalid("default base premium must be positive".to_string());
        }

        for product in &self.products {
            if let Some(premium) = self.base_premiums.get(product) {
                if *premium <= 0.0 {
                    return invalid(format!("base premium for {product} must be positive"));
                }
            }
            let Some(profile) = self.profiles.get(product) else {
                return invalid(format!("no profile for listed product {product}"));
            };
            if profile.attributes.is_empty() {
                return invalid(format!("{product} has no attribute steps"));
            }
            for step in &profile.attributes {
                match &step.kind {
                    AttributeKind::Choice { options } if options.is_empty() => {
                        return invalid(format!("{product}.{} has no options", step.key));
                    }
                    AttributeKind::Text {
                        pattern: Some(pattern),
                        ..
                    } => {
                        if let Err(e) = compiled_pattern(pattern) {
                            return invalid(format!("{product}.{} pattern: {e}", step.key));
                        }
                    }
                    _ => {}
                }
            }
            let mandatory = profile.coverage.iter().filter(|c| c.mandatory).count();
            if mandatory == profile.coverage.len() && !profile.coverage.is_empty() {
                return invalid(format!("{product} coverage has no optional items"));
            }
        }
        Ok(())
    }
}

fn coverage(mandatory: &[&str], optional: &[&str]) -> Vec<CoverageTemplateItem> {
    let item = |mandatory: bool| {
        move |label: &&str| CoverageTemplateItem {
            label: label.to_string(),
            mandatory,
        }
    };
    mandatory
        .iter()
        .map(item(true))
        .chain(optional.iter().map(item(false)))
        .collect()
}

fn documents(slots: &[(&str, &str)]) -> Vec<DocumentSlotSpec> {
    slots
        .iter()
        .map(|(id, label)| DocumentSlotSpec {
            id: id.to_string(),
            label: label.to_string(),
        })
        .collect()
}

const YEAR_PATTERN: &str = r"^(19[5-9][0-9]|20[0-3][0-9])$";
const POSTAL_CODE_PATTERN: &str = r"^[0-9]{5}$";

fn coverage_level_step() -> AttributeStep {
    AttributeStep::choice(
        "coverage_level",
        "Which coverage level are you looking for?",
        &["basic", "standard", "full"],
    )
}

fn vehicle_steps(brands: &[&str], usages: &[&str]) -> Vec<AttributeStep> {
    vec![
        AttributeStep::choice("brand", "What brand is the vehicle?", brands),
        AttributeStep::text("model", "Which model is it?", None, Some("the model name, e.g. Corolla")),
        AttributeStep::text(
            "year",
            "What year was it made?",
            Some(YEAR_PATTERN),
            Some("a four-digit year, e.g. 2021"),
        ),
        AttributeStep::choice("usage", "How is the vehicle used?", usages),
        coverage_level_step(),
    ]
}

impl Default for Catalog {
    fn default() -> Self {
        let base_premiums = HashMap::from([
            (ProductType::Auto, 89.0),
            (ProductType::Moto, 54.0),
            (ProductType::Health, 142.0),
            (ProductType::Home, 38.0),
            (ProductType::Travel, 24.0),
            (ProductType::Business, 215.0),
        ]);

        let profiles = HashMap::from([
            (
                ProductType::Auto,
                ProductProfile {
                    coverage: coverage(
                        &["Civil liability", "Legal assistance"],
                        &[
                            "Collision damage",
                            "Total theft",
                            "Roadside assistance",
                            "Glass breakage",
                            "Rental car",
                        ],
                    ),
                    attributes: vehicle_steps(
                        &[
                            "Toyota", "Honda", "Nissan", "Volkswagen", "Chevrolet", "Ford",
                            "Mazda", "Kia", "Hyundai", "BMW",
                        ],
                        &["personal", "commercial", "rideshare"],
                    ),
                    documents: documents(&[
                        ("official_id", "Official photo ID"),
                        ("proof_of_address", "Proof of address"),
                        ("vehicle_registration", "Vehicle registration card"),
                        ("vehicle_photos", "Photos of the vehicle"),
                    ]),
                },
            ),
            (
                ProductType::Moto,
                ProductProfile {
                    coverage: coverage(
                        &["Civil liability", "Legal assistance"],
                        &[
                            "Total theft",
                            "Collision damage",
                            "Roadside assistance",
                            "Rider medical expenses",
                        ],
                    ),
                    attributes: vehicle_steps(
                        &[
                            "Honda", "Yamaha", "Suzuki", "Kawasaki", "Italika", "BMW",
                            "Harley-Davidson",
                        ],
                        &["personal", "delivery", "commercial"],
                    ),
                    documents: documents(&[
                        ("official_id", "Official photo ID"),
                        ("proof_of_address", "Proof of address"),
                        ("vehicle_registration", "Vehicle registration card"),
                    ]),
                },
            ),
            (
                ProductType::Health,
                ProductProfile {
                    coverage: coverage(
                        &["Hospitalization", "Emergency care"],
                        &[
                            "Specialist consultations",
                            "Maternity",
                            "Dental",
                            "Vision",
                            "International coverage",
                        ],
                    ),
                    attributes: vec![
                        AttributeStep::choice(
                            "age_range",
                            "What is the age of the main insured person?",
                            &["18-29", "30-44", "45-59", "60+"],
                        ),
                        AttributeStep::choice(
                            "dependents",
                            "Who should the policy cover?",
                            &["just me", "couple", "family"],
                        ),
                        AttributeStep::choice(
                            "pre_existing_conditions",
                            "Any pre-existing medical conditions?",
                            &["yes", "no"],
                        ),
                        AttributeStep::choice(
                            "hospital_network",
                            "Which hospital network do you prefer?",
                            &["standard", "extended", "premium"],
                        ),
                        coverage_level_step(),
                    ],
                    documents: documents(&[
                        ("official_id", "Official photo ID"),
                        ("medical_questionnaire", "Signed medical questionnaire"),
                    ]),
                },
            ),
            (
                ProductType::Home,
                ProductProfile {
                    coverage: coverage(
                        &["Fire and lightning", "Civil liability"],
                        &[
                            "Theft",
                            "Water damage",
                            "Earthquake",
                            "Electronics",
                            "Temporary housing",
                        ],
                    ),
                    attributes: vec![
                        AttributeStep::choice(
                            "property_type",
                            "What kind of property is it?",
                            &["house", "apartment", "condo"],
                        ),
                        AttributeStep::choice(
                            "ownership",
                            "Do you own or rent it?",
                            &["owner", "renter"],
                        ),
                        AttributeStep::text(
                            "postal_code",
                            "What is the postal code?",
                            Some(POSTAL_CODE_PATTERN),
                            Some("a five-digit postal code"),
                        ),
                        AttributeStep::choice(
                            "property_value",
                            "Roughly how much is the property worth?",
                            &["under 100k", "100k-300k", "300k-600k", "over 600k"],
                        ),
                        coverage_level_step(),
                    ],
                    documents: documents(&[
                        ("official_id", "Official photo ID"),
                        ("property_deed", "Property deed or lease agreement"),
                    ]),
                },
            ),
            (
                ProductType::Travel,
                ProductProfile {
                    coverage: coverage(
                        &["Medical emergencies", "Repatriation"],
                        &[
                            "Trip cancellation",
                            "Lost luggage",
                            "Flight delay",
                            "Adventure sports",
                        ],
                    ),
                    attributes: vec![
                        AttributeStep::choice(
                            "destination",
                            "Where are you travelling?",
                            &["domestic", "north america", "europe", "worldwide"],
                        ),
                        AttributeStep::choice(
                            "trip_length",
                            "How long is the trip?",
                            &["up to 7 days", "8-15 days", "16-30 days", "over 30 days"],
                        ),
                        AttributeStep::choice(
                            "travelers",
                            "How many people are travelling?",
                            &["1", "2", "3-5", "6+"],
                        ),
                        coverage_level_step(),
                    ],
                    documents: Vec::new(),
                },
            ),
            (
                ProductType::Business,
                ProductProfile {
                    coverage: coverage(
                        &["General liability", "Property damage"],
                        &[
                            "Business interruption",
                            "Cyber liability",
                            "Employee theft",
                            "Equipment breakdown",
                        ],
                    ),
                    attributes: vec![
                        AttributeStep::choice(
                            "industry",
                            "Which industry is the business in?",
                            &[
                                "retail",
                                "food service",
                                "professional services",
                                "manufacturing",
                                "construction",
                            ],
                        ),
                        AttributeStep::choice(
                            "employees",
                            "How many employees?",
                            &["1-10", "11-50", "51-200", "200+"],
                        ),
                        AttributeStep::choice(
                            "annual_revenue",
                            "What is the approximate annual revenue?",
                            &["under 250k", "250k-1m", "1m-5m", "over 5m"],
                        ),
                        coverage_level_step(),
                    ],
                    documents: documents(&[
                        ("tax_certificate", "Tax registration certificate"),
                        ("official_id", "Legal representative ID"),
                        ("proof_of_address", "Business proof of address"),
                    ]),
                },
            ),
        ]);

        Self {
            products: ProductType::ALL.to_vec(),
            base_premiums,
            default_base_premium: DEFAULT_BASE_PREMIUM,
            insurers: [
                "Allianz",
                "AXA",
                "Mapfre",
                "Zurich",
                "Chubb",
                "HDI Seguros",
                "GNP Seguros",
                "Qualitas",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            plan_names: ["Basic", "Standard", "Premium", "Elite"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            profiles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = Catalog::default();
        catalog.validate(4).unwrap();
        assert_eq!(catalog.attribute_steps(ProductType::Auto).len(), 5);
        assert!(catalog.document_slots(ProductType::Travel).is_empty());
    }

    #[test]
    fn missing_base_premium_falls_back_to_default() {
        let mut catalog = Catalog::default();
        catalog.base_premiums.remove(&ProductType::Home);
        assert_eq!(catalog.base_premium(ProductType::Home), DEFAULT_BASE_PREMIUM);
        assert_eq!(catalog.base_premium(ProductType::Auto), 89.0);
    }

    #[test]
    fn product_type_parses_case_insensitively() {
        assert_eq!("AUTO".parse::<ProductType>().unwrap(), ProductType::Auto);
        assert_eq!(" travel ".parse::<ProductType>().unwrap(), ProductType::Travel);
        assert!("boat".parse::<ProductType>().is_err());
    }

    #[test]
    fn choice_answers_are_canonicalised() {
        let step = AttributeStep::choice("brand", "Brand?", &["Toyota", "Honda"]);
        assert_eq!(step.accept("toyota"), Some("Toyota".to_string()));
        assert_eq!(step.accept("  HONDA "), Some("Honda".to_string()));
        assert_eq!(step.accept("Tesla"), None);
        assert_eq!(step.accept(""), None);
    }

    #[test]
    fn text_answers_respect_pattern_and_length() {
        let year = AttributeStep::text("year", "Year?", Some(YEAR_PATTERN), None);
        assert_eq!(year.accept("2023"), Some("2023".to_string()));
        assert_eq!(year.accept("23"), None);
        assert_eq!(year.accept("3023"), None);

        let model = AttributeStep::text("model", "Model?", None, None);
        assert_eq!(model.accept(" Corolla "), Some("Corolla".to_string()));
        assert_eq!(model.accept(&"x".repeat(MAX_TEXT_ANSWER_LEN + 1)), None);
        assert_eq!(model.accept("   "), None);
    }

    #[test]
    fn validate_rejects_small_insurer_pool() {
        let mut catalog = Catalog::default();
        catalog.insurers.truncate(4);
        assert!(matches!(
            catalog.validate(4),
            Err(FlowError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn validate_rejects_bad_pattern() {
        let mut catalog = Catalog::default();
        let profile = catalog.profiles.get_mut(&ProductType::Home).unwrap();
        profile.attributes[2] = AttributeStep::text("postal_code", "Zip?", Some("(["), None);
        assert!(catalog.validate(4).is_err());
        assert!(!PATTERNS.contains_key("(["));
    }

    #[test]
    fn text_patterns_are_compiled_once() {
        let pattern = "^[A-Z]{3}-[0-9]{3}$";
        let plate = AttributeStep::text("plate", "Plate?", Some(pattern), None);
        assert!(!PATTERNS.contains_key(pattern));

        assert_eq!(plate.accept("ABC-123"), Some("ABC-123".to_string()));
        assert!(PATTERNS.contains_key(pattern));
        let first = PATTERNS.get(pattern).map(|re| re.as_str().as_ptr());

        assert_eq!(plate.accept("abc-123"), None);
        let second = PATTERNS.get(pattern).map(|re| re.as_str().as_ptr());
        assert_eq!(first, second);
    }

    #[test]
    fn catalog_json_roundtrip_keeps_profiles() {
        let catalog = Catalog::default();
        let json = serde_json::to_string(&catalog).unwrap();
        let parsed = Catalog::from_json(&json).unwrap();
        assert_eq!(parsed, catalog);
    }
}
