use crate::convert::Quarter;
use crate::error::{ExtractError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[schemars(
        description = "A money-denominated metric, expressed in millions of the record's declared currency after normalization. Subject to magnitude/sign normalization and currency conversion."
    )]
    Currency,

    #[schemars(
        description = "A metric counted in discrete units (people, users, orders). Exempt from million-scaling and from currency conversion; stored as a raw integer."
    )]
    Count,

    #[schemars(
        description = "A derived percentage or ratio. Always null at extraction time; computed downstream, never extracted."
    )]
    Ratio,

    #[schemars(description = "A pass-through string field such as a reported company name.")]
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FieldSpec {
    #[schemars(description = "Exact field name as it must appear in the extracted object")]
    pub name: String,

    #[schemars(description = "Classification driving normalization and conversion behavior")]
    pub kind: FieldKind,

    #[serde(default)]
    #[schemars(description = "Whether the field must be present with a non-null value")]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(
        description = "Component fields covering the same concept. When this total is absent, the components are summed in its place; an explicit total always wins over its components."
    )]
    pub components: Vec<String>,
}

impl FieldSpec {
    pub fn currency(name: &str) -> Self {
        Self::of(name, FieldKind::Currency)
    }

    pub fn count(name: &str) -> Self {
        Self::of(name, FieldKind::Count)
    }

    pub fn ratio(name: &str) -> Self {
        Self::of(name, FieldKind::Ratio)
    }

    pub fn text(name: &str) -> Self {
        Self::of(name, FieldKind::Text)
    }

    pub fn with_components(mut self, components: &[&str]) -> Self {
        self.components = components.iter().map(|c| c.to_string()).collect();
        self
    }

    fn of(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            components: Vec::new(),
        }
    }
}

/// Data-driven description of one entity's extraction schema.
///
/// Adding support for a new company means adding a profile (built-in or loaded
/// from JSON), never a new code path.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EntityProfile {
    #[schemars(description = "Stable slug identifying the entity (e.g. 'grab-com')")]
    pub slug: String,

    #[schemars(description = "Human-readable entity name")]
    pub name: String,

    #[schemars(description = "Schema version; bumped whenever the field set changes")]
    pub version: u32,

    #[schemars(description = "Persistence table holding records for this entity type")]
    pub table: String,

    #[schemars(description = "Ordered list of metric and pass-through fields")]
    pub fields: Vec<FieldSpec>,
}

impl EntityProfile {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields that carry numeric metrics (everything except pass-through text).
    pub fn metric_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.kind != FieldKind::Text)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EntityProfile)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}

/// Point-in-time exchange rates keyed by calendar quarter label ("Q1 2023").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateTable {
    rates: BTreeMap<String, f64>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, quarter: Quarter, rate: f64) {
        self.rates.insert(quarter.label(), rate);
    }

    pub fn get(&self, quarter: &Quarter) -> Option<f64> {
        self.rates.get(&quarter.label()).copied()
    }

    pub fn rate_for(&self, quarter: &Quarter) -> Result<f64> {
        self.get(quarter).ok_or_else(|| ExtractError::RateUnavailable {
            quarter: quarter.label(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let rates: BTreeMap<String, f64> = serde_json::from_str(json)?;
        for key in rates.keys() {
            if Quarter::parse_label(key).is_none() {
                return Err(ExtractError::ExtractionFailed(format!(
                    "rate table key '{}' is not a quarter label like 'Q1 2023'",
                    key
                )));
            }
        }
        Ok(Self { rates })
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Built-in profiles for the entities the extraction tool supports out of the box.
pub fn builtin_profiles() -> Vec<EntityProfile> {
    vec![
        grab_profile(),
        sea_group_profile(),
        alibaba_profile(),
        private_company_profile(),
    ]
}

pub fn builtin_profile(slug: &str) -> Result<EntityProfile> {
    builtin_profiles()
        .into_iter()
        .find(|p| p.slug == slug)
        .ok_or_else(|| ExtractError::UnknownProfile(slug.to_string()))
}

fn grab_profile() -> EntityProfile {
    EntityProfile {
        slug: "grab-com".to_string(),
        name: "Grab".to_string(),
        version: 1,
        table: "grab_metrics".to_string(),
        fields: vec![
            FieldSpec::currency("group_revenue"),
            FieldSpec::currency("group_adjusted_ebitda"),
            FieldSpec::currency("group_profit_loss_for_period"),
            FieldSpec::currency("deliveries_revenue"),
            FieldSpec::currency("deliveries_adjusted_ebitda"),
            FieldSpec::currency("mobility_revenue"),
            FieldSpec::currency("mobility_adjusted_ebitda"),
            FieldSpec::currency("financial_services_revenue"),
            FieldSpec::currency("net_cash_from_operating_activities"),
            FieldSpec::currency("cash_and_cash_equivalents"),
            FieldSpec::count("monthly_transacting_users"),
            FieldSpec::ratio("group_adjusted_ebitda_margin_percent"),
        ],
    }
}

fn sea_group_profile() -> EntityProfile {
    EntityProfile {
        slug: "sea-group-garena".to_string(),
        name: "Sea Group".to_string(),
        version: 1,
        table: "sea_metrics".to_string(),
        fields: vec![
            FieldSpec::currency("group_total_revenue")
                .with_components(&["garena_revenue", "shopee_revenue", "seamoney_revenue"]),
            FieldSpec::currency("group_gross_profit"),
            FieldSpec::currency("group_net_income_loss"),
            FieldSpec::currency("group_adjusted_ebitda"),
            FieldSpec::currency("garena_bookings"),
            FieldSpec::currency("garena_revenue"),
            FieldSpec::count("garena_quarterly_active_users"),
            FieldSpec::count("garena_quarterly_paying_users"),
            FieldSpec::currency("shopee_revenue"),
            FieldSpec::currency("seamoney_revenue"),
            FieldSpec::ratio("group_adjusted_ebitda_margin_percent"),
        ],
    }
}

fn alibaba_profile() -> EntityProfile {
    EntityProfile {
        slug: "alibaba-group".to_string(),
        name: "Alibaba Group".to_string(),
        version: 1,
        table: "alibaba_metrics".to_string(),
        fields: vec![
            FieldSpec::currency("revenue"),
            FieldSpec::currency("gross_profit"),
            FieldSpec::currency("income_from_operations"),
            FieldSpec::currency("net_income"),
            FieldSpec::currency("taobao_tmall_revenue"),
            FieldSpec::currency("international_commerce_revenue"),
            FieldSpec::currency("cloud_revenue"),
            FieldSpec::currency("cainiao_revenue"),
            FieldSpec::currency("free_cash_flow"),
            FieldSpec::count("employees"),
        ],
    }
}

fn private_company_profile() -> EntityProfile {
    EntityProfile {
        slug: "private-company".to_string(),
        name: "Private Company".to_string(),
        version: 1,
        table: "private_company_financials".to_string(),
        fields: vec![
            FieldSpec::text("company_name"),
            FieldSpec::currency("revenue"),
            FieldSpec::currency("profit_before_tax"),
            FieldSpec::currency("profit_after_tax"),
            FieldSpec::currency("net_cash_operating"),
            FieldSpec::currency("net_cash_investing"),
            FieldSpec::currency("net_cash_financing"),
            FieldSpec::currency("cash_end_of_year"),
            FieldSpec::count("headcount"),
        ],
    }
}
