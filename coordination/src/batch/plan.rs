//! Batch task planning: persona cross-product, even distribution, shuffle.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Inclusive age range a callee persona is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgeBracket {
    pub min: u8,
    pub max: u8,
}

impl AgeBracket {
    pub const fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, age: u8) -> bool {
        (self.min..=self.max).contains(&age)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u8 {
        rng.gen_range(self.min..=self.max)
    }
}

impl std::fmt::Display for AgeBracket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

pub const AGE_BRACKETS: [AgeBracket; 4] = [
    AgeBracket::new(18, 25),
    AgeBracket::new(26, 40),
    AgeBracket::new(41, 55),
    AgeBracket::new(56, 70),
];

/// How alert the callee is to manipulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Awareness {
    Low,
    Medium,
    High,
}

impl Awareness {
    pub const ALL: [Awareness; 3] = [Self::Low, Self::Medium, Self::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Awareness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Awareness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown awareness level: {other}")),
        }
    }
}

/// Whether the generated calls are scams or ordinary service calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueLabel {
    #[default]
    Fraud,
    Normal,
}

impl DialogueLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fraud => "fraud",
            Self::Normal => "normal",
        }
    }

    /// Scenario categories the initiator persona is drawn from.
    pub fn categories(self) -> &'static [&'static str] {
        match self {
            Self::Fraud => &FRAUD_CATEGORIES,
            Self::Normal => &EVERYDAY_CATEGORIES,
        }
    }

    /// Dialogue id for the `n`-th planned task (1-based).
    pub fn dialogue_id(self, n: usize) -> String {
        format!("tts_{}_{n:05}", self.as_str())
    }
}

impl std::fmt::Display for DialogueLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DialogueLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fraud" => Ok(Self::Fraud),
            "normal" => Ok(Self::Normal),
            other => Err(format!("unknown dialogue label: {other}")),
        }
    }
}

pub const FRAUD_CATEGORIES: [&str; 8] = [
    "investment fraud",
    "phishing",
    "identity theft",
    "lottery prize",
    "bank impersonation",
    "virtual kidnapping",
    "fake customer service",
    "parcel and mail fraud",
];

pub const EVERYDAY_CATEGORIES: [&str; 8] = [
    "food ordering",
    "customer support",
    "appointment booking",
    "route and traffic inquiry",
    "shopping consultation",
    "parcel delivery notice",
    "bank account service",
    "utility billing",
];

pub const OCCUPATIONS: [&str; 10] = [
    "student",
    "teacher",
    "engineer",
    "doctor",
    "retiree",
    "unemployed",
    "business owner",
    "office worker",
    "farmer",
    "service worker",
];

/// The dimensions a batch is spread across.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaSpace {
    pub age_brackets: Vec<AgeBracket>,
    pub awareness: Vec<Awareness>,
    pub categories: Vec<String>,
    /// Sampled per task; not part of the cross-product.
    pub occupations: Vec<String>,
}

impl PersonaSpace {
    pub fn for_label(label: DialogueLabel) -> Self {
        Self {
            age_brackets: AGE_BRACKETS.to_vec(),
            awareness: Awareness::ALL.to_vec(),
            categories: label.categories().iter().map(|c| c.to_string()).collect(),
            occupations: OCCUPATIONS.iter().map(|o| o.to_string()).collect(),
        }
    }

    /// Number of (age bracket, awareness, category) combinations.
    pub fn combination_count(&self) -> usize {
        self.age_brackets.len() * self.awareness.len() * self.categories.len()
    }

    fn validate(&self) -> Result<(), PlanError> {
        for (name, len) in [
            ("age_brackets", self.age_brackets.len()),
            ("awareness", self.awareness.len()),
            ("categories", self.categories.len()),
            ("occupations", self.occupations.len()),
        ] {
            if len == 0 {
                return Err(PlanError::EmptyDimension(name));
            }
        }
        if let Some(b) = self.age_brackets.iter().find(|b| b.min > b.max) {
            return Err(PlanError::InvalidBracket(*b));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("persona dimension `{0}` is empty")]
    EmptyDimension(&'static str),
    #[error("age bracket {0} has min > max")]
    InvalidBracket(AgeBracket),
}

/// One dialogue to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTask {
    pub id: String,
    pub label: DialogueLabel,
    pub age_bracket: AgeBracket,
    pub user_age: u8,
    pub awareness: Awareness,
    pub category: String,
    pub occupation: String,
}

/// Split `count` over `combinations` slots as evenly as possible; the first
/// `count % combinations` slots get one extra.
pub fn distribute(count: usize, combinations: usize) -> Vec<usize> {
    if combinations == 0 {
        return Vec::new();
    }
    let per = count / combinations;
    let remainder = count % combinations;
    (0..combinations)
        .map(|i| per + usize::from(i < remainder))
        .collect()
}

/// Plan `count` tasks over the persona space.
///
/// Ids are assigned in cross-product order before the list is shuffled, so
/// the same seed always yields the same id → persona mapping.
pub fn plan_tasks<R: Rng + ?Sized>(
    space: &PersonaSpace,
    label: DialogueLabel,
    count: usize,
    rng: &mut R,
) -> Result<Vec<DialogueTask>, PlanError> {
    space.validate()?;

    let mut combinations = Vec::with_capacity(space.combination_count());
    for bracket in &space.age_brackets {
        for awareness in &space.awareness {
            for category in &space.categories {
                combinations.push((*bracket, *awareness, category.as_str()));
            }
        }
    }

    let mut tasks = Vec::with_capacity(count);
    for ((bracket, awareness, category), n) in combinations
        .into_iter()
        .zip(distribute(count, space.combination_count()))
    {
        for _ in 0..n {
            let occupation = space
                .occupations
                .choose(rng)
                .cloned()
                .unwrap_or_default();
            tasks.push(DialogueTask {
                id: label.dialogue_id(tasks.len() + 1),
                label,
                age_bracket: bracket,
                user_age: bracket.sample(rng),
                awareness,
                category: category.to_string(),
                occupation,
            });
        }
    }

    tasks.shuffle(rng);
    Ok(tasks)
}
