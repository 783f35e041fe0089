use std::fmt;

use serde::{Deserialize, Serialize};

/// Audience bracket derived from an age estimate.
///
/// The ranges are inclusive and do not overlap. Ages outside all of them
/// (under 5, over 50) have no category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeCategory {
    #[serde(rename = "Kids")]
    Kids,
    #[serde(rename = "Teen")]
    Teen,
    #[serde(rename = "Young Adults")]
    YoungAdults,
    #[serde(rename = "Adults")]
    Adults,
    #[serde(rename = "Senior Adults")]
    SeniorAdults,
}

impl AgeCategory {
    pub const ALL: &[AgeCategory] = &[
        AgeCategory::Kids,
        AgeCategory::Teen,
        AgeCategory::YoungAdults,
        AgeCategory::Adults,
        AgeCategory::SeniorAdults,
    ];

    pub fn from_age(age: u32) -> Option<Self> {
        match age {
            5..=10 => Some(AgeCategory::Kids),
            11..=15 => Some(AgeCategory::Teen),
            16..=22 => Some(AgeCategory::YoungAdults),
            23..=35 => Some(AgeCategory::Adults),
            36..=50 => Some(AgeCategory::SeniorAdults),
            _ => None,
        }
    }

    /// Classifies a raw estimate after rounding to the nearest year.
    pub fn from_estimate(age: f32) -> Option<Self> {
        rounded_age(age).and_then(Self::from_age)
    }

    pub fn label(self) -> &'static str {
        match self {
            AgeCategory::Kids => "Kids",
            AgeCategory::Teen => "Teen",
            AgeCategory::YoungAdults => "Young Adults",
            AgeCategory::Adults => "Adults",
            AgeCategory::SeniorAdults => "Senior Adults",
        }
    }

    pub fn age_group(self) -> &'static str {
        match self {
            AgeCategory::Kids => "5-10",
            AgeCategory::Teen => "11-15",
            AgeCategory::YoungAdults => "16-22",
            AgeCategory::Adults => "23-35",
            AgeCategory::SeniorAdults => "36-50",
        }
    }
}

impl fmt::Display for AgeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Rounds an age estimate to whole years; negative or non-finite estimates
/// have no age.
pub fn rounded_age(age: f32) -> Option<u32> {
    if !age.is_finite() || age < 0.0 {
        return None;
    }
    Some(age.round() as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// Case-insensitive; anything other than male/female is unknown.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("male") {
            Some(Gender::Male)
        } else if raw.eq_ignore_ascii_case("female") {
            Some(Gender::Female)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
