use std::time::Instant;

use crate::demographics::domain::age_category::{rounded_age, AgeCategory, Gender};

/// One categorised face from one processed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionObservation {
    pub age: u32,
    pub category: AgeCategory,
    pub age_group: &'static str,
    pub gender: Option<Gender>,
    pub timestamp: Instant,
}

impl DetectionObservation {
    pub fn new(category: AgeCategory, age: u32, gender: Option<Gender>, timestamp: Instant) -> Self {
        Self {
            age,
            category,
            age_group: category.age_group(),
            gender,
            timestamp,
        }
    }

    /// Builds an observation from raw analyzer output. Faces whose age
    /// falls outside every category yield `None` and are left out of the
    /// scene verdict.
    pub fn from_estimate(age: f32, gender: &str, timestamp: Instant) -> Option<Self> {
        let age = rounded_age(age)?;
        let category = AgeCategory::from_age(age)?;
        Some(Self::new(category, age, Gender::parse(gender), timestamp))
    }
}
