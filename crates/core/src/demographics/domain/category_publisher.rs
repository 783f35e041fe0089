use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::demographics::domain::age_category::{AgeCategory, Gender};
use crate::demographics::domain::category_aggregator::DominantCategory;

/// Payload broadcast to listeners after every aggregation.
///
/// Each update is the complete current state, not a change event; listeners
/// receive one per processed batch even when nothing changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryUpdate {
    pub category: Option<AgeCategory>,
    pub gender: Option<Gender>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl CategoryUpdate {
    pub fn new(result: DominantCategory, timestamp: u64) -> Self {
        Self {
            category: result.category,
            gender: result.gender,
            timestamp,
        }
    }

    pub fn now(result: DominantCategory) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::new(result, millis)
    }
}

/// Delivers scene verdicts to whoever drives content selection.
pub trait CategoryPublisher: Send {
    fn publish(&mut self, update: &CategoryUpdate);
}

/// Forwards each update to every inner publisher in order.
pub struct FanoutCategoryPublisher {
    publishers: Vec<Box<dyn CategoryPublisher>>,
}

impl FanoutCategoryPublisher {
    pub fn new(publishers: Vec<Box<dyn CategoryPublisher>>) -> Self {
        Self { publishers }
    }
}

impl CategoryPublisher for FanoutCategoryPublisher {
    fn publish(&mut self, update: &CategoryUpdate) {
        for publisher in &mut self.publishers {
            publisher.publish(update);
        }
    }
}
