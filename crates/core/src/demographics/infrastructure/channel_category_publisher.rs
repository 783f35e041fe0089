use crossbeam_channel::{Receiver, Sender};

use crate::demographics::domain::category_publisher::{CategoryPublisher, CategoryUpdate};
use crate::shared::constants::DOMINANT_CATEGORY_CHANNEL;

/// In-process broadcast of scene verdicts to any number of subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
pub struct ChannelCategoryPublisher {
    name: String,
    subscribers: Vec<Sender<CategoryUpdate>>,
}

impl ChannelCategoryPublisher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&mut self) -> Receiver<CategoryUpdate> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for ChannelCategoryPublisher {
    fn default() -> Self {
        Self::new(DOMINANT_CATEGORY_CHANNEL)
    }
}

impl CategoryPublisher for ChannelCategoryPublisher {
    fn publish(&mut self, update: &CategoryUpdate) {
        let before = self.subscribers.len();
        self.subscribers.retain(|tx| tx.send(*update).is_ok());
        let dropped = before - self.subscribers.len();
        if dropped > 0 {
            log::debug!("{}: pruned {dropped} closed subscriber(s)", self.name);
        }
    }
}
