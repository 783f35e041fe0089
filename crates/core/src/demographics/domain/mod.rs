pub mod age_category;
pub mod category_aggregator;
pub mod category_publisher;
pub mod observation;
