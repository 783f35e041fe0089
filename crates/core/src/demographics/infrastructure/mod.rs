pub mod channel_category_publisher;
pub mod json_file_category_publisher;
