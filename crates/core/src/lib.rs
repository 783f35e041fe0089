//! Real-time face recognition and audience category aggregation.
//!
//! Each bounded context keeps its pure logic in `domain` and its adapters to
//! threads, files, network and models in `infrastructure`. `scheduling`
//! ties them together into the detection loop.
pub mod demographics;
pub mod detection;
pub mod recognition;
pub mod scheduling;
pub mod shared;
