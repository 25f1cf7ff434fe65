pub mod data;
pub mod topic;

pub use data::{InboundMessage, Number, Reading, Tags};
pub use topic::EffectiveTopic;
