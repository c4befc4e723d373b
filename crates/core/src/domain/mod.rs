pub mod features;
pub mod prediction;
