pub mod configuration;
pub mod tick;
