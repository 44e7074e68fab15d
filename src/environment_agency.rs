mod provider;
pub mod survey;

pub use provider::Provider;
