pub mod context;
pub mod imds;
