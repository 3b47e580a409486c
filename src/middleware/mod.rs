pub mod admin;
pub mod gate;
pub mod metrics;
pub mod rate_limit;
