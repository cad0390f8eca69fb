pub mod config;
pub mod grid;
pub mod launcher;
pub mod plot;
pub mod readiness;
pub mod record;
pub mod sweep;
