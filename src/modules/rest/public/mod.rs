pub mod status;
pub mod tracking;
