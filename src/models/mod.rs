pub mod core;
pub mod correction;
pub mod source;
