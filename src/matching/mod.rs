pub mod exact;
pub mod fuzzy;
pub mod normalize;
