pub mod analysis;
pub mod anchor;
pub mod three_way;
