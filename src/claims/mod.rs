pub mod calculator;
pub mod claim;
pub mod evidence;
pub mod lifecycle;
