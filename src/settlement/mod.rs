pub mod adjustments;
pub mod ledger;
pub mod processor;
pub mod regulator;
