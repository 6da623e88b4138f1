pub mod config;
pub mod consignment;
pub mod equalisation;
pub mod error;
pub mod events;
pub mod external;
pub mod ids;
pub mod reference;
