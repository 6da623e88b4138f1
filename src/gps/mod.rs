pub mod anomaly;
pub mod trace;
pub mod validator;
