pub mod characteristic;
pub mod descriptor;
pub mod service;
pub mod transport;
