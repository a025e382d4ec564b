pub mod advertise;
pub mod browser;
pub mod records;
pub mod responder;
pub mod transport;
