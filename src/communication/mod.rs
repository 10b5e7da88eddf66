//! In-process data channels and the external transport contract.
pub mod channel;
pub mod transport;
