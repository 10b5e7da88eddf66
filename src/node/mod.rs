//! The physical compiler and the worker/coordinator runtime built on top of it.
pub mod environment;
pub mod physical;
pub mod worker;
