//! Individual filter rules and their standalone matching behavior.

pub mod network;
