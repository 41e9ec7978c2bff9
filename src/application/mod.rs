//! Application services: the coherence engine and the ports it drives.

pub mod coherence;
pub mod error;
pub mod observer;
pub mod repos;
pub mod validator;
