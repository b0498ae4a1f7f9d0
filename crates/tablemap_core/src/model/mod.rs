//! Record, value and key model shared by the compiler, executor and cache.

pub mod key;
pub mod record;
pub mod value;
