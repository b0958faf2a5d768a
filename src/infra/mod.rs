//! Concrete upstream clients.

pub mod wtp;
pub mod ztm;
