#![forbid(unsafe_code)]

pub mod common;
pub mod cthelper;
pub mod ipset;
pub mod redirect;
pub mod rule;
pub mod state;
pub mod zone;
