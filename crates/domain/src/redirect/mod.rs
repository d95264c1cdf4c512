pub mod entity;
pub mod error;
pub mod expand;
pub mod validate;
