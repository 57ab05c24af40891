//! Data Transfer Objects for REST request/response serialization.

pub mod command_dto;
pub mod state_dto;

pub use command_dto::*;
pub use state_dto::*;
