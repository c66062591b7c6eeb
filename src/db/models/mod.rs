//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` pick up every record type.

pub mod aid_request;
pub mod notification;
pub mod user;

pub use self::aid_request::*;
pub use self::notification::*;
pub use self::user::*;
