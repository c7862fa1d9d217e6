//! # nuancier-shared
//!
//! Types shared by the catalog store and the HTTP server: the fixed catalog
//! [`Section`]s, account [`Role`]s with their authorization rules, and the
//! pure slug generator used for every group and color identifier.

pub mod auth;
pub mod constants;
pub mod error;
pub mod section;
pub mod slug;

pub use auth::{authorize, Action, Role};
pub use error::{AccessDenied, ParseEnumError};
pub use section::Section;
pub use slug::SlugKind;
