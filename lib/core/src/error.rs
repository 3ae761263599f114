//! Error handling foundation for flowforge.
//!
//! Only the `Result` alias lives here. Each crate owns its domain error
//! enums and wraps them in a rootcause `Report` where they cross a public
//! async boundary.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
