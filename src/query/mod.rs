//! # Query Transform
//!
//! OData system query options (`$filter`, `$select`, `$orderby`, ...) parsed
//! into a structured [`QueryOptions`] value.

pub mod filter;
pub mod options;
pub mod parser;

pub use filter::{compare_json_values, lookup, FilterExpr, FilterOperator, StringFunction};
pub use options::{strip_quotes, OrderBy, QueryOptions, SortDirection, RECOGNIZED_OPTIONS};
pub use parser::parse_filter;
