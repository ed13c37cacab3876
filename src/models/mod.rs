pub mod metadata;
pub mod plan;
pub mod row;
pub mod source;

pub use metadata::*;
pub use plan::*;
pub use row::*;
pub use source::*;
