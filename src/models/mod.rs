pub mod condition;
pub mod merge;
pub mod metadata;
pub mod rewrite;
pub mod route;
pub mod rule;
pub mod statement;
pub mod value;

pub use condition::*;
pub use merge::*;
pub use metadata::*;
pub use rewrite::*;
pub use route::*;
pub use rule::*;
pub use statement::*;
pub use value::*;
