pub mod error;
pub mod node;
pub mod result;
pub mod selection;
pub mod visitor;

pub use error::*;
pub use node::*;
pub use result::*;
pub use selection::*;
pub use visitor::*;
