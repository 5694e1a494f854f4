pub mod errors;
pub mod filter;
pub mod session;
pub mod todo;

pub use errors::*;
pub use filter::*;
pub use session::*;
pub use todo::*;
