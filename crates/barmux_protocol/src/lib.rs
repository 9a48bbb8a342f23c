pub mod block;
pub mod click;
pub mod ctl;
pub mod error;
pub mod frame;
pub mod header;

pub use block::*;
pub use click::*;
pub use ctl::*;
pub use error::*;
pub use frame::*;
pub use header::*;
