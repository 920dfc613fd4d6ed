pub mod clock;
pub mod data_source;
pub mod status_listener;
pub mod storage;

pub use clock::*;
pub use data_source::*;
pub use status_listener::*;
pub use storage::*;
