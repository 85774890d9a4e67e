//! XML bodies exchanged with the storage service and returned to callers.

pub mod deserialize;
pub mod serialize;

pub use deserialize::*;
pub use serialize::*;
