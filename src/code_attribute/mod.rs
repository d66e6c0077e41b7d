mod codec;
mod types;

pub use self::codec::*;
pub use self::types::*;
