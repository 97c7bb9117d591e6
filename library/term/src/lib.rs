#![no_std]

mod encoding;
mod space;
mod tag;

pub use self::encoding::{TaggedRef, ADDRESS_MASK, MIN_ALIGNMENT};
pub use self::encoding::{PAGE_SIZE, REGION_SIZE};
pub use self::space::{Space, LOCAL_SPACES, GLOBAL_SPACES, NUM_SPACES};
pub use self::tag::TypeTag;
