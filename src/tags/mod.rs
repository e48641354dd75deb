//! Tag keys and the tag map threaded alongside measurements as context.

mod key;
mod map;

pub use key::{Key, KeyKind, KeyRegistry};
pub use map::{Mutation, Tag, TagMap};
