// ABOUTME: Core library for wsjournal, containing the journal record types and the index fold.
// ABOUTME: Shared by the store crate for both live mutations and journal replay.

pub mod id;
pub mod index;
pub mod item;

pub use id::object_id;
pub use index::Index;
pub use item::{Action, CodecError, Item, decode, encode};
