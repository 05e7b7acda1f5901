// ABOUTME: Generates portable, time-ordered identifiers that collaborators can use as fresh keys.
// ABOUTME: Backed by ULIDs, so ids sort by creation time and need no host or counter state.

use ulid::Ulid;

/// Return a new unique identifier as a 26 character string.
pub fn object_id() -> String {
    Ulid::new().to_string()
}
