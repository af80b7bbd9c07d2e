/// Router Module Index
///
/// Splits the surface by how a request must be identified before its handler runs.
/// Role and ownership checks always happen in the handlers, through the collection
/// access tables.

/// Anonymous-friendly reads. Visibility is narrowed per request by the read predicate.
pub mod public;

/// Everything that needs a resolved identity; wrapped in the auth layer.
pub mod authenticated;

/// Draft-mode entry and exit.
pub mod preview;
