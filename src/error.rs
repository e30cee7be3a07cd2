use derive_more::{Display, Error};

/// Failures surfaced by view operations and cursors.
///
/// `Stale` is permanent for the affected view or cursor instance: the caller
/// must discard it and, if needed, obtain a fresh view from the owning store.
/// The remaining variants report arguments or cursor states that cannot be
/// acted on; the view itself stays usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum ViewError {
    /// The backing collection was replaced behind a derived view or a cursor.
    #[display("view is out of sync: its backing collection has been replaced")]
    Stale,
    /// Sub-range bounds that do not fit the current collection.
    #[display("range {start}..{end} does not fit a collection of length {len}")]
    OutOfBounds {
        start: usize,
        end: usize,
        len: usize,
    },
    /// Cursor removal without a value to remove.
    #[display("cursor holds no value: call next() before remove()")]
    NoValue,
}
