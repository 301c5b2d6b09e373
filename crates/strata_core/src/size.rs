//! # Size Helpers
//!
//! Byte-unit conversions, word alignment, and human-readable size strings
//! used throughout the allocator's log output.

/// Machine word size; every block payload is a multiple of this.
pub const WORD: usize = std::mem::size_of::<usize>();

/// Kilobytes to bytes.
#[inline]
#[must_use]
pub const fn kb(n: usize) -> usize {
    n * 1024
}

/// Megabytes to bytes.
#[inline]
#[must_use]
pub const fn mb(n: usize) -> usize {
    n * 1024 * 1024
}

/// Gigabytes to bytes.
#[inline]
#[must_use]
pub const fn gb(n: usize) -> usize {
    n * 1024 * 1024 * 1024
}

/// Rounds `n` up to the next multiple of [`WORD`].
///
/// `n` must be at most `usize::MAX - WORD + 1`; use [`checked_align`] for
/// caller-supplied sizes.
#[inline]
#[must_use]
pub const fn align(n: usize) -> usize {
    (n + WORD - 1) & !(WORD - 1)
}

/// Rounds `n` up to the next multiple of [`WORD`], or `None` on overflow.
#[inline]
#[must_use]
pub const fn checked_align(n: usize) -> Option<usize> {
    match n.checked_add(WORD - 1) {
        Some(v) => Some(v & !(WORD - 1)),
        None => None,
    }
}

/// Formats a byte count as `"<value> <unit>"` with two decimals.
///
/// The unit switches only once the count is strictly above the unit size,
/// so exactly 1024 bytes prints as `1024.00 B`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: usize) -> String {
    let (scale, unit) = if bytes > gb(1) {
        (gb(1), "GB")
    } else if bytes > mb(1) {
        (mb(1), "MB")
    } else if bytes > kb(1) {
        (kb(1), "KB")
    } else {
        (1, "B")
    };
    format!("{:.2} {unit}", bytes as f64 / scale as f64)
}
