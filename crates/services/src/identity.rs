//! Resolves which user owns a listing.

use domains::{AppError, ListingRecord, Result, UserId};

/// Returns the seller of `listing`: the first candidate owner field that is
/// present, in [`OwnerFields::KEYS`](domains::OwnerFields::KEYS) order.
///
/// A listing without any owner reference is a data-integrity problem; the
/// caller must not retry.
pub fn resolve_seller(listing: &ListingRecord) -> Result<UserId> {
    listing
        .ownership
        .candidates()
        .into_iter()
        .flatten()
        .next()
        .cloned()
        .ok_or_else(|| {
            tracing::error!(listing_id = %listing.id(), "listing has no owner reference");
            AppError::NoOwner(listing.id().to_string())
        })
}
