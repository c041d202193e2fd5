//! Merging a restored item list into the local collection.
//!
//! Records are matched first by id, then by [`Item::signature`], so the same purchase
//! entered separately on two devices collapses into one item. Matched items take the
//! incoming values but keep the local id, plus any optional field or unknown attribute
//! the incoming record doesn't have. Unmatched records are appended.

use std::collections::HashMap;

use tracing::debug;

use crate::item::Item;

/// Merge `incoming` into `local`. Output order is local order, then new items in
/// incoming order.
pub fn merge_items(local: &[Item], incoming: Vec<Item>) -> Vec<Item> {
    let mut merged: Vec<Item> = local.to_vec();
    let mut by_id: HashMap<String, usize> = HashMap::with_capacity(merged.len());
    let mut by_signature: HashMap<String, usize> = HashMap::with_capacity(merged.len());
    for (idx, item) in merged.iter().enumerate() {
        by_id.entry(item.id.clone()).or_insert(idx);
        by_signature.entry(item.signature()).or_insert(idx);
    }

    let (mut updated, mut added) = (0usize, 0usize);
    for item in incoming {
        let target = by_id
            .get(&item.id)
            .or_else(|| by_signature.get(&item.signature()))
            .copied();
        match target {
            Some(idx) => {
                let combined = merge_into(&merged[idx], item);
                by_signature.entry(combined.signature()).or_insert(idx);
                merged[idx] = combined;
                updated += 1;
            }
            None => {
                let idx = merged.len();
                by_id.entry(item.id.clone()).or_insert(idx);
                by_signature.entry(item.signature()).or_insert(idx);
                merged.push(item);
                added += 1;
            }
        }
    }
    debug!(updated, added, total = merged.len(), "merged items");
    merged
}

/// Incoming values win; the id and locally-only data are kept.
fn merge_into(local: &Item, incoming: Item) -> Item {
    let mut extra = local.extra.clone();
    extra.extend(incoming.extra);
    Item {
        id: local.id.clone(),
        image: incoming.image.or_else(|| local.image.clone()),
        currency: incoming.currency.or_else(|| local.currency.clone()),
        discount_rate: incoming.discount_rate.or(local.discount_rate),
        extra,
        ..incoming
    }
}
