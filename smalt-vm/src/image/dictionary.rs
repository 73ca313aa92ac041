//! Method dictionary lookup.
//!
//! A dictionary is two parallel arrays: `keys`, symbols sorted by their
//! byte content, and `values`. Lookup is a binary search over the key
//! bytes, so interning is not required for correctness, only for
//! identity-based caching.

use crate::object::{DictionaryRef, RawValue, SymbolRef};

/// Find the value bound to `selector`, comparing symbol bytes
/// lexicographically.
pub fn lookup(dictionary: DictionaryRef, selector: &[u8]) -> Option<RawValue> {
    let keys = dictionary.keys();
    let values = dictionary.values();

    let mut lo = 0;
    let mut hi = keys.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        let key = SymbolRef::new(keys.at(mid).as_object());
        match key.bytes().cmp(selector) {
            core::cmp::Ordering::Less => lo = mid + 1,
            core::cmp::Ordering::Greater => hi = mid,
            core::cmp::Ordering::Equal => return Some(values.at(mid)),
        }
    }
    None
}

/// Index at which `selector` keeps `keys` sorted.
pub(crate) fn insertion_point(dictionary: DictionaryRef, selector: &[u8]) -> usize {
    let keys = dictionary.keys();

    let mut lo = 0;
    let mut hi = keys.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        let key = SymbolRef::new(keys.at(mid).as_object());
        if key.bytes() < selector {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
