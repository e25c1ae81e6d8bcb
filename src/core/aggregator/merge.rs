use std::collections::HashSet;
use std::hash::Hash;

use crate::core::upstream::types::Item;

pub fn merge_by_identity<T, K, F>(
    buffer: &mut Vec<T>,
    incoming: impl IntoIterator<Item = T>,
    identity: F,
) -> usize
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen: HashSet<K> = buffer.iter().map(&identity).collect();
    let before = buffer.len();
    for candidate in incoming {
        if seen.insert(identity(&candidate)) {
            buffer.push(candidate);
        }
    }
    buffer.len() - before
}

pub fn sort_newest_first(items: &mut [Item]) {
    items.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::item_at;

    #[test]
    fn merge_drops_duplicates_and_keeps_first_occurrence() {
        let mut buffer = vec![(1, "a"), (2, "b")];
        let added = merge_by_identity(&mut buffer, vec![(2, "late"), (3, "c"), (3, "dup")], |entry| entry.0);

        assert_eq!(added, 1);
        assert_eq!(buffer, vec![(1, "a"), (2, "b"), (3, "c")]);
    }

    #[test]
    fn merging_same_page_twice_is_idempotent() {
        let page = vec![item_at("v1", "UC_a", 40), item_at("v2", "UC_a", 30)];
        let mut buffer = vec![item_at("v0", "UC_b", 35)];

        merge_by_identity(&mut buffer, page.clone(), |item| item.id.clone());
        sort_newest_first(&mut buffer);
        let once = buffer.clone();
        let added = merge_by_identity(&mut buffer, page, |item| item.id.clone());
        sort_newest_first(&mut buffer);

        assert_eq!(added, 0);
        assert_eq!(buffer, once);
        let ids: Vec<&str> = buffer.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v0", "v2"]);
    }

    #[test]
    fn equal_publish_times_order_by_id() {
        let mut first = vec![
            item_at("c", "UC_a", 10),
            item_at("a", "UC_b", 10),
            item_at("newer", "UC_a", 20),
            item_at("b", "UC_c", 10),
        ];
        let mut second = first.clone();
        second.reverse();

        sort_newest_first(&mut first);
        sort_newest_first(&mut second);

        let ids: Vec<&str> = first.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "a", "b", "c"]);
        assert_eq!(first, second);
    }
}
