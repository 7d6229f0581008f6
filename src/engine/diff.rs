use std::collections::HashMap;

use crate::record::{Record, RecordId};

/// Difference between the authoritative side of a pass and the side that follows it.
#[derive(Debug)]
pub struct Diff<R> {
    /// Only on the authoritative side.
    pub to_create: Vec<R>,
    /// On both sides and unequal: `(desired, current)`.
    pub to_update: Vec<(R, R)>,
    /// Only on the following side.
    pub to_delete: Vec<R>,
}

impl<R> Diff<R> {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Matches records by [`RecordId`]; discovery order is kept on both sides.
pub fn diff<R, F>(desired: Vec<R>, current: Vec<R>, equals: F) -> Diff<R>
where
    R: Record,
    F: Fn(&R, &R) -> bool,
{
    let mut current_by_id: HashMap<RecordId, (usize, R)> = current
        .into_iter()
        .enumerate()
        .map(|(idx, record)| (record.record_id(), (idx, record)))
        .collect();

    let mut to_create = Vec::new();
    let mut to_update = Vec::new();
    for record in desired {
        match current_by_id.remove(&record.record_id()) {
            None => to_create.push(record),
            Some((_, existing)) => {
                if !equals(&record, &existing) {
                    to_update.push((record, existing));
                }
            }
        }
    }

    let mut leftovers: Vec<(usize, R)> = current_by_id.into_values().collect();
    leftovers.sort_by_key(|(idx, _)| *idx);
    let to_delete = leftovers.into_iter().map(|(_, record)| record).collect();

    Diff {
        to_create,
        to_update,
        to_delete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Named {
        key: Option<&'static str>,
        value: u32,
        row: Option<i64>,
    }

    impl Record for Named {
        const KIND: &'static str = "named";

        fn natural_key(&self) -> Option<Vec<String>> {
            self.key.map(|k| vec![k.to_string(), "us-east-1".to_string()])
        }

        fn region(&self) -> &str {
            "us-east-1"
        }

        fn surrogate_id(&self) -> Option<i64> {
            self.row
        }

        fn set_surrogate_id(&mut self, id: Option<i64>) {
            self.row = id;
        }
    }

    fn named(key: Option<&'static str>, value: u32, row: Option<i64>) -> Named {
        Named { key, value, row }
    }

    #[test]
    fn classifies_each_side() {
        let desired = vec![
            named(Some("a"), 1, Some(1)),
            named(Some("b"), 2, Some(2)),
            named(None, 3, Some(3)),
        ];
        let current = vec![
            named(Some("z"), 9, None),
            named(Some("b"), 5, None),
            named(Some("a"), 1, None),
            named(Some("y"), 8, None),
        ];

        let d = diff(desired, current, |x, y| x.value == y.value);
        assert_eq!(d.to_create, vec![named(None, 3, Some(3))]);
        assert_eq!(d.to_update.len(), 1);
        assert_eq!(d.to_update[0].0.value, 2);
        assert_eq!(d.to_update[0].1.value, 5);
        assert_eq!(
            d.to_delete.iter().map(|r| r.key).collect::<Vec<_>>(),
            vec![Some("z"), Some("y")]
        );
    }

    #[test]
    fn equal_sides_produce_no_work() {
        let a = vec![named(Some("a"), 1, Some(1))];
        let b = vec![named(Some("a"), 1, None)];
        assert!(diff(a, b, |x, y| x.value == y.value).is_empty());
    }
}
