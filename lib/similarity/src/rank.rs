// Best-first ordering of scored candidates
use fuzzrec_core::Record;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A candidate with its aggregate score.
#[derive(Debug, Clone)]
pub struct Scored {
    pub score: f64,
    pub record: Record,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Higher score first; equal scores by ascending record id.
impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        OrderedFloat(self.score)
            .cmp(&OrderedFloat(other.score))
            .then_with(|| other.record.id.cmp(&self.record.id))
    }
}

/// Scored candidates, yielded best first. Ordering work is done lazily as
/// items are pulled.
#[derive(Debug, Default)]
pub struct Ranking {
    heap: BinaryHeap<Scored>,
}

impl Ranking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scored: Scored) {
        self.heap.push(scored);
    }

    pub fn peek(&self) -> Option<&Scored> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Iterator for Ranking {
    type Item = Scored;

    fn next(&mut self) -> Option<Scored> {
        self.heap.pop()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.heap.len(), Some(self.heap.len()))
    }
}

impl FromIterator<Scored> for Ranking {
    fn from_iter<I: IntoIterator<Item = Scored>>(iter: I) -> Self {
        Self {
            heap: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuzzrec_core::RecordId;

    fn scored(id: &str, score: f64) -> Scored {
        let mut record = Record::from_raw([("NAME", id)]);
        record.id = RecordId::new(id);
        Scored { score, record }
    }

    #[test]
    fn test_best_first_with_id_tie_break() {
        let ranking: Ranking = vec![
            scored("c", 0.5),
            scored("b", 0.9),
            scored("a", 0.5),
            scored("d", 0.7),
        ]
        .into_iter()
        .collect();
        assert_eq!(ranking.len(), 4);
        let order: Vec<String> = ranking.map(|s| s.record.id.to_string()).collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_empty_ranking() {
        let mut ranking = Ranking::new();
        assert!(ranking.peek().is_none());
        assert!(ranking.next().is_none());
    }
}
