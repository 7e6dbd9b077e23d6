/// Store collections owned by one matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collections {
    pub universe: String,
    pub target: String,
    pub word_counts: String,
    pub gram_counts: String,
    pub broker: String,
    pub ledger: String,
}

impl Collections {
    pub fn new(name: &str) -> Self {
        Self {
            universe: name.to_string(),
            target: format!("{}_target", name),
            word_counts: format!("{}_wordcount", name),
            gram_counts: format!("{}_gramcount", name),
            broker: format!("{}_broker", name),
            ledger: format!("{}_ledger", name),
        }
    }

    pub fn all(&self) -> [&str; 6] {
        [
            &self.universe,
            &self.target,
            &self.word_counts,
            &self.gram_counts,
            &self.broker,
            &self.ledger,
        ]
    }
}
