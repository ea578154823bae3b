//! Named counters for tracking events

#[derive(Debug, Default)]
pub struct Counter {
    // Few distinct names per solver; a small vec keeps insertion order for reports.
    counters: Vec<(&'static str, u64)>,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            counters: Vec::new(),
        }
    }

    pub fn increment(&mut self, name: &'static str, value: u64) {
        match self.counters.iter_mut().find(|(n, _)| *n == name) {
            Some((_, count)) => *count += value,
            None => self.counters.push((name, value)),
        }
    }

    pub fn set(&mut self, name: &'static str, value: u64) {
        match self.counters.iter_mut().find(|(n, _)| *n == name) {
            Some((_, count)) => *count = value,
            None => self.counters.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    pub fn reset_all(&mut self) {
        self.counters.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.counters.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_and_set() {
        let mut counter = Counter::new();
        counter.increment("bucket_overflows", 3);
        counter.increment("bucket_overflows", 2);
        counter.set("frames", 9);

        assert_eq!(counter.get("bucket_overflows"), 5);
        assert_eq!(counter.get("frames"), 9);
        assert_eq!(counter.get("missing"), 0);

        let names: Vec<_> = counter.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["bucket_overflows", "frames"]);

        counter.reset_all();
        assert_eq!(counter.get("frames"), 0);
    }
}
