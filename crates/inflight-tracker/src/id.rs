use std::sync::atomic::{AtomicU64, Ordering};

/// Prefix of generated call identifiers.
const ID_PREFIX: &str = "call-";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Produce a process-unique call identifier.
///
/// Identifiers are a fixed prefix plus a monotonically increasing counter,
/// never reused within the process lifetime. The counter resets on restart,
/// which is fine because no tracked state persists across restarts. Not
/// random: uniqueness relies on the counter alone.
pub fn next_call_id() -> String {
    let n = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{ID_PREFIX}{n}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_carry_the_prefix_and_increase() {
        let a = next_call_id();
        let b = next_call_id();
        let parse = |id: &str| id.strip_prefix(ID_PREFIX).unwrap().parse::<u64>().unwrap();
        assert!(parse(&b) > parse(&a));
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..100).map(|_| next_call_id()).collect::<Vec<_>>()))
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
    }
}
