/// Walker alias table for O(1) sampling of a discrete distribution.
#[derive(Clone, Debug)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
}

#[derive(Copy, Clone, Debug)]
struct AliasEntry {
    /// Probability of keeping this bin rather than jumping to `alias`.
    prob: f32,
    alias: u32,
}

impl AliasTable {
    /// Builds a table from non-negative weights. A table built from no
    /// positive weight picks uniformly.
    pub fn new(weights: &[f32]) -> Self {
        assert!(!weights.is_empty(), "alias table needs at least one weight");

        let n = weights.len();
        let total: f64 = weights.iter().map(|&w| w.max(0.0) as f64).sum();
        if total <= 0.0 {
            return AliasTable {
                entries: (0..n)
                    .map(|i| AliasEntry {
                        prob: 1.0,
                        alias: i as u32,
                    })
                    .collect(),
            };
        }

        let scale = n as f64 / total;
        let mut scaled: Vec<f64> = weights.iter().map(|&w| w.max(0.0) as f64 * scale).collect();
        let mut entries: Vec<_> = (0..n)
            .map(|i| AliasEntry {
                prob: 1.0,
                alias: i as u32,
            })
            .collect();

        let (mut small, mut large): (Vec<usize>, Vec<usize>) = (0..n).partition(|&i| scaled[i] < 1.0);

        while let (Some(s), Some(l)) = (small.pop(), large.pop()) {
            entries[s] = AliasEntry {
                prob: scaled[s] as f32,
                alias: l as u32,
            };

            scaled[l] += scaled[s] - 1.0;
            if scaled[l] < 1.0 {
                small.push(l);
            } else {
                large.push(l);
            }
        }

        // leftovers are within rounding of 1 and keep their own bin

        AliasTable { entries }
    }

    /// Picks a bin with `u` and decides between it and its alias with `v`.
    pub fn sample(&self, u: f32, v: f32) -> usize {
        let n = self.entries.len();
        let bin = ((u * n as f32) as usize).min(n - 1);
        let entry = self.entries[bin];
        if v < entry.prob {
            bin
        } else {
            entry.alias as usize
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
