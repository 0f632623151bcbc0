/// Uniform-occupancy bucket quantizer for embedding components
use serde::{Deserialize, Serialize};

/// Maps each f32 component to one of `2^bits` buckets.
///
/// Cutoffs sit at the evenly spaced quantiles of the training values, so
/// every bucket holds roughly the same share of components. Each bucket
/// decodes to the mean of the training values that fell into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketQuantizer {
    bits: u8,
    cutoffs: Vec<f32>,
    weights: Vec<f32>,
}

impl BucketQuantizer {
    /// `bits` must divide 8 (1, 2, 4 or 8)
    pub fn fit(bits: u8, values: &[f32]) -> Self {
        debug_assert!(matches!(bits, 1 | 2 | 4 | 8));
        let num_buckets = 1usize << bits;

        if values.is_empty() {
            return Self {
                bits,
                cutoffs: vec![0.0; num_buckets - 1],
                weights: vec![0.0; num_buckets],
            };
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f32::total_cmp);
        let n = sorted.len();

        let cutoffs: Vec<f32> = (1..num_buckets)
            .map(|i| sorted[(i * n / num_buckets).min(n - 1)])
            .collect();

        let mut sums = vec![0.0f64; num_buckets];
        let mut counts = vec![0usize; num_buckets];
        for &v in &sorted {
            let b = bucket_of(&cutoffs, v);
            sums[b] += v as f64;
            counts[b] += 1;
        }

        let weights = (0..num_buckets)
            .map(|b| {
                if counts[b] > 0 {
                    (sums[b] / counts[b] as f64) as f32
                } else {
                    // Ties can leave a bucket empty; decode to its lower cutoff
                    cutoffs[b.saturating_sub(1)]
                }
            })
            .collect();

        Self {
            bits,
            cutoffs,
            weights,
        }
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn cutoffs(&self) -> &[f32] {
        &self.cutoffs
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn encode(&self, value: f32) -> u8 {
        bucket_of(&self.cutoffs, value) as u8
    }

    pub fn decode(&self, code: u8) -> f32 {
        self.weights[code as usize]
    }

    /// Encode and bit-pack a stream of components, LSB first within a byte
    pub fn pack<I>(&self, values: I) -> Vec<u8>
    where
        I: IntoIterator<Item = f32>,
    {
        let per_byte = 8 / self.bits as usize;
        let mut packed = Vec::new();

        for (i, v) in values.into_iter().enumerate() {
            let slot = i % per_byte;
            if slot == 0 {
                packed.push(0u8);
            }
            let code = self.encode(v);
            if let Some(last) = packed.last_mut() {
                *last |= code << (slot * self.bits as usize);
            }
        }

        packed
    }

    /// Inverse of [`pack`](Self::pack) for codes `start..start + count`.
    ///
    /// `None` if the range runs past the end of `packed`.
    pub fn unpack(&self, packed: &[u8], start: usize, count: usize) -> Option<Vec<u8>> {
        let bits = self.bits as usize;
        let per_byte = 8 / bits;
        let mask = ((1u16 << bits) - 1) as u8;

        let end = start.checked_add(count)?;
        if end > packed.len().checked_mul(per_byte)? {
            return None;
        }

        Some(
            (start..end)
                .map(|i| (packed[i / per_byte] >> ((i % per_byte) * bits)) & mask)
                .collect(),
        )
    }
}

fn bucket_of(cutoffs: &[f32], value: f32) -> usize {
    cutoffs.partition_point(|c| *c <= value)
}
