//! HyperLogLog cardinality sketch
//!
//! Fixed-precision probabilistic distinct counter backing the per-day issue
//! buckets. One sketch estimates how many distinct event ids were inserted,
//! in 2^precision bytes of register space regardless of input size.
//!
//! Properties the rest of the pipeline relies on:
//! - Inserting the same element any number of times does not move the
//!   estimate (beyond nothing - the register update is a max, so repeats
//!   are true no-ops).
//! - `merge` is register-wise max: commutative, associative, idempotent.
//!   Unioning bucket sketches across days/issues is therefore order-free.
//! - `to_bytes`/`from_bytes` round-trip exactly; storage treats the result
//!   as an opaque blob.

use xxhash_rust::xxh3::xxh3_64;

/// Default precision: 4096 registers, ~1.6% standard error, 4 KiB per bucket.
pub const DEFAULT_PRECISION: u8 = 12;

const MIN_PRECISION: u8 = 4;
const MAX_PRECISION: u8 = 16;

#[derive(Debug, PartialEq)]
pub enum SketchError {
    InvalidPrecision(u8),
    PrecisionMismatch { ours: u8, theirs: u8 },
    CorruptBytes(String),
}

impl std::fmt::Display for SketchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SketchError::InvalidPrecision(p) => {
                write!(f, "Precision {} outside supported range {}..={}", p, MIN_PRECISION, MAX_PRECISION)
            }
            SketchError::PrecisionMismatch { ours, theirs } => {
                write!(f, "Cannot merge sketches of different precision ({} vs {})", ours, theirs)
            }
            SketchError::CorruptBytes(msg) => write!(f, "Corrupt sketch bytes: {}", msg),
        }
    }
}

impl std::error::Error for SketchError {}

/// Mergeable distinct-count estimator over byte-string element ids.
#[derive(Debug, Clone, PartialEq)]
pub struct HyperLogLog {
    precision: u8,
    registers: Vec<u8>,
}

impl HyperLogLog {
    /// Create an empty sketch with 2^precision registers.
    ///
    /// Precision is fixed at construction; merging sketches of different
    /// precision is an error, so every bucket in one deployment must use
    /// the same value.
    pub fn new(precision: u8) -> Result<Self, SketchError> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(SketchError::InvalidPrecision(precision));
        }
        Ok(Self {
            precision,
            registers: vec![0u8; 1 << precision],
        })
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// True when no element has ever been inserted.
    pub fn is_empty(&self) -> bool {
        self.registers.iter().all(|&r| r == 0)
    }

    /// Insert one element id. Repeated inserts of the same id are no-ops.
    pub fn insert(&mut self, element_id: &[u8]) {
        let hash = xxh3_64(element_id);
        let index = (hash >> (64 - self.precision)) as usize;
        // Rank of the remaining 64 - precision bits: leading zeros + 1.
        let remaining = hash << self.precision;
        let rank = if remaining == 0 {
            64 - self.precision + 1
        } else {
            remaining.leading_zeros() as u8 + 1
        };
        if rank > self.registers[index] {
            self.registers[index] = rank;
        }
    }

    /// Harmonic-mean estimate with small-range (linear counting) correction.
    pub fn estimate(&self) -> f64 {
        let m = self.registers.len() as f64;
        let mut sum = 0.0;
        let mut zeros = 0usize;
        for &r in &self.registers {
            sum += 1.0 / (1u64 << r) as f64;
            if r == 0 {
                zeros += 1;
            }
        }

        let raw = Self::alpha(self.registers.len()) * m * m / sum;

        // Linear counting where the raw estimator is biased low.
        if raw <= 2.5 * m && zeros > 0 {
            m * (m / zeros as f64).ln()
        } else {
            raw
        }
        // 64-bit hash: collisions are negligible at any realistic count, so
        // no large-range correction is applied.
    }

    /// Union another sketch into this one (register-wise max).
    pub fn merge(&mut self, other: &HyperLogLog) -> Result<(), SketchError> {
        if self.precision != other.precision {
            return Err(SketchError::PrecisionMismatch {
                ours: self.precision,
                theirs: other.precision,
            });
        }
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            if *theirs > *mine {
                *mine = *theirs;
            }
        }
        Ok(())
    }

    /// Serialize as 1 precision byte + raw registers.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.registers.len());
        bytes.push(self.precision);
        bytes.extend_from_slice(&self.registers);
        bytes
    }

    /// Deserialize from `to_bytes` output, validating precision and length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SketchError> {
        let (&precision, registers) = bytes
            .split_first()
            .ok_or_else(|| SketchError::CorruptBytes("empty blob".to_string()))?;
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(SketchError::InvalidPrecision(precision));
        }
        let expected = 1usize << precision;
        if registers.len() != expected {
            return Err(SketchError::CorruptBytes(format!(
                "expected {} registers for precision {}, got {}",
                expected,
                precision,
                registers.len()
            )));
        }
        Ok(Self {
            precision,
            registers: registers.to_vec(),
        })
    }

    /// Bias-correction constant alpha_m for m registers.
    fn alpha(m: usize) -> f64 {
        match m {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m as f64),
        }
    }
}

impl Default for HyperLogLog {
    fn default() -> Self {
        // DEFAULT_PRECISION is inside the supported range.
        Self::new(DEFAULT_PRECISION).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sketch_estimates_zero() {
        let hll = HyperLogLog::default();
        assert!(hll.is_empty());
        assert_eq!(hll.estimate(), 0.0);
    }

    #[test]
    fn test_precision_bounds() {
        assert!(HyperLogLog::new(3).is_err());
        assert!(HyperLogLog::new(17).is_err());
        assert!(HyperLogLog::new(4).is_ok());
        assert!(HyperLogLog::new(16).is_ok());
    }

    #[test]
    fn test_insert_is_idempotent() {
        // Test: same element N times estimates the same as once
        let mut once = HyperLogLog::default();
        once.insert(b"event-1");

        let mut many = HyperLogLog::default();
        for _ in 0..1000 {
            many.insert(b"event-1");
        }

        assert_eq!(once.estimate(), many.estimate());
    }

    #[test]
    fn test_small_counts_near_exact() {
        // Linear-counting range: small distinct counts should be very close
        let mut hll = HyperLogLog::default();
        for i in 0..5 {
            hll.insert(format!("event-{}", i).as_bytes());
        }
        let estimate = hll.estimate();
        assert!((estimate - 5.0).abs() < 0.5, "estimate was {}", estimate);
    }

    #[test]
    fn test_large_counts_within_tolerance() {
        let mut hll = HyperLogLog::default();
        let n = 100_000;
        for i in 0..n {
            hll.insert(format!("event-{}", i).as_bytes());
        }
        let estimate = hll.estimate();
        let error = (estimate - n as f64).abs() / n as f64;
        assert!(error < 0.05, "relative error was {} (estimate {})", error, estimate);
    }

    #[test]
    fn test_merge_approximates_union() {
        let mut a = HyperLogLog::default();
        let mut b = HyperLogLog::default();
        for i in 0..500 {
            a.insert(format!("a-{}", i).as_bytes());
            b.insert(format!("b-{}", i).as_bytes());
        }

        a.merge(&b).unwrap();
        let estimate = a.estimate();
        let error = (estimate - 1000.0).abs() / 1000.0;
        assert!(error < 0.05, "union estimate was {}", estimate);
    }

    #[test]
    fn test_merge_with_overlap_is_idempotent() {
        // Merging a sketch containing the same elements must not inflate
        let mut a = HyperLogLog::default();
        let mut b = HyperLogLog::default();
        for i in 0..200 {
            a.insert(format!("shared-{}", i).as_bytes());
            b.insert(format!("shared-{}", i).as_bytes());
        }

        let before = a.estimate();
        a.merge(&b).unwrap();
        assert_eq!(a.estimate(), before);
    }

    #[test]
    fn test_merge_precision_mismatch() {
        let mut a = HyperLogLog::new(12).unwrap();
        let b = HyperLogLog::new(10).unwrap();
        assert_eq!(
            a.merge(&b),
            Err(SketchError::PrecisionMismatch { ours: 12, theirs: 10 })
        );
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut hll = HyperLogLog::default();
        for i in 0..1000 {
            hll.insert(format!("event-{}", i).as_bytes());
        }

        let restored = HyperLogLog::from_bytes(&hll.to_bytes()).unwrap();
        assert_eq!(restored, hll);
        assert_eq!(restored.estimate(), hll.estimate());
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(HyperLogLog::from_bytes(&[]).is_err());
        assert!(HyperLogLog::from_bytes(&[12, 0, 0]).is_err()); // truncated
        assert!(HyperLogLog::from_bytes(&[99]).is_err()); // bad precision
    }
}
