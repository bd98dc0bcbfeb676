//! Confidence-weighted consensus over per-frame age estimates.
//!
//! Samples with a straight gaze are pooled by detector score:
//!
//! | score              | pools       |
//! |--------------------|-------------|
//! | `<= 0.75`          | discarded   |
//! | `(0.75, 0.90]`     | low         |
//! | `> 0.90`           | low + high  |
//!
//! After every sample the high pool is checked first (5 samples), then the
//! low pool (10 samples). The decision is the score-weighted mean age of the
//! triggering pool, floored. The estimator has no timeout of its own.

use crate::estimation::detection::FaceDetection;

pub const HIGH_CONFIDENCE: f64 = 0.90;
pub const LOW_CONFIDENCE: f64 = 0.75;
pub const HIGH_POOL_TARGET: usize = 5;
pub const LOW_POOL_TARGET: usize = 10;

/// A per-frame age reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub age: u32,
    /// Detector confidence in `[0, 1]`.
    pub score: f64,
    pub looking_straight: bool,
}

impl Sample {
    /// Build a sample from a detection that carries an age estimate.
    pub fn from_detection(detection: &FaceDetection) -> Option<Self> {
        Some(Self {
            age: detection.rounded_age()?,
            score: detection.score,
            looking_straight: detection.landmarks.is_looking_straight(),
        })
    }
}

/// Which pool a decision was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    High,
    Low,
}

/// Why a sample was not pooled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    NotLookingStraight,
    LowConfidence,
}

/// Classification of a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleClass {
    Discarded(DiscardReason),
    Low,
    High,
}

/// Finalized age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub age: u32,
    pub pool: Pool,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusOutcome {
    Pending(SampleClass),
    Decided(Decision),
}

/// Classify `sample` without recording it.
pub fn classify(sample: &Sample) -> SampleClass {
    if !sample.looking_straight {
        SampleClass::Discarded(DiscardReason::NotLookingStraight)
    } else if sample.score > HIGH_CONFIDENCE {
        SampleClass::High
    } else if sample.score > LOW_CONFIDENCE {
        SampleClass::Low
    } else {
        SampleClass::Discarded(DiscardReason::LowConfidence)
    }
}

/// `floor(Σ age·score / Σ score)`, or `None` when the total weight is zero.
pub fn weighted_average_age(samples: &[Sample]) -> Option<u32> {
    let (weighted, total) = samples.iter().fold((0.0_f64, 0.0_f64), |(w, t), s| {
        (w + f64::from(s.age) * s.score, t + s.score)
    });
    if total <= 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some((weighted / total).floor() as u32)
}

/// Accumulates samples until one pool is full.
#[derive(Debug, Clone, Default)]
pub struct ConsensusEstimator {
    high: Vec<Sample>,
    low: Vec<Sample>,
}

impl ConsensusEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn high_count(&self) -> usize {
        self.high.len()
    }

    pub fn low_count(&self) -> usize {
        self.low.len()
    }

    /// Record `sample` and check both triggers.
    pub fn observe(&mut self, sample: Sample) -> ConsensusOutcome {
        let class = classify(&sample);
        match class {
            SampleClass::High => {
                self.high.push(sample);
                self.low.push(sample);
            }
            SampleClass::Low => self.low.push(sample),
            SampleClass::Discarded(reason) => {
                tracing::debug!(?reason, score = sample.score, "Sample discarded");
            }
        }

        if let Some(decision) = self.decide() {
            tracing::debug!(
                age = decision.age,
                pool = ?decision.pool,
                samples = decision.samples,
                "Consensus reached"
            );
            return ConsensusOutcome::Decided(decision);
        }
        ConsensusOutcome::Pending(class)
    }

    fn decide(&self) -> Option<Decision> {
        let (pool, samples) = if self.high.len() >= HIGH_POOL_TARGET {
            (Pool::High, &self.high)
        } else if self.low.len() >= LOW_POOL_TARGET {
            (Pool::Low, &self.low)
        } else {
            return None;
        };

        Some(Decision {
            age: weighted_average_age(samples)?,
            pool,
            samples: samples.len(),
        })
    }

    pub fn reset(&mut self) {
        self.high.clear();
        self.low.clear();
    }
}
