//! Trivial deterministic transforms used by the CLI and tests.

use super::Transform;
use crate::bundle::ConfigBundle;
use crate::model::RecordingSet;
use anyhow::{bail, Result};

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Transform for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn apply(&self, recordings: RecordingSet, _config: &ConfigBundle) -> Result<RecordingSet> {
        Ok(recordings)
    }
}

/// Multiplies every sample by a factor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Multiply {
    /// Explicit factor; when `None` the bundle's `factor` parameter is used
    pub factor: Option<f64>,
}

impl Transform for Multiply {
    fn name(&self) -> &str {
        "multiply"
    }

    fn apply(&self, mut recordings: RecordingSet, config: &ConfigBundle) -> Result<RecordingSet> {
        let factor = match self.factor.or_else(|| config.get_f64("factor")) {
            Some(f) if f.is_finite() => f,
            Some(f) => bail!("multiply factor must be finite, got {}", f),
            None => bail!("multiply requires a 'factor' parameter"),
        };
        recordings.multiply(factor);
        Ok(recordings)
    }
}

/// Removes the mean from each recording.
#[derive(Debug, Clone, Copy, Default)]
pub struct Demean;

impl Transform for Demean {
    fn name(&self) -> &str {
        "demean"
    }

    fn apply(&self, mut recordings: RecordingSet, _config: &ConfigBundle) -> Result<RecordingSet> {
        for recording in recordings.iter_mut() {
            if recording.data.is_empty() {
                continue;
            }
            let mean = recording.data.iter().sum::<f64>() / recording.data.len() as f64;
            for sample in &mut recording.data {
                *sample -= mean;
            }
        }
        Ok(recordings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::tests::recording;

    #[test]
    fn test_multiply_uses_bundle_factor() {
        let set: RecordingSet = vec![recording("XX", "S0", "BHZ")].into();
        let config = ConfigBundle::default().with_param("factor", 2.0);

        let out = Multiply::default().apply(set, &config).unwrap();
        assert_eq!(out.as_slice()[0].data, vec![2.0, -4.0, 6.0, 1.0]);
    }

    #[test]
    fn test_multiply_explicit_factor_wins() {
        let set: RecordingSet = vec![recording("XX", "S0", "BHZ")].into();
        let config = ConfigBundle::default().with_param("factor", 2.0);

        let out = Multiply { factor: Some(-1.0) }.apply(set, &config).unwrap();
        assert_eq!(out.as_slice()[0].data, vec![-1.0, 2.0, -3.0, -0.5]);
    }

    #[test]
    fn test_multiply_without_factor_fails() {
        let set: RecordingSet = vec![recording("XX", "S0", "BHZ")].into();
        assert!(Multiply::default().apply(set, &ConfigBundle::default()).is_err());
    }

    #[test]
    fn test_demean() {
        let set: RecordingSet = vec![recording("XX", "S0", "BHZ")].into();
        let out = Demean.apply(set, &ConfigBundle::default()).unwrap();
        let sum: f64 = out.as_slice()[0].data.iter().sum();
        assert!(sum.abs() < 1e-12);
    }
}
