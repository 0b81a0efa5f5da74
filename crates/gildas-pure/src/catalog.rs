//! Identification of fitted lines against a transition catalog.
//!
//! The catalog itself (typically a remote spectroscopy service) sits behind
//! the [`LineCatalog`] trait; [`TransitionTable`] is an in-memory
//! implementation.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::Result;
use crate::line::SpectrumLine;
use crate::reduce::ReduceConfig;
use crate::spectrum::SPEED_OF_LIGHT_KMS;

/// Source of candidate transitions.
pub trait LineCatalog {
    /// Names of transitions between `min_freq` and `max_freq` (MHz) whose
    /// catalog intensity is at least `min_intensity`, strongest first.
    ///
    /// Names start with the species, followed by whitespace and the
    /// quantum numbers, e.g. `"CO v=0 1-0"`.
    fn query(&self, min_freq: f64, max_freq: f64, min_intensity: f64) -> Result<Vec<String>>;
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub frequency: f64,
    pub intensity: f64,
    pub name: String,
}

/// A catalog held in memory.
#[derive(Debug, Clone, Default)]
pub struct TransitionTable {
    entries: Vec<Transition>,
}

impl TransitionTable {
    pub fn new(mut entries: Vec<Transition>) -> Self {
        entries.sort_by(|a, b| a.frequency.total_cmp(&b.frequency));
        TransitionTable { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LineCatalog for TransitionTable {
    fn query(&self, min_freq: f64, max_freq: f64, min_intensity: f64) -> Result<Vec<String>> {
        let start = self.entries.partition_point(|t| t.frequency < min_freq);
        let mut hits: Vec<&Transition> = self.entries[start..]
            .iter()
            .take_while(|t| t.frequency <= max_freq)
            .filter(|t| t.intensity >= min_intensity)
            .collect();
        hits.sort_by(|a, b| b.intensity.total_cmp(&a.intensity));
        Ok(hits.into_iter().map(|t| t.name.clone()).collect())
    }
}

/// Species part of a transition name.
pub fn species(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or("")
}

/// Label every active line with the catalog transitions falling inside its
/// width, skipping species listed in `config.impossible_molecules`.
///
/// The search window is the line frequency ± half its width converted to
/// frequency. Returns the number of lines that received a label.
pub fn identify_lines(
    lines: &mut [SpectrumLine],
    catalog: &impl LineCatalog,
    config: &ReduceConfig,
) -> Result<usize> {
    let mut labelled = 0;
    for line in lines.iter_mut().filter(|l| l.is_active()) {
        let half = 0.5 * line.width.value.abs() * line.frequency / SPEED_OF_LIGHT_KMS;
        let candidates = catalog.query(line.frequency - half, line.frequency + half, config.catalog_min_intensity)?;
        let allowed: Vec<String> = candidates
            .into_iter()
            .filter(|c| {
                let s = species(c);
                !config.impossible_molecules.iter().any(|m| m.eq_ignore_ascii_case(s))
            })
            .collect();
        if allowed.is_empty() {
            continue;
        }
        log::debug!("line at {:.3} MHz matches {}", line.frequency, allowed.join(", "));
        line.label = allowed.join(" | ");
        labelled += 1;
    }
    Ok(labelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaussfit::{Gaussian, GaussianFit};
    use crate::spectrum::SpectralAxis;

    fn table() -> TransitionTable {
        let t = |frequency: f64, intensity: f64, name: &str| Transition {
            frequency,
            intensity,
            name: name.into(),
        };
        TransitionTable::new(vec![
            t(115271.2018, -5.0, "CO v=0 1-0"),
            t(115271.5, -3.0, "NaCl v=0 9-8"),
            t(115270.9, -8.0, "HC3N v7=1 12-11"),
            t(110201.354, -5.5, "13CO v=0 1-0"),
        ])
    }

    fn line_at(frequency: f64) -> SpectrumLine {
        let axis = SpectralAxis::new(1.0, 0.0, 1.0, frequency).unwrap();
        let fit = GaussianFit {
            gaussian: Gaussian::new(1.0, 3.0, 1.0),
            covariance: [[0.01, 0.0, 0.0], [0.0, 0.01, 0.0], [0.0, 0.0, 0.01]],
            chi_square: 1.0,
            iterations: 1,
        };
        SpectrumLine::from_fit(&fit, &axis, 0.1, (1, 3))
    }

    #[test]
    fn query_window_and_intensity() {
        let hits = table().query(115270.0, 115272.0, -6.0).unwrap();
        assert_eq!(hits, vec!["NaCl v=0 9-8", "CO v=0 1-0"]);
        assert!(table().query(1.0, 2.0, -10.0).unwrap().is_empty());
    }

    #[test]
    fn species_prefix() {
        assert_eq!(species("13CO v=0 1-0"), "13CO");
        assert_eq!(species(""), "");
    }

    #[test]
    fn impossible_species_skipped() {
        let mut lines = vec![line_at(115271.2018), line_at(100000.0)];
        let n = identify_lines(&mut lines, &table(), &ReduceConfig::default()).unwrap();
        assert_eq!(n, 1);
        assert_eq!(lines[0].label, "CO v=0 1-0");
        assert!(lines[1].label.is_empty());
    }

    #[test]
    fn deleted_lines_not_labelled() {
        let mut lines = vec![line_at(115271.2018)];
        lines[0].deleted = true;
        let n = identify_lines(&mut lines, &table(), &ReduceConfig::default()).unwrap();
        assert_eq!(n, 0);
    }
}
