use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use nalgebra::DMatrix;

/// Pairwise return correlations across tracked symbols. Recomputed on a
/// timer and installed atomically by pointer swap; readers never see a
/// half-updated matrix.
#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    symbols: Vec<String>,
    matrix: DMatrix<f64>,
    pub last_update: DateTime<Utc>,
}

/// Shared handle: swap the Arc to install a fresh matrix.
pub type SharedCorrelations = RwLock<Arc<CorrelationMatrix>>;

impl CorrelationMatrix {
    /// Identity matrix over no symbols; the state before the first compute.
    pub fn empty(at: DateTime<Utc>) -> Self {
        Self {
            symbols: Vec::new(),
            matrix: DMatrix::identity(0, 0),
            last_update: at,
        }
    }

    /// Compute from aligned return series. Series shorter than 10 points are
    /// skipped; mismatched lengths are truncated to the shortest common tail.
    pub fn compute(returns: &HashMap<String, Vec<f64>>, at: DateTime<Utc>) -> Self {
        let mut symbols: Vec<String> = returns
            .iter()
            .filter(|(_, series)| series.len() >= 10)
            .map(|(s, _)| s.clone())
            .collect();
        symbols.sort();

        let n = symbols.len();
        let mut matrix = DMatrix::identity(n, n);
        if n >= 2 {
            let common = symbols
                .iter()
                .map(|s| returns[s].len())
                .min()
                .unwrap_or(0);
            for i in 0..n {
                for j in i + 1..n {
                    let a = &returns[&symbols[i]];
                    let b = &returns[&symbols[j]];
                    let rho = pearson(
                        &a[a.len() - common..],
                        &b[b.len() - common..],
                    );
                    matrix[(i, j)] = rho;
                    matrix[(j, i)] = rho;
                }
            }
        }

        Self {
            symbols,
            matrix,
            last_update: at,
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Correlation between two symbols; None when either is untracked.
    pub fn correlation(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.symbols.iter().position(|s| s == a)?;
        let j = self.symbols.iter().position(|s| s == b)?;
        Some(self.matrix[(i, j)])
    }
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let ma = a.iter().sum::<f64>() / n as f64;
    let mb = b.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for i in 0..n {
        let da = a[i] - ma;
        let db = b[i] - mb;
        cov += da * db;
        va += da * da;
        vb += db * db;
    }
    if va <= 0.0 || vb <= 0.0 {
        return 0.0;
    }
    (cov / (va.sqrt() * vb.sqrt())).clamp(-1.0, 1.0)
}
