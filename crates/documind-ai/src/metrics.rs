//! Classification metrics: accuracy and support-weighted precision, recall,
//! and F1.
//!
//! Classes are the union of true and predicted labels. Each class is weighted
//! by its support in `y_true`; a ratio with a zero denominator counts as 0.

use std::collections::BTreeMap;

use documind_core::ClassificationScores;

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

#[derive(Default)]
struct ClassCounts {
    true_positive: usize,
    predicted: usize,
    support: usize,
}

/// `(precision, recall, f1)`, each averaged with support weights.
pub fn weighted_precision_recall_f1(y_true: &[usize], y_pred: &[usize]) -> (f64, f64, f64) {
    let mut counts: BTreeMap<usize, ClassCounts> = BTreeMap::new();
    for (&t, &p) in y_true.iter().zip(y_pred) {
        counts.entry(t).or_default().support += 1;
        counts.entry(p).or_default().predicted += 1;
        if t == p {
            counts.entry(t).or_default().true_positive += 1;
        }
    }

    let total_support: usize = counts.values().map(|c| c.support).sum();
    if total_support == 0 {
        return (0.0, 0.0, 0.0);
    }

    let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);
    for c in counts.values() {
        let p = ratio(c.true_positive, c.predicted);
        let r = ratio(c.true_positive, c.support);
        let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
        let w = c.support as f64 / total_support as f64;
        precision += w * p;
        recall += w * r;
        f1 += w * f;
    }
    (precision, recall, f1)
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

pub fn compute_scores(y_true: &[usize], y_pred: &[usize]) -> ClassificationScores {
    let (precision, recall, f1) = weighted_precision_recall_f1(y_true, y_pred);
    ClassificationScores {
        accuracy: accuracy(y_true, y_pred),
        f1,
        precision,
        recall,
    }
}
