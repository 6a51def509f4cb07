use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Accumulates the loss and the predictions of one epoch.
///
/// The metrics are rebuilt at every epoch; [summary](RunningMetrics::summary) turns them into
/// [epoch metrics](EpochMetrics).
#[derive(Debug, Clone)]
pub struct RunningMetrics {
    num_classes: usize,
    loss_sum: f64,
    num_items: usize,
    predictions: Vec<usize>,
    labels: Vec<usize>,
}

/// Precision, recall and F1 of a single class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of samples labeled with the class.
    pub support: usize,
}

/// Per-class scores with their overall aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassScores>,
    pub accuracy: f64,
    /// F1 averaged over the classes, weighted by their support.
    pub weighted_f1: f64,
}

/// Summary statistics of an epoch, rounded to 6 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Fraction of correct predictions.
    pub accuracy: f64,
    /// F1 score weighted by the number of predictions of each class.
    pub f1: f64,
    /// Sum of the batch mean losses divided by the number of samples.
    pub loss: f64,
}

impl RunningMetrics {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            loss_sum: 0.0,
            num_items: 0,
            predictions: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Records one batch given its mean loss.
    ///
    /// The batch means are summed as they come, so the epoch loss is their sum divided by the
    /// number of items.
    pub fn update(&mut self, batch_loss: f64, predictions: &[usize], labels: &[usize]) {
        assert_eq!(
            predictions.len(),
            labels.len(),
            "One prediction per label is expected"
        );

        self.loss_sum += batch_loss;
        self.num_items += labels.len();
        self.predictions.extend_from_slice(predictions);
        self.labels.extend_from_slice(labels);
    }

    pub fn clear(&mut self) {
        self.loss_sum = 0.0;
        self.num_items = 0;
        self.predictions.clear();
        self.labels.clear();
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Per-class scores taking the predictions as the reference, so the classes are weighted
    /// by how often they are predicted.
    pub fn report(&self) -> ClassificationReport {
        classification_report(&self.predictions, &self.labels, self.num_classes)
    }

    pub fn summary(&self) -> EpochMetrics {
        let report = self.report();
        let loss = if self.num_items == 0 {
            0.0
        } else {
            self.loss_sum / self.num_items as f64
        };

        EpochMetrics {
            accuracy: round6(report.accuracy),
            f1: round6(report.weighted_f1),
            loss: round6(loss),
        }
    }
}

impl Display for EpochMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "acc: {:<8} f1: {:<8} loss: {:<8}",
            self.accuracy, self.f1, self.loss
        )
    }
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Computes per-class precision, recall and F1 of `predictions` against the reference `labels`.
///
/// Classes without predicted samples get a precision of zero, and classes without labeled
/// samples get a recall of zero.
pub fn classification_report(
    labels: &[usize],
    predictions: &[usize],
    num_classes: usize,
) -> ClassificationReport {
    let mut true_positives = vec![0usize; num_classes];
    let mut predicted = vec![0usize; num_classes];
    let mut support = vec![0usize; num_classes];

    for (label, prediction) in labels.iter().zip(predictions) {
        support[*label] += 1;
        predicted[*prediction] += 1;
        if label == prediction {
            true_positives[*label] += 1;
        }
    }

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

    let classes: Vec<ClassScores> = (0..num_classes)
        .map(|class| {
            let precision = ratio(true_positives[class], predicted[class]);
            let recall = ratio(true_positives[class], support[class]);
            let f1 = if precision + recall == 0.0 {
                0.0
            } else {
                2.0 * precision * recall / (precision + recall)
            };

            ClassScores {
                precision,
                recall,
                f1,
                support: support[class],
            }
        })
        .collect();

    let total = labels.len();
    let accuracy = ratio(true_positives.iter().sum(), total);
    let weighted_f1 = if total == 0 {
        0.0
    } else {
        classes
            .iter()
            .map(|scores| scores.f1 * scores.support as f64)
            .sum::<f64>()
            / total as f64
    };

    ClassificationReport {
        classes,
        accuracy,
        weighted_f1,
    }
}
