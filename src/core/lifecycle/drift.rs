//! Longitudinal drift detection per (audience, genre, language) segment.
//!
//! Scores are grouped into tumbling windows. The first windows of a segment
//! establish a baseline; afterwards a window whose mean falls more than
//! `drop_delta` below the baseline is a degraded window. A run of
//! `min_consecutive_windows` degraded windows raises one alert for the
//! version being served. Degraded windows never move the baseline.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::TemplateVersionId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Scores per tumbling window; also the size of the rolling window.
    pub window_size: usize,
    /// Windows averaged into the initial baseline.
    pub baseline_windows: usize,
    /// Absolute drop of a window mean below baseline that counts as degraded.
    pub drop_delta: f64,
    pub min_consecutive_windows: u32,
    /// Coefficient of variation above which a window is inconsistent.
    pub consistency_cv: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            baseline_windows: 3,
            drop_delta: 0.15,
            min_consecutive_windows: 3,
            consistency_cv: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentKey {
    pub audience: String,
    pub genre: String,
    pub language: String,
}

impl SegmentKey {
    pub fn new(audience: &str, genre: &str, language: &str) -> Self {
        Self {
            audience: audience.to_string(),
            genre: genre.to_string(),
            language: language.to_string(),
        }
    }
}

impl std::fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.audience, self.genre, self.language)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// Sustained drop of the window mean below baseline.
    ScoreDecline,
    /// Scores within a window vary too much.
    ConsistencyLoss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl DriftSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftSeverity::Low => "low",
            DriftSeverity::Medium => "medium",
            DriftSeverity::High => "high",
            DriftSeverity::Critical => "critical",
        }
    }

    pub fn from_relative_drop(drop: f64) -> Self {
        if drop >= 0.35 {
            DriftSeverity::Critical
        } else if drop >= 0.25 {
            DriftSeverity::High
        } else if drop >= 0.15 {
            DriftSeverity::Medium
        } else {
            DriftSeverity::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    pub id: Uuid,
    pub segment: SegmentKey,
    pub version_id: Option<TemplateVersionId>,
    pub kind: DriftKind,
    pub severity: DriftSeverity,
    pub baseline_mean: f64,
    pub current_mean: f64,
    /// `(baseline - current) / baseline`.
    pub relative_drop: f64,
    pub consecutive_windows: u32,
    /// Advisory: the served version should be demoted.
    pub proposes_demotion: bool,
    pub raised_at: DateTime<Utc>,
}

/// Rolling statistics of one segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentStats {
    pub samples: u64,
    pub rolling_mean: f64,
    pub rolling_variance: f64,
    pub baseline: Option<f64>,
    pub closed_windows: u64,
    pub consecutive_drops: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriftSummary {
    pub segments: usize,
    pub degraded_segments: usize,
    pub total_alerts: usize,
    pub by_severity: HashMap<String, usize>,
    pub demotion_proposals: usize,
}

#[derive(Debug, Default)]
struct SegmentTrack {
    samples: u64,
    rolling: VecDeque<f64>,
    pending: Vec<f64>,
    closed_windows: u64,
    baseline_means: Vec<f64>,
    baseline: Option<f64>,
    baseline_weight: u64,
    consecutive_drops: u32,
    alerted: HashSet<(DriftKind, Option<TemplateVersionId>)>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0)
}

#[derive(Debug, Default)]
pub struct DriftDetector {
    config: DriftConfig,
    segments: HashMap<SegmentKey, SegmentTrack>,
    alerts: Vec<DriftAlert>,
}

impl DriftDetector {
    pub fn new(config: DriftConfig) -> Self {
        Self {
            config,
            segments: HashMap::new(),
            alerts: Vec::new(),
        }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Record one score and return alerts raised by it.
    pub fn observe(
        &mut self,
        segment: &SegmentKey,
        version: Option<TemplateVersionId>,
        score: f64,
        now: DateTime<Utc>,
    ) -> Vec<DriftAlert> {
        let config = self.config.clone();
        let window_size = config.window_size.max(1);
        let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };

        let track = self.segments.entry(segment.clone()).or_default();
        track.samples += 1;
        track.rolling.push_back(score);
        while track.rolling.len() > window_size {
            track.rolling.pop_front();
        }
        track.pending.push(score);
        if track.pending.len() < window_size {
            return Vec::new();
        }

        let window: Vec<f64> = std::mem::take(&mut track.pending);
        track.closed_windows += 1;
        let window_mean = mean(&window);

        let Some(baseline) = track.baseline else {
            track.baseline_means.push(window_mean);
            if track.baseline_means.len() >= config.baseline_windows.max(1) {
                track.baseline = Some(mean(&track.baseline_means));
                track.baseline_weight = track.baseline_means.len() as u64;
            }
            return Vec::new();
        };

        let mut raised = Vec::new();
        let drop = baseline - window_mean;
        let relative_drop = if baseline > f64::EPSILON { drop / baseline } else { 0.0 };

        if drop > config.drop_delta {
            track.consecutive_drops += 1;
        } else {
            track.consecutive_drops = 0;
            let w = track.baseline_weight as f64;
            track.baseline = Some((baseline * w + window_mean) / (w + 1.0));
            track.baseline_weight += 1;
        }

        if track.consecutive_drops >= config.min_consecutive_windows.max(1)
            && track.alerted.insert((DriftKind::ScoreDecline, version))
        {
            raised.push(DriftAlert {
                id: Uuid::new_v4(),
                segment: segment.clone(),
                version_id: version,
                kind: DriftKind::ScoreDecline,
                severity: DriftSeverity::from_relative_drop(relative_drop),
                baseline_mean: baseline,
                current_mean: window_mean,
                relative_drop,
                consecutive_windows: track.consecutive_drops,
                proposes_demotion: version.is_some(),
                raised_at: now,
            });
        }

        let cv = if window_mean > f64::EPSILON {
            variance(&window).sqrt() / window_mean
        } else {
            0.0
        };
        if cv > config.consistency_cv && track.alerted.insert((DriftKind::ConsistencyLoss, version)) {
            raised.push(DriftAlert {
                id: Uuid::new_v4(),
                segment: segment.clone(),
                version_id: version,
                kind: DriftKind::ConsistencyLoss,
                severity: DriftSeverity::Low,
                baseline_mean: baseline,
                current_mean: window_mean,
                relative_drop,
                consecutive_windows: track.consecutive_drops,
                proposes_demotion: false,
                raised_at: now,
            });
        }

        for alert in &raised {
            warn!(
                segment = %alert.segment,
                kind = ?alert.kind,
                severity = ?alert.severity,
                baseline = alert.baseline_mean,
                current = alert.current_mean,
                "Drift alert raised"
            );
        }
        self.alerts.extend(raised.iter().cloned());
        raised
    }

    pub fn segment_stats(&self, segment: &SegmentKey) -> Option<SegmentStats> {
        self.segments.get(segment).map(|t| {
            let rolling: Vec<f64> = t.rolling.iter().copied().collect();
            SegmentStats {
                samples: t.samples,
                rolling_mean: mean(&rolling),
                rolling_variance: variance(&rolling),
                baseline: t.baseline,
                closed_windows: t.closed_windows,
                consecutive_drops: t.consecutive_drops,
            }
        })
    }

    pub fn alerts(&self) -> &[DriftAlert] {
        &self.alerts
    }

    pub fn alerts_for(&self, segment: &SegmentKey) -> Vec<&DriftAlert> {
        self.alerts.iter().filter(|a| &a.segment == segment).collect()
    }

    pub fn summary(&self) -> DriftSummary {
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        for alert in &self.alerts {
            *by_severity
                .entry(alert.severity.as_str().to_string())
                .or_insert(0) += 1;
        }
        DriftSummary {
            segments: self.segments.len(),
            degraded_segments: self
                .segments
                .values()
                .filter(|t| t.consecutive_drops > 0)
                .count(),
            total_alerts: self.alerts.len(),
            by_severity,
            demotion_proposals: self.alerts.iter().filter(|a| a.proposes_demotion).count(),
        }
    }
}
