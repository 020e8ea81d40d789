use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub grade: String,
    pub min_score: i64,
    pub max_score: i64,
    pub points: i64,
    pub remark: String,
}

impl GradeBand {
    fn contains(&self, score: f64) -> bool {
        (self.min_score as f64) <= score && score <= (self.max_score as f64)
    }
}

/// Serialized form of a grading system, as stored in workspace settings and
/// accepted by `grading.configure` / `RESULTSD_GRADING`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingConfig {
    pub name: String,
    pub bands: Vec<GradeBand>,
    #[serde(default = "default_component_caps")]
    pub component_caps: Vec<f64>,
    #[serde(default = "default_exam_cap")]
    pub exam_cap: f64,
}

fn default_component_caps() -> Vec<f64> {
    vec![20.0, 20.0]
}

fn default_exam_cap() -> f64 {
    60.0
}

impl GradingConfig {
    /// WAEC/NECO nine-point scale: CA1 (20) + CA2 (20) + Exam (60).
    pub fn waec() -> Self {
        let band = |grade: &str, min_score, max_score, points, remark: &str| GradeBand {
            grade: grade.to_string(),
            min_score,
            max_score,
            points,
            remark: remark.to_string(),
        };
        Self {
            name: "WAEC/NECO Style".to_string(),
            bands: vec![
                band("A1", 75, 100, 1, "Excellent"),
                band("B2", 70, 74, 2, "Very Good"),
                band("B3", 65, 69, 3, "Good"),
                band("C4", 60, 64, 4, "Credit"),
                band("C5", 55, 59, 5, "Credit"),
                band("C6", 50, 54, 6, "Credit"),
                band("D7", 45, 49, 7, "Pass"),
                band("E8", 40, 44, 8, "Pass"),
                band("F9", 0, 39, 9, "Fail"),
            ],
            component_caps: default_component_caps(),
            exam_cap: default_exam_cap(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    EmptyTable,
    InvertedBand { grade: String },
    BandOutOfRange { grade: String },
    Gap { score: i64 },
    Overlap { score: i64, first: String, second: String },
    BadCap { index: Option<usize>, value: f64 },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        "config_invalid"
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ConfigError::EmptyTable => "empty_table",
            ConfigError::InvertedBand { .. } => "inverted_band",
            ConfigError::BandOutOfRange { .. } => "band_out_of_range",
            ConfigError::Gap { .. } => "gap",
            ConfigError::Overlap { .. } => "overlap",
            ConfigError::BadCap { .. } => "bad_cap",
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyTable => write!(f, "grade band table is empty"),
            ConfigError::InvertedBand { grade } => {
                write!(f, "band {grade} has minScore greater than maxScore")
            }
            ConfigError::BandOutOfRange { grade } => {
                write!(f, "band {grade} extends outside 0..=100")
            }
            ConfigError::Gap { score } => write!(f, "no band covers score {score}"),
            ConfigError::Overlap {
                score,
                first,
                second,
            } => write!(f, "score {score} is covered by both {first} and {second}"),
            ConfigError::BadCap { index: Some(i), value } => {
                write!(f, "component cap {i} must be a non-negative number, got {value}")
            }
            ConfigError::BadCap { index: None, value } => {
                write!(f, "exam cap must be a non-negative number, got {value}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentMismatch {
    pub components: usize,
    pub caps: usize,
}

impl fmt::Display for ComponentMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {} continuous assessment components, got {}",
            self.caps, self.components
        )
    }
}

impl std::error::Error for ComponentMismatch {}

/// A validated grading system. Construction is the only place band tables
/// are checked; every per-call operation afterwards is total.
#[derive(Debug, Clone, PartialEq)]
pub struct GradingSystem {
    config: GradingConfig,
}

impl GradingSystem {
    pub fn new(config: GradingConfig) -> Result<Self, ConfigError> {
        validate(&config)?;
        Ok(Self { config })
    }

    pub fn waec() -> Self {
        Self {
            config: GradingConfig::waec(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn bands(&self) -> &[GradeBand] {
        &self.config.bands
    }

    pub fn config(&self) -> &GradingConfig {
        &self.config
    }

    pub fn component_caps(&self) -> &[f64] {
        &self.config.component_caps
    }

    pub fn exam_cap(&self) -> f64 {
        self.config.exam_cap
    }

    pub fn max_total(&self) -> f64 {
        self.config.component_caps.iter().sum::<f64>() + self.config.exam_cap
    }

    /// Scores are clamped into 0..=100. A fractional score that lands
    /// between two integer bands is looked up again by its floor. If a table
    /// still leaves the score uncovered, the worst band (lowest minScore) is
    /// returned and the defect is logged.
    pub fn classify(&self, score: f64) -> &GradeBand {
        let s = clamp_score(score, SCORE_MAX);
        let bands = &self.config.bands;
        if let Some(b) = bands.iter().find(|b| b.contains(s)) {
            return b;
        }
        let floored = s.floor();
        if let Some(b) = bands.iter().find(|b| b.contains(floored)) {
            return b;
        }
        // `new` rejects empty tables, so a lowest band always exists.
        let worst = bands
            .iter()
            .min_by_key(|b| b.min_score)
            .expect("validated grading table has at least one band");
        tracing::warn!(
            score = s,
            fallback = %worst.grade,
            system = %self.config.name,
            "no grade band covers score; using lowest band"
        );
        worst
    }

    pub fn total(&self, components: &[f64], exam: f64) -> Result<f64, ComponentMismatch> {
        compute_total(
            components,
            &self.config.component_caps,
            exam,
            self.config.exam_cap,
        )
    }
}

fn validate(config: &GradingConfig) -> Result<(), ConfigError> {
    if config.bands.is_empty() {
        return Err(ConfigError::EmptyTable);
    }
    for b in &config.bands {
        if b.min_score > b.max_score {
            return Err(ConfigError::InvertedBand {
                grade: b.grade.clone(),
            });
        }
        if b.min_score < SCORE_MIN as i64 || b.max_score > SCORE_MAX as i64 {
            return Err(ConfigError::BandOutOfRange {
                grade: b.grade.clone(),
            });
        }
    }
    for score in (SCORE_MIN as i64)..=(SCORE_MAX as i64) {
        let mut hits = config
            .bands
            .iter()
            .filter(|b| b.min_score <= score && score <= b.max_score);
        let Some(first) = hits.next() else {
            return Err(ConfigError::Gap { score });
        };
        if let Some(second) = hits.next() {
            return Err(ConfigError::Overlap {
                score,
                first: first.grade.clone(),
                second: second.grade.clone(),
            });
        }
    }
    for (i, cap) in config.component_caps.iter().enumerate() {
        if !cap.is_finite() || *cap < 0.0 {
            return Err(ConfigError::BadCap {
                index: Some(i),
                value: *cap,
            });
        }
    }
    if !config.exam_cap.is_finite() || config.exam_cap < 0.0 {
        return Err(ConfigError::BadCap {
            index: None,
            value: config.exam_cap,
        });
    }
    Ok(())
}

/// Clamp into `0..=cap`. Non-finite input counts as zero.
pub fn clamp_score(value: f64, cap: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.max(0.0).min(cap.max(0.0))
}

pub fn compute_total(
    components: &[f64],
    component_caps: &[f64],
    exam_score: f64,
    exam_cap: f64,
) -> Result<f64, ComponentMismatch> {
    if components.len() != component_caps.len() {
        return Err(ComponentMismatch {
            components: components.len(),
            caps: component_caps.len(),
        });
    }
    let ca: f64 = components
        .iter()
        .zip(component_caps)
        .map(|(v, cap)| clamp_score(*v, *cap))
        .sum();
    Ok(ca + clamp_score(exam_score, exam_cap))
}

/// Half-up rounding to two decimals: `floor(100*x + 0.5) / 100`.
pub fn round_half_up_2(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

pub fn compute_average(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let sum: f64 = scores.iter().sum();
    round_half_up_2(sum / scores.len() as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ranked<T> {
    #[serde(flatten)]
    pub item: T,
    pub position: usize,
    pub position_label: String,
}

fn cmp_average_desc(a: f64, b: f64) -> Ordering {
    // NaN ranks below every real average.
    let a = if a.is_nan() { f64::NEG_INFINITY } else { a };
    let b = if b.is_nan() { f64::NEG_INFINITY } else { b };
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Dense ranking by descending average. `sort_by` is stable, so tied
/// averages keep their input order and receive adjacent positions.
pub fn rank<T, F>(items: Vec<T>, average_of: F) -> Vec<Ranked<T>>
where
    F: Fn(&T) -> f64,
{
    let mut items = items;
    items.sort_by(|a, b| cmp_average_desc(average_of(a), average_of(b)));
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| Ranked {
            item,
            position: i + 1,
            position_label: format_position(i + 1),
        })
        .collect()
}

pub fn format_position(position: usize) -> String {
    let suffix = match (position % 100, position % 10) {
        (11..=13, _) => "th",
        (_, 1) => "st",
        (_, 2) => "nd",
        (_, 3) => "rd",
        _ => "th",
    };
    format!("{position}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Entry {
        id: u32,
        average: f64,
    }

    #[test]
    fn waec_table_validates() {
        let system = GradingSystem::new(GradingConfig::waec()).expect("waec is valid");
        assert_eq!(system.bands().len(), 9);
        assert_eq!(system.max_total(), 100.0);
    }

    #[test]
    fn every_integer_score_maps_to_its_band() {
        let system = GradingSystem::waec();
        for s in 0..=100 {
            let band = system.classify(s as f64);
            assert!(
                band.min_score <= s && s <= band.max_score,
                "score {} classified as {}",
                s,
                band.grade
            );
            let matching = system
                .bands()
                .iter()
                .filter(|b| b.min_score <= s && s <= b.max_score)
                .count();
            assert_eq!(matching, 1, "score {}", s);
        }
    }

    #[test]
    fn classify_boundaries_and_clamping() {
        let system = GradingSystem::waec();
        assert_eq!(system.classify(75.0).grade, "A1");
        assert_eq!(system.classify(74.0).grade, "B2");
        assert_eq!(system.classify(39.0).grade, "F9");
        assert_eq!(system.classify(40.0).grade, "E8");
        assert_eq!(system.classify(140.0).grade, "A1");
        assert_eq!(system.classify(-5.0).grade, "F9");
        assert_eq!(system.classify(f64::NAN).grade, "F9");
    }

    #[test]
    fn fractional_score_between_bands_uses_floor() {
        let system = GradingSystem::waec();
        assert_eq!(system.classify(74.5).grade, "B2");
        assert_eq!(system.classify(39.99).grade, "F9");
        assert_eq!(system.classify(99.5).grade, "A1");
    }

    #[test]
    fn gapped_table_falls_back_to_lowest_band() {
        let mut config = GradingConfig::waec();
        // Drop B2 to open a 70..=74 hole.
        config.bands.retain(|b| b.grade != "B2");
        assert_eq!(
            GradingSystem::new(config.clone()),
            Err(ConfigError::Gap { score: 70 })
        );

        let system = GradingSystem { config };
        let band = system.classify(72.0);
        assert_eq!(band.grade, "F9");
    }

    #[test]
    fn invalid_tables_are_rejected() {
        let mut empty = GradingConfig::waec();
        empty.bands.clear();
        assert_eq!(GradingSystem::new(empty), Err(ConfigError::EmptyTable));

        let mut overlap = GradingConfig::waec();
        overlap.bands[1].max_score = 75;
        let e = GradingSystem::new(overlap).expect_err("overlap");
        assert_eq!(e.reason(), "overlap");

        let mut inverted = GradingConfig::waec();
        inverted.bands[0].min_score = 101;
        assert_eq!(
            GradingSystem::new(inverted).expect_err("inverted").reason(),
            "inverted_band"
        );

        let mut no_top = GradingConfig::waec();
        no_top.bands[0].max_score = 99;
        assert_eq!(
            GradingSystem::new(no_top),
            Err(ConfigError::Gap { score: 100 })
        );

        let mut bad_cap = GradingConfig::waec();
        bad_cap.exam_cap = -1.0;
        assert_eq!(
            GradingSystem::new(bad_cap).expect_err("cap").reason(),
            "bad_cap"
        );
    }

    #[test]
    fn total_clamps_each_component_to_its_cap() {
        let total = compute_total(&[25.0, 25.0], &[20.0, 20.0], 80.0, 60.0).expect("total");
        assert_eq!(total, 100.0);
    }

    #[test]
    fn total_treats_negative_inputs_as_zero() {
        let total = compute_total(&[-4.0, 12.0], &[20.0, 20.0], -10.0, 60.0).expect("total");
        assert_eq!(total, 12.0);
    }

    #[test]
    fn total_rejects_component_cap_mismatch() {
        let e = compute_total(&[10.0], &[20.0, 20.0], 50.0, 60.0).expect_err("mismatch");
        assert_eq!(
            e,
            ComponentMismatch {
                components: 1,
                caps: 2
            }
        );
    }

    #[test]
    fn average_of_empty_is_zero_and_rounds_half_up() {
        assert_eq!(compute_average(&[]), 0.0);
        assert_eq!(compute_average(&[80.0, 90.0, 70.0]), 80.0);
        assert_eq!(
            compute_average(&[93.0, 83.0, 92.0, 82.0, 87.0, 77.0, 94.0]),
            86.86
        );
        assert_eq!(compute_average(&[1.0, 2.0]), 1.5);
        assert_eq!(compute_average(&[2.0, 2.0, 3.0]), 2.33);
    }

    #[test]
    fn ranking_is_deterministic_for_ties() {
        let input = vec![
            Entry { id: 1, average: 90.0 },
            Entry { id: 2, average: 90.0 },
            Entry { id: 3, average: 70.0 },
        ];
        let first = rank(input.clone(), |e| e.average);
        let second = rank(input, |e| e.average);
        assert_eq!(first, second);

        let ids: Vec<(u32, usize)> = first.iter().map(|r| (r.item.id, r.position)).collect();
        assert_eq!(ids, vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn ranking_orders_descending_with_dense_positions() {
        let input = vec![
            Entry { id: 1, average: 55.5 },
            Entry { id: 2, average: f64::NAN },
            Entry { id: 3, average: 91.0 },
            Entry { id: 4, average: 70.25 },
        ];
        let ranked = rank(input, |e| e.average);
        let ids: Vec<u32> = ranked.iter().map(|r| r.item.id).collect();
        assert_eq!(ids, vec![3, 4, 1, 2]);
        let positions: Vec<usize> = ranked.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4]);
        assert_eq!(ranked[0].position_label, "1st");
    }

    #[test]
    fn ordinal_suffixes() {
        assert_eq!(format_position(1), "1st");
        assert_eq!(format_position(2), "2nd");
        assert_eq!(format_position(3), "3rd");
        assert_eq!(format_position(4), "4th");
        assert_eq!(format_position(11), "11th");
        assert_eq!(format_position(12), "12th");
        assert_eq!(format_position(13), "13th");
        assert_eq!(format_position(21), "21st");
        assert_eq!(format_position(22), "22nd");
        assert_eq!(format_position(101), "101st");
        assert_eq!(format_position(111), "111th");
        assert_eq!(format_position(113), "113th");
    }

    #[test]
    fn config_deserializes_with_default_caps() {
        let raw = serde_json::json!({
            "name": "Pass/Fail",
            "bands": [
                { "grade": "P", "minScore": 50, "maxScore": 100, "points": 1, "remark": "Pass" },
                { "grade": "F", "minScore": 0, "maxScore": 49, "points": 0, "remark": "Fail" }
            ]
        });
        let config: GradingConfig = serde_json::from_value(raw).expect("parse config");
        assert_eq!(config.component_caps, vec![20.0, 20.0]);
        assert_eq!(config.exam_cap, 60.0);
        let system = GradingSystem::new(config).expect("valid");
        assert_eq!(system.classify(50.0).grade, "P");
        assert_eq!(system.classify(49.9).grade, "F");
    }
}
