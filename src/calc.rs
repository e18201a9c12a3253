use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn db(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

/// Half-up rounding to two decimals: `Int(100*x + 0.5) / 100`.
///
/// `100*x` is first snapped to 1e-6 so a decimal tie such as 4.475, stored as
/// 4.47499999..., still rounds up.
pub fn round_off_2_decimals(x: f64) -> f64 {
    let hundredths = ((100.0 * x) * 1e6).round() / 1e6;
    (hundredths + 0.5).floor() / 100.0
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / (values.len() as f64))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Period {
    #[serde(rename = "p1")]
    P1,
    #[serde(rename = "p2")]
    P2,
    #[serde(rename = "p3")]
    P3,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::P1, Period::P2, Period::P3];

    pub fn from_i64(n: i64) -> Option<Self> {
        match n {
            1 => Some(Period::P1),
            2 => Some(Period::P2),
            3 => Some(Period::P3),
            _ => None,
        }
    }

    pub fn number(self) -> i64 {
        match self {
            Period::P1 => 1,
            Period::P2 => 2,
            Period::P3 => 3,
        }
    }

    fn index(self) -> usize {
        (self.number() - 1) as usize
    }
}

/// One optional value per period. `None` means "no value", never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PeriodScores {
    pub p1: Option<f64>,
    pub p2: Option<f64>,
    pub p3: Option<f64>,
}

impl PeriodScores {
    pub fn get(&self, period: Period) -> Option<f64> {
        match period {
            Period::P1 => self.p1,
            Period::P2 => self.p2,
            Period::P3 => self.p3,
        }
    }

    pub fn set(&mut self, period: Period, value: Option<f64>) {
        match period {
            Period::P1 => self.p1 = value,
            Period::P2 => self.p2 = value,
            Period::P3 => self.p3 = value,
        }
    }

    pub fn present(&self) -> Vec<Period> {
        Period::ALL
            .into_iter()
            .filter(|p| self.get(*p).is_some())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightSet {
    pub p1: f64,
    pub p2: f64,
    pub p3: f64,
}

impl Default for WeightSet {
    fn default() -> Self {
        Self {
            p1: 1.0 / 3.0,
            p2: 1.0 / 3.0,
            p3: 1.0 / 3.0,
        }
    }
}

impl WeightSet {
    pub fn get(&self, period: Period) -> f64 {
        match period {
            Period::P1 => self.p1,
            Period::P2 => self.p2,
            Period::P3 => self.p3,
        }
    }

    /// Scales the three weights so they sum to 1. A zero total yields equal thirds.
    pub fn normalized(self) -> Self {
        let total = self.p1 + self.p2 + self.p3;
        if !total.is_finite() || total <= 0.0 {
            return Self::default();
        }
        Self {
            p1: self.p1 / total,
            p2: self.p2 / total,
            p3: self.p3 / total,
        }
    }
}

/// Per grade-level period weights, keyed by grade-level name.
pub type WeightRules = BTreeMap<String, WeightSet>;

pub fn weights_for(grade_level_name: &str, rules: &WeightRules) -> WeightSet {
    rules
        .get(grade_level_name)
        .copied()
        .map(WeightSet::normalized)
        .unwrap_or_default()
}

/// Rescales the weights of `present` so they sum to 1.
///
/// Returns `None` when no period is present. If the present weights sum to zero
/// the present periods share the weight equally.
pub fn renormalize(weights: &WeightSet, present: &[Period]) -> Option<BTreeMap<Period, f64>> {
    if present.is_empty() {
        return None;
    }
    let total: f64 = present.iter().map(|p| weights.get(*p)).sum();
    let out = if total > 0.0 {
        present
            .iter()
            .map(|p| (*p, weights.get(*p) / total))
            .collect()
    } else {
        let share = 1.0 / (present.len() as f64);
        present.iter().map(|p| (*p, share)).collect()
    };
    Some(out)
}

/// Weighted average of the present period values, rounded to two decimals.
pub fn weighted_final(scores: &PeriodScores, weights: &WeightSet) -> Option<f64> {
    let normalized = renormalize(weights, &scores.present())?;
    let sum: f64 = normalized
        .iter()
        .filter_map(|(p, w)| scores.get(*p).map(|v| v * w))
        .sum();
    Some(round_off_2_decimals(sum))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    pub subject_id: i64,
    pub subject_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaNode {
    pub area_id: i64,
    pub area_name: String,
    pub subjects: Vec<SubjectRef>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeRecord {
    pub student_id: i64,
    pub subject_id: i64,
    pub period: Period,
    pub score: Option<f64>,
    pub absences: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct GradeCell {
    score: Option<f64>,
    absences: i64,
}

/// Grade records keyed by (student, subject, period).
#[derive(Debug, Clone, Default)]
pub struct GradeTable {
    cells: HashMap<(i64, i64, Period), GradeCell>,
}

impl GradeTable {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = GradeRecord>,
    {
        let mut cells = HashMap::new();
        for r in records {
            cells.insert(
                (r.student_id, r.subject_id, r.period),
                GradeCell {
                    score: r.score,
                    absences: r.absences.max(0),
                },
            );
        }
        Self { cells }
    }

    pub fn scores(&self, student_id: i64, subject_id: i64) -> PeriodScores {
        let mut out = PeriodScores::default();
        for p in Period::ALL {
            let v = self
                .cells
                .get(&(student_id, subject_id, p))
                .and_then(|c| c.score);
            out.set(p, v);
        }
        out
    }

    pub fn absences(&self, student_id: i64, subject_id: i64) -> [i64; 3] {
        let mut out = [0_i64; 3];
        for p in Period::ALL {
            if let Some(c) = self.cells.get(&(student_id, subject_id, p)) {
                out[p.index()] = c.absences;
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRollup {
    pub subject_id: i64,
    pub name: String,
    pub scores: PeriodScores,
    #[serde(rename = "final")]
    pub final_score: Option<f64>,
    pub absences: [i64; 3],
}

impl SubjectRollup {
    pub fn absences_in(&self, period: Period) -> i64 {
        self.absences[period.index()]
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaRollup {
    pub area_id: i64,
    pub name: String,
    pub scores: PeriodScores,
    #[serde(rename = "final")]
    pub final_score: Option<f64>,
    pub subjects: Vec<SubjectRollup>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRollup {
    pub areas: Vec<AreaRollup>,
    pub overall_average: f64,
}

pub fn roll_up_subject(
    student_id: i64,
    subject: &SubjectRef,
    grades: &GradeTable,
    weights: &WeightSet,
) -> SubjectRollup {
    let scores = grades.scores(student_id, subject.subject_id);
    SubjectRollup {
        subject_id: subject.subject_id,
        name: subject.subject_name.clone(),
        final_score: weighted_final(&scores, weights),
        scores,
        absences: grades.absences(student_id, subject.subject_id),
    }
}

pub fn roll_up_area(
    student_id: i64,
    area: &AreaNode,
    grades: &GradeTable,
    weights: &WeightSet,
) -> AreaRollup {
    let subjects: Vec<SubjectRollup> = area
        .subjects
        .iter()
        .map(|s| roll_up_subject(student_id, s, grades, weights))
        .collect();

    let mut scores = PeriodScores::default();
    for p in Period::ALL {
        let present: Vec<f64> = subjects.iter().filter_map(|s| s.scores.get(p)).collect();
        scores.set(p, mean(&present).map(round_off_2_decimals));
    }

    AreaRollup {
        area_id: area.area_id,
        name: area.area_name.clone(),
        final_score: weighted_final(&scores, weights),
        scores,
        subjects,
    }
}

/// Rolls one student's grades up to area rows and an overall average.
///
/// Areas without a final are left out of the overall average; with none at
/// all the overall average is 0.0 so the student can still be ranked.
pub fn roll_up_student(
    student_id: i64,
    tree: &[AreaNode],
    grades: &GradeTable,
    weights: &WeightSet,
) -> StudentRollup {
    let areas: Vec<AreaRollup> = tree
        .iter()
        .map(|a| roll_up_area(student_id, a, grades, weights))
        .collect();
    let finals: Vec<f64> = areas.iter().filter_map(|a| a.final_score).collect();
    let overall_average = mean(&finals).map(round_off_2_decimals).unwrap_or(0.0);
    StudentRollup {
        areas,
        overall_average,
    }
}

/// Dense rank, highest value first. Ties share a rank and the next distinct
/// value is ranked one lower, without gaps.
pub fn dense_rank(pairs: &[(i64, f64)]) -> HashMap<i64, u32> {
    let mut ordered = pairs.to_vec();
    ordered.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let mut ranks = HashMap::with_capacity(ordered.len());
    let mut current = 0_u32;
    let mut previous: Option<f64> = None;
    for (id, value) in ordered {
        if previous != Some(value) {
            current += 1;
            previous = Some(value);
        }
        ranks.insert(id, current);
    }
    ranks
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalGrade {
    pub subject_id: i64,
    pub area_id: i64,
    pub period: Period,
    pub score: Option<f64>,
}

/// Average for a student outside the reported group.
///
/// Unlike `roll_up_student` this ignores period weights: each subject is the
/// plain mean of every score the student ever got in it, each area the plain
/// mean of its subjects, and the result the plain mean of the areas.
pub fn fallback_average(records: &[HistoricalGrade]) -> f64 {
    let mut by_subject: BTreeMap<(i64, i64), Vec<f64>> = BTreeMap::new();
    for r in records {
        if let Some(score) = r.score {
            by_subject
                .entry((r.area_id, r.subject_id))
                .or_default()
                .push(score);
        }
    }

    let mut by_area: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for ((area_id, _), scores) in &by_subject {
        if let Some(subject_mean) = mean(scores) {
            by_area.entry(*area_id).or_default().push(subject_mean);
        }
    }

    let area_means: Vec<f64> = by_area.values().filter_map(|v| mean(v)).collect();
    mean(&area_means).map(round_off_2_decimals).unwrap_or(0.0)
}
