use crate::calc::{
    self, AreaRollup, CalcError, GradeTable, Period, StudentRollup, WeightSet,
};
use crate::store::{ReadStore, StudentIdentity};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRequest {
    pub group_id: i64,
    pub period: Period,
    pub student_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ranks {
    pub group: Option<u32>,
    pub grade: Option<u32>,
    pub institution: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicRecord {
    #[serde(flatten)]
    pub student: StudentIdentity,
    pub areas: Vec<AreaRollup>,
    pub overall_average: f64,
    pub ranks: Ranks,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDataset {
    pub group_id: i64,
    pub period: Period,
    pub grade_level: String,
    pub weights: WeightSet,
    pub students: Vec<AcademicRecord>,
}

impl ReportDataset {
    fn empty(req: &ReportRequest) -> Self {
        Self {
            group_id: req.group_id,
            period: req.period,
            grade_level: String::new(),
            weights: WeightSet::default(),
            students: Vec::new(),
        }
    }
}

/// Averages for the grade and institution rankings.
///
/// Students of the reported group reuse their roll-up average; anyone else is
/// recomputed once from their own history with `calc::fallback_average`.
struct ComparisonAverages<'a, S: ReadStore + ?Sized> {
    store: &'a S,
    group_averages: &'a HashMap<i64, f64>,
    fallback: HashMap<i64, f64>,
}

impl<'a, S: ReadStore + ?Sized> ComparisonAverages<'a, S> {
    fn new(store: &'a S, group_averages: &'a HashMap<i64, f64>) -> Self {
        Self {
            store,
            group_averages,
            fallback: HashMap::new(),
        }
    }

    fn average(&mut self, student_id: i64) -> Result<f64, CalcError> {
        if let Some(avg) = self.group_averages.get(&student_id) {
            return Ok(*avg);
        }
        if let Some(avg) = self.fallback.get(&student_id) {
            return Ok(*avg);
        }
        let history = self.store.all_grade_records_for_student(student_id)?;
        let avg = calc::fallback_average(&history);
        debug!(student_id, avg, records = history.len(), "fallback average");
        self.fallback.insert(student_id, avg);
        Ok(avg)
    }

    fn ranks(&mut self, population: &[i64]) -> Result<HashMap<i64, u32>, CalcError> {
        let ids: BTreeSet<i64> = population.iter().copied().collect();
        let mut pairs = Vec::with_capacity(ids.len());
        for id in ids {
            pairs.push((id, self.average(id)?));
        }
        Ok(calc::dense_rank(&pairs))
    }
}

pub fn build_dataset<S: ReadStore + ?Sized>(
    store: &S,
    req: &ReportRequest,
) -> Result<ReportDataset, CalcError> {
    let requested = store.list_active_students(req.group_id, req.student_id)?;
    if requested.is_empty() {
        return Ok(ReportDataset::empty(req));
    }
    // The group ranking always covers the whole group, even for one boletín.
    let roster = if req.student_id.is_some() {
        store.list_active_students(req.group_id, None)?
    } else {
        requested.clone()
    };

    let tree = store.list_area_subject_tree(req.group_id)?;
    let subject_ids: Vec<i64> = tree
        .iter()
        .flat_map(|a| a.subjects.iter().map(|s| s.subject_id))
        .collect();
    let roster_ids: Vec<i64> = roster.iter().map(|s| s.id).collect();
    let grades = GradeTable::from_records(store.list_grade_records(&roster_ids, &subject_ids)?);

    let grade_level = store.grade_level_name_for_group(req.group_id)?;
    let rules = store.weight_rules()?;
    let weights = calc::weights_for(&grade_level, &rules);

    let mut rollups: HashMap<i64, StudentRollup> = HashMap::with_capacity(roster.len());
    let mut group_averages: HashMap<i64, f64> = HashMap::with_capacity(roster.len());
    let mut group_pairs: Vec<(i64, f64)> = Vec::with_capacity(roster.len());
    for s in &roster {
        let rollup = calc::roll_up_student(s.id, &tree, &grades, &weights);
        group_averages.insert(s.id, rollup.overall_average);
        group_pairs.push((s.id, rollup.overall_average));
        rollups.insert(s.id, rollup);
    }
    let group_ranks = calc::dense_rank(&group_pairs);

    let grade_level_id = store.grade_level_id_for_group(req.group_id)?;
    let grade_population = store.active_students_in_grade(grade_level_id)?;
    let institution_population = store.all_active_student_ids()?;

    let mut comparison = ComparisonAverages::new(store, &group_averages);
    let grade_ranks = comparison.ranks(&grade_population)?;
    let institution_ranks = comparison.ranks(&institution_population)?;
    debug!(
        group_id = req.group_id,
        roster = roster.len(),
        grade_population = grade_population.len(),
        institution_population = institution_population.len(),
        recomputed = comparison.fallback.len(),
        "ranked report populations"
    );

    let students = requested
        .into_iter()
        .filter_map(|student| {
            let rollup = rollups.remove(&student.id)?;
            let ranks = Ranks {
                group: group_ranks.get(&student.id).copied(),
                grade: grade_ranks.get(&student.id).copied(),
                institution: institution_ranks.get(&student.id).copied(),
            };
            Some(AcademicRecord {
                student,
                areas: rollup.areas,
                overall_average: rollup.overall_average,
                ranks,
            })
        })
        .collect();

    Ok(ReportDataset {
        group_id: req.group_id,
        period: req.period,
        grade_level,
        weights,
        students,
    })
}
