use crate::calc::{CalcError, Period, PeriodScores};
use crate::dataset::{self, Ranks, ReportDataset, ReportRequest};
use crate::grading::{self, PerformanceTier};
use crate::setup::BoletinHeader;
use crate::store::{GroupMeta, ReadStore};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Area,
    Subject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailingFlags {
    pub p1: bool,
    pub p2: bool,
    pub p3: bool,
    #[serde(rename = "final")]
    pub final_score: bool,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoletinRow {
    pub kind: RowKind,
    pub name: String,
    pub p1: Option<f64>,
    pub p2: Option<f64>,
    pub p3: Option<f64>,
    #[serde(rename = "final")]
    pub final_score: Option<f64>,
    pub absences: Option<i64>,
    pub tier: PerformanceTier,
    pub failing: FailingFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoletinMeta {
    pub school_name: String,
    pub subtitle: String,
    pub shift: String,
    pub site: String,
    pub grade_level: String,
    pub group: String,
    pub period: i64,
    pub period_label: String,
    pub year: i32,
    pub emission_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Boletin {
    pub student_id: i64,
    pub surname: String,
    pub given_name: String,
    pub document_id: String,
    pub meta: BoletinMeta,
    pub overall_average: f64,
    pub ranks: Ranks,
    pub rows: Vec<BoletinRow>,
}

/// Value shown for the period being printed: the period's own score for
/// periods 1 and 2, the weighted final once period 3 is printed.
pub fn selected_value(period: Period, scores: &PeriodScores, final_score: Option<f64>) -> Option<f64> {
    match period {
        Period::P1 => scores.p1,
        Period::P2 => scores.p2,
        Period::P3 => final_score,
    }
}

fn build_row(
    kind: RowKind,
    name: &str,
    scores: &PeriodScores,
    final_score: Option<f64>,
    absences: Option<i64>,
    period: Period,
) -> BoletinRow {
    let selected = selected_value(period, scores, final_score);
    BoletinRow {
        kind,
        name: name.to_string(),
        p1: scores.p1,
        p2: scores.p2,
        p3: scores.p3,
        final_score,
        absences,
        tier: grading::tier(selected),
        failing: FailingFlags {
            p1: grading::is_failing(name, scores.p1),
            p2: grading::is_failing(name, scores.p2),
            p3: grading::is_failing(name, scores.p3),
            final_score: grading::is_failing(name, final_score),
            selected: grading::is_failing(name, selected),
        },
    }
}

pub fn assemble_boletines(
    dataset: &ReportDataset,
    group: &GroupMeta,
    header: &BoletinHeader,
    period_label: &str,
    issued_on: NaiveDate,
) -> Vec<Boletin> {
    let period = dataset.period;
    let meta = BoletinMeta {
        school_name: header.school_name.clone(),
        subtitle: header.subtitle.clone(),
        shift: header.shift.clone(),
        site: group.site.clone(),
        grade_level: group.grade_level.clone(),
        group: group.group.clone(),
        period: period.number(),
        period_label: period_label.to_string(),
        year: issued_on.year(),
        emission_date: issued_on.format("%Y-%m-%d").to_string(),
    };

    dataset
        .students
        .iter()
        .map(|record| {
            let mut rows = Vec::new();
            for area in &record.areas {
                // Area rows never carry absences.
                rows.push(build_row(
                    RowKind::Area,
                    &area.name,
                    &area.scores,
                    area.final_score,
                    None,
                    period,
                ));
                for subject in &area.subjects {
                    let absences = Some(subject.absences_in(period)).filter(|n| *n > 0);
                    rows.push(build_row(
                        RowKind::Subject,
                        &subject.name,
                        &subject.scores,
                        subject.final_score,
                        absences,
                        period,
                    ));
                }
            }
            Boletin {
                student_id: record.student.id,
                surname: record.student.surname.clone(),
                given_name: record.student.given_name.clone(),
                document_id: record.student.document_id.clone(),
                meta: meta.clone(),
                overall_average: record.overall_average,
                ranks: record.ranks,
                rows,
            }
        })
        .collect()
}

/// Builds the dataset for a request and reshapes it for the renderer.
pub fn build_boletines<S: ReadStore + ?Sized>(
    store: &S,
    req: &ReportRequest,
    issued_on: NaiveDate,
) -> Result<Vec<Boletin>, CalcError> {
    let dataset = dataset::build_dataset(store, req)?;
    if dataset.students.is_empty() {
        return Ok(Vec::new());
    }
    let Some(group) = store.group_meta(req.group_id)? else {
        return Err(CalcError::new("not_found", "group not found"));
    };
    let header = store.boletin_header()?;
    let period_label = store
        .period_name(req.period)?
        .unwrap_or_else(|| format!("Periodo {}", req.period.number()));
    Ok(assemble_boletines(
        &dataset,
        &group,
        &header,
        &period_label,
        issued_on,
    ))
}
