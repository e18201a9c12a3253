use crate::calc::{
    AreaNode, CalcError, GradeRecord, HistoricalGrade, Period, SubjectRef, WeightRules,
};
use crate::grading;
use crate::setup::{self, BoletinHeader};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIdentity {
    pub id: i64,
    pub surname: String,
    pub given_name: String,
    pub document_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMeta {
    pub site: String,
    pub grade_level: String,
    pub group: String,
}

/// Everything the report engine reads. Implementations never write.
pub trait ReadStore {
    /// Students with an open membership in the group, by surname then given name.
    fn list_active_students(
        &self,
        group_id: i64,
        student_id: Option<i64>,
    ) -> Result<Vec<StudentIdentity>, CalcError>;

    /// Areas by name, each with the group's subjects in that area by name.
    fn list_area_subject_tree(&self, group_id: i64) -> Result<Vec<AreaNode>, CalcError>;

    fn list_grade_records(
        &self,
        student_ids: &[i64],
        subject_ids: &[i64],
    ) -> Result<Vec<GradeRecord>, CalcError>;

    /// Empty when the group has no grade level on record.
    fn grade_level_name_for_group(&self, group_id: i64) -> Result<String, CalcError>;

    fn grade_level_id_for_group(&self, group_id: i64) -> Result<i64, CalcError>;

    fn active_students_in_grade(&self, grade_level_id: i64) -> Result<Vec<i64>, CalcError>;

    fn all_active_student_ids(&self) -> Result<Vec<i64>, CalcError>;

    fn all_grade_records_for_student(
        &self,
        student_id: i64,
    ) -> Result<Vec<HistoricalGrade>, CalcError>;

    fn group_meta(&self, group_id: i64) -> Result<Option<GroupMeta>, CalcError>;

    fn period_name(&self, period: Period) -> Result<Option<String>, CalcError>;

    fn latest_open_period(&self) -> Result<Option<Period>, CalcError>;

    fn weight_rules(&self) -> Result<WeightRules, CalcError>;

    fn boletin_header(&self) -> Result<BoletinHeader, CalcError>;
}

/// Roster order: surname, then given name, ignoring case and accents so
/// "Ávila" sorts with the A's.
pub fn roster_sort_key(surname: &str, given_name: &str, id: i64) -> (String, String, i64) {
    (grading::fold_name(surname), grading::fold_name(given_name), id)
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query_ids(&self, sql: &str, params: Vec<Value>) -> Result<Vec<i64>, CalcError> {
        let mut stmt = self.conn.prepare(sql).map_err(CalcError::db)?;
        stmt.query_map(params_from_iter(params), |r| r.get::<_, i64>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::db)
    }
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

impl ReadStore for SqliteStore<'_> {
    fn list_active_students(
        &self,
        group_id: i64,
        student_id: Option<i64>,
    ) -> Result<Vec<StudentIdentity>, CalcError> {
        let mut sql = String::from(
            "SELECT s.id, s.surname, s.given_name, s.document_id
             FROM student_groups sg
             JOIN students s ON s.id = sg.student_id
             WHERE sg.group_id = ? AND sg.end_date IS NULL",
        );
        let mut bind_values: Vec<Value> = vec![Value::Integer(group_id)];
        if let Some(id) = student_id {
            sql.push_str(" AND s.id = ?");
            bind_values.push(Value::Integer(id));
        }

        let mut stmt = self.conn.prepare(&sql).map_err(CalcError::db)?;
        let mut students = stmt
            .query_map(params_from_iter(bind_values), |r| {
                Ok(StudentIdentity {
                    id: r.get(0)?,
                    surname: r.get(1)?,
                    given_name: r.get(2)?,
                    document_id: r.get(3)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::db)?;
        students.sort_by_cached_key(|s| roster_sort_key(&s.surname, &s.given_name, s.id));
        Ok(students)
    }

    fn list_area_subject_tree(&self, group_id: i64) -> Result<Vec<AreaNode>, CalcError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT a.id, a.name, sub.id, sub.name
                 FROM group_subjects gs
                 JOIN subjects sub ON sub.id = gs.subject_id
                 JOIN areas a ON a.id = sub.area_id
                 WHERE gs.group_id = ?
                 ORDER BY a.name, a.id, sub.name, sub.id",
            )
            .map_err(CalcError::db)?;
        let rows = stmt
            .query_map([group_id], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::db)?;

        let mut tree: Vec<AreaNode> = Vec::new();
        for (area_id, area_name, subject_id, subject_name) in rows {
            let subject = SubjectRef {
                subject_id,
                subject_name,
            };
            match tree.last_mut() {
                Some(last) if last.area_id == area_id => last.subjects.push(subject),
                _ => tree.push(AreaNode {
                    area_id,
                    area_name,
                    subjects: vec![subject],
                }),
            }
        }
        Ok(tree)
    }

    fn list_grade_records(
        &self,
        student_ids: &[i64],
        subject_ids: &[i64],
    ) -> Result<Vec<GradeRecord>, CalcError> {
        if student_ids.is_empty() || subject_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT student_id, subject_id, period_id, score, absences
             FROM grade_records
             WHERE student_id IN ({}) AND subject_id IN ({})",
            placeholders(student_ids.len()),
            placeholders(subject_ids.len())
        );
        let mut bind_values: Vec<Value> =
            Vec::with_capacity(student_ids.len() + subject_ids.len());
        for id in student_ids {
            bind_values.push(Value::Integer(*id));
        }
        for id in subject_ids {
            bind_values.push(Value::Integer(*id));
        }

        let mut stmt = self.conn.prepare(&sql).map_err(CalcError::db)?;
        let rows = stmt
            .query_map(params_from_iter(bind_values), |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, Option<f64>>(3)?,
                    r.get::<_, Option<i64>>(4)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::db)?;

        Ok(rows
            .into_iter()
            .filter_map(|(student_id, subject_id, period_id, score, absences)| {
                Some(GradeRecord {
                    student_id,
                    subject_id,
                    period: Period::from_i64(period_id)?,
                    score,
                    absences: absences.unwrap_or(0),
                })
            })
            .collect())
    }

    fn grade_level_name_for_group(&self, group_id: i64) -> Result<String, CalcError> {
        let name: Option<String> = self
            .conn
            .query_row(
                "SELECT gl.name
                 FROM groups g
                 JOIN grade_levels gl ON gl.id = g.grade_level_id
                 WHERE g.id = ?",
                [group_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(CalcError::db)?;
        Ok(name.unwrap_or_default())
    }

    fn grade_level_id_for_group(&self, group_id: i64) -> Result<i64, CalcError> {
        self.conn
            .query_row(
                "SELECT grade_level_id FROM groups WHERE id = ?",
                [group_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(CalcError::db)?
            .ok_or_else(|| CalcError::new("not_found", "group not found"))
    }

    fn active_students_in_grade(&self, grade_level_id: i64) -> Result<Vec<i64>, CalcError> {
        self.query_ids(
            "SELECT DISTINCT sg.student_id
             FROM student_groups sg
             JOIN groups g ON g.id = sg.group_id
             WHERE sg.end_date IS NULL AND g.grade_level_id = ?
             ORDER BY sg.student_id",
            vec![Value::Integer(grade_level_id)],
        )
    }

    fn all_active_student_ids(&self) -> Result<Vec<i64>, CalcError> {
        self.query_ids(
            "SELECT DISTINCT student_id
             FROM student_groups
             WHERE end_date IS NULL
             ORDER BY student_id",
            Vec::new(),
        )
    }

    fn all_grade_records_for_student(
        &self,
        student_id: i64,
    ) -> Result<Vec<HistoricalGrade>, CalcError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT gr.subject_id, sub.area_id, gr.period_id, gr.score
                 FROM grade_records gr
                 JOIN subjects sub ON sub.id = gr.subject_id
                 WHERE gr.student_id = ?",
            )
            .map_err(CalcError::db)?;
        let rows = stmt
            .query_map([student_id], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, Option<f64>>(3)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::db)?;
        Ok(rows
            .into_iter()
            .filter_map(|(subject_id, area_id, period_id, score)| {
                Some(HistoricalGrade {
                    subject_id,
                    area_id,
                    period: Period::from_i64(period_id)?,
                    score,
                })
            })
            .collect())
    }

    fn group_meta(&self, group_id: i64) -> Result<Option<GroupMeta>, CalcError> {
        self.conn
            .query_row(
                "SELECT s.name, gl.name, g.name
                 FROM groups g
                 JOIN sites s ON s.id = g.site_id
                 JOIN grade_levels gl ON gl.id = g.grade_level_id
                 WHERE g.id = ?",
                [group_id],
                |r| {
                    Ok(GroupMeta {
                        site: r.get(0)?,
                        grade_level: r.get(1)?,
                        group: r.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(CalcError::db)
    }

    fn period_name(&self, period: Period) -> Result<Option<String>, CalcError> {
        self.conn
            .query_row(
                "SELECT name FROM periods WHERE id = ?",
                [period.number()],
                |r| r.get(0),
            )
            .optional()
            .map_err(CalcError::db)
    }

    fn latest_open_period(&self) -> Result<Option<Period>, CalcError> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM periods WHERE is_open <> 0 ORDER BY id DESC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()
            .map_err(CalcError::db)?;
        Ok(id.and_then(Period::from_i64))
    }

    fn weight_rules(&self) -> Result<WeightRules, CalcError> {
        setup::load_weight_rules(self.conn).map_err(CalcError::db)
    }

    fn boletin_header(&self) -> Result<BoletinHeader, CalcError> {
        setup::load_boletin_header(self.conn).map_err(CalcError::db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        conn.execute_batch(
            "INSERT INTO sites(id, name) VALUES (1, 'Principal');
             INSERT INTO grade_levels(id, name) VALUES (6, 'Sexto');
             INSERT INTO groups(id, site_id, grade_level_id, name) VALUES (61, 1, 6, '6-1');
             INSERT INTO groups(id, site_id, grade_level_id, name) VALUES (62, 1, 6, '6-2');
             INSERT INTO students(id, given_name, surname, document_id) VALUES
                (1, 'Ana', 'Zapata', 'D1'),
                (2, 'Luis', 'Arango', 'D2'),
                (3, 'Eva', 'Arango', 'D3'),
                (4, 'Juan', 'Mejía', 'D4');
             INSERT INTO student_groups(student_id, group_id, start_date, end_date) VALUES
                (1, 61, '2026-01-20', NULL),
                (2, 61, '2026-01-20', NULL),
                (3, 61, '2026-01-20', '2026-03-01'),
                (3, 62, '2026-03-02', NULL),
                (4, 62, '2026-01-20', NULL);
             INSERT INTO areas(id, name) VALUES (1, 'Matemáticas'), (2, 'Ciencias Naturales');
             INSERT INTO subjects(id, area_id, name) VALUES
                (10, 1, 'Geometría'), (11, 1, 'Aritmética'), (20, 2, 'Biología');
             INSERT INTO group_subjects(group_id, subject_id) VALUES (61, 10), (61, 11), (61, 20);
             INSERT INTO grade_records(student_id, subject_id, period_id, score, absences) VALUES
                (1, 10, 1, 4.2, 1),
                (1, 11, 2, NULL, 0),
                (3, 20, 1, 3.0, 0);",
        )
        .expect("seed");
        conn
    }

    #[test]
    fn active_students_are_sorted_and_filtered() {
        let conn = seeded();
        let store = SqliteStore::new(&conn);
        let all = store.list_active_students(61, None).expect("list");
        let ids: Vec<i64> = all.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 1]);

        let one = store.list_active_students(61, Some(1)).expect("list one");
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].document_id, "D1");

        let departed = store.list_active_students(61, Some(3)).expect("list departed");
        assert!(departed.is_empty());
    }

    #[test]
    fn roster_order_ignores_accents_and_case() {
        let conn = seeded();
        conn.execute_batch(
            "INSERT INTO students(id, given_name, surname, document_id) VALUES
                (5, 'Íngrid', 'Ávila', 'D5'),
                (6, 'Pablo', 'ñáñez', 'D6');
             INSERT INTO student_groups(student_id, group_id, start_date, end_date) VALUES
                (5, 61, '2026-01-20', NULL),
                (6, 61, '2026-01-20', NULL);",
        )
        .expect("seed accented names");
        let store = SqliteStore::new(&conn);
        let ids: Vec<i64> = store
            .list_active_students(61, None)
            .expect("list")
            .iter()
            .map(|s| s.id)
            .collect();
        // Arango, Ávila, ñáñez, Zapata
        assert_eq!(ids, vec![2, 5, 6, 1]);
    }

    #[test]
    fn area_tree_groups_subjects_by_area_name() {
        let conn = seeded();
        let store = SqliteStore::new(&conn);
        let tree = store.list_area_subject_tree(61).expect("tree");
        let names: Vec<&str> = tree.iter().map(|a| a.area_name.as_str()).collect();
        assert_eq!(names, vec!["Ciencias Naturales", "Matemáticas"]);
        let math: Vec<&str> = tree[1]
            .subjects
            .iter()
            .map(|s| s.subject_name.as_str())
            .collect();
        assert_eq!(math, vec!["Aritmética", "Geometría"]);
        assert!(store.list_area_subject_tree(62).expect("empty tree").is_empty());
    }

    #[test]
    fn grade_records_keep_null_scores() {
        let conn = seeded();
        let store = SqliteStore::new(&conn);
        let rows = store
            .list_grade_records(&[1, 2], &[10, 11, 20])
            .expect("records");
        assert_eq!(rows.len(), 2);
        let null_row = rows.iter().find(|r| r.subject_id == 11).expect("null row");
        assert_eq!(null_row.score, None);
        assert_eq!(null_row.period, Period::P2);
        assert!(store.list_grade_records(&[], &[10]).expect("empty").is_empty());
    }

    #[test]
    fn comparison_populations() {
        let conn = seeded();
        let store = SqliteStore::new(&conn);
        assert_eq!(store.grade_level_id_for_group(61).expect("grade id"), 6);
        assert_eq!(store.grade_level_name_for_group(61).expect("grade name"), "Sexto");
        assert_eq!(store.grade_level_name_for_group(999).expect("missing"), "");
        assert_eq!(
            store.grade_level_id_for_group(999).expect_err("missing").code,
            "not_found"
        );
        assert_eq!(store.active_students_in_grade(6).expect("grade"), vec![1, 2, 3, 4]);
        assert_eq!(store.all_active_student_ids().expect("all"), vec![1, 2, 3, 4]);
    }

    #[test]
    fn history_spans_every_subject() {
        let conn = seeded();
        let store = SqliteStore::new(&conn);
        let history = store.all_grade_records_for_student(3).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].area_id, 2);
        assert_eq!(history[0].score, Some(3.0));
    }

    #[test]
    fn periods_and_meta() {
        let conn = seeded();
        let store = SqliteStore::new(&conn);
        assert_eq!(store.latest_open_period().expect("open"), None);
        conn.execute("UPDATE periods SET is_open = 1 WHERE id IN (1, 2)", [])
            .expect("open periods");
        assert_eq!(store.latest_open_period().expect("open"), Some(Period::P2));
        assert_eq!(
            store.period_name(Period::P3).expect("name").as_deref(),
            Some("Periodo 3")
        );
        let meta = store.group_meta(62).expect("meta").expect("present");
        assert_eq!(meta.group, "6-2");
        assert_eq!(meta.site, "Principal");
        assert!(store.group_meta(999).expect("meta").is_none());
    }
}
