use crate::grading::{self, ComponentMismatch, GradeBand, GradingSystem};
use crate::table::{FieldValue, Record};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// One subject's raw inputs for a student-term, as entered on the score sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScores {
    pub subject: String,
    pub ca: Vec<f64>,
    pub exam: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentScore {
    pub subject: String,
    pub ca: Vec<f64>,
    pub exam: f64,
    pub total: f64,
    pub grade: GradeBand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResultSet {
    pub student_id: String,
    pub display_name: String,
    pub scores: Vec<AssessmentScore>,
    pub total_score: f64,
    pub average: f64,
    pub position: usize,
    pub position_label: String,
    pub class_size: usize,
}

/// Searchable/sortable columns of the class results table.
pub const RESULT_FIELDS: [&str; 6] = [
    "studentId",
    "displayName",
    "totalScore",
    "average",
    "position",
    "positionLabel",
];

impl Record for StudentResultSet {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match name {
            "studentId" => Some(FieldValue::Text(Cow::Borrowed(&self.student_id))),
            "displayName" => Some(FieldValue::Text(Cow::Borrowed(&self.display_name))),
            "totalScore" => Some(FieldValue::Number(self.total_score)),
            "average" => Some(FieldValue::Number(self.average)),
            "position" => Some(FieldValue::Number(self.position as f64)),
            "positionLabel" => Some(FieldValue::Text(Cow::Borrowed(&self.position_label))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassResults {
    pub grading_system: String,
    pub class_size: usize,
    pub class_average: f64,
    pub results: Vec<StudentResultSet>,
}

impl ClassResults {
    pub fn student(&self, student_id: &str) -> Option<&StudentResultSet> {
        self.results.iter().find(|r| r.student_id == student_id)
    }
}

#[derive(Debug, Clone)]
pub struct StudentScores {
    pub student_id: String,
    pub display_name: String,
    pub subjects: Vec<SubjectScores>,
}

pub fn assess(system: &GradingSystem, input: &SubjectScores) -> Result<AssessmentScore, ComponentMismatch> {
    let total = system.total(&input.ca, input.exam)?;
    Ok(AssessmentScore {
        subject: input.subject.clone(),
        ca: input.ca.clone(),
        exam: input.exam,
        total,
        grade: system.classify(total).clone(),
    })
}

struct Unranked {
    student_id: String,
    display_name: String,
    scores: Vec<AssessmentScore>,
    total_score: f64,
    average: f64,
}

/// The single aggregation path for a class-term. Every derived field
/// (totals, grades, averages, positions) is recomputed from raw inputs.
pub fn aggregate_class(
    system: &GradingSystem,
    students: &[StudentScores],
) -> Result<ClassResults, ComponentMismatch> {
    let mut unranked: Vec<Unranked> = Vec::with_capacity(students.len());
    for s in students {
        let scores = s
            .subjects
            .iter()
            .map(|subj| assess(system, subj))
            .collect::<Result<Vec<_>, _>>()?;
        let totals: Vec<f64> = scores.iter().map(|a| a.total).collect();
        unranked.push(Unranked {
            student_id: s.student_id.clone(),
            display_name: s.display_name.clone(),
            total_score: totals.iter().sum(),
            average: grading::compute_average(&totals),
            scores,
        });
    }

    let class_size = unranked.len();
    let averages: Vec<f64> = unranked.iter().map(|u| u.average).collect();
    let class_average = grading::compute_average(&averages);

    let results = grading::rank(unranked, |u| u.average)
        .into_iter()
        .map(|r| StudentResultSet {
            student_id: r.item.student_id,
            display_name: r.item.display_name,
            scores: r.item.scores,
            total_score: r.item.total_score,
            average: r.item.average,
            position: r.position,
            position_label: r.position_label,
            class_size,
        })
        .collect();

    Ok(ClassResults {
        grading_system: system.name().to_string(),
        class_size,
        class_average,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subj(subject: &str, ca1: f64, ca2: f64, exam: f64) -> SubjectScores {
        SubjectScores {
            subject: subject.to_string(),
            ca: vec![ca1, ca2],
            exam,
        }
    }

    fn student(id: &str, subjects: Vec<SubjectScores>) -> StudentScores {
        StudentScores {
            student_id: id.to_string(),
            display_name: format!("Student {id}"),
            subjects,
        }
    }

    #[test]
    fn result_slip_matches_waec_sample() {
        let system = GradingSystem::waec();
        let class = vec![student(
            "s1",
            vec![
                subj("Mathematics", 18.0, 17.0, 58.0),
                subj("English Language", 15.0, 16.0, 52.0),
                subj("Physics", 19.0, 18.0, 55.0),
                subj("Chemistry", 17.0, 15.0, 50.0),
                subj("Biology", 16.0, 17.0, 54.0),
                subj("Civic Education", 14.0, 15.0, 48.0),
                subj("Computer Studies", 18.0, 19.0, 57.0),
            ],
        )];
        let out = aggregate_class(&system, &class).expect("aggregate");
        let slip = &out.results[0];
        assert_eq!(slip.total_score, 608.0);
        assert_eq!(slip.average, 86.86);
        assert_eq!(slip.position, 1);
        assert_eq!(slip.position_label, "1st");
        assert_eq!(slip.class_size, 1);
        assert_eq!(slip.scores[0].total, 93.0);
        assert_eq!(slip.scores[0].grade.grade, "A1");
        assert_eq!(slip.scores[5].total, 77.0);
        assert_eq!(slip.scores[5].grade.remark, "Excellent");
    }

    #[test]
    fn over_cap_inputs_do_not_inflate_totals() {
        let system = GradingSystem::waec();
        let a = assess(&system, &subj("Mathematics", 25.0, 25.0, 80.0)).expect("assess");
        assert_eq!(a.total, 100.0);
        assert_eq!(a.ca, vec![25.0, 25.0]);
    }

    #[test]
    fn class_is_ranked_by_average_with_stable_ties() {
        let system = GradingSystem::waec();
        let class = vec![
            student("low", vec![subj("Maths", 5.0, 5.0, 20.0)]),
            student("tie-a", vec![subj("Maths", 20.0, 20.0, 50.0)]),
            student("tie-b", vec![subj("Maths", 20.0, 20.0, 50.0)]),
            student("empty", vec![]),
        ];
        let out = aggregate_class(&system, &class).expect("aggregate");
        let order: Vec<(&str, usize)> = out
            .results
            .iter()
            .map(|r| (r.student_id.as_str(), r.position))
            .collect();
        assert_eq!(
            order,
            vec![("tie-a", 1), ("tie-b", 2), ("low", 3), ("empty", 4)]
        );
        assert_eq!(out.class_size, 4);
        assert!(out.results.iter().all(|r| r.class_size == 4));
        // (90 + 90 + 30 + 0) / 4
        assert_eq!(out.class_average, 52.5);
        assert_eq!(out.student("empty").map(|r| r.average), Some(0.0));
    }

    #[test]
    fn result_sets_are_queryable_as_table_rows() {
        use crate::table::{query, SortDirection, TableQuerySpec};
        use std::num::NonZeroUsize;

        let system = GradingSystem::waec();
        let class = vec![
            student("ada", vec![subj("Maths", 10.0, 10.0, 30.0)]),
            student("bola", vec![subj("Maths", 20.0, 20.0, 55.0)]),
            student("chidi", vec![subj("Maths", 15.0, 15.0, 40.0)]),
        ];
        let out = aggregate_class(&system, &class).expect("aggregate");
        let spec = TableQuerySpec {
            search_text: "student".to_string(),
            sort_key: Some("average".to_string()),
            sort_direction: SortDirection::Asc,
            page: 1,
            page_size: NonZeroUsize::new(2).expect("non-zero"),
        };
        let page = query(&out.results, &RESULT_FIELDS, &spec);
        assert_eq!(page.total_matched, 3);
        assert_eq!(page.total_pages, 2);
        let ids: Vec<&str> = page.rows.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["ada", "chidi"]);
        assert_eq!(page.rows[0].field("unknown"), None);
    }

    #[test]
    fn wrong_component_count_is_reported() {
        let system = GradingSystem::waec();
        let bad = SubjectScores {
            subject: "Maths".to_string(),
            ca: vec![10.0],
            exam: 40.0,
        };
        let class = vec![student("s1", vec![bad])];
        let e = aggregate_class(&system, &class).expect_err("mismatch");
        assert_eq!(e.caps, 2);
        assert_eq!(e.components, 1);
    }
}
