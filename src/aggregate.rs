use uuid::Uuid;

use crate::models::{Enrollment, GradeScale, NodeKind};
use crate::tree::GradeTree;

// Pure rollup math over a tree snapshot. No I/O, no mutation.

pub fn compute_score(tree: &GradeTree, id: Uuid) -> Option<f64> {
    let node = tree.get(id)?;
    match &node.kind {
        NodeKind::Leaf { score } => *score,
        NodeKind::Internal { children, .. } => weighted_sum(tree, children),
    }
}

// Children with no score yet contribute 0 x weight, they are not excluded
// and the rest is not pro-rated. Only when every child is unscored does the
// aggregate itself stay unset.
fn weighted_sum(tree: &GradeTree, children: &[Uuid]) -> Option<f64> {
    let mut any_scored = false;
    let mut total = 0.0;
    for &child in children {
        let weight = tree.get(child).map(|node| node.weight).unwrap_or(0.0);
        if let Some(value) = compute_score(tree, child) {
            any_scored = true;
            total += value * weight;
        }
    }
    any_scored.then_some(total)
}

// Projection of the enrollment's final grade from the current forest. Never
// written back as the authoritative final score.
pub fn estimate_final_grade(tree: &GradeTree) -> f64 {
    tree.roots()
        .iter()
        .map(|&root| {
            let weight = tree.get(root).map(|node| node.weight).unwrap_or(0.0);
            compute_score(tree, root).unwrap_or(0.0) * weight
        })
        .sum()
}

// Fixed conversion table from the 10-point scale, lower bound inclusive.
// Scores past 10 (possible when sibling weights sum above 1) land in the top
// band.
const GRADE_BANDS: [(f64, &str, f64); 8] = [
    (8.5, "A", 4.0),
    (8.0, "B+", 3.5),
    (7.0, "B", 3.0),
    (6.5, "C+", 2.5),
    (5.5, "C", 2.0),
    (5.0, "D+", 1.5),
    (4.0, "D", 1.0),
    (0.0, "F", 0.0),
];

fn band(score10: f64) -> (&'static str, f64) {
    for (floor, letter, value) in GRADE_BANDS {
        if score10 >= floor {
            return (letter, value);
        }
    }
    ("F", 0.0)
}

pub fn to_scale4(score10: f64) -> f64 {
    band(score10).1
}

pub fn letter_grade(score10: f64) -> &'static str {
    band(score10).0
}

// Credit-weighted average over enrollments that carry a final value on the
// requested scale. No finals, or zero total credits, yields 0 rather than NaN.
pub fn cumulative_gpa(enrollments: &[Enrollment], scale: GradeScale) -> f64 {
    let mut total = 0.0;
    let mut credits = 0.0;
    for enrollment in enrollments {
        let value = match scale {
            GradeScale::Scale10 => enrollment.final_score,
            GradeScale::Scale4 => enrollment.gpa_value,
        };
        if let Some(value) = value {
            total += value * enrollment.credits as f64;
            credits += enrollment.credits as f64;
        }
    }
    if credits == 0.0 {
        0.0
    } else {
        total / credits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrollmentStatus;

    fn tree() -> GradeTree {
        GradeTree::new(Uuid::new_v4())
    }

    fn enrollment(credits: i32, final_score: Option<f64>) -> Enrollment {
        Enrollment {
            id: Uuid::new_v4(),
            course_code: "CS101".to_string(),
            course_name: "Intro to Computing".to_string(),
            credits,
            status: if final_score.is_some() {
                EnrollmentStatus::Completed
            } else {
                EnrollmentStatus::InProgress
            },
            final_score,
            gpa_value: final_score.map(to_scale4),
            letter_grade: final_score.map(|s| letter_grade(s).to_string()),
            completed_at: None,
        }
    }

    #[test]
    fn leaf_score_passes_through_unchanged() {
        let mut t = tree();
        let id = t.add_root("Final", 1.0).unwrap();
        assert_eq!(compute_score(&t, id), None);
        t.set_leaf_score(id, 7.25).unwrap();
        assert_eq!(compute_score(&t, id), Some(7.25));
    }

    #[test]
    fn two_weighted_leaves_roll_up() {
        let mut t = tree();
        let midterm = t.add_root("Midterm", 0.3).unwrap();
        let final_exam = t.add_root("Final", 0.7).unwrap();
        t.set_leaf_score(midterm, 8.0).unwrap();
        t.set_leaf_score(final_exam, 7.0).unwrap();
        assert!((estimate_final_grade(&t) - 7.3).abs() < 1e-9);
    }

    #[test]
    fn nested_components_average_then_roll_up() {
        let mut t = tree();
        let process = t.add_root("Process", 0.4).unwrap();
        let (quiz1, _) = t.add_child(process, "Quiz 1", 0.5).unwrap();
        let (quiz2, _) = t.add_child(process, "Quiz 2", 0.5).unwrap();
        let final_exam = t.add_root("Final", 0.6).unwrap();
        t.set_leaf_score(quiz1, 9.0).unwrap();
        t.set_leaf_score(quiz2, 7.0).unwrap();
        t.set_leaf_score(final_exam, 6.0).unwrap();

        assert_eq!(compute_score(&t, process), Some(8.0));
        assert!((estimate_final_grade(&t) - 6.8).abs() < 1e-9);
    }

    #[test]
    fn unscored_siblings_count_as_zero() {
        let mut t = tree();
        t.add_root("Project", 0.5).unwrap();
        let exam = t.add_root("Exam", 0.5).unwrap();
        t.set_leaf_score(exam, 9.0).unwrap();
        assert!((estimate_final_grade(&t) - 4.5).abs() < 1e-9);
    }

    #[test]
    fn fully_unscored_node_stays_unset() {
        let mut t = tree();
        let process = t.add_root("Process", 1.0).unwrap();
        t.add_child(process, "Quiz 1", 0.5).unwrap();
        t.add_child(process, "Quiz 2", 0.5).unwrap();
        assert_eq!(compute_score(&t, process), None);
        assert_eq!(estimate_final_grade(&t), 0.0);
    }

    #[test]
    fn partially_scored_node_is_scaled_not_prorated() {
        let mut t = tree();
        let process = t.add_root("Process", 1.0).unwrap();
        let (quiz1, _) = t.add_child(process, "Quiz 1", 0.5).unwrap();
        t.add_child(process, "Quiz 2", 0.5).unwrap();
        t.set_leaf_score(quiz1, 8.0).unwrap();
        assert_eq!(compute_score(&t, process), Some(4.0));
    }

    #[test]
    fn weights_are_not_normalized() {
        // undersubscribed roots scale the estimate down
        let mut t = tree();
        let only = t.add_root("Exam", 0.5).unwrap();
        t.set_leaf_score(only, 10.0).unwrap();
        assert!((estimate_final_grade(&t) - 5.0).abs() < 1e-9);

        // oversubscribed roots can push it past the nominal scale
        let mut t = tree();
        let a = t.add_root("Exam A", 0.8).unwrap();
        let b = t.add_root("Exam B", 0.8).unwrap();
        t.set_leaf_score(a, 10.0).unwrap();
        t.set_leaf_score(b, 10.0).unwrap();
        assert!((estimate_final_grade(&t) - 16.0).abs() < 1e-9);
    }

    #[test]
    fn conversion_table_boundaries() {
        assert_eq!(letter_grade(9.2), "A");
        assert_eq!(to_scale4(9.2), 4.0);
        assert_eq!(letter_grade(8.5), "A");
        assert_eq!(letter_grade(8.49), "B+");
        assert_eq!(to_scale4(8.49), 3.5);
        assert_eq!(letter_grade(7.0), "B");
        assert_eq!(letter_grade(6.5), "C+");
        assert_eq!(letter_grade(5.5), "C");
        assert_eq!(letter_grade(5.0), "D+");
        assert_eq!(letter_grade(4.0), "D");
        assert_eq!(letter_grade(3.99), "F");
        assert_eq!(to_scale4(3.99), 0.0);
        // past-scale scores clamp into the top band
        assert_eq!(letter_grade(11.3), "A");
    }

    #[test]
    fn cumulative_gpa_of_nothing_is_zero() {
        assert_eq!(cumulative_gpa(&[], GradeScale::Scale10), 0.0);
        assert_eq!(cumulative_gpa(&[], GradeScale::Scale4), 0.0);

        let unfinished = vec![enrollment(3, None)];
        assert_eq!(cumulative_gpa(&unfinished, GradeScale::Scale10), 0.0);
    }

    #[test]
    fn cumulative_gpa_is_credit_weighted() {
        let enrollments = vec![enrollment(3, Some(8.0)), enrollment(4, Some(6.0))];
        let gpa10 = cumulative_gpa(&enrollments, GradeScale::Scale10);
        assert!((gpa10 - (8.0 * 3.0 + 6.0 * 4.0) / 7.0).abs() < 1e-9);

        // 8.0 -> 3.5, 6.0 -> 2.0 on the 4.0 scale
        let gpa4 = cumulative_gpa(&enrollments, GradeScale::Scale4);
        assert!((gpa4 - (3.5 * 3.0 + 2.0 * 4.0) / 7.0).abs() < 1e-9);
    }

    #[test]
    fn cumulative_gpa_skips_enrollments_without_finals() {
        let enrollments = vec![enrollment(3, Some(9.0)), enrollment(5, None)];
        assert!((cumulative_gpa(&enrollments, GradeScale::Scale10) - 9.0).abs() < 1e-9);
    }
}
