use std::fmt::Write;

use uuid::Uuid;

use crate::aggregate;
use crate::models::{Enrollment, EnrollmentStatus, GradeScale, NodeKind};
use crate::tree::GradeTree;

pub fn build_gradebook(enrollment: &Enrollment, tree: &GradeTree) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "# Gradebook: {} ({})",
        enrollment.course_name, enrollment.course_code
    );
    let standing = match (enrollment.status, enrollment.completed_at) {
        (EnrollmentStatus::Withdrawn, _) => "withdrawn".to_string(),
        (EnrollmentStatus::Completed, Some(date)) => format!("completed on {date}"),
        (EnrollmentStatus::Completed, None) => "completed".to_string(),
        (EnrollmentStatus::InProgress, _) => "in progress".to_string(),
    };
    let _ = writeln!(output, "{} credits, {}", enrollment.credits, standing);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Components");

    if tree.roots().is_empty() {
        let _ = writeln!(output, "No grade components recorded yet.");
    } else {
        render_components(&mut output, tree, tree.roots(), 0);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Standing");

    let estimate = aggregate::estimate_final_grade(tree);
    let _ = writeln!(
        output,
        "Estimated grade: {:.2} ({}, {:.1} on the 4.0 scale)",
        estimate,
        aggregate::letter_grade(estimate),
        aggregate::to_scale4(estimate)
    );
    if let Ok(remaining) = tree.remaining_weight(None) {
        if remaining > 0.0 {
            let _ = writeln!(output, "Unassigned root weight: {remaining:.2}");
        }
    }
    if let (Some(final_score), Some(letter)) =
        (enrollment.final_score, enrollment.letter_grade.as_deref())
    {
        let _ = writeln!(output, "Final grade: {final_score:.2} ({letter})");
    }

    output
}

fn render_components(output: &mut String, tree: &GradeTree, ids: &[Uuid], depth: usize) {
    for &id in ids {
        let Some(node) = tree.get(id) else { continue };
        let indent = "  ".repeat(depth);
        let value = match &node.kind {
            NodeKind::Leaf { score: Some(score) } => format!("score {score:.2}"),
            NodeKind::Leaf { score: None } => "no score yet".to_string(),
            NodeKind::Internal {
                calculated: Some(calculated),
                ..
            } => format!("calculated {calculated:.2}"),
            NodeKind::Internal {
                calculated: None, ..
            } => "nothing entered yet".to_string(),
        };
        let _ = writeln!(
            output,
            "{indent}- {} (weight {:.2}): {value}",
            node.name, node.weight
        );
        if let NodeKind::Internal { children, .. } = &node.kind {
            render_components(output, tree, children, depth + 1);
        }
    }
}

pub fn build_transcript(enrollments: &[Enrollment]) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Transcript");
    let _ = writeln!(output);

    if enrollments.is_empty() {
        let _ = writeln!(output, "No enrollments recorded.");
        return output;
    }

    for enrollment in enrollments {
        let standing = match (
            enrollment.status,
            enrollment.final_score,
            enrollment.letter_grade.as_deref(),
        ) {
            (EnrollmentStatus::Withdrawn, _, _) => "withdrawn".to_string(),
            (_, Some(score), Some(letter)) => format!("final {score:.2} ({letter})"),
            (_, Some(score), None) => format!("final {score:.2}"),
            _ => "in progress".to_string(),
        };
        let _ = writeln!(
            output,
            "- {} {} ({} credits): {}",
            enrollment.course_code, enrollment.course_name, enrollment.credits, standing
        );
    }

    let completed_credits: i32 = enrollments
        .iter()
        .filter(|enrollment| enrollment.final_score.is_some())
        .map(|enrollment| enrollment.credits)
        .sum();
    let gpa10 = aggregate::cumulative_gpa(enrollments, GradeScale::Scale10);
    let gpa4 = aggregate::cumulative_gpa(enrollments, GradeScale::Scale4);

    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Cumulative GPA: {gpa10:.2} (10-point) / {gpa4:.2} (4.0) across {completed_credits} completed credits"
    );

    output
}
