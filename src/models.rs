use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct GradeEntry {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub weight: f64,
    pub entry_type: EntryType,
    pub kind: NodeKind,
}

// A node is either a leaf carrying an entered score or an internal node
// carrying a derived one; "has children and a meaningful own score" is
// unrepresentable.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Leaf { score: Option<f64> },
    Internal { children: Vec<Uuid>, calculated: Option<f64> },
}

impl GradeEntry {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Component,
    Final,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::Component => "component",
            EntryType::Final => "final",
        }
    }

    pub fn parse(value: &str) -> Option<EntryType> {
        match value {
            "component" => Some(EntryType::Component),
            "final" => Some(EntryType::Final),
            _ => None,
        }
    }
}

// Flat row shape read back from the grade_entries table; the forest is
// reassembled from parent_id references in position order.
#[derive(Debug, Clone)]
pub struct EntryRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub weight: f64,
    pub score: Option<f64>,
    pub calculated_score: Option<f64>,
    pub entry_type: EntryType,
}

// Boundary shape for one node of the forest, nested children included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntryDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub enrollment_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculated_score: Option<f64>,
    pub children: Vec<GradeEntryDto>,
    pub entry_type: EntryType,
}

#[derive(Debug, Clone)]
pub struct Enrollment {
    pub id: Uuid,
    pub course_code: String,
    pub course_name: String,
    pub credits: i32,
    pub status: EnrollmentStatus,
    pub final_score: Option<f64>,
    pub gpa_value: Option<f64>,
    pub letter_grade: Option<String>,
    pub completed_at: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStatus {
    InProgress,
    Completed,
    Withdrawn,
}

impl EnrollmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::InProgress => "in_progress",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(value: &str) -> Option<EnrollmentStatus> {
        match value {
            "in_progress" => Some(EnrollmentStatus::InProgress),
            "completed" => Some(EnrollmentStatus::Completed),
            "withdrawn" => Some(EnrollmentStatus::Withdrawn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeScale {
    Scale4,
    Scale10,
}
