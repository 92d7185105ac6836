use std::collections::HashMap;

use uuid::Uuid;

use crate::aggregate;
use crate::error::GradeError;
use crate::models::{EntryRow, EntryType, GradeEntry, GradeEntryDto, NodeKind};

// In-memory forest for one enrollment: an arena of nodes keyed by id, with
// roots and children kept as ordered id lists. Every mutation validates its
// input first, then recomputes the calculated score of each affected ancestor
// before returning, so the tree is never observable in a stale state.
#[derive(Debug, Clone)]
pub struct GradeTree {
    enrollment_id: Uuid,
    nodes: HashMap<Uuid, GradeEntry>,
    roots: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct RemovedSubtree {
    pub ids: Vec<Uuid>,
    // Set when the removal emptied the parent's child list and it became a
    // leaf again. Its previous entered score is not restored.
    pub reverted_parent: Option<Uuid>,
    pub dirty: Vec<Uuid>,
}

impl GradeTree {
    pub fn new(enrollment_id: Uuid) -> Self {
        GradeTree {
            enrollment_id,
            nodes: HashMap::new(),
            roots: Vec::new(),
        }
    }

    // Rows must arrive in position order; sibling order falls out of it.
    pub fn from_rows(enrollment_id: Uuid, rows: Vec<EntryRow>) -> Self {
        let mut child_map: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let mut roots = Vec::new();

        for row in &rows {
            match row.parent_id {
                Some(parent_id) => child_map.entry(parent_id).or_default().push(row.id),
                None => roots.push(row.id),
            }
        }

        let mut nodes = HashMap::new();
        for row in rows {
            let kind = match child_map.remove(&row.id) {
                Some(children) => NodeKind::Internal {
                    children,
                    calculated: row.calculated_score,
                },
                None => NodeKind::Leaf { score: row.score },
            };
            nodes.insert(
                row.id,
                GradeEntry {
                    id: row.id,
                    enrollment_id,
                    parent_id: row.parent_id,
                    name: row.name,
                    weight: row.weight,
                    entry_type: row.entry_type,
                    kind,
                },
            );
        }

        GradeTree {
            enrollment_id,
            nodes,
            roots,
        }
    }

    pub fn roots(&self) -> &[Uuid] {
        &self.roots
    }

    pub fn get(&self, id: Uuid) -> Option<&GradeEntry> {
        self.nodes.get(&id)
    }

    pub fn add_root(&mut self, name: &str, weight: f64) -> Result<Uuid, GradeError> {
        let name = validate_name(name)?;
        validate_weight(weight)?;

        let id = Uuid::new_v4();
        self.nodes.insert(
            id,
            GradeEntry {
                id,
                enrollment_id: self.enrollment_id,
                parent_id: None,
                name,
                weight,
                entry_type: EntryType::Component,
                kind: NodeKind::Leaf { score: None },
            },
        );
        self.roots.push(id);
        Ok(id)
    }

    pub fn add_child(
        &mut self,
        parent_id: Uuid,
        name: &str,
        weight: f64,
    ) -> Result<(Uuid, Vec<Uuid>), GradeError> {
        let name = validate_name(name)?;
        validate_weight(weight)?;

        let id = Uuid::new_v4();
        let parent = self.nodes.get_mut(&parent_id).ok_or(GradeError::NotFound {
            kind: "grade entry",
            id: parent_id,
        })?;
        match &mut parent.kind {
            // First child turns the leaf internal; any score it carried is
            // discarded, not folded into the new child.
            kind @ NodeKind::Leaf { .. } => {
                *kind = NodeKind::Internal {
                    children: vec![id],
                    calculated: None,
                }
            }
            NodeKind::Internal { children, .. } => children.push(id),
        }

        self.nodes.insert(
            id,
            GradeEntry {
                id,
                enrollment_id: self.enrollment_id,
                parent_id: Some(parent_id),
                name,
                weight,
                entry_type: EntryType::Component,
                kind: NodeKind::Leaf { score: None },
            },
        );

        let dirty = self.recompute_from(Some(parent_id));
        Ok((id, dirty))
    }

    pub fn set_leaf_score(&mut self, id: Uuid, value: f64) -> Result<Vec<Uuid>, GradeError> {
        validate_score(value)?;

        let node = self.nodes.get_mut(&id).ok_or(GradeError::NotFound {
            kind: "grade entry",
            id,
        })?;
        if !node.is_leaf() {
            return Err(GradeError::InvalidOperation(format!(
                "grade entry {id} has child components; scores are entered on leaves"
            )));
        }
        let parent_id = node.parent_id;
        if let NodeKind::Leaf { score } = &mut node.kind {
            *score = Some(value);
        }

        Ok(self.recompute_from(parent_id))
    }

    pub fn remove_subtree(&mut self, id: Uuid) -> Result<RemovedSubtree, GradeError> {
        let parent_id = self
            .nodes
            .get(&id)
            .ok_or(GradeError::NotFound {
                kind: "grade entry",
                id,
            })?
            .parent_id;

        let mut ids = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                if let NodeKind::Internal { children, .. } = &node.kind {
                    stack.extend(children.iter().copied());
                }
            }
            ids.push(current);
        }
        for removed in &ids {
            self.nodes.remove(removed);
        }

        let mut reverted_parent = None;
        let mut recompute_start = parent_id;
        match parent_id {
            None => self.roots.retain(|&root| root != id),
            Some(pid) => {
                if let Some(parent) = self.nodes.get_mut(&pid) {
                    let now_childless = match &mut parent.kind {
                        NodeKind::Internal { children, .. } => {
                            children.retain(|&child| child != id);
                            children.is_empty()
                        }
                        NodeKind::Leaf { .. } => false,
                    };
                    if now_childless {
                        parent.kind = NodeKind::Leaf { score: None };
                        reverted_parent = Some(pid);
                        recompute_start = parent.parent_id;
                    }
                }
            }
        }

        let dirty = self.recompute_from(recompute_start);
        Ok(RemovedSubtree {
            ids,
            reverted_parent,
            dirty,
        })
    }

    // Walks the parent chain from `cursor` up to the root, refreshing each
    // internal node's calculated score. Returns the ids that changed, in
    // bottom-up order, for the caller to persist.
    fn recompute_from(&mut self, mut cursor: Option<Uuid>) -> Vec<Uuid> {
        let mut dirty = Vec::new();
        while let Some(id) = cursor {
            let parent_id = match self.nodes.get(&id) {
                Some(node) => node.parent_id,
                None => break,
            };
            let value = aggregate::compute_score(self, id);
            if let Some(node) = self.nodes.get_mut(&id) {
                if let NodeKind::Internal { calculated, .. } = &mut node.kind {
                    *calculated = value;
                    dirty.push(id);
                }
            }
            cursor = parent_id;
        }
        dirty
    }

    // Advisory suggestion for the next sibling's weight in the given context
    // (a parent node, or the root set when `parent` is None). Never negative;
    // oversubscribed siblings floor it at zero.
    pub fn remaining_weight(&self, parent: Option<Uuid>) -> Result<f64, GradeError> {
        let assigned: f64 = match parent {
            None => self.sibling_weights(&self.roots),
            Some(parent_id) => {
                let node = self.nodes.get(&parent_id).ok_or(GradeError::NotFound {
                    kind: "grade entry",
                    id: parent_id,
                })?;
                match &node.kind {
                    NodeKind::Leaf { .. } => 0.0,
                    NodeKind::Internal { children, .. } => self.sibling_weights(children),
                }
            }
        };
        Ok((1.0 - assigned).max(0.0))
    }

    fn sibling_weights(&self, ids: &[Uuid]) -> f64 {
        ids.iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|node| node.weight)
            .sum()
    }

    pub fn to_forest(&self) -> Vec<GradeEntryDto> {
        self.roots.iter().filter_map(|&root| self.dto(root)).collect()
    }

    pub fn dto(&self, id: Uuid) -> Option<GradeEntryDto> {
        let node = self.nodes.get(&id)?;
        let (score, calculated_score, children) = match &node.kind {
            NodeKind::Leaf { score } => (*score, None, Vec::new()),
            NodeKind::Internal {
                children,
                calculated,
            } => (
                None,
                *calculated,
                children.iter().filter_map(|&child| self.dto(child)).collect(),
            ),
        };
        Some(GradeEntryDto {
            id: Some(node.id),
            enrollment_id: node.enrollment_id,
            parent_id: node.parent_id,
            name: node.name.clone(),
            weight: node.weight,
            score,
            calculated_score,
            children,
            entry_type: node.entry_type,
        })
    }
}

fn validate_name(name: &str) -> Result<String, GradeError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(GradeError::Validation(
            "component name must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_weight(weight: f64) -> Result<(), GradeError> {
    if !weight.is_finite() || weight <= 0.0 || weight > 1.0 {
        return Err(GradeError::Validation(format!(
            "weight must be in (0, 1], got {weight}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_score(score: f64) -> Result<(), GradeError> {
    if !score.is_finite() || !(0.0..=10.0).contains(&score) {
        return Err(GradeError::Validation(format!(
            "score must be in [0, 10], got {score}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate;

    fn tree() -> GradeTree {
        GradeTree::new(Uuid::new_v4())
    }

    #[test]
    fn rejects_empty_name_and_out_of_range_weight() {
        let mut t = tree();
        assert!(matches!(
            t.add_root("  ", 0.5),
            Err(GradeError::Validation(_))
        ));
        assert!(matches!(
            t.add_root("Midterm", 0.0),
            Err(GradeError::Validation(_))
        ));
        assert!(matches!(
            t.add_root("Midterm", 1.2),
            Err(GradeError::Validation(_))
        ));
        assert!(t.roots().is_empty());
    }

    #[test]
    fn rejects_score_outside_range() {
        let mut t = tree();
        let id = t.add_root("Midterm", 1.0).unwrap();
        assert!(matches!(
            t.set_leaf_score(id, -0.1),
            Err(GradeError::Validation(_))
        ));
        assert!(matches!(
            t.set_leaf_score(id, 10.5),
            Err(GradeError::Validation(_))
        ));
    }

    #[test]
    fn rejects_score_on_internal_node() {
        let mut t = tree();
        let root = t.add_root("Process", 0.4).unwrap();
        t.add_child(root, "Quiz 1", 0.5).unwrap();
        assert!(matches!(
            t.set_leaf_score(root, 8.0),
            Err(GradeError::InvalidOperation(_))
        ));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let mut t = tree();
        let ghost = Uuid::new_v4();
        assert!(matches!(
            t.set_leaf_score(ghost, 5.0),
            Err(GradeError::NotFound { .. })
        ));
        assert!(matches!(
            t.add_child(ghost, "Quiz", 0.5),
            Err(GradeError::NotFound { .. })
        ));
        assert!(matches!(
            t.remove_subtree(ghost),
            Err(GradeError::NotFound { .. })
        ));
    }

    #[test]
    fn setting_the_same_score_twice_is_idempotent() {
        let mut t = tree();
        let id = t.add_root("Final", 1.0).unwrap();
        t.set_leaf_score(id, 7.5).unwrap();
        let first = t.dto(id).unwrap();
        t.set_leaf_score(id, 7.5).unwrap();
        let second = t.dto(id).unwrap();
        assert_eq!(first.score, second.score);
        assert_eq!(first.children.len(), second.children.len());
    }

    #[test]
    fn first_child_turns_leaf_internal_and_drops_old_score() {
        let mut t = tree();
        let root = t.add_root("Midterm", 1.0).unwrap();
        t.set_leaf_score(root, 9.0).unwrap();

        let (child, _) = t.add_child(root, "Part A", 1.0).unwrap();
        assert!(!t.get(root).unwrap().is_leaf());
        assert!(t.get(child).unwrap().is_leaf());

        // the 9.0 is gone, not inherited: nothing is entered yet
        assert_eq!(aggregate::compute_score(&t, root), None);
        assert_eq!(aggregate::estimate_final_grade(&t), 0.0);
    }

    #[test]
    fn deleting_last_child_reverts_parent_to_unscored_leaf() {
        let mut t = tree();
        let root = t.add_root("Midterm", 1.0).unwrap();
        t.set_leaf_score(root, 9.0).unwrap();
        let (child, _) = t.add_child(root, "Part A", 1.0).unwrap();

        let removal = t.remove_subtree(child).unwrap();
        assert_eq!(removal.reverted_parent, Some(root));
        let node = t.get(root).unwrap();
        assert!(node.is_leaf());
        assert_eq!(aggregate::compute_score(&t, root), None);
    }

    #[test]
    fn removing_a_node_takes_its_whole_subtree() {
        let mut t = tree();
        let root = t.add_root("Process", 1.0).unwrap();
        let (mid, _) = t.add_child(root, "Homework", 0.5).unwrap();
        let (leaf, _) = t.add_child(mid, "HW 1", 1.0).unwrap();
        t.add_child(root, "Quizzes", 0.5).unwrap();

        let removal = t.remove_subtree(mid).unwrap();
        assert_eq!(removal.ids.len(), 2);
        assert!(t.get(mid).is_none());
        assert!(t.get(leaf).is_none());
        assert!(t.get(root).is_some());
    }

    #[test]
    fn mutations_refresh_every_ancestor() {
        let mut t = tree();
        let root = t.add_root("Coursework", 1.0).unwrap();
        let (unit, _) = t.add_child(root, "Unit 1", 1.0).unwrap();
        let (quiz, dirty) = t.add_child(unit, "Quiz", 1.0).unwrap();
        assert_eq!(dirty, vec![unit, root]);

        t.set_leaf_score(quiz, 6.0).unwrap();
        let root_dto = t.dto(root).unwrap();
        assert_eq!(root_dto.calculated_score, Some(6.0));
        assert_eq!(root_dto.children[0].calculated_score, Some(6.0));
    }

    #[test]
    fn remaining_weight_suggests_the_gap() {
        let mut t = tree();
        t.add_root("Midterm", 0.3).unwrap();
        assert!((t.remaining_weight(None).unwrap() - 0.7).abs() < 1e-9);

        let root = t.add_root("Final", 0.7).unwrap();
        assert!(t.remaining_weight(None).unwrap() < 1e-9);

        t.add_child(root, "Written", 0.6).unwrap();
        assert!((t.remaining_weight(Some(root)).unwrap() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn remaining_weight_floors_at_zero_when_oversubscribed() {
        let mut t = tree();
        t.add_root("Midterm", 0.8).unwrap();
        t.add_root("Final", 0.8).unwrap();
        assert_eq!(t.remaining_weight(None).unwrap(), 0.0);
    }

    #[test]
    fn forest_round_trips_through_rows() {
        let enrollment_id = Uuid::new_v4();
        let mut t = GradeTree::new(enrollment_id);
        let root = t.add_root("Process", 0.4).unwrap();
        let (q1, _) = t.add_child(root, "Quiz 1", 0.5).unwrap();
        t.add_child(root, "Quiz 2", 0.5).unwrap();
        t.add_root("Final", 0.6).unwrap();
        t.set_leaf_score(q1, 9.0).unwrap();

        let rows: Vec<EntryRow> = flatten(&t);
        let rebuilt = GradeTree::from_rows(enrollment_id, rows);
        assert_eq!(rebuilt.roots().len(), 2);
        assert_eq!(
            aggregate::estimate_final_grade(&rebuilt),
            aggregate::estimate_final_grade(&t)
        );
    }

    fn flatten(t: &GradeTree) -> Vec<EntryRow> {
        fn walk(t: &GradeTree, id: Uuid, out: &mut Vec<EntryRow>) {
            let node = t.get(id).unwrap();
            let (score, calculated_score, children) = match &node.kind {
                NodeKind::Leaf { score } => (*score, None, Vec::new()),
                NodeKind::Internal {
                    children,
                    calculated,
                } => (None, *calculated, children.clone()),
            };
            out.push(EntryRow {
                id: node.id,
                parent_id: node.parent_id,
                name: node.name.clone(),
                weight: node.weight,
                score,
                calculated_score,
                entry_type: node.entry_type,
            });
            for child in children {
                walk(t, child, out);
            }
        }
        let mut out = Vec::new();
        for &root in t.roots() {
            walk(t, root, &mut out);
        }
        out
    }
}
