// ============================================================================
// Cascade Planner
// ============================================================================
//
// Expands a persist/remove/refresh/detach request on one instance into the
// ordered list of operations over every instance reachable through
// cascading references.
//
// Ordering:
//   persist (and refresh/detach): owning-side targets, owner, inverse-side targets
//   remove:                       inverse-side targets, owner, owning-side targets
//
// Each instance is expanded at most once per plan. Reaching an already
// visited instance ends that branch.
//
// ============================================================================

use async_recursion::async_recursion;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Level, event};

use crate::core::Result;
use crate::graph::InstanceKey;
use crate::mapping::CascadeOp;
use crate::resolver::AssociationResolver;

/// One step of a cascade plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOperation {
    pub instance: InstanceKey,
    pub class_name: String,
    pub operation: CascadeOp,
}

/// Ordered, duplicate-free list of planned operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadePlan {
    operations: Vec<PlannedOperation>,
}

impl CascadePlan {
    /// Keep the first occurrence of each (instance, operation) pair
    pub fn from_operations(operations: Vec<PlannedOperation>) -> Self {
        let mut seen = HashSet::new();
        let operations = operations
            .into_iter()
            .filter(|op| seen.insert((op.instance, op.operation)))
            .collect();
        Self { operations }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedOperation> {
        self.operations.iter()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Position of an operation on an instance
    pub fn position(&self, instance: InstanceKey, operation: CascadeOp) -> Option<usize> {
        self.operations
            .iter()
            .position(|op| op.instance == instance && op.operation == operation)
    }

    pub fn contains(&self, instance: InstanceKey, operation: CascadeOp) -> bool {
        self.position(instance, operation).is_some()
    }

    /// Instances touched by `operation`, in plan order
    pub fn instances(&self, operation: CascadeOp) -> Vec<InstanceKey> {
        self.operations
            .iter()
            .filter(|op| op.operation == operation)
            .map(|op| op.instance)
            .collect()
    }

    pub fn into_operations(self) -> Vec<PlannedOperation> {
        self.operations
    }
}

impl<'a> IntoIterator for &'a CascadePlan {
    type Item = &'a PlannedOperation;
    type IntoIter = std::slice::Iter<'a, PlannedOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

pub struct CascadePlanner {
    resolver: Arc<AssociationResolver>,
}

impl CascadePlanner {
    pub fn new(resolver: Arc<AssociationResolver>) -> Self {
        Self { resolver }
    }

    /// Plan `op` on `root`, the root included
    pub async fn plan(&self, op: CascadeOp, root: InstanceKey) -> Result<CascadePlan> {
        let mut visited = HashSet::new();
        let operations = self.plan_cascade(op, root, &mut visited).await?;
        let plan = CascadePlan::from_operations(operations);
        event!(
            Level::DEBUG,
            operation = ?op,
            root = %root,
            steps = plan.len(),
            "cascade planned"
        );
        Ok(plan)
    }

    /// Operations for `owner` and everything its cascading references reach
    ///
    /// Lazy references on cascading paths are resolved. Orphans (targets
    /// detached from an orphan-removing reference since load) are scheduled
    /// for removal during persist and remove planning.
    #[async_recursion]
    pub async fn plan_cascade(
        &self,
        op: CascadeOp,
        owner: InstanceKey,
        visited: &mut HashSet<InstanceKey>,
    ) -> Result<Vec<PlannedOperation>> {
        if !visited.insert(owner) {
            event!(Level::DEBUG, instance = %owner, operation = ?op, "cascade revisit truncated");
            return Ok(Vec::new());
        }

        let class_name = self.resolver.graph().get(owner)?.class_name().to_string();
        let metadata = self.resolver.registry().get_metadata_for(&class_name)?;

        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut orphans = Vec::new();

        for association in metadata.associations() {
            if association.orphan_removal && matches!(op, CascadeOp::Persist | CascadeOp::Remove) {
                for orphan in self.resolver.detached_targets(owner, association).await? {
                    event!(
                        Level::DEBUG,
                        owner = %owner,
                        property = %association.name(),
                        orphan = %orphan,
                        "orphan scheduled for removal"
                    );
                    if visited.contains(&orphan) {
                        orphans.push(self.operation(orphan, CascadeOp::Remove)?);
                    } else {
                        orphans.extend(self.plan_cascade(CascadeOp::Remove, orphan, visited).await?);
                    }
                }
            }

            if !association.cascades(op) {
                continue;
            }

            let targets_first = match op {
                CascadeOp::Remove => association.is_inverse_side(),
                _ => association.is_owning_side(),
            };
            for target in self.resolver.current_targets(owner, association).await? {
                let planned = self.plan_cascade(op, target, visited).await?;
                if targets_first {
                    before.extend(planned);
                } else {
                    after.extend(planned);
                }
            }
        }

        before.push(PlannedOperation {
            instance: owner,
            class_name,
            operation: op,
        });
        before.extend(after);
        before.extend(orphans);
        Ok(before)
    }

    fn operation(&self, instance: InstanceKey, operation: CascadeOp) -> Result<PlannedOperation> {
        Ok(PlannedOperation {
            instance,
            class_name: self.resolver.graph().get(instance)?.class_name().to_string(),
            operation,
        })
    }
}
