//! Cycle Analysis
//!
//! Computes strongly connected components (SCCs) and condenses the graph into
//! scheduling units. A cycle is never an error: every member of an SCC larger
//! than one is merged into a single unit that is generated together, with the
//! other members supplied as mutual context.

use petgraph::algo::tarjan_scc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{BlueprintGraph, ModuleId};

/// Index into [`CycleAnalysis::units`]
pub type UnitId = usize;

// =============================================================================
// Scheduling Unit
// =============================================================================

/// One node of the condensed graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingUnit {
    pub id: UnitId,
    /// Sorted module ids; more than one means a collapsed cycle
    pub members: Vec<ModuleId>,
    /// Units this one depends on (union over members, cycle edges removed)
    pub dependencies: BTreeSet<UnitId>,
    /// Units depending on this one
    pub dependents: BTreeSet<UnitId>,
}

impl SchedulingUnit {
    /// True for an SCC of two or more blueprints
    pub fn is_collapsed(&self) -> bool {
        self.members.len() > 1
    }

    /// Lexically smallest member, used for ordering ties
    pub fn anchor(&self) -> Option<&ModuleId> {
        self.members.first()
    }
}

// =============================================================================
// Analysis Result
// =============================================================================

/// Condensation of the blueprint graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleAnalysis {
    /// Units ordered by anchor
    pub units: Vec<SchedulingUnit>,
    unit_of: BTreeMap<ModuleId, UnitId>,
}

impl CycleAnalysis {
    pub fn unit(&self, id: UnitId) -> Option<&SchedulingUnit> {
        self.units.get(id)
    }

    /// The unit containing `module`
    pub fn unit_of(&self, module: &str) -> Option<&SchedulingUnit> {
        self.unit_of.get(module).and_then(|&id| self.units.get(id))
    }

    /// Is this module part of a collapsed cycle?
    pub fn is_cyclic(&self, module: &str) -> bool {
        self.unit_of(module).map(|u| u.is_collapsed()).unwrap_or(false)
    }

    /// Other members of this module's cycle
    pub fn peers(&self, module: &str) -> Vec<&ModuleId> {
        self.unit_of(module)
            .map(|u| u.members.iter().filter(|m| m.as_str() != module).collect())
            .unwrap_or_default()
    }

    pub fn collapsed(&self) -> impl Iterator<Item = &SchedulingUnit> {
        self.units.iter().filter(|u| u.is_collapsed())
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }
}

/// Run Tarjan's SCC algorithm and build the condensed unit graph
pub fn analyze_cycles(graph: &BlueprintGraph) -> CycleAnalysis {
    let mut groups: Vec<Vec<ModuleId>> = tarjan_scc(&graph.graph)
        .into_iter()
        .map(|scc| {
            let mut members: Vec<ModuleId> = scc
                .into_iter()
                .filter_map(|idx| graph.graph.node_weight(idx).cloned())
                .collect();
            members.sort();
            members
        })
        .filter(|members| !members.is_empty())
        .collect();
    groups.sort_by(|a, b| a[0].cmp(&b[0]));

    let mut unit_of = BTreeMap::new();
    let mut units: Vec<SchedulingUnit> = groups
        .into_iter()
        .enumerate()
        .map(|(id, members)| {
            for member in &members {
                unit_of.insert(member.clone(), id);
            }
            SchedulingUnit {
                id,
                members,
                dependencies: BTreeSet::new(),
                dependents: BTreeSet::new(),
            }
        })
        .collect();

    for node in graph.nodes() {
        let Some(&from) = unit_of.get(&node.module_id) else {
            continue;
        };
        for dep in &node.resolved_dependencies {
            let Some(&to) = unit_of.get(dep) else {
                continue;
            };
            if from != to {
                units[from].dependencies.insert(to);
                units[to].dependents.insert(from);
            }
        }
    }

    CycleAnalysis { units, unit_of }
}
