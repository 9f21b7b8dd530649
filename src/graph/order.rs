//! Generation Ordering
//!
//! Kahn's algorithm over the condensed unit graph. Each round takes every unit
//! whose dependencies are all placed and emits them as one level; ties inside
//! a level are broken by the unit's lexically smallest member so the order is
//! reproducible across runs.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::analysis::{analyze_cycles, CycleAnalysis, SchedulingUnit};
use super::diagnostics::Diagnostics;
use super::{BlueprintGraph, ModuleId};

/// Units that may be generated concurrently
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    pub index: usize,
    pub units: Vec<SchedulingUnit>,
}

impl Level {
    /// Member module ids in unit order
    pub fn modules(&self) -> Vec<&ModuleId> {
        self.units.iter().flat_map(|u| u.members.iter()).collect()
    }

    pub fn has_collapsed_unit(&self) -> bool {
        self.units.iter().any(|u| u.is_collapsed())
    }
}

/// Ordered levels; concatenated they form a topological order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationOrder {
    pub levels: Vec<Level>,
}

impl GenerationOrder {
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Every module in dispatch order
    pub fn flatten(&self) -> Vec<&ModuleId> {
        self.levels.iter().flat_map(|l| l.modules()).collect()
    }

    pub fn level_of(&self, module: &str) -> Option<usize> {
        self.levels
            .iter()
            .find(|l| l.modules().iter().any(|m| m.as_str() == module))
            .map(|l| l.index)
    }

    /// Module ids per level, for reports
    pub fn module_levels(&self) -> Vec<Vec<ModuleId>> {
        self.levels
            .iter()
            .map(|l| l.modules().into_iter().cloned().collect())
            .collect()
    }
}

/// Kahn's algorithm over scheduling units.
///
/// The condensed graph is acyclic, so every unit is placed exactly once.
pub fn compute_order(analysis: &CycleAnalysis) -> GenerationOrder {
    let units = &analysis.units;
    let mut in_degree: Vec<usize> = units.iter().map(|u| u.dependencies.len()).collect();
    let mut ready: Vec<usize> = units
        .iter()
        .filter(|u| u.dependencies.is_empty())
        .map(|u| u.id)
        .collect();
    let mut levels = Vec::new();

    while !ready.is_empty() {
        // unit ids follow anchor order, so sorting ids sorts by anchor
        ready.sort_unstable();
        let mut next = Vec::new();
        for &id in &ready {
            for &dependent in &units[id].dependents {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }

        let index = levels.len();
        debug!(level = index, units = ready.len(), "Level ordered");
        levels.push(Level {
            index,
            units: ready.iter().map(|&id| units[id].clone()).collect(),
        });
        ready = next;
    }

    debug_assert_eq!(
        levels.iter().map(|l| l.units.len()).sum::<usize>(),
        units.len(),
        "condensed graph must be acyclic"
    );

    GenerationOrder { levels }
}

/// Everything the scheduler needs besides the graph itself
#[derive(Debug, Clone)]
pub struct GenerationPlan {
    pub analysis: CycleAnalysis,
    pub order: GenerationOrder,
    /// Non-fatal observations such as collapsed cycles
    pub warnings: Diagnostics,
}

impl GenerationPlan {
    pub fn build(graph: &BlueprintGraph) -> Self {
        let analysis = analyze_cycles(graph);
        let order = compute_order(&analysis);

        let mut warnings = Diagnostics::new();
        for unit in analysis.collapsed() {
            warnings.cycle_collapsed(&unit.members);
        }

        Self {
            analysis,
            order,
            warnings,
        }
    }

    pub fn peers(&self, module: &str) -> Vec<&ModuleId> {
        self.analysis.peers(module)
    }
}
