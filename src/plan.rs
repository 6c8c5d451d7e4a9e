//! Task Planning
//!
//! Turns a `DecisionReport` into a topologically ordered DAG of atomic tasks.
//! The plan is the single source of truth for execution order: bottom-up
//! completion is encoded as explicit dependencies, never as traversal order,
//! and the executor is a generic DAG runner over it.
//!
//! Planning is deterministic: identical trees and decisions produce an
//! identical, serializable plan.

use crate::context::DirectoryContext;
use crate::decision::{DecisionOutcome, DecisionReport};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Identifier of one task within a plan
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

/// One atomic unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// Produce (or load) the file-analysis for one source file
    AnalyzeFile { file: PathBuf },

    /// Synthesize a directory summary from child analyses and summaries
    SynthesizeDirectory { directory: PathBuf },

    /// Assemble and atomically write the directory's KB file
    AssembleKb { directory: PathBuf },

    /// Remove one orphaned cache or KB file
    DeleteOrphan { path: PathBuf },
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AnalyzeFile { .. } => "analyze_file",
            Self::SynthesizeDirectory { .. } => "synthesize_directory",
            Self::AssembleKb { .. } => "assemble_kb",
            Self::DeleteOrphan { .. } => "delete_orphan",
        }
    }

    pub fn target(&self) -> &Path {
        match self {
            Self::AnalyzeFile { file } => file,
            Self::SynthesizeDirectory { directory } => directory,
            Self::AssembleKb { directory } => directory,
            Self::DeleteOrphan { path } => path,
        }
    }
}

/// A task plus the tasks that must complete before it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub depends_on: BTreeSet<TaskId>,
}

/// Ordered task DAG for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn count_kind(&self, name: &str) -> usize {
        self.tasks.iter().filter(|t| t.kind.name() == name).count()
    }

    /// Every dependency must refer to an earlier task; emission order is the
    /// topological order.
    pub fn is_topologically_ordered(&self) -> bool {
        self.tasks
            .iter()
            .all(|task| task.depends_on.iter().all(|dep| *dep < task.id))
    }

    /// Render a per-task report for dry-run output.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for task in &self.tasks {
            let deps: Vec<String> = task.depends_on.iter().map(|d| d.0.to_string()).collect();
            out.push_str(&format!(
                "[{:>4}] {:<22} {}{}\n",
                task.id.0,
                task.kind.name(),
                task.kind.target().display(),
                if deps.is_empty() {
                    String::new()
                } else {
                    format!("  <- deps [{}]", deps.join(", "))
                }
            ));
        }
        out
    }
}

// ============================================================================
// Planner
// ============================================================================

/// Builds the execution plan from decisions over a discovered tree.
pub struct Planner<'a> {
    report: &'a DecisionReport,
    next_id: u64,
    tasks: Vec<Task>,
    /// file path -> its analyze task (only REBUILD files get one)
    analyze_ids: HashMap<PathBuf, TaskId>,
}

impl<'a> Planner<'a> {
    pub fn new(report: &'a DecisionReport) -> Self {
        Self {
            report,
            next_id: 0,
            tasks: Vec::new(),
            analyze_ids: HashMap::new(),
        }
    }

    /// Emit the complete plan for `tree`.
    ///
    /// Rebuilt files get `analyze_file` tasks. Every non-empty in-scope
    /// directory gets an `assemble_kb` task so parent KBs re-reference
    /// current child summaries; only REBUILD directories additionally get a
    /// `synthesize_directory` task (SKIP directories re-assemble from cached
    /// content without touching the LLM). Orphan deletions are independent.
    pub fn build(mut self, tree: &DirectoryContext) -> Plan {
        self.plan_directory(tree);

        for orphan in &self.report.orphans {
            let id = self.allocate();
            self.tasks.push(Task {
                id,
                kind: TaskKind::DeleteOrphan {
                    path: orphan.clone(),
                },
                depends_on: BTreeSet::new(),
            });
        }

        Plan { tasks: self.tasks }
    }

    fn allocate(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }

    fn outcome_for(&self, path: &Path) -> Option<DecisionOutcome> {
        self.report.decision_for(path).map(|d| d.outcome)
    }

    /// Returns the directory's `assemble_kb` task id, or `None` for empty
    /// directories which produce no tasks at all.
    fn plan_directory(&mut self, dir: &DirectoryContext) -> Option<TaskId> {
        if dir.is_empty() {
            return None;
        }

        // Children first; their assemble tasks gate both synthesis and
        // assembly of this directory.
        let child_assembles: Vec<TaskId> = dir
            .subdirectories
            .iter()
            .filter_map(|sub| self.plan_directory(sub))
            .collect();

        let mut analyze_tasks = Vec::new();
        for file in dir.processable_files() {
            if self.outcome_for(&file.file_path) == Some(DecisionOutcome::Rebuild) {
                let id = self.allocate();
                self.analyze_ids.insert(file.file_path.clone(), id);
                self.tasks.push(Task {
                    id,
                    kind: TaskKind::AnalyzeFile {
                        file: file.file_path.clone(),
                    },
                    depends_on: BTreeSet::new(),
                });
                analyze_tasks.push(id);
            }
        }

        let rebuilt = self.outcome_for(&dir.directory_path) == Some(DecisionOutcome::Rebuild);

        let synthesize_id = if rebuilt {
            let id = self.allocate();
            let mut deps: BTreeSet<TaskId> = analyze_tasks.iter().copied().collect();
            deps.extend(child_assembles.iter().copied());
            self.tasks.push(Task {
                id,
                kind: TaskKind::SynthesizeDirectory {
                    directory: dir.directory_path.clone(),
                },
                depends_on: deps,
            });
            Some(id)
        } else {
            None
        };

        let assemble_id = self.allocate();
        let mut deps: BTreeSet<TaskId> = child_assembles.into_iter().collect();
        deps.extend(synthesize_id);
        // Assembly embeds file analyses directly; rebuilt analyses must land
        // before the KB is written even when synthesis is skipped.
        if synthesize_id.is_none() {
            deps.extend(analyze_tasks);
        }
        self.tasks.push(Task {
            id: assemble_id,
            kind: TaskKind::AssembleKb {
                directory: dir.directory_path.clone(),
            },
            depends_on: deps,
        });

        Some(assemble_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::AnalysisCache;
    use crate::decision::RebuildDecisionEngine;
    use crate::defaults;
    use crate::discovery;
    use crate::handlers::{Handler, ProjectBaseHandler};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn plan_for(root: &Path) -> Plan {
        let config = defaults::default_config_for("project-base").unwrap();
        let handler: Arc<dyn Handler> =
            Arc::new(ProjectBaseHandler::new(root.join(".knowledge"), config));
        let cache = AnalysisCache::new(Arc::clone(&handler), root.to_path_buf());
        let tree = discovery::discover(handler.as_ref(), root).unwrap();
        let report = RebuildDecisionEngine::new(Arc::clone(&handler), root.to_path_buf())
            .evaluate(&tree, &cache)
            .unwrap();
        Planner::new(&report).build(&tree)
    }

    #[test]
    fn test_tiny_project_plan_shape() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("README.md"), "# X").unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/main.py"), "print('hi')").unwrap();

        let plan = plan_for(tmp.path());
        assert_eq!(plan.count_kind("analyze_file"), 2);
        assert_eq!(plan.count_kind("synthesize_directory"), 2);
        assert_eq!(plan.count_kind("assemble_kb"), 2);
        assert_eq!(plan.count_kind("delete_orphan"), 0);
        assert!(plan.is_topologically_ordered());
    }

    #[test]
    fn test_synthesize_depends_on_child_assembly() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("README.md"), "# X").unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/main.py"), "print('hi')").unwrap();

        let plan = plan_for(tmp.path());

        let src_assemble = plan
            .tasks
            .iter()
            .find(|t| {
                matches!(&t.kind, TaskKind::AssembleKb { directory } if directory.ends_with("src"))
            })
            .unwrap()
            .id;
        let root_synth = plan
            .tasks
            .iter()
            .find(|t| {
                matches!(&t.kind, TaskKind::SynthesizeDirectory { directory } if directory == tmp.path())
            })
            .unwrap();
        assert!(root_synth.depends_on.contains(&src_assemble));
    }

    #[test]
    fn test_empty_directory_produces_no_tasks() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("README.md"), "# X").unwrap();
        fs::create_dir_all(tmp.path().join("images")).unwrap();

        let plan = plan_for(tmp.path());
        assert!(plan
            .tasks
            .iter()
            .all(|t| !t.kind.target().ends_with("images")));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/b.py"), "b").unwrap();
        fs::write(tmp.path().join("src/a.py"), "a").unwrap();

        let first = serde_json::to_string(&plan_for(tmp.path())).unwrap();
        let second = serde_json::to_string(&plan_for(tmp.path())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_describe_lists_every_task() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("README.md"), "# X").unwrap();

        let plan = plan_for(tmp.path());
        let description = plan.describe();
        assert_eq!(description.lines().count(), plan.len());
        assert!(description.contains("assemble_kb"));
    }
}
