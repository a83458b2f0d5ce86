//! Recursive, model-URI-keyed simulation reports.

use std::fmt;

use serde::Serialize;

/// Final report of one model or engine subtree.
///
/// Reports mirror the composition tree: coordinators aggregate their
/// children's reports under their own URI.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// URI of the reporting model or coupled model.
    pub model_uri: String,
    /// Human-readable summary line.
    pub summary: String,
    /// Reports of the submodels, in composition order.
    pub children: Vec<SimulationReport>,
}

impl SimulationReport {
    /// Report of a leaf (atomic) model.
    pub fn leaf(model_uri: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            model_uri: model_uri.into(),
            summary: summary.into(),
            children: Vec::new(),
        }
    }

    /// Report aggregating submodel reports.
    pub fn node(
        model_uri: impl Into<String>,
        summary: impl Into<String>,
        children: Vec<SimulationReport>,
    ) -> Self {
        Self {
            model_uri: model_uri.into(),
            summary: summary.into(),
            children,
        }
    }

    /// Finds the report of the model at `uri` in this subtree.
    pub fn find(&self, uri: &str) -> Option<&SimulationReport> {
        if self.model_uri == uri {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(uri))
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(
            f,
            "{:indent$}{}: {}",
            "",
            self.model_uri,
            self.summary,
            indent = depth * 2
        )?;
        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_walks_the_tree() {
        let report = SimulationReport::node(
            "root",
            "2 submodels",
            vec![
                SimulationReport::leaf("root/a", "ok"),
                SimulationReport::node("root/b", "1 submodel", vec![SimulationReport::leaf(
                    "root/b/c",
                    "done",
                )]),
            ],
        );
        assert!(report.find("root/b/c").is_some());
        assert!(report.find("root/a").is_some());
        assert!(report.find("nope").is_none());
    }

    #[test]
    fn display_indents_children() {
        let report = SimulationReport::node("root", "top", vec![SimulationReport::leaf(
            "root/a", "leaf",
        )]);
        let text = report.to_string();
        assert!(text.contains("root: top"));
        assert!(text.contains("  root/a: leaf"));
    }
}
