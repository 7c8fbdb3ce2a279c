//! Template diff engine.
//!
//! The diff is a preview shown before an apply: both templates are parsed as
//! YAML and compared structurally, so key order and formatting never show
//! up as changes. Mappings are compared key by key, sequences are aligned
//! with a longest common subsequence and only the unmatched items are
//! reported.

use serde_yaml::Value;
use tracing::debug;

use crate::cloud::StackApi;
use crate::error::{DiffError, Result};

use super::target::DeploymentTarget;

/// Rendering of a diff without changes.
pub const NO_CHANGES: &str = "No changes.\n";

const INDENT: usize = 4;

/// Label of the whole document when its top-level shape changed.
const ROOT_LABEL: &str = "(template)";

/// Outcome of comparing a deployed template with a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    /// Whether the templates differ structurally.
    pub has_changes: bool,
    /// Human-readable diff, or [`NO_CHANGES`].
    pub rendered_diff: String,
}

/// How a node changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Modified,
    Added,
    Removed,
}

impl Change {
    const fn marker(self) -> char {
        match self {
            Self::Modified => '~',
            Self::Added => '+',
            Self::Removed => '-',
        }
    }
}

#[derive(Debug)]
struct DiffNode {
    label: String,
    change: Change,
    old: Option<Value>,
    new: Option<Value>,
    children: Vec<DiffNode>,
}

/// Compares deployed and candidate templates.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    ignored_paths: Vec<Vec<String>>,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffEngine {
    /// Creates an engine that ignores `Metadata.Manifest`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ignored_paths: vec![vec![String::from("Metadata"), String::from("Manifest")]],
        }
    }

    /// Creates an engine that reports every difference.
    #[must_use]
    pub const fn without_ignored_paths() -> Self {
        Self {
            ignored_paths: Vec::new(),
        }
    }

    /// Diffs two template bodies. An empty deployed body is an empty baseline.
    ///
    /// # Errors
    ///
    /// Returns an error if either template is not valid YAML.
    pub fn diff(&self, deployed: &str, candidate: &str) -> std::result::Result<DiffResult, DiffError> {
        let old = parse("deployed", deployed)?;
        let new = parse("candidate", candidate)?;

        let (old, new) = (as_mapping_root(old), as_mapping_root(new));
        let mut path = Vec::new();
        let children = if same_shape(&old, &new) {
            self.diff_children(&old, &new, &mut path)
        } else if old == new {
            Vec::new()
        } else {
            vec![DiffNode::leaf(String::from(ROOT_LABEL), Change::Modified, Some(&old), Some(&new))]
        };

        if children.is_empty() {
            return Ok(DiffResult {
                has_changes: false,
                rendered_diff: String::from(NO_CHANGES),
            });
        }

        let mut rendered = String::new();
        for node in &children {
            render(node, 0, &mut rendered);
        }
        Ok(DiffResult {
            has_changes: true,
            rendered_diff: rendered,
        })
    }

    /// Fetches the deployed template of `stack` and diffs it with `candidate`.
    ///
    /// A stack that does not exist yet is diffed against an empty baseline.
    ///
    /// # Errors
    ///
    /// Returns fetch failures wrapped with the target's identity, or a parse
    /// error.
    pub async fn fetch_and_diff<A: StackApi + ?Sized>(
        &self,
        api: &A,
        target: &DeploymentTarget,
        stack: &str,
        candidate: &str,
    ) -> Result<DiffResult> {
        let deployed = match api.template(stack).await {
            Ok(body) => body,
            Err(e) if e.is_stack_not_found() => {
                debug!("Stack {stack} not found, diffing against an empty template");
                String::new()
            }
            Err(e) => return Err(e.context(target.context("get template of"))),
        };
        Ok(self.diff(&deployed, candidate)?)
    }

    fn is_ignored(&self, path: &[String]) -> bool {
        self.ignored_paths.iter().any(|p| p == path)
    }

    fn diff_children(&self, old: &Value, new: &Value, path: &mut Vec<String>) -> Vec<DiffNode> {
        match (old, new) {
            (Value::Mapping(old_map), Value::Mapping(new_map)) => {
                let mut nodes = Vec::new();
                for (key, old_value) in old_map {
                    let label = key_label(key);
                    path.push(label.clone());
                    if let Some(node) = self.diff_value(label, Some(old_value), new_map.get(key), path) {
                        nodes.push(node);
                    }
                    path.pop();
                }
                for (key, new_value) in new_map {
                    if old_map.contains_key(key) {
                        continue;
                    }
                    let label = key_label(key);
                    path.push(label.clone());
                    if let Some(node) = self.diff_value(label, None, Some(new_value), path) {
                        nodes.push(node);
                    }
                    path.pop();
                }
                nodes
            }
            (Value::Sequence(old_seq), Value::Sequence(new_seq)) => {
                self.diff_sequences(old_seq, new_seq, path)
            }
            (Value::Tagged(old_tagged), Value::Tagged(new_tagged))
                if old_tagged.tag == new_tagged.tag =>
            {
                self.diff_children(&old_tagged.value, &new_tagged.value, path)
            }
            _ => Vec::new(),
        }
    }

    fn diff_value(
        &self,
        label: String,
        old: Option<&Value>,
        new: Option<&Value>,
        path: &mut Vec<String>,
    ) -> Option<DiffNode> {
        if self.is_ignored(path) {
            return None;
        }

        let (old, new) = match (old, new) {
            (None, None) => return None,
            (None, Some(new)) => return Some(DiffNode::leaf(label, Change::Added, None, Some(new))),
            (Some(old), None) => return Some(DiffNode::leaf(label, Change::Removed, Some(old), None)),
            (Some(old), Some(new)) => (old, new),
        };
        if old == new {
            return None;
        }

        if is_container(old) && same_shape(old, new) {
            let children = self.diff_children(old, new, path);
            if children.is_empty() {
                return None;
            }
            return Some(DiffNode {
                label,
                change: Change::Modified,
                old: None,
                new: None,
                children,
            });
        }

        Some(DiffNode::leaf(label, Change::Modified, Some(old), Some(new)))
    }

    fn diff_sequences(&self, old: &[Value], new: &[Value], path: &mut Vec<String>) -> Vec<DiffNode> {
        let matches = lcs_pairs(old, new);
        let mut nodes = Vec::new();
        let (mut i, mut j) = (0, 0);

        let sentinel = (old.len(), new.len());
        for (mi, mj) in matches.into_iter().chain(std::iter::once(sentinel)) {
            // Items between two matches were replaced, removed or inserted;
            // pair replacements up so they are diffed recursively.
            while i < mi && j < mj {
                let label = format!("[{j}]");
                path.push(label.clone());
                if let Some(node) = self.diff_value(label, Some(&old[i]), Some(&new[j]), path) {
                    nodes.push(node);
                }
                path.pop();
                i += 1;
                j += 1;
            }
            while i < mi {
                nodes.push(DiffNode::leaf(format!("[{i}]"), Change::Removed, Some(&old[i]), None));
                i += 1;
            }
            while j < mj {
                nodes.push(DiffNode::leaf(format!("[{j}]"), Change::Added, None, Some(&new[j])));
                j += 1;
            }
            i = mi + 1;
            j = mj + 1;
        }
        nodes
    }
}

impl DiffNode {
    fn leaf(label: String, change: Change, old: Option<&Value>, new: Option<&Value>) -> Self {
        Self {
            label,
            change,
            old: old.cloned(),
            new: new.cloned(),
            children: Vec::new(),
        }
    }
}

fn parse(which: &'static str, body: &str) -> std::result::Result<Value, DiffError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str(body).map_err(|e| DiffError::Parse {
        which,
        message: e.to_string(),
    })
}

/// Treats an empty document as an empty mapping so that a fresh stack shows
/// every top-level key as added.
fn as_mapping_root(value: Value) -> Value {
    match value {
        Value::Null => Value::Mapping(serde_yaml::Mapping::new()),
        other => other,
    }
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => inline(other),
    }
}

const fn is_container(value: &Value) -> bool {
    matches!(value, Value::Mapping(_) | Value::Sequence(_) | Value::Tagged(_))
}

fn same_shape(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Mapping(_), Value::Mapping(_)) | (Value::Sequence(_), Value::Sequence(_)) => true,
        (Value::Tagged(x), Value::Tagged(y)) => x.tag == y.tag && same_shape(&x.value, &y.value),
        _ => false,
    }
}

fn is_scalar(value: &Value) -> bool {
    match value {
        Value::Mapping(_) | Value::Sequence(_) => false,
        Value::Tagged(tagged) => is_scalar(&tagged.value),
        _ => true,
    }
}

fn inline(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| format!("{value:?}"))
}

/// Index pairs of the longest common subsequence of `a` and `b`.
fn lcs_pairs(a: &[Value], b: &[Value]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());
    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut pairs = Vec::with_capacity(table[0][0]);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

fn render(node: &DiffNode, indent: usize, out: &mut String) {
    let pad = " ".repeat(indent);
    let marker = node.change.marker();

    if !node.children.is_empty() {
        out.push_str(&format!("{pad}{marker} {}:\n", node.label));
        for child in &node.children {
            render(child, indent + INDENT, out);
        }
        return;
    }

    match (node.change, node.old.as_ref(), node.new.as_ref()) {
        (Change::Modified, Some(old), Some(new)) if is_scalar(old) && is_scalar(new) => {
            out.push_str(&format!(
                "{pad}~ {}: {} -> {}\n",
                node.label,
                inline(old),
                inline(new)
            ));
        }
        (Change::Modified, old, new) => {
            out.push_str(&format!("{pad}~ {}:\n", node.label));
            if let Some(old) = old {
                render_block('-', old, indent + INDENT, out);
            }
            if let Some(new) = new {
                render_block('+', new, indent + INDENT, out);
            }
        }
        (change, old, new) => {
            let Some(value) = new.or(old) else {
                return;
            };
            if is_scalar(value) {
                out.push_str(&format!("{pad}{marker} {}: {}\n", node.label, inline(value)));
            } else {
                out.push_str(&format!("{pad}{} {}:\n", change.marker(), node.label));
                render_block(' ', value, indent + INDENT, out);
            }
        }
    }
}

fn render_block(marker: char, value: &Value, indent: usize, out: &mut String) {
    let pad = " ".repeat(indent);
    for line in inline(value).lines() {
        out.push_str(&format!("{pad}{marker} {line}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MockStackApi;
    use crate::error::CloudError;

    const DEPLOYED: &str = r"
Metadata:
  Version: v1.30.0
  Manifest: |
    name: api
Parameters:
  ContainerImage:
    Type: String
Resources:
  Service:
    Type: Platform::Service
    Properties:
      DesiredCount: 1
      Ports:
        - 80
        - 443
";

    #[test]
    fn test_identical_templates() {
        let result = DiffEngine::new().diff(DEPLOYED, DEPLOYED).unwrap();
        assert!(!result.has_changes);
        assert_eq!(result.rendered_diff, "No changes.\n");
    }

    #[test]
    fn test_key_order_is_not_a_change() {
        let reordered = "a: 1\nb: 2\n";
        let result = DiffEngine::new().diff("b: 2\na: 1\n", reordered).unwrap();
        assert!(!result.has_changes);
    }

    #[test]
    fn test_modified_scalar() {
        let candidate = DEPLOYED.replace("DesiredCount: 1", "DesiredCount: 3");
        let result = DiffEngine::new().diff(DEPLOYED, &candidate).unwrap();
        assert!(result.has_changes);
        assert_eq!(
            result.rendered_diff,
            "~ Resources:\n    ~ Service:\n        ~ Properties:\n            ~ DesiredCount: 1 -> 3\n"
        );
    }

    #[test]
    fn test_manifest_is_ignored() {
        let candidate = DEPLOYED.replace("name: api", "name: api\n    count: 2");
        let result = DiffEngine::new().diff(DEPLOYED, &candidate).unwrap();
        assert!(!result.has_changes);

        let result = DiffEngine::without_ignored_paths()
            .diff(DEPLOYED, &candidate)
            .unwrap();
        assert!(result.has_changes);
    }

    #[test]
    fn test_sequence_insertion() {
        let candidate = DEPLOYED.replace("        - 443\n", "        - 443\n        - 8080\n");
        let result = DiffEngine::new().diff(DEPLOYED, &candidate).unwrap();
        assert!(result.rendered_diff.contains("+ [2]: 8080\n"));
        assert!(!result.rendered_diff.contains("[0]"));
    }

    #[test]
    fn test_sequence_replacement_is_recursive() {
        let deployed = "Rules:\n  - Path: /api\n    Priority: 1\n  - Path: /web\n    Priority: 2\n";
        let candidate = "Rules:\n  - Path: /api\n    Priority: 1\n  - Path: /web\n    Priority: 5\n";
        let result = DiffEngine::new().diff(deployed, candidate).unwrap();
        assert_eq!(
            result.rendered_diff,
            "~ Rules:\n    ~ [1]:\n        ~ Priority: 2 -> 5\n"
        );
    }

    #[test]
    fn test_removed_and_added_keys() {
        let result = DiffEngine::new()
            .diff("Outputs:\n  Url: x\n", "Conditions:\n  IsProd: true\n")
            .unwrap();
        assert!(result.rendered_diff.contains("- Outputs:\n"));
        assert!(result.rendered_diff.contains("+ Conditions:\n"));
    }

    #[test]
    fn test_tagged_values() {
        let result = DiffEngine::new()
            .diff("Name: !Ref Old\n", "Name: !Ref New\n")
            .unwrap();
        assert!(result.has_changes);
        assert!(result.rendered_diff.contains("!Ref Old -> !Ref New"));
    }

    #[test]
    fn test_tagged_value_changing_shape() {
        let result = DiffEngine::new()
            .diff("Arn: !GetAtt [Queue, Arn]\n", "Arn: !GetAtt Queue.Arn\n")
            .unwrap();
        assert!(result.has_changes);
        assert!(result.rendered_diff.starts_with("~ Arn:\n"));
        assert!(result.rendered_diff.contains("+ !GetAtt Queue.Arn\n"));

        let result = DiffEngine::new()
            .diff(
                "Url: !Sub [\"https://${Host}\", {Host: a}]\n",
                "Url: !Sub {Host: a}\n",
            )
            .unwrap();
        assert!(result.has_changes);
        assert!(result.rendered_diff.starts_with("~ Url:\n"));
    }

    #[test]
    fn test_tagged_containers_still_recurse() {
        let result = DiffEngine::new()
            .diff(
                "Url: !Sub {Host: a, Port: 80}\n",
                "Url: !Sub {Host: a, Port: 8080}\n",
            )
            .unwrap();
        assert_eq!(result.rendered_diff, "~ Url:\n    ~ Port: 80 -> 8080\n");
    }

    #[test]
    fn test_root_shape_change() {
        let result = DiffEngine::new().diff("- a\n- b\n", "Resources: {}\n").unwrap();
        assert!(result.has_changes);
        assert!(result.rendered_diff.starts_with("~ (template):\n"));
        assert!(result.rendered_diff.contains("    - - a\n"));
        assert!(result.rendered_diff.contains("    + Resources: {}\n"));

        let same = DiffEngine::new().diff("- a\n- b\n", "- a\n- b\n").unwrap();
        assert!(!same.has_changes);

        let sequences = DiffEngine::new().diff("- a\n", "- a\n- b\n").unwrap();
        assert_eq!(sequences.rendered_diff, "+ [1]: b\n");
    }

    #[test]
    fn test_empty_baseline() {
        let from_empty = DiffEngine::new().diff("", DEPLOYED).unwrap();
        assert!(from_empty.has_changes);
        assert!(from_empty.rendered_diff.contains("+ Resources:\n"));
    }

    #[test]
    fn test_parse_error_names_side() {
        let err = DiffEngine::new().diff("a: [", "a: 1").unwrap_err();
        assert!(err.to_string().starts_with("parse deployed template"));
    }

    #[tokio::test]
    async fn test_not_found_matches_empty_baseline() {
        let mut api = MockStackApi::new();
        api.expect_template().times(1).returning(|stack| {
            Err(CloudError::StackNotFound {
                stack: stack.to_string(),
            }
            .into())
        });

        let engine = DiffEngine::new();
        let target = DeploymentTarget::workload("demo", "test", "api");
        let fetched = engine
            .fetch_and_diff(&api, &target, "demo-test-api", DEPLOYED)
            .await
            .unwrap();
        assert_eq!(fetched, engine.diff("", DEPLOYED).unwrap());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_wrapped() {
        let mut api = MockStackApi::new();
        api.expect_template()
            .returning(|_| Err(CloudError::network("connection reset").into()));

        let target = DeploymentTarget::workload("demo", "test", "api");
        let err = DiffEngine::new()
            .fetch_and_diff(&api, &target, "demo-test-api", DEPLOYED)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("get template of workload api: "));
    }
}
