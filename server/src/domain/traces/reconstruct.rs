//! Trace reconstruction
//!
//! Turns an unordered batch of spans into one tree per trace, or a classified
//! error for every trace whose spans do not form exactly one rooted tree.
//! Arrival order never changes the outcome for a well-formed trace.
//!
//! Trees can be arbitrarily deep, so nothing here recurses over them: the
//! tree is assembled bottom-up from a parent-before-child list and every walk
//! uses an explicit stack.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::domain::span::{Span, SpanId, TraceId, Tracestate};

/// Why a trace could not be reconstructed
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructError {
    #[error("found two spans with the same span ID")]
    AlreadyExists,

    #[error("found duplicated root span for the same trace")]
    DuplicatedRootSpan,

    #[error("found orphan span")]
    OrphanSpan,
}

/// Reconstructed trace node. Owns its children.
pub struct SimpleSpan {
    trace_id: TraceId,
    span_id: SpanId,
    tracestate: Tracestate,
    children: BTreeMap<SpanId, SimpleSpan>,
}

impl SimpleSpan {
    fn leaf(trace_id: TraceId, span_id: SpanId, tracestate: Tracestate) -> Self {
        Self {
            trace_id,
            span_id,
            tracestate,
            children: BTreeMap::new(),
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn tracestate(&self) -> &Tracestate {
        &self.tracestate
    }

    pub fn children(&self) -> &BTreeMap<SpanId, SimpleSpan> {
        &self.children
    }

    pub fn child(&self, span_id: &SpanId) -> Option<&SimpleSpan> {
        self.children.get(span_id)
    }

    /// Number of nodes in this subtree, self included
    pub fn span_count(&self) -> usize {
        self.preorder().len()
    }

    /// Length of the longest root-to-leaf path, a lone node has depth 1
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1)];
        while let Some((node, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            stack.extend(node.children.values().map(|c| (c, depth + 1)));
        }
        deepest
    }

    /// Nodes in pre-order with the position of each node's parent in the list
    fn preorder(&self) -> Vec<(&SimpleSpan, Option<usize>)> {
        let mut out = Vec::new();
        let mut stack = vec![(self, None)];
        while let Some((node, parent)) = stack.pop() {
            let pos = out.len();
            out.push((node, parent));
            stack.extend(node.children.values().rev().map(|c| (c, Some(pos))));
        }
        out
    }
}

/// Link nodes listed parent-before-child into a single tree. The first entry
/// is the root.
fn assemble(mut nodes: Vec<(SimpleSpan, Option<usize>)>) -> Option<SimpleSpan> {
    while let Some((node, parent)) = nodes.pop() {
        match parent {
            Some(p) => {
                nodes[p].0.children.insert(node.span_id, node);
            }
            None => return Some(node),
        }
    }
    None
}

impl Drop for SimpleSpan {
    fn drop(&mut self) {
        let mut stack: Vec<SimpleSpan> =
            std::mem::take(&mut self.children).into_values().collect();
        while let Some(mut node) = stack.pop() {
            stack.extend(std::mem::take(&mut node.children).into_values());
        }
    }
}

impl Clone for SimpleSpan {
    fn clone(&self) -> Self {
        let nodes = self
            .preorder()
            .into_iter()
            .map(|(node, parent)| {
                let copy = SimpleSpan::leaf(node.trace_id, node.span_id, node.tracestate.clone());
                (copy, parent)
            })
            .collect();
        assemble(nodes).unwrap_or_else(|| {
            SimpleSpan::leaf(self.trace_id, self.span_id, self.tracestate.clone())
        })
    }
}

impl PartialEq for SimpleSpan {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if a.trace_id != b.trace_id
                || a.span_id != b.span_id
                || a.tracestate != b.tracestate
                || !a.children.keys().eq(b.children.keys())
            {
                return false;
            }
            stack.extend(a.children.values().zip(b.children.values()));
        }
        true
    }
}

impl fmt::Debug for SimpleSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleSpan")
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .field("tracestate", &self.tracestate)
            .field("span_count", &self.span_count())
            .finish()
    }
}

/// JSON form of a tree: the root id plus a flat pre-order list of nodes, each
/// naming its children
#[derive(Serialize)]
struct FlatTree<'a> {
    trace_id: TraceId,
    root: SpanId,
    spans: Vec<FlatNode<'a>>,
}

#[derive(Serialize)]
struct FlatNode<'a> {
    span_id: SpanId,
    #[serde(skip_serializing_if = "is_empty_tracestate")]
    tracestate: &'a Tracestate,
    children: Vec<SpanId>,
}

fn is_empty_tracestate(tracestate: &&Tracestate) -> bool {
    tracestate.is_empty()
}

impl Serialize for SimpleSpan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        FlatTree {
            trace_id: self.trace_id,
            root: self.span_id,
            spans: self
                .preorder()
                .into_iter()
                .map(|(node, _)| FlatNode {
                    span_id: node.span_id,
                    tracestate: &node.tracestate,
                    children: node.children.keys().copied().collect(),
                })
                .collect(),
        }
        .serialize(serializer)
    }
}

/// Successful trees and per-trace failures. Each input trace id lands in
/// exactly one of the two maps.
pub type Reconstruction = (
    HashMap<TraceId, SimpleSpan>,
    HashMap<TraceId, ReconstructError>,
);

/// Reconstruct every trace present in `spans`
pub fn reconstruct_traces(spans: &[Span]) -> Reconstruction {
    let mut grouped: HashMap<TraceId, Vec<&Span>> = HashMap::new();
    for span in spans {
        grouped.entry(span.trace_id).or_default().push(span);
    }

    let mut roots = HashMap::new();
    let mut errors = HashMap::new();
    for (trace_id, pending) in grouped {
        match build_trace(trace_id, pending) {
            Ok(root) => {
                roots.insert(trace_id, root);
            }
            Err(e) => {
                tracing::debug!(trace_id = %trace_id, error = %e, "Trace reconstruction failed");
                errors.insert(trace_id, e);
            }
        }
    }
    (roots, errors)
}

// ============================================================================
// TREE BUILDING
// ============================================================================

struct Node {
    span_id: SpanId,
    tracestate: Tracestate,
    parent: Option<usize>,
}

/// Arena of accepted spans for a single trace. A span is only accepted after
/// its parent, so the arena is always in parent-before-child order.
#[derive(Default)]
struct TreeBuilder {
    nodes: Vec<Node>,
    index: HashMap<SpanId, usize>,
    has_root: bool,
}

impl TreeBuilder {
    fn accept(&mut self, span: &Span, parent: Option<usize>) {
        self.index.insert(span.span_id, self.nodes.len());
        self.nodes.push(Node {
            span_id: span.span_id,
            tracestate: span.tracestate.clone(),
            parent,
        });
        if parent.is_none() {
            self.has_root = true;
        }
    }

    /// Try to place one span. `Ok(false)` means its parent is not known yet.
    fn try_attach(&mut self, span: &Span) -> Result<bool, ReconstructError> {
        if self.index.contains_key(&span.span_id) {
            return Err(ReconstructError::AlreadyExists);
        }
        match span.parent_span_id {
            None if self.has_root => Err(ReconstructError::DuplicatedRootSpan),
            None => {
                self.accept(span, None);
                Ok(true)
            }
            Some(parent_id) => match self.index.get(&parent_id).copied() {
                Some(parent) => {
                    self.accept(span, Some(parent));
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    fn finish(self, trace_id: TraceId) -> Option<SimpleSpan> {
        let nodes = self
            .nodes
            .into_iter()
            .map(|n| (SimpleSpan::leaf(trace_id, n.span_id, n.tracestate), n.parent))
            .collect();
        assemble(nodes)
    }
}

fn build_trace(trace_id: TraceId, spans: Vec<&Span>) -> Result<SimpleSpan, ReconstructError> {
    let mut tree = TreeBuilder::default();
    // Spans whose parent has not been accepted yet, keyed by that parent
    let mut waiting: HashMap<SpanId, Vec<&Span>> = HashMap::new();

    for span in spans {
        if !tree.try_attach(span)? {
            if let Some(parent_id) = span.parent_span_id {
                waiting.entry(parent_id).or_default().push(span);
            }
            continue;
        }

        // Accepting a span can release children that arrived before it
        let mut released = vec![span.span_id];
        while let Some(parent_id) = released.pop() {
            for child in waiting.remove(&parent_id).unwrap_or_default() {
                if tree.try_attach(child)? {
                    released.push(child.span_id);
                }
            }
        }
    }

    if !waiting.is_empty() {
        return Err(ReconstructError::OrphanSpan);
    }
    tree.finish(trace_id).ok_or(ReconstructError::OrphanSpan)
}
