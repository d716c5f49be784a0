//! Concurrent class relationship graph.
//!
//! Nodes live in a sharded [`DashMap`] keyed by dotted class name. Each
//! undirected relationship is stored once, on the node whose name sorts
//! first, and weights from repeated discoveries are summed.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::classfile::{RelationshipFact, RelationshipKind};
use crate::origin::{ClassOrigin, ClassOriginResolver};

#[derive(Debug)]
pub struct ClassNode {
    identity: String,
    origin: ClassOrigin,
    position: RwLock<[f32; 3]>,
    relationships: DashMap<String, f32>,
}

impl ClassNode {
    fn new(identity: String, origin: ClassOrigin) -> Self {
        Self {
            identity,
            origin,
            position: RwLock::new([0.0; 3]),
            relationships: DashMap::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn origin(&self) -> ClassOrigin {
        self.origin
    }

    pub fn color(&self) -> [f32; 3] {
        self.origin.color()
    }

    pub fn package_name(&self) -> &str {
        match self.identity.rfind('.') {
            Some(dot) => &self.identity[..dot],
            None => "",
        }
    }

    pub fn simple_name(&self) -> &str {
        match self.identity.rfind('.') {
            Some(dot) => &self.identity[dot + 1..],
            None => &self.identity,
        }
    }

    pub fn position(&self) -> [f32; 3] {
        *self.position.read()
    }

    pub(crate) fn translate(&self, delta: [f32; 3]) {
        let mut pos = self.position.write();
        pos[0] += delta[0];
        pos[1] += delta[1];
        pos[2] += delta[2];
    }

    /// Relationships stored on this node: only partners whose name sorts
    /// after this node's own name.
    pub fn relationships(&self) -> Vec<(String, f32)> {
        self.relationships
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            identity: self.identity.clone(),
            origin: self.origin,
            position: self.position(),
            relationships: self.relationships().into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub identity: String,
    pub origin: ClassOrigin,
    pub position: [f32; 3],
    pub relationships: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub a: String,
    pub b: String,
    pub weight: f32,
}

pub struct DependencyGraph {
    nodes: DashMap<String, Arc<ClassNode>>,
    resolver: ClassOriginResolver,
}

impl DependencyGraph {
    pub fn new(resolver: ClassOriginResolver) -> Self {
        Self {
            nodes: DashMap::new(),
            resolver,
        }
    }

    pub fn resolver(&self) -> &ClassOriginResolver {
        &self.resolver
    }

    /// Returns the node for `identity`, creating it if absent. Concurrent
    /// callers racing on the same key all get the same node.
    pub fn ensure_node(&self, identity: &str) -> Arc<ClassNode> {
        if let Some(node) = self.nodes.get(identity) {
            return Arc::clone(node.value());
        }

        // Resolve outside the shard lock; it may touch the filesystem.
        let origin = self.resolver.resolve(identity);
        let entry = self
            .nodes
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(ClassNode::new(identity.to_string(), origin)));
        Arc::clone(entry.value())
    }

    pub fn add_fact(&self, fact: &RelationshipFact) {
        self.add_relationship(&fact.source, &fact.target, fact.kind);
    }

    /// Records one relationship between `a` and `b`, creating both nodes
    /// first. Self relationships create the node but no edge.
    pub fn add_relationship(&self, a: &str, b: &str, kind: RelationshipKind) {
        let node_a = self.ensure_node(a);
        if a == b {
            return;
        }
        let node_b = self.ensure_node(b);

        let weight = kind.weight();
        if weight <= 0.0 {
            return;
        }

        let (owner, partner) = if a < b {
            (node_a, b)
        } else {
            (node_b, a)
        };
        owner
            .relationships
            .entry(partner.to_string())
            .and_modify(|w| *w += weight)
            .or_insert(weight);
    }

    /// Accumulated weight between two classes, in either argument order.
    pub fn attraction_between(&self, a: &str, b: &str) -> f32 {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        self.nodes
            .get(first)
            .and_then(|node| node.relationships.get(second).map(|w| *w))
            .unwrap_or(0.0)
    }

    pub fn get(&self, identity: &str) -> Option<Arc<ClassNode>> {
        self.nodes.get(identity).map(|n| Arc::clone(n.value()))
    }

    /// Live node handles. The list is a point-in-time copy of the key set,
    /// but positions read through the handles stay current.
    pub fn nodes(&self) -> Vec<Arc<ClassNode>> {
        self.nodes.iter().map(|n| Arc::clone(n.value())).collect()
    }

    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        let mut nodes: Vec<NodeSnapshot> = self.nodes.iter().map(|n| n.snapshot()).collect();
        nodes.sort_by(|a, b| a.identity.cmp(&b.identity));
        nodes
    }

    pub fn edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .nodes
            .iter()
            .flat_map(|n| {
                let a = n.identity.clone();
                n.relationships()
                    .into_iter()
                    .map(move |(b, weight)| Edge {
                        a: a.clone(),
                        b,
                        weight,
                    })
            })
            .collect();
        edges.sort_by(|x, y| x.a.cmp(&y.a).then_with(|| x.b.cmp(&y.b)));
        edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.relationships.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
