//! Call-graph construction and SCC condensation.
//!
//! The graph has one node per package function plus a synthetic entry node
//! (source of virtual edges into functions with no known callers) and exit
//! node (sink for calls to external or unknown targets). `Apply` sites add
//! DIRECT edges; `Invoke` sites add VIRTUAL edges to every callee the
//! devirtualization oracle reports, and such callees leave the entry
//! node's fan-out. Condensation is an iterative Tarjan over an explicit
//! stack; interprocedural passes consume the post-order SCC function list.

use ahash::AHashMap;
use indexmap::IndexMap;
use tracing::debug;

use crate::block::BlockGroupId;
use crate::builder::Builder;
use crate::expr::ExprKind;
use crate::package::Package;
use crate::ty::TypeId;
use crate::value::ValueId;
use crate::visitor::{VisitResult, visit_group_exprs};

/// The devirtualization oracle: possible concrete callees of a dynamic
/// dispatch, keyed by method name and instantiated parameter types.
pub trait DevirtInfo {
    fn possible_callees(&self, method_name: &str, inst_param_tys: &[TypeId]) -> Vec<ValueId>;
}

/// Placeholder oracle that knows nothing. Virtual edges then all point at
/// the exit node, which is conservative and correct.
#[derive(Debug, Default)]
pub struct NoDevirtInfo;

impl DevirtInfo for NoDevirtInfo {
    fn possible_callees(&self, _method_name: &str, _inst_param_tys: &[TypeId]) -> Vec<ValueId> {
        Vec::new()
    }
}

/// Index of a call-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Edge kinds: a direct `Apply`, or a virtual dispatch (including the
/// synthetic calls out of the entry node).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Virtual,
    Direct,
}

/// An outgoing call edge. Equality considers the target node only, which
/// lets the entry-node fan-out correction drop an edge regardless of kind.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub node: NodeId,
    pub kind: EdgeKind,
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

struct NodeData {
    func: Option<ValueId>,
    called_edges: Vec<Edge>,
}

/// The package call graph.
pub struct CallGraph {
    nodes: Vec<NodeData>,
    func_map: IndexMap<ValueId, NodeId>,
    entry: NodeId,
    exit: NodeId,
}

impl CallGraph {
    pub fn build(b: &Builder, package: &Package, devirt: &dyn DevirtInfo) -> Self {
        let mut graph = Self {
            nodes: vec![
                NodeData { func: None, called_edges: Vec::new() },
                NodeData { func: None, called_edges: Vec::new() },
            ],
            func_map: IndexMap::new(),
            entry: NodeId(0),
            exit: NodeId(1),
        };
        for func in package.global_funcs() {
            let called_by_entry = b.value(func).users.is_empty();
            graph.add_to_call_graph(b, func, called_by_entry, devirt);
        }
        graph
    }

    #[must_use]
    pub fn entry_node(&self) -> NodeId {
        self.entry
    }

    #[must_use]
    pub fn func_of(&self, node: NodeId) -> Option<ValueId> {
        self.nodes[node.index()].func
    }

    #[must_use]
    pub fn edges_of(&self, node: NodeId) -> &[Edge] {
        &self.nodes[node.index()].called_edges
    }

    fn add_to_call_graph(
        &mut self,
        b: &Builder,
        func: ValueId,
        called_by_entry: bool,
        devirt: &dyn DevirtInfo,
    ) {
        let node = self.get_or_create_node(func);
        // a function with zero uses could be called from anywhere
        if called_by_entry {
            let edge = Edge { node, kind: EdgeKind::Virtual };
            self.nodes[self.entry.index()].called_edges.push(edge);
        }
        self.populate_node(b, node, b.func_body(func), devirt);
    }

    fn get_or_create_node(&mut self, func: ValueId) -> NodeId {
        if let Some(&node) = self.func_map.get(&func) {
            return node;
        }
        let node = NodeId(u32::try_from(self.nodes.len()).expect("call graph exceeds u32"));
        self.nodes.push(NodeData { func: Some(func), called_edges: Vec::new() });
        self.func_map.insert(func, node);
        node
    }

    /// Adds edges for every call inside `group`. Calls inside lambdas
    /// count against the enclosing function's node.
    fn populate_node(&mut self, b: &Builder, node: NodeId, group: BlockGroupId, devirt: &dyn DevirtInfo) {
        let mut calls = Vec::new();
        let mut pre = |bld: &Builder, e: crate::expr::ExprId| {
            match &bld.expr(e).kind {
                ExprKind::Apply { .. } | ExprKind::Invoke { .. } => calls.push(e),
                _ => {}
            }
            VisitResult::Continue
        };
        let mut post = |_: &Builder, _: crate::expr::ExprId| VisitResult::Continue;
        visit_group_exprs(b, group, &mut pre, &mut post);

        for e in calls {
            match &b.expr(e).kind {
                ExprKind::Apply { .. } => self.add_direct_edge(b, node, e),
                ExprKind::Invoke { method_name, method_sig, .. } => {
                    let name = method_name.clone();
                    let sig = *method_sig;
                    self.add_virtual_edges(b, node, e, &name, sig, devirt);
                }
                _ => unreachable!(),
            }
        }
    }

    fn add_direct_edge(&mut self, b: &Builder, node: NodeId, e: crate::expr::ExprId) {
        let callee = b.expr(e).callee().expect("apply has a callee operand");
        let target = if b.value(callee).is_func_with_body() {
            self.get_or_create_node(callee)
        } else {
            self.exit
        };
        self.nodes[node.index()].called_edges.push(Edge { node: target, kind: EdgeKind::Direct });
    }

    fn add_virtual_edges(
        &mut self,
        b: &Builder,
        node: NodeId,
        e: crate::expr::ExprId,
        method_name: &str,
        method_sig: TypeId,
        devirt: &dyn DevirtInfo,
    ) {
        let Some(object) = b.expr(e).operands.first().copied() else { return };
        let receiver = b.strip_all_refs(b.value(object).ty);
        if !b.is_class_ty(receiver) {
            return;
        }
        let param_tys = match b.ty(method_sig) {
            crate::ty::Type::Func(sig) => sig.params.get(1..).unwrap_or_default().to_vec(),
            _ => Vec::new(),
        };
        let mut callees = devirt.possible_callees(method_name, &param_tys);
        // deterministic edge order regardless of oracle iteration order
        callees.sort_by(|a, c| b.value(*a).ident.cmp(&b.value(*c).ident));
        for callee in callees {
            let target = if b.value(callee).is_func_with_body() {
                self.get_or_create_node(callee)
            } else {
                self.exit
            };
            let edge = Edge { node: target, kind: EdgeKind::Virtual };
            // a devirtualised callee is no longer "callable from anywhere"
            self.nodes[self.entry.index()].called_edges.retain(|ed| ed.node != target);
            self.nodes[node.index()].called_edges.push(edge);
        }
    }

    /// Dumps the reachable graph through `tracing`.
    pub fn dump(&self, b: &Builder) {
        let mut stack: Vec<NodeId> = self.edges_of(self.entry).iter().map(|e| e.node).collect();
        let mut seen: ahash::AHashSet<NodeId> = stack.iter().copied().collect();
        while let Some(node) = stack.pop() {
            let Some(func) = self.func_of(node) else { continue };
            let mut line = format!("call graph found {}", b.value(func).ident_without_prefix());
            for edge in self.edges_of(node) {
                let kind = match edge.kind {
                    EdgeKind::Direct => "direct",
                    EdgeKind::Virtual => "virtual",
                };
                let name = self
                    .func_of(edge.node)
                    .map_or("unknown function", |f| b.value(f).ident_without_prefix());
                line.push_str(&format!(", {kind} call: {name}"));
                if seen.insert(edge.node) {
                    stack.push(edge.node);
                }
            }
            debug!(target: "lapis::callgraph", "{line}");
        }
    }
}

/// One frame of the iterative Tarjan DFS.
struct StackElement {
    node: NodeId,
    next_child: usize,
    min_visited: u32,
}

/// Runs the SCC condensation and exposes the post-order function list.
pub struct CallGraphAnalysis {
    /// Functions in post order of SCCs; within one SCC, the order the
    /// nodes left the SCC stack.
    pub post_order_scc_funcs: Vec<ValueId>,
    visit_num: u32,
    node_visit_numbers: AHashMap<NodeId, u32>,
    scc_node_stack: Vec<NodeId>,
    current_scc: Vec<NodeId>,
    visit_stack: Vec<StackElement>,
}

impl CallGraphAnalysis {
    #[must_use]
    pub fn new() -> Self {
        Self {
            post_order_scc_funcs: Vec::new(),
            visit_num: 0,
            node_visit_numbers: AHashMap::new(),
            scc_node_stack: Vec::new(),
            current_scc: Vec::new(),
            visit_stack: Vec::new(),
        }
    }

    /// Builds the call graph for `package` and condenses it.
    pub fn run(&mut self, b: &Builder, package: &Package, devirt: &dyn DevirtInfo, dump: bool) {
        let graph = CallGraph::build(b, package, devirt);
        self.build_scc(&graph);
        if dump {
            graph.dump(b);
        }
    }

    fn build_scc(&mut self, graph: &CallGraph) {
        self.dfs_visit_one(graph.entry_node());
        loop {
            self.next_scc(graph);
            if self.current_scc.is_empty() {
                break;
            }
            for node in &self.current_scc {
                if let Some(func) = graph.func_of(*node) {
                    self.post_order_scc_funcs.push(func);
                }
            }
        }
    }

    fn dfs_visit_one(&mut self, node: NodeId) {
        self.visit_num += 1;
        self.node_visit_numbers.insert(node, self.visit_num);
        self.scc_node_stack.push(node);
        self.visit_stack.push(StackElement { node, next_child: 0, min_visited: self.visit_num });
    }

    fn dfs_visit_children(&mut self, graph: &CallGraph) {
        loop {
            let top = self.visit_stack.last().expect("visit stack is non-empty");
            let edges = graph.edges_of(top.node);
            if top.next_child >= edges.len() {
                return;
            }
            let child = edges[top.next_child].node;
            self.visit_stack.last_mut().expect("visit stack is non-empty").next_child += 1;
            match self.node_visit_numbers.get(&child) {
                None => self.dfs_visit_one(child),
                Some(&child_num) => {
                    let top = self.visit_stack.last_mut().expect("visit stack is non-empty");
                    if top.min_visited > child_num {
                        top.min_visited = child_num;
                    }
                }
            }
        }
    }

    /// Pops the next complete SCC off the node stack.
    fn next_scc(&mut self, graph: &CallGraph) {
        self.current_scc.clear();
        while !self.visit_stack.is_empty() {
            self.dfs_visit_children(graph);

            let frame = self.visit_stack.pop().expect("visit stack is non-empty");
            let visiting = frame.node;
            let min_visit_num = frame.min_visited;

            // propagate the minimum upward so the SCC root is detectable
            if let Some(parent) = self.visit_stack.last_mut() {
                if parent.min_visited > min_visit_num {
                    parent.min_visited = min_visit_num;
                }
            }

            if min_visit_num != self.node_visit_numbers[&visiting] {
                continue;
            }

            // a full SCC sits on the node stack, down to `visiting`
            loop {
                let node = self.scc_node_stack.pop().expect("scc stack is non-empty");
                self.current_scc.push(node);
                self.node_visit_numbers.insert(node, u32::MAX);
                if node == visiting {
                    break;
                }
            }
            return;
        }
    }
}

impl Default for CallGraphAnalysis {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FuncKind;

    fn make_func(b: &mut Builder, name: &str) -> ValueId {
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func(name, fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let _entry = b.create_block(body);
        f
    }

    fn add_call(b: &mut Builder, caller: ValueId, callee: ValueId) {
        let entry = b.func_entry_block(caller);
        let unit = b.unit_ty();
        b.create_apply(callee, &[], unit, entry);
    }

    /// `main -> a`, `a -> b`, `b -> a`, `b -> c`: post order is `c`, then
    /// the `{a, b}` SCC together, then `main`. `main` has no callers, so
    /// traversal enters through the synthetic entry node.
    #[test]
    fn test_scc_post_order() {
        let mut b = Builder::new();
        let fmain = make_func(&mut b, "main");
        let fa = make_func(&mut b, "a");
        let fb = make_func(&mut b, "b");
        let fc = make_func(&mut b, "c");
        add_call(&mut b, fmain, fa);
        add_call(&mut b, fa, fb);
        add_call(&mut b, fb, fa);
        add_call(&mut b, fb, fc);
        for f in [fmain, fa, fb, fc] {
            let entry = b.func_entry_block(f);
            b.create_exit(entry);
        }

        let mut pkg = Package::new("demo");
        pkg.funcs = vec![fmain, fa, fb, fc];

        let mut analysis = CallGraphAnalysis::new();
        analysis.run(&b, &pkg, &NoDevirtInfo, false);
        let order = &analysis.post_order_scc_funcs;

        let pos_main = order.iter().position(|f| *f == fmain).expect("main in post order");
        let pos_c = order.iter().position(|f| *f == fc).expect("c in post order");
        let pos_a = order.iter().position(|f| *f == fa).expect("a in post order");
        let pos_b = order.iter().position(|f| *f == fb).expect("b in post order");
        assert!(pos_c < pos_a && pos_c < pos_b, "callee SCC must come first: {order:?}");
        assert!(pos_a < pos_main && pos_b < pos_main, "caller comes last: {order:?}");
        // a and b form one SCC: adjacent in the output
        assert_eq!(pos_a.abs_diff(pos_b), 1);
    }

    /// Property: for every DIRECT edge f -> g, either g precedes f in the
    /// post order or they share an SCC.
    #[test]
    fn test_direct_edge_ordering_property() {
        let mut b = Builder::new();
        let root = make_func(&mut b, "root");
        let f1 = make_func(&mut b, "f1");
        let f2 = make_func(&mut b, "f2");
        add_call(&mut b, root, f1);
        add_call(&mut b, f1, f2);
        for f in [root, f1, f2] {
            let entry = b.func_entry_block(f);
            b.create_exit(entry);
        }
        let mut pkg = Package::new("demo");
        pkg.funcs = vec![root, f1, f2];

        let mut analysis = CallGraphAnalysis::new();
        analysis.run(&b, &pkg, &NoDevirtInfo, false);
        let order = &analysis.post_order_scc_funcs;
        let pos_root = order.iter().position(|f| *f == root).unwrap();
        let pos1 = order.iter().position(|f| *f == f1).unwrap();
        let pos2 = order.iter().position(|f| *f == f2).unwrap();
        assert!(pos2 < pos1 && pos1 < pos_root);
    }
}
