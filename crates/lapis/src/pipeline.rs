//! The pass pipeline: phase ordering, options, and the package driver.
//!
//! Phases run `Raw -> Plugin -> Analysis -> Opt`. Between phases the
//! well-formedness checker validates the package; a failure aborts the
//! pipeline and later phases do not run. Optimisation passes mutate the
//! graph in place; the interprocedural ones walk functions in post-order
//! over call-graph SCCs.

use strum::{Display, IntoStaticStr};
use tracing::{debug, info_span};

use crate::analysis::call_graph::{CallGraphAnalysis, DevirtInfo, NoDevirtInfo};
use crate::builder::Builder;
use crate::checker;
use crate::checker::var_init::VarInitCheck;
use crate::diag::DiagSink;
use crate::package::Package;
use crate::transform;
use crate::transform::function_inline::FunctionInline;

/// Pipeline phases; checker rules are gated on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, IntoStaticStr)]
pub enum Phase {
    Raw,
    Plugin,
    Analysis,
    AnalysisForLint,
    Opt,
}

/// Optimisation levels. `Os` optimises for size; threshold boosts that
/// grow code are disabled there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, IntoStaticStr)]
pub enum OptLevel {
    O0,
    O1,
    O2,
    Os,
}

/// The options record recognised by the middle end.
#[derive(Debug, Clone)]
pub struct Options {
    pub optimization_level: OptLevel,
    /// Worker threads for the parallel checkers.
    pub job_count: usize,
    /// Tightens the `Debug` expression's reference-depth check.
    pub enable_compile_debug: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self { optimization_level: OptLevel::O2, job_count: 1, enable_compile_debug: false }
    }
}

impl Options {
    #[must_use]
    pub fn optimizations_enabled(&self) -> bool {
        self.optimization_level >= OptLevel::O1
    }
}

/// Runs the middle-end pipeline over `package`, mutating it in place.
/// Returns `false` (with diagnostics in the sink) when a checker gate
/// rejects the package.
pub fn run_pipeline(
    b: &mut Builder,
    package: &mut Package,
    opts: &Options,
    sink: &dyn DiagSink,
) -> bool {
    run_pipeline_with_devirt(b, package, opts, sink, &NoDevirtInfo)
}

/// Like [`run_pipeline`], with an explicit devirtualization oracle for the
/// call-graph construction.
pub fn run_pipeline_with_devirt(
    b: &mut Builder,
    package: &mut Package,
    opts: &Options,
    sink: &dyn DiagSink,
    devirt: &dyn DevirtInfo,
) -> bool {
    let span = info_span!("pipeline", package = %package.name);
    let _enter = span.enter();

    if !checker::check_package(b, package, opts, Phase::Raw, sink) {
        return false;
    }

    transform::mark_inited::run_on_package(b, package);
    if !checker::check_package(b, package, opts, Phase::Plugin, sink) {
        return false;
    }

    VarInitCheck::new(sink).run_on_package(b, package, opts.job_count);
    if !checker::check_package(b, package, opts, Phase::Analysis, sink) {
        return false;
    }

    transform::box_recursion::run_on_package(b, package);
    transform::flatten_for_in::run_on_package(b, package);
    transform::unit_unify::run_on_package(b, package);

    if opts.optimizations_enabled() {
        let mut call_graph = CallGraphAnalysis::new();
        call_graph.run(b, package, devirt, false);
        debug!(target: "lapis::pipeline", funcs = call_graph.post_order_scc_funcs.len(), "scc post order");

        let mut inliner = FunctionInline::new(opts.optimization_level);
        for func in call_graph.post_order_scc_funcs.clone() {
            inliner.run(b, func);
        }
        transform::lambda_inline::run_on_package(b, package, &mut inliner);
        transform::array_lambda::run_on_package(b, package);
        transform::redundant_future::run_on_package(b, package);
    }

    transform::useless_allocate::run_on_package(b, package);
    transform::get_ref_to_elem::run_on_package(b, package);

    checker::check_package(b, package, opts, Phase::Opt, sink)
}
