//! End-to-end pipeline tests: build a small package through the builder,
//! run the full phase sequence, and inspect the result.

use lapis::{
    Builder, CollectSink, ExprId, ExprKind, FuncKind, Literal, OptLevel, Options, Package,
    ParamOwner, Severity, ValueId, VisitResult, run_pipeline,
};

fn options() -> Options {
    Options { optimization_level: OptLevel::O2, job_count: 2, enable_compile_debug: false }
}

/// `fn foo(p: Int64): Int64 { ret p }` and `fn bar(): Int64 { foo(2) }`:
/// after the pipeline, bar carries no call to foo and the checker is
/// happy with the rewritten graph.
#[test]
fn test_pipeline_inlines_small_function() {
    let mut b = Builder::new();
    let i64t = b.int64_ty();

    let foo_ty = b.func_ty(vec![i64t], i64t);
    let foo = b.create_func("foo", foo_ty, FuncKind::Default, "demo");
    let p = b.create_parameter(i64t, ParamOwner::Func(foo));
    let foo_body = b.func_body(foo);
    let foo_entry = b.create_block(foo_body);
    let ret_alloc = b.create_allocate(i64t, foo_entry);
    let ret_slot = b.expr(ret_alloc).result.unwrap();
    b.create_store(p, ret_slot, foo_entry);
    b.create_exit(foo_entry);
    b.value_mut(foo).func_data_mut().unwrap().ret_value = Some(ret_slot);

    let bar_ty = b.func_ty(vec![], i64t);
    let bar = b.create_func("bar", bar_ty, FuncKind::Default, "demo");
    let bar_body = b.func_body(bar);
    let bar_entry = b.create_block(bar_body);
    let bar_ret_alloc = b.create_allocate(i64t, bar_entry);
    let bar_ret = b.expr(bar_ret_alloc).result.unwrap();
    let two = b.create_constant(Literal::Int(2), i64t, bar_entry);
    let two_v = b.expr(two).result.unwrap();
    let call = b.create_apply(foo, &[two_v], i64t, bar_entry);
    let call_res = b.expr(call).result.unwrap();
    b.create_store(call_res, bar_ret, bar_entry);
    b.create_exit(bar_entry);
    b.value_mut(bar).func_data_mut().unwrap().ret_value = Some(bar_ret);

    let mut pkg = Package::new("demo");
    pkg.funcs = vec![foo, bar];

    let sink = CollectSink::new();
    let ok = run_pipeline(&mut b, &mut pkg, &options(), &sink);
    assert!(ok, "pipeline rejected the package: {:?}", sink.take());
    assert_eq!(sink.error_count(), 0);

    let mut applies = 0;
    let mut pre = |bld: &Builder, e: ExprId| {
        if bld.expr(e).is_apply() {
            applies += 1;
        }
        VisitResult::Continue
    };
    let mut post = |_: &Builder, _: ExprId| VisitResult::Continue;
    lapis::visit_group_exprs(&b, b.func_body(bar), &mut pre, &mut post);
    assert_eq!(applies, 0, "bar still calls foo:\n{}", b.func_to_string(bar));
}

/// A load of a never-stored variable surfaces as a use-before-init
/// diagnostic; the pipeline itself still completes.
#[test]
fn test_pipeline_reports_use_before_init() {
    let mut b = Builder::new();
    let i64t = b.int64_ty();
    let fty = b.func_ty(vec![], i64t);
    let f = b.create_func("f", fty, FuncKind::Default, "demo");
    let body = b.func_body(f);
    let entry = b.create_block(body);
    let alloc = b.create_allocate(i64t, entry);
    let x = b.expr(alloc).result.unwrap();
    b.create_debug(x, "x", entry);
    let load = b.create_load(x, entry);
    let loaded = b.expr(load).result.unwrap();
    let ret_alloc = b.create_allocate(i64t, entry);
    let ret_slot = b.expr(ret_alloc).result.unwrap();
    b.create_store(loaded, ret_slot, entry);
    b.create_exit(entry);
    b.value_mut(f).func_data_mut().unwrap().ret_value = Some(ret_slot);

    let mut pkg = Package::new("demo");
    pkg.funcs = vec![f];

    let sink = CollectSink::new();
    let ok = run_pipeline(&mut b, &mut pkg, &options(), &sink);
    assert!(ok);
    let diags = sink.take();
    assert!(
        diags
            .iter()
            .any(|d| d.severity == Severity::Error && d.message.contains("used before being initialized")),
        "missing use-before-init diagnostic: {diags:?}"
    );
}

/// Broken predecessor symmetry is an IR invariant violation: the checker
/// rejects the package before any pass runs.
#[test]
fn test_pipeline_rejects_broken_cfg() {
    let mut b = Builder::new();
    let unit = b.unit_ty();
    let fty = b.func_ty(vec![], unit);
    let f = b.create_func("f", fty, FuncKind::Default, "demo");
    let body = b.func_body(f);
    let entry = b.create_block(body);
    let next = b.create_block(body);
    b.create_goto(next, entry);
    b.create_exit(next);
    // sever one direction of the edge
    b.block_mut(next).preds.clear();

    let mut pkg = Package::new("demo");
    pkg.funcs = vec![f];

    let sink = CollectSink::new();
    let ok = run_pipeline(&mut b, &mut pkg, &options(), &sink);
    assert!(!ok);
    assert!(sink.error_count() > 0);
}

/// Duplicate function identifiers across a package are rejected.
#[test]
fn test_pipeline_rejects_duplicate_identifiers() {
    let mut b = Builder::new();
    let unit = b.unit_ty();
    let fty = b.func_ty(vec![], unit);
    let f1 = b.create_func("same", fty, FuncKind::Default, "demo");
    let f2 = b.create_func("same", fty, FuncKind::Default, "demo");
    for f in [f1, f2] {
        let entry = b.create_block(b.func_body(f));
        b.create_exit(entry);
    }

    let mut pkg = Package::new("demo");
    pkg.funcs = vec![f1, f2];

    let sink = CollectSink::new();
    let ok = run_pipeline(&mut b, &mut pkg, &options(), &sink);
    assert!(!ok);
    let diags = sink.take();
    assert!(diags.iter().any(|d| d.message.contains("duplicated identifier")));
}

/// A spawn of a fresh future around a closure loses the future at O1+.
#[test]
fn test_pipeline_removes_redundant_future() {
    let mut b = Builder::new();
    let unit = b.unit_ty();
    let closure_ty = b.func_ty(vec![], unit);

    let class = b.create_def(lapis::CustomDef {
        src_name: "Future".into(),
        mangled_name: "_LFuture".into(),
        package: "std.core".into(),
        generic_params: vec![],
        instance_vars: vec![],
        static_vars: vec![],
        methods: vec![],
        vtable: Default::default(),
        kind: lapis::CustomDefKind::Class {
            super_class: None,
            interfaces: vec![],
            finalizer: None,
            abstract_methods: vec![],
            is_interface: false,
        },
        imported: false,
    });
    let future_ty = b.custom_ty(class, vec![]);
    let future_ref = b.ref_to(future_ty);

    let init_ty = b.func_ty(vec![future_ref, closure_ty], unit);
    let init = b.create_func("init", init_ty, FuncKind::Constructor, "std.core");
    b.value_mut(init).func_data_mut().unwrap().parent_def = Some(class);
    b.create_parameter(future_ref, ParamOwner::Func(init));
    b.create_parameter(closure_ty, ParamOwner::Func(init));
    let init_entry = b.create_block(b.func_body(init));
    b.create_exit(init_entry);
    b.def_mut(class).methods.push(init);

    let fty = b.func_ty(vec![], unit);
    let f = b.create_func("f", fty, FuncKind::Default, "demo");
    let body = b.func_body(f);
    let entry = b.create_block(body);
    let alloc = b.create_allocate(future_ty, entry);
    let future: ValueId = b.expr(alloc).result.unwrap();
    let lambda = b.create_lambda("task", closure_ty, entry);
    let lam_entry = b.create_block(b.expr(lambda).lambda_body().unwrap());
    b.create_exit(lam_entry);
    let closure = b.expr(lambda).result.unwrap();
    b.create_apply(init, &[future, closure], unit, entry);
    let spawn = b.create_spawn(future, future_ref, entry);
    b.create_exit(entry);

    let mut pkg = Package::new("demo");
    pkg.funcs = vec![f, init];
    pkg.classes = vec![class];

    let sink = CollectSink::new();
    let ok = run_pipeline(&mut b, &mut pkg, &options(), &sink);
    assert!(ok, "pipeline rejected the package: {:?}", sink.take());
    assert!(matches!(b.expr(spawn).kind, ExprKind::Spawn { execute_closure: true }));
    assert_eq!(b.expr(spawn).operands.as_slice(), &[closure]);
}
