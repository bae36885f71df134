use verity_ast::{
    ClauseDecl, ClauseKind, FacilityDecl, MathExpr as M, MathFunctionDecl, ModuleDecl, OperationDecl,
    ParamMode, Stmt, TypeFamilyDecl,
};
use verity_core::ErrorKind;
use verity_verify::{Pipeline, PipelineReport, VcGenConfig, VcRule, VerificationCondition};

fn run(modules: Vec<ModuleDecl>) -> PipelineReport {
    Pipeline::default().run(&modules)
}

fn run_with(config: VcGenConfig, modules: Vec<ModuleDecl>) -> PipelineReport {
    Pipeline::new(config).run(&modules)
}

fn vcs<'a>(report: &'a PipelineReport, module: &str) -> &'a [VerificationCondition] {
    &report.module(module).expect("module was populated").vcs
}

fn givens(vc: &VerificationCondition) -> Vec<String> {
    vc.antecedent.iter().map(|e| e.to_string()).collect()
}

fn swap_entries() -> ModuleDecl {
    ModuleDecl::concept("Swapping").item(
        OperationDecl::new("Swap_Entries")
            .param(ParamMode::Restores, "E1", "Z")
            .param(ParamMode::Restores, "E2", "Z")
            .ensures(M::and(
                M::binary("=", M::name("E1"), M::incoming("E2")),
                M::binary("=", M::name("E2"), M::incoming("E1")),
            ))
            .body(vec![Stmt::call("swap", vec![M::name("E1"), M::name("E2")])]),
    )
}

#[test]
fn swap_entries_yields_one_trivial_vc() {
    let report = run(vec![swap_entries()]);
    assert!(report.diagnostics.is_empty());
    let vcs = vcs(&report, "Swapping");
    assert_eq!(vcs.len(), 1);
    let vc = &vcs[0];
    assert_eq!(vc.operation, "Swapping.Swap_Entries");
    assert_eq!(vc.sequence, 1);
    assert_eq!(vc.rule, VcRule::Ensures);
    assert_eq!(vc.consequent.to_string(), "(E2 = E2) ∧ (E1 = E1)");
    assert!(vc.trivial);
}

#[test]
fn callers_of_a_restoring_swap_see_the_exchanged_values() {
    let m = swap_entries().item(
        OperationDecl::new("Make_Equal")
            .param(ParamMode::Updates, "a", "Z")
            .param(ParamMode::Updates, "b", "Z")
            .ensures(M::binary("=", M::name("a"), M::name("b")))
            .body(vec![Stmt::call("Swap_Entries", vec![M::name("a"), M::name("b")])]),
    );
    let report = run(vec![m]);
    assert!(report.diagnostics.is_empty());
    let vcs: Vec<_> = vcs(&report, "Swapping")
        .iter()
        .filter(|v| v.operation == "Swapping.Make_Equal")
        .collect();
    assert_eq!(vcs.len(), 1);
    assert_eq!(givens(vcs[0]), vec!["a' = b", "b' = a"]);
    assert_eq!(vcs[0].consequent.to_string(), "a' = b'");
    assert!(!vcs[0].trivial);
}

#[test]
fn swap_substitutes_simultaneously() {
    let m = ModuleDecl::concept("Order").item(
        OperationDecl::new("Flip")
            .param(ParamMode::Updates, "r1", "Z")
            .param(ParamMode::Updates, "r2", "Z")
            .requires(M::binary(">", M::name("r1"), M::name("r2")))
            .ensures(M::binary(">", M::name("r2"), M::name("r1")))
            .body(vec![Stmt::call("swap", vec![M::name("r1"), M::name("r2")])]),
    );
    let report = run(vec![m]);
    let vc = &vcs(&report, "Order")[0];
    assert_eq!(vc.consequent.to_string(), "r1 > r2");
    assert_ne!(vc.consequent.to_string(), "r1 > r1");
    assert!(vc.trivial);
}

fn arith() -> ModuleDecl {
    ModuleDecl::concept("Arith")
        .item(
            OperationDecl::new("Increment")
                .param(ParamMode::Updates, "i", "Z")
                .requires(M::binary("<", M::name("i"), M::int(100)))
                .ensures(M::binary("=", M::name("i"), M::binary("+", M::incoming("i"), M::int(1)))),
        )
        .item(
            OperationDecl::new("Add_Two")
                .param(ParamMode::Updates, "n", "Z")
                .requires(M::binary("<", M::name("n"), M::int(50)))
                .ensures(M::binary("=", M::name("n"), M::binary("+", M::incoming("n"), M::int(2))))
                .body(vec![
                    Stmt::call("Increment", vec![M::name("n")]),
                    Stmt::call("Increment", vec![M::name("n")]),
                ]),
        )
}

#[test]
fn call_rule_renames_changed_actuals() {
    let report = run(vec![arith()]);
    assert!(report.diagnostics.is_empty());
    let vcs = vcs(&report, "Arith");
    assert_eq!(vcs.len(), 3);

    let callee = VcRule::CallRequires {
        callee: "Arith.Increment".to_string(),
    };
    assert_eq!(vcs[0].rule, callee);
    assert_eq!(givens(&vcs[0]), vec!["n < 50"]);
    assert_eq!(vcs[0].consequent.to_string(), "n < 100");

    assert_eq!(vcs[1].rule, callee);
    assert_eq!(givens(&vcs[1]), vec!["n < 50", "n'' = (n + 1)"]);
    assert_eq!(vcs[1].consequent.to_string(), "n'' < 100");

    assert_eq!(vcs[2].rule, VcRule::Ensures);
    assert_eq!(
        givens(&vcs[2]),
        vec!["n < 50", "n'' = (n + 1)", "n' = (n'' + 1)"]
    );
    assert_eq!(vcs[2].consequent.to_string(), "n' = (n + 2)");

    assert_eq!(vcs.iter().map(|v| v.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(vcs.iter().all(|v| !v.trivial));
}

#[test]
fn preserved_actuals_keep_their_name() {
    let m = ModuleDecl::concept("Peek")
        .item(
            OperationDecl::new("Is_Positive")
                .param(ParamMode::Preserves, "x", "Z")
                .param(ParamMode::Replaces, "r", "B")
                .ensures(M::binary("=", M::name("r"), M::binary(">", M::name("x"), M::int(0)))),
        )
        .item(
            OperationDecl::new("Check")
                .param(ParamMode::Preserves, "v", "Z")
                .param(ParamMode::Replaces, "ok", "B")
                .ensures(M::binary("=", M::name("ok"), M::binary(">", M::name("v"), M::int(0))))
                .body(vec![Stmt::call("Is_Positive", vec![M::name("v"), M::name("ok")])]),
        );
    let report = run(vec![m]);
    assert!(report.diagnostics.is_empty());
    let vcs = vcs(&report, "Peek");
    assert_eq!(vcs.len(), 1);
    assert_eq!(givens(&vcs[0]), vec!["ok' = (v > 0)"]);
    assert_eq!(vcs[0].consequent.to_string(), "ok' = (v > 0)");
    assert!(vcs[0].trivial);
}

#[test]
fn conditional_guards_both_branches() {
    let m = ModuleDecl::concept("Clamp").item(
        OperationDecl::new("Clamp")
            .param(ParamMode::Updates, "x", "Z")
            .ensures(M::binary("≤", M::name("x"), M::int(10)))
            .body(vec![Stmt::if_then(
                M::binary(">", M::name("x"), M::int(10)),
                vec![Stmt::call("assign", vec![M::name("x"), M::int(10)])],
                None,
            )]),
    );
    let report = run(vec![m]);
    assert!(report.diagnostics.is_empty());
    let vcs = vcs(&report, "Clamp");
    assert_eq!(vcs.len(), 2);

    assert_eq!(givens(&vcs[0]), vec!["x > 10"]);
    assert_eq!(vcs[0].consequent.to_string(), "10 ≤ 10");
    assert!(vcs[0].trivial);

    assert_eq!(givens(&vcs[1]), vec!["¬(x > 10)"]);
    assert_eq!(vcs[1].consequent.to_string(), "x ≤ 10");
    assert!(!vcs[1].trivial);
}

#[test]
fn assume_guards_and_confirm_adds_obligations() {
    let m = ModuleDecl::concept("Steps").item(
        OperationDecl::new("Step")
            .param(ParamMode::Updates, "x", "Z")
            .body(vec![
                Stmt::assume(M::binary(">", M::name("x"), M::int(0))),
                Stmt::confirm(M::binary(">", M::name("x"), M::int(0))),
                Stmt::confirm(M::binary("<", M::name("x"), M::int(7))),
            ]),
    );
    let report = run(vec![m]);
    let vcs = vcs(&report, "Steps");
    let rules: Vec<&VcRule> = vcs.iter().map(|v| &v.rule).collect();
    assert_eq!(rules, vec![&VcRule::Confirm, &VcRule::Confirm, &VcRule::Ensures]);

    assert!(vcs[0].trivial);
    assert_eq!(vcs[1].consequent.to_string(), "x < 7");
    assert_eq!(givens(&vcs[1]), vec!["x > 0"]);
    assert!(!vcs[1].trivial);
    // No ensures clause: the final obligation is `true`.
    assert!(vcs[2].trivial);
}

#[test]
fn type_family_constraints_and_initialization_are_assumed() {
    let counter = ModuleDecl::concept("Counter_Template")
        .item(
            TypeFamilyDecl::new("Counter", "Z", "c")
                .constraint(M::binary("≥", M::name("c"), M::int(0)))
                .initialization(M::binary("=", M::name("c"), M::int(0))),
        )
        .item(
            OperationDecl::new("Reset")
                .param(ParamMode::Updates, "p", "Counter")
                .var("t", "Counter")
                .ensures(M::binary("=", M::name("p"), M::int(0)))
                .body(vec![Stmt::call("swap", vec![M::name("p"), M::name("t")])]),
        );
    let report = run(vec![counter]);
    assert!(report.diagnostics.is_empty());
    let vc = &vcs(&report, "Counter_Template")[0];
    assert_eq!(givens(vc), vec!["p ≥ 0", "t = 0"]);
    assert_eq!(vc.consequent.to_string(), "t = 0");
    assert!(vc.trivial);
}

#[test]
fn facility_calls_use_the_specification_contract() {
    let template = ModuleDecl::concept("Counter_Template")
        .item(TypeFamilyDecl::new("Counter", "Z", "c").constraint(M::binary("≥", M::name("c"), M::int(0))))
        .item(
            OperationDecl::new("Increment")
                .param(ParamMode::Updates, "c", "Counter")
                .requires(M::binary("<", M::name("c"), M::int(10)))
                .ensures(M::binary("=", M::name("c"), M::binary("+", M::incoming("c"), M::int(1)))),
        );
    let client = ModuleDecl::facility_module("Client")
        .item(FacilityDecl::new("Counter_Fac", "Counter_Template", None))
        .item(
            OperationDecl::new("Bump")
                .param(ParamMode::Updates, "k", "Counter")
                .requires(M::binary("<", M::name("k"), M::int(5)))
                .ensures(M::binary("=", M::name("k"), M::binary("+", M::incoming("k"), M::int(1))))
                .body(vec![Stmt::qualified_call("Counter_Fac", "Increment", vec![M::name("k")])]),
        );
    // Input order does not matter; the pipeline sorts by imports.
    let report = run(vec![client, template]);
    assert!(report.diagnostics.is_empty());
    let vcs = vcs(&report, "Client");
    assert_eq!(vcs.len(), 2);
    assert_eq!(
        vcs[0].rule,
        VcRule::CallRequires {
            callee: "Counter_Template.Increment".to_string()
        }
    );
    assert_eq!(givens(&vcs[0]), vec!["k ≥ 0", "k < 5"]);
    assert_eq!(vcs[0].consequent.to_string(), "k < 10");
    assert!(vcs[1].trivial);
}

fn invariant(kind: ClauseKind, name: &str) -> ClauseDecl {
    ClauseDecl::new(kind, M::binary(">", M::apply(name, vec![]), M::int(0))).named(name)
}

#[test]
fn external_imports_contribute_no_assumptions() {
    let modules = vec![
        ModuleDecl::precis("Deep")
            .item(MathFunctionDecl::new("D", &[], "Z"))
            .item(invariant(ClauseKind::Constraint, "D")),
        ModuleDecl::concept("Spec1")
            .import("Deep")
            .item(MathFunctionDecl::new("I", &[], "Z"))
            .item(invariant(ClauseKind::Invariant, "I")),
        ModuleDecl::precis("Hidden")
            .item(MathFunctionDecl::new("H", &[], "Z"))
            .item(invariant(ClauseKind::Constraint, "H")),
        ModuleDecl::concept("Lib1")
            .import("Hidden")
            .item(MathFunctionDecl::new("L", &[], "Z"))
            .item(invariant(ClauseKind::Invariant, "L")),
        ModuleDecl::concept("Client")
            .import("Spec1")
            .import_external("Lib1")
            .item(OperationDecl::new("Noop").param(ParamMode::Preserves, "x", "Z").body(vec![])),
    ];
    let report = run(modules);
    assert!(report.diagnostics.is_empty());
    let vc = &vcs(&report, "Client")[0];
    assert_eq!(givens(vc), vec!["I > 0", "D > 0"]);
}

#[test]
fn a_failing_procedure_does_not_stop_the_others() {
    let m = arith().item(
        OperationDecl::new("Bad")
            .param(ParamMode::Updates, "n", "Z")
            .body(vec![Stmt::call("Increment", vec![M::binary("+", M::name("n"), M::int(1))])]),
    );
    let report = run(vec![m]);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics.count(ErrorKind::TypeMismatch), 1);
    let vcs = vcs(&report, "Arith");
    assert_eq!(vcs.len(), 3);
    assert!(vcs.iter().all(|v| v.operation == "Arith.Add_Two"));
}

#[test]
fn trivial_vcs_can_be_dropped() {
    let config = VcGenConfig {
        keep_trivial: false,
        ..VcGenConfig::default()
    };
    let report = run_with(config, vec![swap_entries(), arith()]);
    assert!(vcs(&report, "Swapping").is_empty());
    assert_eq!(vcs(&report, "Arith").len(), 3);
}

#[test]
fn conjuncts_can_be_split() {
    let config = VcGenConfig {
        split_conjuncts: true,
        ..VcGenConfig::default()
    };
    let report = run_with(config, vec![swap_entries()]);
    let vcs = vcs(&report, "Swapping");
    let shown: Vec<String> = vcs.iter().map(|v| v.consequent.to_string()).collect();
    assert_eq!(shown, vec!["E2 = E2", "E1 = E1"]);
    assert_eq!(vcs[1].sequence, 2);
}

#[test]
fn parallel_generation_matches_sequential() {
    let parallel = VcGenConfig {
        parallel: true,
        ..VcGenConfig::default()
    };
    let a = run(vec![arith(), swap_entries()]);
    let b = run_with(parallel, vec![arith(), swap_entries()]);
    for module in ["Arith", "Swapping"] {
        assert_eq!(vcs(&a, module), vcs(&b, module));
    }
}

fn drain(body: Stmt) -> ModuleDecl {
    ModuleDecl::concept("Loops").item(
        OperationDecl::new("Drain")
            .param(ParamMode::Updates, "n", "Z")
            .requires(M::binary("≥", M::name("n"), M::int(0)))
            .ensures(M::binary("=", M::name("n"), M::int(0)))
            .body(vec![body]),
    )
}

fn count_down() -> Vec<Stmt> {
    vec![Stmt::call("assign", vec![M::name("n"), M::binary("-", M::name("n"), M::int(1))])]
}

#[test]
fn while_loop_yields_entry_maintenance_termination_and_exit() {
    let body = Stmt::while_loop(M::binary(">", M::name("n"), M::int(0)), count_down())
        .changing(&["n"])
        .maintaining(M::binary("≥", M::name("n"), M::int(0)))
        .decreasing(M::name("n"));
    let report = run(vec![drain(body)]);
    assert!(report.diagnostics.is_empty());
    let vcs = vcs(&report, "Loops");
    let rules: Vec<&VcRule> = vcs.iter().map(|v| &v.rule).collect();
    assert_eq!(
        rules,
        vec![
            &VcRule::InvariantEntry,
            &VcRule::InvariantMaintained,
            &VcRule::Termination,
            &VcRule::Ensures
        ]
    );

    assert_eq!(givens(&vcs[0]), vec!["n ≥ 0"]);
    assert_eq!(vcs[0].consequent.to_string(), "n ≥ 0");
    assert!(vcs[0].trivial);

    let iteration = vec!["n ≥ 0", "n' ≥ 0", "n' > 0", "P_Val = n'"];
    assert_eq!(givens(&vcs[1]), iteration);
    assert_eq!(vcs[1].consequent.to_string(), "(n' - 1) ≥ 0");
    assert!(!vcs[1].trivial);

    assert_eq!(givens(&vcs[2]), iteration);
    assert_eq!(vcs[2].consequent.to_string(), "(n' - 1) < P_Val");
    assert_eq!(vcs[2].description, "loop termination (in Drain)");

    assert_eq!(givens(&vcs[3]), vec!["n ≥ 0", "n' ≥ 0", "¬(n' > 0)"]);
    assert_eq!(vcs[3].consequent.to_string(), "n' = 0");
}

#[test]
fn loop_without_clauses_only_guards_what_follows() {
    let body = Stmt::while_loop(M::binary(">", M::name("n"), M::int(0)), count_down());
    let report = run(vec![drain(body)]);
    assert!(report.diagnostics.is_empty());
    let vcs = vcs(&report, "Loops");
    assert_eq!(vcs.len(), 1);
    assert_eq!(vcs[0].rule, VcRule::Ensures);
    // The changed variable is inferred from the body and havocked.
    assert_eq!(givens(&vcs[0]), vec!["n ≥ 0", "¬(n' > 0)"]);
    assert_eq!(vcs[0].consequent.to_string(), "n' = 0");
}

#[test]
fn changing_clause_must_cover_the_body() {
    let m = ModuleDecl::concept("Loops").item(
        OperationDecl::new("Drain_Both")
            .param(ParamMode::Updates, "n", "Z")
            .param(ParamMode::Updates, "m", "Z")
            .body(vec![Stmt::while_loop(
                M::binary(">", M::name("n"), M::int(0)),
                vec![
                    Stmt::call("assign", vec![M::name("n"), M::binary("-", M::name("n"), M::int(1))]),
                    Stmt::call("assign", vec![M::name("m"), M::name("n")]),
                ],
            )
            .changing(&["n"])]),
    );
    let report = run(vec![m]);
    assert_eq!(report.diagnostics.count(ErrorKind::TypeMismatch), 1);
    let err = report.diagnostics.iter().next().unwrap();
    assert!(err.message.contains("'m'"));
    assert!(vcs(&report, "Loops").is_empty());
}

fn counters() -> ModuleDecl {
    ModuleDecl::concept("Counters")
        .item(TypeFamilyDecl::new("Counter", "Z", "c").initialization(M::binary("=", M::name("c"), M::int(0))))
        .item(
            OperationDecl::new("Clear")
                .param(ParamMode::Clears, "p", "Counter")
                .body(vec![]),
        )
        .item(
            OperationDecl::new("Use")
                .param(ParamMode::Updates, "q", "Counter")
                .ensures(M::binary("=", M::name("q"), M::int(0)))
                .body(vec![Stmt::call("Clear", vec![M::name("q")])]),
        )
}

#[test]
fn clears_parameters_owe_their_initial_value() {
    let report = run(vec![counters()]);
    assert!(report.diagnostics.is_empty());
    let vc = report.module("Counters").unwrap().for_operation("Counters.Clear").next().unwrap();
    assert_eq!(vc.rule, VcRule::Ensures);
    assert_eq!(vc.consequent.to_string(), "p = 0");
    assert!(!vc.trivial);
}

#[test]
fn callers_may_assume_a_cleared_argument_is_initial() {
    let report = run(vec![counters()]);
    let vc = report.module("Counters").unwrap().for_operation("Counters.Use").next().unwrap();
    assert_eq!(givens(vc), vec!["q' = 0"]);
    assert_eq!(vc.consequent.to_string(), "q' = 0");
    assert!(vc.trivial);
}

#[test]
fn fresh_names_avoid_module_constants() {
    let m = ModuleDecl::concept("Limits")
        .item(MathFunctionDecl::new("n'", &[], "Z"))
        .item(
            OperationDecl::new("Increment")
                .param(ParamMode::Updates, "i", "Z")
                .ensures(M::binary("=", M::name("i"), M::binary("+", M::incoming("i"), M::int(1)))),
        )
        .item(
            OperationDecl::new("Bump")
                .param(ParamMode::Updates, "n", "Z")
                .requires(M::binary("<", M::name("n"), M::apply("n'", vec![])))
                .ensures(M::binary("=", M::name("n"), M::binary("+", M::incoming("n"), M::int(1))))
                .body(vec![Stmt::call("Increment", vec![M::name("n")])]),
        );
    let report = run(vec![m]);
    assert!(report.diagnostics.is_empty());
    let vc = &vcs(&report, "Limits")[0];
    assert_eq!(givens(vc), vec!["n < n'", "n'' = (n + 1)"]);
    assert_eq!(vc.consequent.to_string(), "n'' = (n + 1)");
}

fn incoming_misuse(stmt: Stmt) -> PipelineReport {
    let m = arith().item(
        OperationDecl::new("Misuse")
            .param(ParamMode::Updates, "x", "Z")
            .param(ParamMode::Updates, "y", "Z")
            .body(vec![stmt]),
    );
    run(vec![m])
}

#[test]
fn incoming_values_cannot_be_changed() {
    for stmt in [
        Stmt::call("swap", vec![M::incoming("x"), M::name("y")]),
        Stmt::call("assign", vec![M::incoming("x"), M::int(1)]),
        Stmt::call("Increment", vec![M::incoming("x")]),
    ] {
        let report = incoming_misuse(stmt);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics.count(ErrorKind::TypeMismatch), 1);
        let err = report.diagnostics.iter().next().unwrap();
        assert!(err.message.contains("#x"), "{}", err.message);
        assert!(vcs(&report, "Arith").iter().all(|v| v.operation == "Arith.Add_Two"));
    }
}
