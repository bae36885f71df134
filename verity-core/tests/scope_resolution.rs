use verity_ast::{
    ClauseDecl, ClauseKind, FacilityDecl, MathExpr, MathFunctionDecl, MathTypeDecl, ModuleDecl,
    OperationDecl, ParamMode, TypeFamilyDecl, ident,
};
use verity_core::{
    Context, Diagnostics, ErrorKind, Populator, ScopeKind, SymbolKind, Variable, populate_all,
};

fn constant(name: &str) -> MathFunctionDecl {
    MathFunctionDecl::new(name, &[], "Z")
}

fn positive(name: &str) -> ClauseDecl {
    ClauseDecl::new(ClauseKind::Constraint, MathExpr::binary(">", MathExpr::name(name), MathExpr::int(0)))
}

#[test]
fn block_local_declaration_shadows_outer_one() {
    let mut ctx = Context::new();
    let z = ctx.catalogue.integer();
    let b = ctx.types.boolean();
    let m = ctx.symbols.add_module_scope(&ident("M")).unwrap();
    let op = ctx.symbols.add_scope(m, ScopeKind::Operation);
    let block = ctx.symbols.add_scope(op, ScopeKind::Block);
    let var = |ty| {
        SymbolKind::Variable(Variable {
            ty,
            program_type: None,
            mode: None,
        })
    };
    ctx.symbols.define_symbol(op, &ident("x"), var(b)).unwrap();
    ctx.symbols.define_symbol(block, &ident("x"), var(z)).unwrap();
    ctx.symbols.define_symbol(block, &ident("only_here"), var(z)).unwrap();

    let inner = ctx.symbols.resolve(block, &ident("x")).unwrap();
    assert!(matches!(&inner.kind, SymbolKind::Variable(v) if v.ty == z));
    let outer = ctx.symbols.resolve(op, &ident("x")).unwrap();
    assert!(matches!(&outer.kind, SymbolKind::Variable(v) if v.ty == b));

    let err = ctx.symbols.resolve(op, &ident("only_here")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoSuchSymbol);
}

#[test]
fn same_name_in_two_reasoned_imports_is_ambiguous() {
    let modules = vec![
        ModuleDecl::precis("Lib1").item(constant("Max")),
        ModuleDecl::precis("Lib2").item(constant("Max")),
        ModuleDecl::concept("Client")
            .import("Lib1")
            .import("Lib2")
            .item(positive("Max")),
    ];
    let (_, populated, diags) = populate_all(&modules);
    assert_eq!(populated.len(), 3);
    assert_eq!(diags.count(ErrorKind::AmbiguousSymbol), 1);
    let err = diags.iter().next().unwrap();
    assert!(err.message.contains("Lib1") && err.message.contains("Lib2"));
}

#[test]
fn reasoned_import_is_searched_before_external() {
    let modules = vec![
        ModuleDecl::precis("Lib1").item(constant("Max")),
        ModuleDecl::precis("Lib2").item(constant("Max")),
        ModuleDecl::concept("Client")
            .import_external("Lib2")
            .import("Lib1")
            .item(positive("Max")),
    ];
    let (ctx, _, diags) = populate_all(&modules);
    assert!(diags.is_empty(), "{:?}", diags.into_vec());

    let client = ctx.symbols.module_scope("Client").unwrap();
    let lib1 = ctx.symbols.module_scope("Lib1").unwrap();
    let sym = ctx.symbols.resolve(client, &ident("Max")).unwrap();
    assert_eq!(sym.owner, lib1);
}

#[test]
fn imports_of_imports_are_not_visible() {
    let modules = vec![
        ModuleDecl::precis("Base").item(constant("Max")),
        ModuleDecl::precis("Middle").import("Base"),
        ModuleDecl::concept("Top").import("Middle").item(positive("Max")),
    ];
    let (_, _, diags) = populate_all(&modules);
    assert_eq!(diags.len(), 1);
    assert_eq!(diags.count(ErrorKind::NoSuchSymbol), 1);
}

#[test]
fn missing_import_aborts_only_that_module() {
    let modules = vec![
        ModuleDecl::concept("Broken").import("Ghost").item(positive("Max")),
        ModuleDecl::precis("Fine").item(constant("Max")),
    ];
    let (ctx, populated, diags) = populate_all(&modules);
    assert_eq!(diags.count(ErrorKind::NoSuchModule), 1);
    assert_eq!(diags.len(), 1);
    assert_eq!(populated.len(), 1);
    assert!(ctx.symbols.module_scope("Broken").is_none());
    assert!(ctx.symbols.module_scope("Fine").is_some());

    let err = ctx.symbols.require_module("Broken", ident("Broken").span).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoSuchModule);
}

#[test]
fn duplicate_operation_is_reported_and_population_continues() {
    let modules = vec![
        ModuleDecl::concept("Dup")
            .item(OperationDecl::new("Reset").param(ParamMode::Clears, "x", "Z"))
            .item(OperationDecl::new("Reset").param(ParamMode::Clears, "y", "Z"))
            .item(constant("After")),
    ];
    let (ctx, populated, diags) = populate_all(&modules);
    assert_eq!(populated.len(), 1);
    assert_eq!(diags.count(ErrorKind::DuplicateSymbol), 1);
    let scope = ctx.symbols.module_scope("Dup").unwrap();
    assert!(ctx.symbols.scope(scope).get("After").is_some());
}

#[test]
fn facility_qualifier_redirects_to_its_specification() {
    let stack = ModuleDecl::concept("Stack_Template")
        .item(TypeFamilyDecl::new("Stack", "Z", "S"))
        .item(OperationDecl::new("Clear").param(ParamMode::Clears, "S", "Stack"));
    let client = ModuleDecl::facility_module("Client").item(FacilityDecl::new(
        "Stack_Fac",
        "Stack_Template",
        Some("Array_Realiz"),
    ));

    let mut ctx = Context::new();
    let mut diags = Diagnostics::new();
    let mut populator = Populator::new(&mut ctx, &mut diags);
    populator.populate(&stack).unwrap();
    let client = populator.populate(&client).unwrap();
    assert!(diags.is_empty());

    let via_facility = ctx
        .symbols
        .resolve_qualified(client.scope, &ident("Stack_Fac"), &ident("Clear"))
        .unwrap();
    let SymbolKind::Operation(sig) = &via_facility.kind else {
        panic!("expected an operation, found {:?}", via_facility.kind);
    };
    assert_eq!(sig.qualified_name(), "Stack_Template.Clear");

    let via_module = ctx
        .symbols
        .resolve_qualified(client.scope, &ident("Stack_Template"), &ident("Clear"))
        .unwrap();
    assert_eq!(via_module.owner, via_facility.owner);

    let err = ctx
        .symbols
        .resolve_qualified(client.scope, &ident("Nowhere"), &ident("Clear"))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoSuchModule);

    let SymbolKind::Facility(f) = &ctx.symbols.resolve(client.scope, &ident("Stack_Fac")).unwrap().kind else {
        panic!("expected a facility");
    };
    assert_eq!(f.realization.as_deref(), Some("Array_Realiz"));
}

#[test]
fn realization_procedure_inherits_concept_contract() {
    let counter = ModuleDecl::concept("Counter").item(
        OperationDecl::new("Increment")
            .param(ParamMode::Updates, "i", "Z")
            .requires(MathExpr::binary("<", MathExpr::name("i"), MathExpr::int(100)))
            .ensures(MathExpr::binary(
                "=",
                MathExpr::name("i"),
                MathExpr::binary("+", MathExpr::incoming("i"), MathExpr::int(1)),
            )),
    );
    let realiz = ModuleDecl::realization("Counter_Realiz", "Counter")
        .item(OperationDecl::new("Increment").param(ParamMode::Updates, "k", "Z").body(vec![]));

    let (_, populated, diags) = populate_all(&[counter, realiz]);
    assert!(diags.is_empty(), "{:?}", diags.into_vec());
    let procedure = &populated[1].procedures[0];
    assert_eq!(procedure.sig.requires.as_ref().unwrap().to_string(), "k < 100");
    assert_eq!(procedure.sig.ensures.as_ref().unwrap().to_string(), "k = (#k + 1)");
}

#[test]
fn incoming_value_of_a_local_is_rejected() {
    let m = ModuleDecl::concept("M").item(
        OperationDecl::new("Op")
            .param(ParamMode::Updates, "x", "Z")
            .var("t", "Z")
            .ensures(MathExpr::binary("=", MathExpr::name("x"), MathExpr::incoming("t")))
            .body(vec![]),
    );
    let (_, populated, diags) = populate_all(&[m]);
    assert_eq!(diags.count(ErrorKind::TypeMismatch), 1);
    assert!(populated[0].procedures.is_empty());
}

fn math_type_in(ctx: &Context, module: &str, name: &str) -> verity_core::TypeId {
    let scope = ctx.symbols.module_scope(module).unwrap();
    match &ctx.symbols.scope(scope).get(name).unwrap().kind {
        SymbolKind::MathType(id) => *id,
        other => panic!("{name} is a {}", other.describe()),
    }
}

#[test]
fn math_types_of_different_modules_do_not_collide() {
    let modules = vec![
        ModuleDecl::precis("Left").item(MathTypeDecl::new("T", None, true)),
        ModuleDecl::precis("Right").item(MathTypeDecl::new("T", None, false)),
        ModuleDecl::precis("Below")
            .import("Right")
            .item(MathTypeDecl::new("U", Some("T"), true)),
    ];
    let (ctx, _, diags) = populate_all(&modules);
    assert!(diags.is_empty(), "{diags:?}");
    let left = math_type_in(&ctx, "Left", "T");
    let right = math_type_in(&ctx, "Right", "T");
    let below = math_type_in(&ctx, "Below", "U");
    assert_ne!(left, right);
    assert!(ctx.types.is_subtype(below, right));
    assert!(!ctx.types.is_subtype(below, left));
}

#[test]
fn supertype_must_be_visible_from_the_module() {
    let modules = vec![
        ModuleDecl::precis("Hidden").item(MathTypeDecl::new("T", None, true)),
        ModuleDecl::precis("Outside").item(MathTypeDecl::new("U", Some("T"), true)),
    ];
    let (_, _, diags) = populate_all(&modules);
    assert_eq!(diags.count(ErrorKind::UnknownSupertype), 1);
    let err = diags.iter().next().unwrap();
    assert_eq!(err.args, vec!["U".to_string(), "T".to_string()]);
}
