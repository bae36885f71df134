use std::io::Write as _;

use verity_ast::{MathExpr as M, ModuleDecl, OperationDecl, ParamMode, Stmt};
use verity_core::ErrorKind;
use verity_verify::{Pipeline, VcGenConfig};

fn trivial_op(name: &str) -> OperationDecl {
    OperationDecl::new(name)
        .param(ParamMode::Updates, "a", "Z")
        .param(ParamMode::Updates, "b", "Z")
        .ensures(M::binary("=", M::name("a"), M::incoming("b")))
        .body(vec![Stmt::call("swap", vec![M::name("a"), M::name("b")])])
}

#[test]
fn import_cycle_is_reported_and_other_modules_proceed() {
    let modules = vec![
        ModuleDecl::concept("A").import("B"),
        ModuleDecl::concept("B").import("A"),
        ModuleDecl::concept("C").item(trivial_op("Op")),
        ModuleDecl::concept("D").import("A").item(trivial_op("Op")),
    ];
    let report = Pipeline::default().run(&modules);

    assert_eq!(report.diagnostics.count(ErrorKind::CircularImport), 2);
    // D depends on the cycle and is reported as missing its import.
    assert_eq!(report.diagnostics.count(ErrorKind::NoSuchModule), 1);
    let names: Vec<&str> = report.modules.iter().map(|m| m.module.as_str()).collect();
    assert_eq!(names, vec!["C"]);
    assert_eq!(report.module("C").unwrap().vcs.len(), 1);
}

#[test]
fn external_imports_take_part_in_cycles() {
    let modules = vec![
        ModuleDecl::concept("Front").import_external("Back"),
        ModuleDecl::concept("Back").import_external("Front"),
    ];
    let report = Pipeline::default().run(&modules);
    assert_eq!(report.diagnostics.count(ErrorKind::CircularImport), 2);
    assert!(report.modules.is_empty());
}

#[test]
fn self_import_is_circular() {
    let report = Pipeline::default().run(&[ModuleDecl::concept("Loop").import("Loop")]);
    assert_eq!(report.diagnostics.count(ErrorKind::CircularImport), 1);
    assert!(report.modules.is_empty());
}

#[test]
fn vcs_export_as_json() {
    let report = Pipeline::default().run(&[ModuleDecl::concept("Swapping").item(trivial_op("Exchange"))]);
    let module = report.module("Swapping").unwrap();
    let json = module.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["module"], "Swapping");
    let vc = &value["vcs"][0];
    assert_eq!(vc["operation"], "Swapping.Exchange");
    assert_eq!(vc["sequence"], 1);
    assert_eq!(vc["rule"]["kind"], "ensures");
    assert_eq!(vc["trivial"], true);
    assert_eq!(vc["location"]["module"], "Swapping");
}

#[test]
fn vcs_render_for_humans() {
    let report = Pipeline::default().run(&[ModuleDecl::concept("Swapping").item(trivial_op("Exchange"))]);
    let text = report.module("Swapping").unwrap().vcs[0].to_string();
    assert!(text.starts_with("VC Swapping.Exchange.1: ensures clause of Exchange"));
    assert!(text.contains("prove: b = b"));
    assert!(text.ends_with("[trivial]"));
}

#[test]
fn config_file_drives_the_pipeline() {
    let mut file = std::env::temp_dir();
    file.push(format!("verity-vcgen-{}.toml", std::process::id()));
    {
        let mut f = std::fs::File::create(&file).unwrap();
        writeln!(f, "[vcgen]\nkeep_trivial = false\nparallel = true").unwrap();
    }
    let config = VcGenConfig::load(&file).unwrap();
    std::fs::remove_file(&file).unwrap();
    assert!(!config.keep_trivial);
    assert!(config.parallel);

    let report = Pipeline::new(config).run(&[ModuleDecl::concept("Swapping").item(trivial_op("Exchange"))]);
    assert!(report.module("Swapping").unwrap().vcs.is_empty());
}
