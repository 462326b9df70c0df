use std::path::PathBuf;

use karst::{ErrorKind, ModuleFile, SerializedNamespace, Session, Span};

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("karst-modfile-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir is writable");
    dir
}

fn write_geo_module(dir: &PathBuf) {
    let mut writer = Session::new();
    let ok = writer.compile_str(
        "(module geo)\n\
         (def Pair (struct extern ((a int) (b int))))\n\
         (def origin (var extern int 0))\n\
         (def twice (fn extern int ((x int)) (+ x x)))",
        "geo.ka",
    );
    assert!(ok, "writer diagnostics: {:?}", writer.diagnostics());
    writer.write_module(dir).expect("module file written");
}

#[test]
fn modules_round_trip_through_import() {
    let dir = temp_dir("import");
    write_geo_module(&dir);

    let mut reader = Session::new();
    reader.module_paths.push(dir);
    let ok = reader.compile_str(
        "(import geo)\n\
         (def main (fn intern int (void) (twice origin)))",
        "main.ka",
    );
    assert!(ok, "reader diagnostics: {:?}", reader.diagnostics());
    // The imported function exists as a declaration bound to its original
    // mangled name.
    assert!(reader.ir.get_function("_Z5twicei").is_some());
    assert!(reader.ir.get_global("_Z6origin").is_some());
}

#[test]
fn import_with_form_list_prunes_everything_else() {
    let dir = temp_dir("prune");
    write_geo_module(&dir);

    let mut reader = Session::new();
    reader.module_paths.push(dir);
    let ok = reader.compile_str(
        "(import geo (Pair))\n\
         (def main (fn intern int (void) (twice 1)))",
        "main.ka",
    );
    assert!(!ok);
    assert!(
        reader.diagnostics().iter().any(|d| d.kind == ErrorKind::NotInScope),
        "{:?}",
        reader.diagnostics()
    );
}

#[test]
fn import_of_a_missing_form_is_reported() {
    let dir = temp_dir("missing-form");
    write_geo_module(&dir);

    let mut reader = Session::new();
    reader.module_paths.push(dir);
    let ok = reader.compile_str("(import geo (missing))", "main.ka");
    assert!(!ok);
    assert!(
        reader
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::ModuleDoesNotProvideForms),
        "{:?}",
        reader.diagnostics()
    );
}

#[test]
fn missing_modules_are_reported() {
    let mut reader = Session::new();
    let ok = reader.compile_str("(import nosuchmodule)", "main.ka");
    assert!(!ok);
    assert!(
        reader.diagnostics().iter().any(|d| d.kind == ErrorKind::CannotFindModule),
        "{:?}",
        reader.diagnostics()
    );
}

#[test]
fn once_tags_union_across_imports_and_guard_inclusion() {
    let module = ModuleFile {
        name: "guarded".to_owned(),
        root: SerializedNamespace {
            name: ".".to_owned(),
            functions: vec![],
            variables: vec![],
            structs: vec![],
            enums: vec![],
            children: vec![],
        },
        once_tags: vec!["guard-tag".to_owned()],
        imports: vec![],
        cto: false,
        typemap: vec![],
    };
    let mut session = Session::new();
    session.import_module(&module, None, Span::default()).expect("import succeeds");
    assert!(session.once_tags.contains("guard-tag"));

    // A file guarded by the same tag is skipped wholesale.
    let ok = session.compile_str("(once guard-tag)\n(def zzz (var intern int 1))", "again.ka");
    assert!(ok, "{:?}", session.diagnostics());
    assert!(session.ir.get_global("_Z3zzz").is_none(), "guarded definitions are skipped");
}

#[test]
fn invalid_module_names_are_rejected() {
    let mut session = Session::new();
    let ok = session.compile_str("(module \"bad name\")", "main.ka");
    assert!(!ok);
    assert!(
        session.diagnostics().iter().any(|d| d.kind == ErrorKind::InvalidModuleName),
        "{:?}",
        session.diagnostics()
    );
}

#[test]
fn cto_module_attribute_is_recorded() {
    let mut session = Session::new();
    let ok = session.compile_str("(module scripts (attr cto))", "main.ka");
    assert!(ok, "{:?}", session.diagnostics());
    assert!(session.cto_module);
}

#[test]
fn snapshots_serialize_deterministically() {
    let mut session = Session::new();
    session.compile_str(
        "(module geo)\n\
         (namespace inner (def k (var extern int 1)))\n\
         (def Pair (struct extern ((a int) (b int))))",
        "geo.ka",
    );
    let first = postcard::to_allocvec(&session.module_snapshot()).expect("serializes");
    let second = postcard::to_allocvec(&session.module_snapshot()).expect("serializes");
    assert_eq!(first, second);
}
