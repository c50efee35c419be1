//! End-to-end generation over an on-disk catalog and relation config

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use pdfjs_fuzzgen::api::NO_PARAMETER_NAME;
use pdfjs_fuzzgen::config::EngineFlavor;
use pdfjs_fuzzgen::grammar::Grammar;
use pdfjs_fuzzgen::normalize::ValueNormalizer;
use pdfjs_fuzzgen::{
    construct_statement, ApiDescriptor, ApiGenerator, ApiKind, CodeGenerator, FuzzSession, GeneratorConfig,
    InstancePool, InstanceTable, RelationConfig, RelationPolicy, SessionConfig,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn method(base: &Path, object: &str, api: &str, return_type: Option<&str>, params: &[(&str, &str)]) {
    let dir = base.join(object).join("methods").join(api);
    let info = match return_type {
        Some(t) => format!(r#"{{"API_Name": "{}", "Return_Type": "{}"}}"#, api, t),
        None => format!(r#"{{"API_Name": "{}"}}"#, api),
    };
    write(&dir.join("API_INFO.json"), &info);
    if params.is_empty() {
        write(&dir.join("empty.json"), "[]");
    }
    for (param, rules) in params {
        write(&dir.join(param).join("rules.json"), rules);
    }
}

fn property(base: &Path, object: &str, api: &str, rules: Option<&str>) {
    let dir = base.join(object).join("properties").join(api);
    write(&dir.join("API_INFO.json"), &format!(r#"{{"API_Name": "{}"}}"#, api));
    match rules {
        Some(rules) => write(&dir.join(api).join("rules.json"), rules),
        None => write(&dir.join("empty.json"), "[]"),
    }
}

/// Catalog with `Doc`, `Field` and `app`, plus a config directory.
fn fixture() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    let base = root.path().join("catalog");

    method(&base, "Doc", "getField", Some("Field"), &[("cName", r#"[["Name", "my_field{Digit}"], ["Digit", "1"], ["Digit", "2"]]"#)]);
    method(&base, "Doc", "calculateNow", None, &[]);
    method(&base, "Doc", "closeDoc", None, &[]);
    method(&base, "Doc", "getPageNthWord", Some("String"), &[("nWord", r#"[["W", "3"]]"#)]);
    method(&base, "Doc", "getPageNumWords", Some("Number"), &[("nLimit", r#"[["L", "1"]]"#)]);
    method(&base, "Field", "setFocus", None, &[]);
    method(&base, "Field", "setAction", None, &[("cScript", r#"[["S", "<<SCRIPTS>>"]]"#)]);
    property(&base, "Field", "value", Some(r#"[["V", "hello"]]"#));
    property(&base, "Field", "name", None);
    method(&base, "app", "alert", Some("Number"), &[(NO_PARAMETER_NAME, r#"[["Num", "42"]]"#)]);
    method(&base, "app", "beep", None, &[]);

    let config = root.path().join("config");
    write(&config.join("blocklist.txt"), "Doc.closeDoc\n");
    write(&config.join("limitlist.txt"), "app.beep\n");
    write(
        &config.join("all_relation.json"),
        r#"{"Doc.getPageNthWord": ["Doc.getPageNumWords"], "Doc.getField": ["Field.setFocus"]}"#,
    );
    write(
        &config.join("all_symbolic.json"),
        r#"{"Doc.getPageNthWord+Doc.getPageNumWords": [{
            "api1": "Doc.getPageNthWord",
            "api2": "Doc.getPageNumWords",
            "Doc.getPageNthWord": "nWord",
            "Doc.getPageNumWords": "nLimit",
            "Doc.getPageNthWord.nWord": "x",
            "Doc.getPageNumWords.nLimit": "y",
            "type": "number",
            "constraint": "(and (>= x 0) (< x y))",
            "sequence": true
        }]}"#,
    );
    root
}

fn table() -> InstanceTable {
    InstanceTable::from_pairs([("Doc", &["this"][..]), ("Field", &[][..]), ("app", &["this.app", "app"][..])])
}

fn load(root: &Path, config: GeneratorConfig) -> CodeGenerator {
    let relations = RelationConfig::load(&root.join("config")).unwrap();
    CodeGenerator::load(&root.join("catalog"), &table(), relations, config).unwrap()
}

fn deterministic(seed: u64) -> GeneratorConfig {
    GeneratorConfig {
        counterfactual_probability: 0.0,
        ..GeneratorConfig::default()
    }
    .with_seed(seed)
}

#[test]
fn test_catalog_loads_with_blocklist_and_limits() {
    let root = fixture();
    let generator = load(root.path(), deterministic(1));

    assert_eq!(generator.objects().len(), 3);
    let doc = generator.object("Doc").unwrap();
    assert!(doc.api("closeDoc").unwrap().blocked);
    assert_eq!(doc.api_list().last().map(String::as_str), Some("closeDoc"));

    let pool = generator.key_pool();
    assert!(!pool.iter().any(|k| k == "Doc.closeDoc"));
    assert_eq!(pool.iter().filter(|k| *k == "app.beep").count(), 1);
    assert_eq!(pool.iter().filter(|k| *k == "app.alert").count(), 5);
}

#[test]
fn test_zero_parameter_methods_render_empty_object() {
    let root = fixture();
    let generator = load(root.path(), deterministic(2));
    let mut rng = ChaCha8Rng::seed_from_u64(2);

    for (object, api) in [("Doc", "calculateNow"), ("Field", "setFocus"), ("app", "beep")] {
        let entry = generator.object(object).unwrap().api(api).unwrap();
        for _ in 0..10 {
            assert_eq!(entry.generator.generate_call_statement(&mut rng), format!("{}({{}})", api));
        }
    }
}

#[test]
fn test_property_statements_assign_at_most_once() {
    let root = fixture();
    let generator = load(root.path(), deterministic(3));
    let field = generator.object("Field").unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(3);

    for _ in 0..20 {
        let value = field.api("value").unwrap().generator.generate_call_statement(&mut rng);
        assert_eq!(value, "value = \"hello\"");
        assert_eq!(value.matches('=').count(), 1);
        assert_eq!(field.api("name").unwrap().generator.generate_call_statement(&mut rng), "name");
    }
}

#[test]
fn test_return_value_is_declared_once_and_assigned() {
    let descriptor = ApiDescriptor::new("Object", "api", ApiKind::Method)
        .with_return_type("Field")
        .with_param(NO_PARAMETER_NAME, Grammar::from_rules([("Num", "42")]));
    let generator = ApiGenerator::new(descriptor)
        .unwrap()
        .with_normalizer(ValueNormalizer::deterministic());
    let mut rng = ChaCha8Rng::seed_from_u64(4);

    let mut raw = generator.generate_call_raw(&mut rng);
    assert_eq!(raw.api_kind, ApiKind::Method);
    assert_eq!(raw.params.len(), 1);
    assert_eq!(raw.params[NO_PARAMETER_NAME], "42");

    raw.instance_name = "Object".to_string();
    let var = raw.return_value.clone().unwrap();
    assert!(var.starts_with("Field_"));
    assert_eq!(var.len(), "Field_".len() + 5);

    let statement = construct_statement(&raw).unwrap();
    assert_eq!(statement, format!("var {}; {} = Object.api(42);", var, var));

    let guarded = pdfjs_fuzzgen::build_statement_from_raw_call(&raw).unwrap();
    assert_eq!(guarded.matches(&format!("var {};", var)).count(), 1);
    assert_eq!(guarded.matches("try{").count(), 1);
    assert!(guarded.ends_with("catch(e){};"));
}

#[test]
fn test_permanent_instances_survive_clean() {
    let mut pool = InstancePool::new();
    pool.add_permanent("this.app");
    assert_eq!(pool.count("this.app"), 5);

    pool.add("Field_abcde");
    pool.add("Field_fghij");
    pool.clean();
    assert_eq!(pool.count("this.app"), 5);
    assert_eq!(pool.count("Field_abcde"), 0);
    assert_eq!(pool.len(), 5);
}

#[test]
fn test_relation_generation_meets_target_count() {
    let root = fixture();
    for seed in 0..5 {
        let mut generator = load(root.path(), GeneratorConfig::default().with_seed(seed));
        let prelude = generator.prelude().len();
        for (count, weak, symbolic) in [(1, true, false), (25, false, true), (100, true, true)] {
            let statements = generator.generate_statements_with_relation(count, weak, symbolic).unwrap();
            let guarded = statements[prelude..]
                .iter()
                .filter(|s| s.contains("try{") && s.contains("catch(e){}"))
                .count();
            assert!(guarded >= count, "seed {} produced {} of {}", seed, guarded, count);
        }
    }
}

#[test]
fn test_symbolic_relation_correlates_parameters() {
    let root = fixture();
    let config = GeneratorConfig {
        policy: RelationPolicy {
            single_statement: 0.0,
            loop_statement: 0.0,
            weak_preference: 1.0,
            symbolic_attempt: 1.0,
            simple_hook: 0.0,
            complex_hook: 0.0,
            ..RelationPolicy::default()
        },
        ..deterministic(11)
    };
    let mut generator = load(root.path(), config);
    let statements = generator.generate_statements_with_relation(400, true, true).unwrap();

    let solved_limit = |statement: &str| -> Option<f64> {
        let start = statement.find("getPageNumWords({nLimit: ")? + "getPageNumWords({nLimit: ".len();
        let end = start + statement[start..].find('}')?;
        statement[start..end].parse().ok()
    };
    let wired = statements
        .windows(2)
        .filter(|pair| pair[0].contains("getPageNthWord({nWord: 3})"))
        .filter(|pair| solved_limit(&pair[1]).map_or(false, |limit| limit > 3.0))
        .count();
    assert!(wired > 0);
    assert!(generator.stats().symbolic_pairs > 0);
    assert!(generator.stats().weak_pairs > 0);
}

#[test]
fn test_generated_field_handles_are_reused() {
    let root = fixture();
    let mut generator = load(root.path(), deterministic(5));
    let statements = generator.generate_statements_with_relation(300, true, false).unwrap();

    let captured: BTreeSet<&String> = generator
        .object("Field")
        .unwrap()
        .pool()
        .instances()
        .iter()
        .filter(|i| i.starts_with("Field_"))
        .collect();
    assert!(!captured.is_empty());
    let reused = statements
        .iter()
        .any(|s| captured.iter().any(|name| s.contains(&format!("{}.set", name))));
    assert!(reused);
}

#[test]
fn test_session_writes_reproducible_cases() {
    let root = fixture();
    let run = |out: &Path| {
        let config = SessionConfig {
            base_dir: root.path().join("catalog"),
            config_dir: root.path().join("config"),
            out_dir: out.to_path_buf(),
            cases: 3,
            statements: 20,
            weak_relation: true,
            symbolic_relation: true,
            basic_ratio: 0.0,
            generator: GeneratorConfig::default().with_seed(99),
        };
        let mut session = FuzzSession::load(config).unwrap();
        session.run().unwrap()
    };

    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let summary = run(first.path());
    run(second.path());
    assert_eq!(summary.written, 3);

    for index in 0..3 {
        let name = format!("{}.js", index);
        let a = fs::read_to_string(first.path().join(&name)).unwrap();
        let b = fs::read_to_string(second.path().join(&name)).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("try{spell.available}catch(e){};\ntry{var fthis = this;} catch(e){};"));
    }
    assert!(EngineFlavor::Basic.instance_table().contains("Doc"));
}

#[test]
fn test_plain_generation_uses_key_pool() {
    let root = fixture();
    for seed in [3, 7, 19] {
        let mut generator = load(root.path(), GeneratorConfig::default().with_seed(seed));
        let statements = generator.generate_statements_with_relation(400, false, false).unwrap();
        let body = &statements[generator.prelude().len()..];
        assert_eq!(body.len(), 400);
        assert!(!body.iter().any(|s| s.contains("closeDoc(")), "seed {} called a blocked API", seed);
        assert!(generator.temporary_instances().iter().any(|i| i.starts_with("Field_")));
        assert_eq!(generator.stats().pairs, 0);
    }
}

#[test]
fn test_hook_tokens_never_reach_output() {
    let root = fixture();
    let mut generator = load(root.path(), GeneratorConfig::default().with_seed(7));
    let prelude = generator.prelude().len();
    for (weak, symbolic) in [(false, false), (true, false), (false, true), (true, true)] {
        let statements = generator.generate_statements_with_relation(400, weak, symbolic).unwrap();
        let leaked: Vec<&String> = statements[prelude..]
            .iter()
            .filter(|s| s.contains("<<SCRIPTS>>") || s.contains("<<BUILTINOBJ>>"))
            .collect();
        assert!(leaked.is_empty(), "weak {} symbolic {}: {:?}", weak, symbolic, leaked);
        assert!(statements[prelude..].iter().any(|s| s.contains("setAction(")));
    }
}

#[test]
fn test_malformed_relation_files_are_tolerated() {
    let root = fixture();
    let config_dir = root.path().join("config");
    write(&config_dir.join("all_symbolic.json"), "{\"Doc.getPageNthWord+Doc.getPageNumWords\": [");

    let relations = RelationConfig::load(&config_dir).unwrap();
    assert!(relations.symbolic.is_empty());
    assert!(relations.is_blocked("Doc.closeDoc"));
    assert!(!relations.weak.is_empty());

    let out = tempfile::tempdir().unwrap();
    let config = SessionConfig {
        base_dir: root.path().join("catalog"),
        config_dir,
        out_dir: out.path().to_path_buf(),
        cases: 2,
        statements: 30,
        weak_relation: true,
        symbolic_relation: true,
        basic_ratio: 0.0,
        generator: GeneratorConfig::default().with_seed(5),
    };
    let summary = FuzzSession::load(config).unwrap().run().unwrap();
    assert_eq!(summary.written, 2);
    assert!(out.path().join("1.js").exists());
}
