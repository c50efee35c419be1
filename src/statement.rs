//! Rendering raw call records into guarded JavaScript statements.
//!
//! Every emitted statement is wrapped as `try{...} catch(e){};` so a single
//! failing call never stops the rest of a generated script. This module also
//! holds the parameter rewriting pass that resolves hook tokens, and the two
//! object hook shapes used to run extra code while the engine coerces an
//! argument.

use std::sync::OnceLock;

use rand::seq::SliceRandom;
use rand::Rng;
use regex::{Captures, Regex};

use crate::api::{ApiKind, RawCall, NO_PARAMETER_NAME};

/// Probability that an `o`-prefixed parameter receives a live instance.
pub const OBJECT_PARAMETER_REPLACEMENT_PROBABILITY: f64 = 0.4;

const HEX_DIGITS: &[u8] = b"abcdef0123456789";

/// Receiver expression used when no live instance is known.
pub const FALLBACK_INSTANCE: &str = "this";

static BRACED_ESCAPE: OnceLock<Option<Regex>> = OnceLock::new();

/// Unguarded statement text, or `None` when the record cannot be rendered.
pub fn construct_statement(raw: &RawCall) -> Option<String> {
    if raw.instance_name.is_empty() {
        return None;
    }
    let receiver = format!("{}.{}", raw.instance_name, raw.api_name);
    let call = match raw.api_kind {
        ApiKind::Method => {
            let args = if raw.params.is_empty() {
                String::new()
            } else if raw.params.len() == 1 && raw.params.contains_key(NO_PARAMETER_NAME) {
                raw.params[NO_PARAMETER_NAME].clone()
            } else {
                let pairs: Vec<String> = raw.params.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                format!("{{{}}}", pairs.join(", "))
            };
            format!("{}({})", receiver, args)
        }
        ApiKind::Property => match raw.params.len() {
            0 => receiver,
            1 => {
                let value = raw.params.values().next()?;
                let assignment = format!("{} = {};", receiver, value);
                return Some(match &raw.return_value {
                    Some(var) => format!("{} var {}; {} = {};", assignment, var, var, receiver),
                    None => assignment,
                });
            }
            _ => return None,
        },
    };

    Some(match &raw.return_value {
        Some(var) => format!("var {}; {} = {};", var, var, call),
        None => format!("{};", call),
    })
}

/// Guard a statement as `try{<stmt>} catch(e){};`.
pub fn guard(statement: &str) -> String {
    format!("try{{{}}} catch(e){{}};", statement)
}

/// Rendered and guarded statement for a raw call.
pub fn build_statement_from_raw_call(raw: &RawCall) -> Option<String> {
    construct_statement(raw).map(|statement| guard(&statement))
}

/// Resolve hook tokens in the parameters of `raw`.
///
/// Quoted `<<BUILTINOBJ>>` values become a random live instance, quoted
/// `<<SCRIPTS>>` values become `hook_code`. Afterwards one random parameter is
/// chosen; if its name starts with `o` it is replaced by a live instance with
/// probability [`OBJECT_PARAMETER_REPLACEMENT_PROBABILITY`].
pub fn replace_statement_parameter<R: Rng + ?Sized>(
    raw: &mut RawCall,
    live_instances: &[String],
    hook_code: &str,
    rng: &mut R,
) {
    if raw.params.is_empty() {
        return;
    }
    let builtin = format!("\"{}\"", crate::api::BUILTIN_OBJECT_TOKEN);
    let scripts = format!("\"{}\"", crate::api::SCRIPTS_TOKEN);

    let pick_instance = |rng: &mut R| -> String {
        live_instances
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| FALLBACK_INSTANCE.to_string())
    };

    for value in raw.params.values_mut() {
        if *value == builtin {
            *value = pick_instance(rng);
        } else if *value == scripts {
            *value = hook_code.to_string();
        }
    }

    let keys: Vec<String> = raw.params.keys().cloned().collect();
    if let Some(key) = keys.choose(rng) {
        if key.starts_with('o') && rng.gen_bool(OBJECT_PARAMETER_REPLACEMENT_PROBABILITY) {
            let instance = pick_instance(rng);
            raw.params.insert(key.clone(), instance);
        }
    }
}

/// Variable names shared by one hook: the hook function, the getter or
/// coercion function, and the carrier object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookNames {
    pub hook_fn: String,
    pub value_fn: String,
    pub object: String,
}

impl HookNames {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let suffix: String = (0..4)
            .map(|_| *HEX_DIGITS.choose(rng).unwrap_or(&b'0') as char)
            .collect();
        Self {
            hook_fn: format!("f_{}", suffix),
            value_fn: format!("fs_{}", suffix),
            object: format!("os_{}", suffix),
        }
    }
}

/// Hook output: the carrier object's name and the code defining it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hook {
    pub object_name: String,
    pub code: String,
}

fn random_property_value<R: Rng + ?Sized>(rng: &mut R) -> String {
    match rng.gen_range(0..4) {
        0 => ["0", "1", "123", "2147483647", "-1"]
            .choose(rng)
            .map(|s| s.to_string())
            .unwrap_or_default(),
        1 => {
            let text: String = (0..3).map(|_| rng.gen_range(b'a'..=b'f') as char).collect();
            format!("\"{}\"", text)
        }
        2 => (if rng.gen_bool(0.5) { "true" } else { "false" }).to_string(),
        _ => "null".to_string(),
    }
}

/// The hook function and the value function that calls it.
fn hook_functions(names: &HookNames, value: &str, hook_code: &str) -> String {
    format!(
        "var {}=function(){{{}}}; var {}=function(){{{}();return {};}};",
        names.hook_fn, hook_code, names.value_fn, names.hook_fn, value
    )
}

/// Object whose `toString` or `valueOf` runs `hook_code` and then yields
/// `value`. Returns the object's name and its definition.
pub fn generate_object_with_method<R: Rng + ?Sized>(value: &str, hook_code: &str, rng: &mut R) -> Hook {
    let names = HookNames::random(rng);
    let method = if rng.gen_bool(0.5) { "toString" } else { "valueOf" };

    let mut props = Vec::new();
    for _ in 0..rng.gen_range(1..=3) {
        let prefix = ['p', 'k', 'x'][rng.gen_range(0..3)];
        let mut key = prefix.to_string();
        for _ in 0..rng.gen_range(1..=2) {
            key.push(char::from(b'0' + rng.gen_range(0..10u8)));
        }
        props.push(format!("{}:{}", key, random_property_value(rng)));
    }

    let mut code = hook_functions(&names, value, hook_code);
    code.push_str(&format!(" var {}={{{}}};", names.object, props.join(",")));
    code.push_str(&format!(" {}.{}={};", names.object, method, names.value_fn));

    Hook {
        object_name: names.object,
        code,
    }
}

/// Object carrying `properties` whose `prop_key` is redefined as a getter
/// that runs `hook_code` before returning `value`.
pub fn generate_define_properties_code<R: Rng + ?Sized>(
    properties: &[String],
    prop_key: &str,
    value: &str,
    hook_code: &str,
    rng: &mut R,
) -> Hook {
    let names = HookNames::random(rng);

    let mut code = hook_functions(&names, value, hook_code);
    code.push_str(&format!(" var {}={{{}}};", names.object, properties.join(",")));
    code.push_str(&format!(
        " Object.defineProperties({},{{{}:{{get:{}}}}});",
        names.object, prop_key, names.value_fn
    ));

    Hook {
        object_name: names.object,
        code,
    }
}

/// Replace one random parameter of `raw` with a coercion hook object.
///
/// Returns the hook definition, which must be emitted before the call.
pub fn simple_object_hook<R: Rng + ?Sized>(raw: &mut RawCall, hook_code: &str, rng: &mut R) -> Option<Hook> {
    let keys: Vec<String> = raw.params.keys().cloned().collect();
    let key = keys.choose(rng)?;
    let value = raw.params.get(key)?.clone();
    let hook = generate_object_with_method(&value, hook_code, rng);
    raw.params.insert(key.clone(), hook.object_name.clone());
    Some(hook)
}

/// Pass all parameters of a method call through one object whose randomly
/// chosen member is a hooked getter.
///
/// The returned code already contains the guarded call.
pub fn complex_object_hook<R: Rng + ?Sized>(raw: &RawCall, hook_code: &str, rng: &mut R) -> Option<Hook> {
    if raw.api_kind != ApiKind::Method || raw.instance_name.is_empty() {
        return None;
    }
    let keys: Vec<&String> = raw.params.keys().collect();
    let key = *keys.choose(rng)?;
    let value = &raw.params[key];
    let properties: Vec<String> = raw.params.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();

    let hook = generate_define_properties_code(&properties, key, value, hook_code, rng);
    let call = format!("{}.{}({})", raw.instance_name, raw.api_name, hook.object_name);
    let statement = match &raw.return_value {
        Some(var) => format!("var {}; {} = {};", var, var, call),
        None => format!("{};", call),
    };
    Some(Hook {
        code: format!("{} {}", hook.code, guard(&statement)),
        object_name: hook.object_name,
    })
}

/// Rewrite `\u{X}` escapes as `\uXXXX` with upper-case hex digits.
pub fn remove_braces(text: &str) -> String {
    let pattern = BRACED_ESCAPE.get_or_init(|| Regex::new(r"\\u\{([0-9A-Fa-f]+)\}").ok());
    let Some(pattern) = pattern else {
        return text.to_string();
    };
    pattern
        .replace_all(text, |caps: &Captures<'_>| match u32::from_str_radix(&caps[1], 16) {
            Ok(code) => format!("\\u{:04X}", code),
            Err(_) => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeMap;

    fn raw(kind: ApiKind, params: &[(&str, &str)], return_value: Option<&str>) -> RawCall {
        RawCall {
            object_name: "Doc".to_string(),
            instance_name: "this".to_string(),
            api_name: "api".to_string(),
            api_kind: kind,
            return_type: return_value.map(|_| "Field".to_string()),
            return_value: return_value.map(str::to_string),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_method_shapes() {
        assert_eq!(construct_statement(&raw(ApiKind::Method, &[], None)).unwrap(), "this.api();");
        assert_eq!(
            construct_statement(&raw(ApiKind::Method, &[(NO_PARAMETER_NAME, "1")], None)).unwrap(),
            "this.api(1);"
        );
        assert_eq!(
            construct_statement(&raw(ApiKind::Method, &[("a", "1"), ("b", "\"x\"")], None)).unwrap(),
            "this.api({a: 1, b: \"x\"});"
        );
    }

    #[test]
    fn test_return_capture() {
        let rendered = build_statement_from_raw_call(&raw(ApiKind::Method, &[(NO_PARAMETER_NAME, "42")], Some("Field_ab12C")))
            .unwrap();
        assert_eq!(rendered, "try{var Field_ab12C; Field_ab12C = this.api(42);} catch(e){};");
        assert_eq!(rendered.matches("var Field_ab12C;").count(), 1);
    }

    #[test]
    fn test_property_shapes() {
        assert_eq!(construct_statement(&raw(ApiKind::Property, &[], None)).unwrap(), "this.api;");
        assert_eq!(construct_statement(&raw(ApiKind::Property, &[], Some("T_1"))).unwrap(), "var T_1; T_1 = this.api;");
        assert_eq!(
            construct_statement(&raw(ApiKind::Property, &[("api", "3")], None)).unwrap(),
            "this.api = 3;"
        );
        assert_eq!(
            construct_statement(&raw(ApiKind::Property, &[("api", "3")], Some("T_1"))).unwrap(),
            "this.api = 3; var T_1; T_1 = this.api;"
        );
        assert_eq!(construct_statement(&raw(ApiKind::Property, &[("a", "1"), ("b", "2")], None)), None);
    }

    #[test]
    fn test_missing_receiver_renders_nothing() {
        let mut call = raw(ApiKind::Method, &[], None);
        call.instance_name.clear();
        assert_eq!(build_statement_from_raw_call(&call), None);
    }

    #[test]
    fn test_hook_tokens_are_resolved() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut call = raw(
            ApiKind::Method,
            &[("cTarget", "\"<<BUILTINOBJ>>\""), ("cScript", "\"<<SCRIPTS>>\"")],
            None,
        );
        replace_statement_parameter(&mut call, &[], "\"app.beep(0);\"", &mut rng);
        assert_eq!(call.params["cTarget"], "this");
        assert_eq!(call.params["cScript"], "\"app.beep(0);\"");

        let live = vec!["my_field1".to_string()];
        let mut call = raw(ApiKind::Method, &[("cTarget", "\"<<BUILTINOBJ>>\"")], None);
        replace_statement_parameter(&mut call, &live, "", &mut rng);
        assert_eq!(call.params["cTarget"], "my_field1");
    }

    #[test]
    fn test_object_parameters_are_sometimes_replaced() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let live = vec!["my_annot1".to_string()];
        let replaced = (0..500)
            .filter(|_| {
                let mut call = raw(ApiKind::Method, &[("oDoc", "1")], None);
                replace_statement_parameter(&mut call, &live, "", &mut rng);
                call.params["oDoc"] == "my_annot1"
            })
            .count();
        assert!(replaced > 150 && replaced < 250, "replaced {}", replaced);

        let untouched = (0..100).all(|_| {
            let mut call = raw(ApiKind::Method, &[("cName", "1")], None);
            replace_statement_parameter(&mut call, &live, "", &mut rng);
            call.params["cName"] == "1"
        });
        assert!(untouched);
    }

    #[test]
    fn test_simple_hook_substitutes_parameter() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut call = raw(ApiKind::Method, &[(NO_PARAMETER_NAME, "7")], None);
        let hook = simple_object_hook(&mut call, "app.beep(0);", &mut rng).unwrap();
        assert!(hook.object_name.starts_with("os_"));
        assert_eq!(call.params[NO_PARAMETER_NAME], hook.object_name);
        assert!(hook.code.contains("function(){app.beep(0);}"));
        assert!(hook.code.contains("return 7;"));
        assert!(hook.code.contains(".toString=") || hook.code.contains(".valueOf="));

        let mut empty = raw(ApiKind::Method, &[], None);
        assert_eq!(simple_object_hook(&mut empty, "", &mut rng), None);
    }

    #[test]
    fn test_complex_hook_wraps_call() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let call = raw(ApiKind::Method, &[("cName", "\"a\"")], Some("Field_xyz12"));
        let hook = complex_object_hook(&call, "", &mut rng).unwrap();
        assert!(hook.code.contains("Object.defineProperties("));
        assert!(hook.code.contains("{cName: \"a\"}"));
        assert!(hook
            .code
            .ends_with(&format!("try{{var Field_xyz12; Field_xyz12 = this.api({});}} catch(e){{}};", hook.object_name)));

        let property = raw(ApiKind::Property, &[("api", "1")], None);
        assert_eq!(complex_object_hook(&property, "", &mut rng), None);
    }

    #[test]
    fn test_remove_braces() {
        assert_eq!(remove_braces("\\u{47d}\\u{f197}"), "\\u047D\\uF197");
        assert_eq!(remove_braces("\"a\\u{1}b\""), "\"a\\u0001b\"");
        assert_eq!(remove_braces("\\u{zz}"), "\\u{zz}");
        assert_eq!(remove_braces("plain"), "plain");
        assert_eq!(remove_braces("x\\u{1F600}y\\u{123456789}"), "x\\u1F600y\\u{123456789}");
    }
}
