//! Relation-aware statement generation.
//!
//! [`CodeGenerator`] owns every object generator of one engine flavor, the
//! relation tables and its own RNG. Each call to
//! [`CodeGenerator::generate_statements_with_relation`] starts from clean
//! instance pools, emits a fixed prelude that captures annotations and fields
//! of the host document, and then accumulates statements until the requested
//! count is reached:
//!
//! 1. a first call is picked from the weighted key pool and its hook tokens
//!    are resolved;
//! 2. it is either emitted alone, replaced by a short loop of hook
//!    statements, or paired with a second call chosen through the weak
//!    relation table or at random;
//! 3. pairs may be wired through a symbolic relation, solving the second
//!    call's correlated parameter from the first call's value, and the first
//!    call may be wrapped in a coercion or getter hook.
//!
//! Any iteration that fails to produce a call is discarded and retried;
//! already emitted statements are never touched. A run of discarded
//! iterations longer than [`GeneratorConfig::max_consecutive_failures`] ends
//! generation with [`GenerationError::Starved`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::api::RawCall;
use crate::catalog::{load_catalog, CatalogResult};
use crate::config::{GeneratorConfig, InstanceTable, RelationPolicy};
use crate::normalize::ValueNormalizer;
use crate::object::{ObjectGenerator, DEFAULT_SWEEP_REPETITIONS};
use crate::relations::{RelationConfig, SymbolicRelation};
use crate::statement::{
    build_statement_from_raw_call, complex_object_hook, guard, remove_braces, replace_statement_parameter,
    simple_object_hook,
};

/// Object whose pool receives `fthis`.
pub const DOCUMENT_OBJECT: &str = "Doc";
pub const ANNOTATION_OBJECT: &str = "Annotation";
pub const FIELD_OBJECT: &str = "Field";

/// Alias for the document captured at the top of every script.
pub const DOCUMENT_ALIAS: &str = "fthis";

const HOOK_STATEMENTS: (usize, usize) = (2, 8);
const LOOP_STATEMENTS: (usize, usize) = (2, 5);
const LOOP_ITERATIONS: (usize, usize) = (1, 2);
const MAX_KEY_REROLLS: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("catalog has no selectable APIs")]
    EmptyCatalog,

    #[error("gave up after {attempts} consecutive discarded iterations")]
    Starved { attempts: usize },
}

pub type GenerationResult<T> = Result<T, GenerationError>;

/// Counters accumulated over the lifetime of a generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationStats {
    pub statements: usize,
    pub single_calls: usize,
    pub loops: usize,
    pub pairs: usize,
    pub weak_pairs: usize,
    pub symbolic_pairs: usize,
    pub solved_parameters: usize,
    pub solver_failures: usize,
    pub hooks: usize,
    pub discarded_iterations: usize,
}

/// Split `Object.api`.
pub fn parse_api_key(key: &str) -> Option<(&str, &str)> {
    let (object, api) = key.split_once('.')?;
    if object.is_empty() || api.is_empty() || api.contains('.') {
        return None;
    }
    Some((object, api))
}

/// Weighted selection pool: blocked keys are left out, limited keys appear
/// once, every other key `general_key_weight` times.
pub fn build_key_pool(
    objects: &BTreeMap<String, ObjectGenerator>,
    relations: &RelationConfig,
    policy: &RelationPolicy,
) -> Vec<String> {
    let mut pool = Vec::new();
    for (object_name, object) in objects {
        for api_name in object.api_list() {
            let key = format!("{}.{}", object_name, api_name);
            if relations.is_blocked(&key) {
                debug!("{} is blocked", key);
            } else if relations.is_limited(&key) {
                pool.push(key);
            } else {
                pool.extend(std::iter::repeat(key).take(policy.general_key_weight.max(1)));
            }
        }
    }
    pool
}

/// Pick a key from `candidates`. A blocked pick is replaced by a draw from
/// the general `pool`; a limited pick is rerolled with probability
/// `policy.limited_reroll`.
pub fn pick_api_key<R: Rng + ?Sized>(
    candidates: &[String],
    pool: &[String],
    relations: &RelationConfig,
    policy: &RelationPolicy,
    rng: &mut R,
) -> Option<String> {
    let mut pick = None;
    for _ in 0..MAX_KEY_REROLLS {
        let candidate = candidates.choose(rng)?;
        if relations.is_blocked(candidate) {
            return pool.choose(rng).cloned();
        }
        pick = Some(candidate.clone());
        if !(relations.is_limited(candidate) && rng.gen_bool(policy.limited_reroll.clamp(0.0, 1.0))) {
            break;
        }
    }
    pick
}

/// Relation-aware JavaScript API statement generator.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    config: GeneratorConfig,
    relations: RelationConfig,
    objects: BTreeMap<String, ObjectGenerator>,
    key_pool: Vec<String>,
    permanent_instances: BTreeSet<String>,
    temporary_instances: BTreeSet<String>,
    prelude: Vec<String>,
    rng: ChaCha8Rng,
    stats: GenerationStats,
}

impl CodeGenerator {
    /// Build over already loaded objects. Prelude captures are registered as
    /// permanent instances of the document, annotation and field objects.
    pub fn new(
        mut objects: BTreeMap<String, ObjectGenerator>,
        relations: RelationConfig,
        config: GeneratorConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let mut permanent_instances: BTreeSet<String> = objects
            .values()
            .flat_map(|object| object.pool().permanent().iter().cloned())
            .collect();

        let mut prelude = vec![guard(&format!("var {} = this;", DOCUMENT_ALIAS))];
        if let Some(doc) = objects.get_mut(DOCUMENT_OBJECT) {
            doc.add_permanent_instance(DOCUMENT_ALIAS);
        }
        permanent_instances.insert(DOCUMENT_ALIAS.to_string());

        for i in 1..=config.prelude_captures {
            let annot = format!("my_annot{}", i);
            let field = format!("my_field{}", i);
            prelude.push(guard(&format!("var {} = this.getAnnot({}, \"{}\");", annot, i - 1, annot)));
            prelude.push(guard(&format!("var {} = this.getField(\"{}\");", field, field)));
            if let Some(object) = objects.get_mut(ANNOTATION_OBJECT) {
                object.add_permanent_instance(&annot);
            }
            if let Some(object) = objects.get_mut(FIELD_OBJECT) {
                object.add_permanent_instance(&field);
            }
            permanent_instances.insert(annot);
            permanent_instances.insert(field);
        }

        let key_pool = build_key_pool(&objects, &relations, &config.policy);
        info!(
            "code generator ready: {} objects, {} weighted keys",
            objects.len(),
            key_pool.len()
        );

        Self {
            config,
            relations,
            objects,
            key_pool,
            permanent_instances,
            temporary_instances: BTreeSet::new(),
            prelude,
            rng,
            stats: GenerationStats::default(),
        }
    }

    /// Load the objects of `table` from `base_dir` and build a generator.
    pub fn load(
        base_dir: &Path,
        table: &InstanceTable,
        relations: RelationConfig,
        config: GeneratorConfig,
    ) -> CatalogResult<Self> {
        let normalizer = ValueNormalizer::new(config.counterfactual_probability);
        let objects = load_catalog(base_dir, table, &relations.blocklist, normalizer)?;
        Ok(Self::new(objects, relations, config))
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn relations(&self) -> &RelationConfig {
        &self.relations
    }

    pub fn objects(&self) -> &BTreeMap<String, ObjectGenerator> {
        &self.objects
    }

    pub fn object(&self, name: &str) -> Option<&ObjectGenerator> {
        self.objects.get(name)
    }

    pub fn prelude(&self) -> &[String] {
        &self.prelude
    }

    pub fn key_pool(&self) -> &[String] {
        &self.key_pool
    }

    pub fn stats(&self) -> &GenerationStats {
        &self.stats
    }

    pub fn temporary_instances(&self) -> &BTreeSet<String> {
        &self.temporary_instances
    }

    /// Reset every pool to its permanent instances and forget temporaries.
    pub fn reset_instances(&mut self) {
        for object in self.objects.values_mut() {
            object.clean_instance();
        }
        self.temporary_instances.clear();
    }

    fn live_instances(&self) -> Vec<String> {
        self.permanent_instances
            .union(&self.temporary_instances)
            .cloned()
            .collect()
    }

    fn pick_key(&mut self) -> Option<String> {
        pick_api_key(
            &self.key_pool,
            &self.key_pool,
            &self.relations,
            &self.config.policy,
            &mut self.rng,
        )
    }

    fn raw_call_for_key(&mut self, key: &str) -> Option<RawCall> {
        let (object_name, api_name) = parse_api_key(key)?;
        let object = self.objects.get(object_name)?;
        object.specific_call_raw(api_name, &mut self.rng)
    }

    /// Guarded statements for randomly picked keys; failed picks are dropped.
    /// Nested `<<SCRIPTS>>` slots get an empty script.
    fn random_statements(&mut self, (low, high): (usize, usize)) -> Vec<String> {
        let n = self.rng.gen_range(low..=high);
        let live = self.live_instances();
        let mut statements = Vec::with_capacity(n);
        for _ in 0..n {
            let Some(key) = self.pick_key() else {
                continue;
            };
            let Some(mut raw) = self.raw_call_for_key(&key) else {
                continue;
            };
            replace_statement_parameter(&mut raw, &live, "\"\"", &mut self.rng);
            if let Some(statement) = build_statement_from_raw_call(&raw) {
                statements.push(statement);
            }
        }
        statements
    }

    /// Space-joined statements run by a hook.
    fn hook_code(&mut self) -> String {
        self.random_statements(HOOK_STATEMENTS).join(" ")
    }

    /// Hook statements as a JavaScript string literal, for `<<SCRIPTS>>`.
    fn parameter_value_code(&mut self) -> String {
        let body = self.hook_code().replace('"', "'");
        format!("\"{}\"", body)
    }

    fn loop_statement(&mut self) -> Option<String> {
        let iterations = self.rng.gen_range(LOOP_ITERATIONS.0..=LOOP_ITERATIONS.1);
        let body = self.random_statements(LOOP_STATEMENTS);
        if body.is_empty() {
            return None;
        }
        Some(format!(
            "try{{for (var i = 0; i < {}; i++) {{{}}};}} catch(e){{}};",
            iterations,
            body.join(" ")
        ))
    }

    /// Raw call for `key` with hook tokens resolved.
    fn prepare_call(&mut self, key: &str) -> Option<RawCall> {
        let mut raw = self.raw_call_for_key(key)?;
        let value_code = self.parameter_value_code();
        let live = self.live_instances();
        replace_statement_parameter(&mut raw, &live, &value_code, &mut self.rng);
        Some(raw)
    }

    /// Track a captured return value as a live instance.
    fn register_return_value(&mut self, raw: &RawCall) {
        let Some(value) = &raw.return_value else {
            return;
        };
        self.temporary_instances.insert(value.clone());
        if let Some(return_type) = raw.return_type.as_deref() {
            if return_type != DOCUMENT_OBJECT {
                if let Some(object) = self.objects.get_mut(return_type) {
                    object.add_instance(value);
                }
            }
        }
    }

    fn apply_symbolic_relation(
        &mut self,
        relation: &SymbolicRelation,
        first_key: &str,
        first_params: &BTreeMap<String, String>,
        second: &mut RawCall,
    ) {
        let Some(known) = relation.side(first_key) else {
            return;
        };
        let Some(known_value) = first_params.get(&known.param) else {
            debug!("{} has no parameter {}", first_key, known.param);
            return;
        };
        match relation.solve_for_other(first_key, known_value, &self.config.solver_budget) {
            Ok(Some((param, value))) => {
                second.params.insert(param, remove_braces(&value));
                self.stats.solved_parameters += 1;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("symbolic relation {} -> {}: {}", relation.first.api, relation.second.api, e);
                self.stats.solver_failures += 1;
            }
        }
    }

    /// One weighted key, one guarded statement, its return value registered.
    fn single_iteration(&mut self) -> Option<Vec<String>> {
        let key = self.pick_key()?;
        let raw = self.prepare_call(&key)?;
        let statement = build_statement_from_raw_call(&raw)?;
        self.register_return_value(&raw);
        self.stats.single_calls += 1;
        Some(vec![statement])
    }

    /// One iteration of the relation policy; `None` discards it.
    fn relation_iteration(&mut self, weak: bool, symbolic: bool) -> Option<Vec<String>> {
        let policy = self.config.policy;

        let first_key = self.pick_key()?;
        let mut first = self.prepare_call(&first_key)?;
        let mut first_statement = build_statement_from_raw_call(&first)?;

        let roll: f64 = self.rng.gen();
        if roll < policy.single_statement {
            self.register_return_value(&first);
            self.stats.single_calls += 1;
            return Some(vec![first_statement]);
        }
        if roll < policy.single_statement + policy.loop_statement {
            let statement = self.loop_statement()?;
            self.stats.loops += 1;
            return Some(vec![statement]);
        }

        let first_key = first.key();
        let mut second_key = None;
        if weak && self.rng.gen_bool(policy.weak_preference) {
            let related = self.relations.weak.related(&first_key);
            if !related.is_empty() {
                second_key = pick_api_key(related, &self.key_pool, &self.relations, &policy, &mut self.rng)
                    .filter(|key| !self.relations.is_blocked(key));
            }
        }
        let weak_pair = second_key.is_some();
        let second_key = match second_key {
            Some(key) => key,
            None => self.pick_key()?,
        };
        let (second_object, _) = parse_api_key(&second_key)?;
        if !self.objects.contains_key(second_object) {
            return None;
        }

        if symbolic && self.rng.gen_bool(policy.symbolic_attempt) {
            let relations: Option<Vec<SymbolicRelation>> = self
                .relations
                .symbolic
                .lookup(&first_key, &second_key)
                .map(<[SymbolicRelation]>::to_vec);
            let first_params = first.params.clone();

            let hook_roll: f64 = self.rng.gen();
            if hook_roll < policy.simple_hook {
                let hook_code = self.hook_code();
                if let Some(hook) = simple_object_hook(&mut first, &hook_code, &mut self.rng) {
                    first_statement = format!("{} {}", hook.code, build_statement_from_raw_call(&first)?);
                    self.temporary_instances.insert(hook.object_name);
                    self.stats.hooks += 1;
                }
            } else if hook_roll < policy.simple_hook + policy.complex_hook {
                let hook_code = self.hook_code();
                if let Some(hook) = complex_object_hook(&first, &hook_code, &mut self.rng) {
                    first_statement = hook.code;
                    self.temporary_instances.insert(hook.object_name);
                    self.stats.hooks += 1;
                }
            }

            if let Some(relations) = relations {
                let mut second = self.prepare_call(&second_key)?;
                for relation in &relations {
                    self.apply_symbolic_relation(relation, &first_key, &first_params, &mut second);
                }
                let second_statement = build_statement_from_raw_call(&second)?;

                let second_goes_first = relations
                    .first()
                    .map_or(false, |r| r.sequence && r.first.api != first_key);
                let statements = if second_goes_first {
                    vec![second_statement, first_statement]
                } else {
                    vec![first_statement, second_statement]
                };
                self.register_return_value(&first);
                self.register_return_value(&second);
                self.stats.pairs += 1;
                self.stats.symbolic_pairs += 1;
                if weak_pair {
                    self.stats.weak_pairs += 1;
                }
                return Some(statements);
            }
        }

        let second = self.prepare_call(&second_key)?;
        let second_statement = build_statement_from_raw_call(&second)?;
        self.register_return_value(&first);
        self.register_return_value(&second);
        self.stats.pairs += 1;
        if weak_pair {
            self.stats.weak_pairs += 1;
        }
        Some(vec![first_statement, second_statement])
    }

    /// Run `step` until `count` statements follow the prelude.
    fn accumulate<F>(&mut self, count: usize, mut step: F) -> GenerationResult<Vec<String>>
    where
        F: FnMut(&mut Self) -> Option<Vec<String>>,
    {
        let mut statements = self.prelude.clone();
        let mut generated = 0;
        let mut failures = 0;

        while generated < count {
            match step(self) {
                Some(emitted) if !emitted.is_empty() => {
                    failures = 0;
                    generated += emitted.len();
                    self.stats.statements += emitted.len();
                    statements.extend(emitted);
                }
                _ => {
                    failures += 1;
                    self.stats.discarded_iterations += 1;
                    if failures >= self.config.max_consecutive_failures {
                        return Err(GenerationError::Starved { attempts: failures });
                    }
                }
            }
        }
        Ok(statements)
    }

    /// Prelude plus at least `count` statements, using weak and/or symbolic
    /// relations. Without either flag every iteration emits one call drawn
    /// from the key pool.
    pub fn generate_statements_with_relation(
        &mut self,
        count: usize,
        weak: bool,
        symbolic: bool,
    ) -> GenerationResult<Vec<String>> {
        self.reset_instances();
        if self.key_pool.is_empty() {
            return Err(GenerationError::EmptyCatalog);
        }
        debug!("generating {} statements (weak: {}, symbolic: {})", count, weak, symbolic);
        if !weak && !symbolic {
            return self.accumulate(count, Self::single_iteration);
        }
        self.accumulate(count, |generator| generator.relation_iteration(weak, symbolic))
    }

    /// Prelude plus `count` calls, each on a uniformly chosen object.
    ///
    /// Hook tokens are left in place and return values are not tracked;
    /// blocked APIs may be called.
    pub fn generate_api_statements(&mut self, count: usize) -> GenerationResult<Vec<String>> {
        let names: Vec<String> = self
            .objects
            .iter()
            .filter(|(_, object)| !object.api_list().is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        if names.is_empty() {
            return Err(GenerationError::EmptyCatalog);
        }
        self.accumulate(count, |generator| {
            let name = names.choose(&mut generator.rng)?;
            let object = generator.objects.get(name)?;
            let statement = object.pick_random_call_statement(&mut generator.rng)?;
            Some(vec![statement])
        })
    }

    /// One call for every non-blocked API of every object.
    pub fn generate_all_valid_api_statements(&mut self) -> Vec<String> {
        let rng = &mut self.rng;
        self.objects
            .values()
            .flat_map(|object| object.all_valid_call_statements(rng))
            .collect()
    }

    /// Repeated calls for every API, blocked ones included.
    pub fn generate_all_api_statements(&mut self) -> Vec<String> {
        let rng = &mut self.rng;
        self.objects
            .values()
            .flat_map(|object| object.all_call_statements(DEFAULT_SWEEP_REPETITIONS, rng))
            .collect()
    }
}
