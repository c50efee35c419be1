//! Per-object API tables and receiver instance pools.
//!
//! An [`ObjectGenerator`] owns every API builder of one scripting object in a
//! single table keyed by API name, together with the pool of receiver
//! expressions (`this.app`, `my_field3`, `Field_Ab3xZ`, ...) that calls on
//! that object may use. Permanent instances enter the pool
//! [`PERMANENT_INSTANCE_WEIGHT`] times so they dominate sampling; temporary
//! ones, registered from captured return values, enter once.

use std::collections::BTreeMap;

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::api::{ApiGenerator, RawCall};
use crate::statement::guard;

/// Sampling weight of a permanent instance relative to a temporary one.
pub const PERMANENT_INSTANCE_WEIGHT: usize = 5;

/// Calls generated per API by [`ObjectGenerator::all_call_statements`].
pub const DEFAULT_SWEEP_REPETITIONS: usize = 30;

/// Line emitted for each API when a sweep finds no receiver.
pub const NO_INSTANCE_PLACEHOLDER: &str = "// No instances available for this object.";

/// Weighted multiset of receiver expressions for one object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstancePool {
    instances: Vec<String>,
    permanent: Vec<String>,
}

impl InstancePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a temporary instance unless it is already present.
    pub fn add(&mut self, instance: &str) {
        if !self.instances.iter().any(|i| i == instance) {
            self.instances.push(instance.to_string());
        }
    }

    /// Add a permanent instance with [`PERMANENT_INSTANCE_WEIGHT`] entries.
    pub fn add_permanent(&mut self, instance: &str) {
        if self.permanent.iter().any(|i| i == instance) {
            return;
        }
        self.permanent.push(instance.to_string());
        self.instances
            .extend(std::iter::repeat(instance.to_string()).take(PERMANENT_INSTANCE_WEIGHT));
    }

    /// Remove the first occurrence of `instance`.
    pub fn remove(&mut self, instance: &str) {
        if let Some(pos) = self.instances.iter().position(|i| i == instance) {
            self.instances.remove(pos);
        }
    }

    /// Drop every temporary instance and rebuild permanent weights.
    pub fn clean(&mut self) {
        self.instances.clear();
        for instance in &self.permanent {
            self.instances
                .extend(std::iter::repeat(instance.clone()).take(PERMANENT_INSTANCE_WEIGHT));
        }
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        self.instances.choose(rng).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn count(&self, instance: &str) -> usize {
        self.instances.iter().filter(|i| *i == instance).count()
    }

    pub fn instances(&self) -> &[String] {
        &self.instances
    }

    pub fn permanent(&self) -> &[String] {
        &self.permanent
    }
}

/// One API of an object, tagged with whether it is blocklisted.
#[derive(Debug, Clone)]
pub struct ApiEntry {
    pub generator: ApiGenerator,
    pub blocked: bool,
}

/// API builders and receiver pool of one scripting object.
#[derive(Debug, Clone)]
pub struct ObjectGenerator {
    object_name: String,
    apis: BTreeMap<String, ApiEntry>,
    /// Valid APIs first, then blocked ones, each group in name order.
    api_list: Vec<String>,
    pool: InstancePool,
}

impl ObjectGenerator {
    pub fn new(object_name: &str) -> Self {
        Self {
            object_name: object_name.to_string(),
            apis: BTreeMap::new(),
            api_list: Vec::new(),
            pool: InstancePool::new(),
        }
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Register an API, replacing any earlier one with the same name.
    pub fn add_api(&mut self, generator: ApiGenerator, blocked: bool) {
        let name = generator.api_name().to_string();
        self.apis.insert(name, ApiEntry { generator, blocked });
        self.rebuild_api_list();
    }

    fn rebuild_api_list(&mut self) {
        let valid = self.apis.iter().filter(|(_, e)| !e.blocked).map(|(n, _)| n.clone());
        let blocked = self.apis.iter().filter(|(_, e)| e.blocked).map(|(n, _)| n.clone());
        self.api_list = valid.chain(blocked).collect();
    }

    pub fn api_list(&self) -> &[String] {
        &self.api_list
    }

    pub fn api(&self, api_name: &str) -> Option<&ApiEntry> {
        self.apis.get(api_name)
    }

    pub fn pool(&self) -> &InstancePool {
        &self.pool
    }

    pub fn add_instance(&mut self, instance: &str) {
        self.pool.add(instance);
    }

    pub fn add_permanent_instance(&mut self, instance: &str) {
        self.pool.add_permanent(instance);
    }

    pub fn remove_instance(&mut self, instance: &str) {
        self.pool.remove(instance);
    }

    pub fn clean_instance(&mut self) {
        self.pool.clean();
    }

    /// Guarded call of `api_name` on a random receiver.
    pub fn specific_call_statement<R: Rng + ?Sized>(&self, api_name: &str, rng: &mut R) -> Option<String> {
        let entry = self.apis.get(api_name)?;
        let instance = self.pool.choose(rng)?;
        let call = entry.generator.generate_call_statement(rng);
        Some(guard(&format!("{}.{}", instance, call)))
    }

    /// Raw call of `api_name` on a random receiver.
    pub fn specific_call_raw<R: Rng + ?Sized>(&self, api_name: &str, rng: &mut R) -> Option<RawCall> {
        let Some(entry) = self.apis.get(api_name) else {
            debug!("{} has no API named {}", self.object_name, api_name);
            return None;
        };
        let instance = self.pool.choose(rng)?.to_string();
        let mut raw = entry.generator.generate_call_raw(rng);
        raw.object_name = self.object_name.clone();
        raw.instance_name = instance;
        Some(raw)
    }

    pub fn pick_random_call_statement<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        let api_name = self.api_list.choose(rng)?;
        self.specific_call_statement(api_name, rng)
    }

    pub fn pick_random_call_raw<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<RawCall> {
        let api_name = self.api_list.choose(rng)?;
        self.specific_call_raw(api_name, rng)
    }

    /// One guarded call for every non-blocked API.
    pub fn all_valid_call_statements<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<String> {
        let valid: Vec<&ApiEntry> = self.apis.values().filter(|e| !e.blocked).collect();
        self.sweep(&valid, 1, rng)
    }

    /// `repetitions` guarded calls for every API, blocked ones included, one
    /// newline-joined block per API.
    pub fn all_call_statements<R: Rng + ?Sized>(&self, repetitions: usize, rng: &mut R) -> Vec<String> {
        let valid = self.apis.values().filter(|e| !e.blocked);
        let blocked = self.apis.values().filter(|e| e.blocked);
        let all: Vec<&ApiEntry> = valid.chain(blocked).collect();
        self.sweep(&all, repetitions, rng)
    }

    fn sweep<R: Rng + ?Sized>(&self, entries: &[&ApiEntry], repetitions: usize, rng: &mut R) -> Vec<String> {
        if self.pool.is_empty() {
            return vec![NO_INSTANCE_PLACEHOLDER.to_string(); entries.len()];
        }
        entries
            .iter()
            .map(|entry| {
                let calls: Vec<String> = (0..repetitions)
                    .filter_map(|_| {
                        let instance = self.pool.choose(rng)?;
                        let call = entry.generator.generate_call_statement(rng);
                        Some(guard(&format!("{}.{}", instance, call)))
                    })
                    .collect();
                calls.join("\n")
            })
            .collect()
    }

    /// Names of non-blocked APIs that take no parameters.
    pub fn apis_with_no_parameters(&self) -> Vec<String> {
        self.apis
            .iter()
            .filter(|(_, e)| !e.blocked && e.generator.has_no_parameters())
            .map(|(name, _)| name.clone())
            .collect()
    }
}
