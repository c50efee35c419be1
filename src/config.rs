//! Engine configuration.
//!
//! Everything the code generator needs besides the catalog is passed in
//! explicitly: which scripting objects exist and how they are reached
//! ([`InstanceTable`]), the probabilities steering relation-aware generation
//! ([`RelationPolicy`]), and run limits ([`GeneratorConfig`]).

use std::time::Duration;

use crate::normalize::DEFAULT_COUNTERFACTUAL_PROBABILITY;
use crate::symbolic::SolverBudget;

/// Ordered map from object name to its permanent receiver expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceTable {
    entries: Vec<(String, Vec<String>)>,
}

const FULL_OBJECTS: &[(&str, &[&str])] = &[
    ("ADBC", &["this.ADBC"]),
    ("Annotation", &[]),
    ("app", &["this.app", "app"]),
    ("bookmarkRoot", &["this.bookmarkRoot"]),
    ("Bookmark", &["this.bookmarkRoot.children[0]"]),
    ("Collab", &["this.Collab"]),
    ("color", &["this.color"]),
    ("constants", &["this.constants"]),
    ("cursor", &["this.cursor"]),
    ("Discovery", &["this.Net.Discovery"]),
    ("Doc", &["this", "this", "this"]),
    ("event", &["this.event"]),
    ("Field", &[]),
    ("FormWorkflow", &["this.FormWorkflow"]),
    ("fs", &["this.app.fs", "app.fs"]),
    ("FX", &["this.FX"]),
    ("http", &["this.http"]),
    ("identity", &["this.identity"]),
    ("info", &["this.info"]),
    ("localFileStorage", &["this.FX.localFileStorage"]),
    ("localStorage", &["this.localStorage"]),
    ("media", &["this.media"]),
    ("methodProxy", &["this.methodProxy"]),
    ("Net", &["this.Net"]),
    ("page", &["this.page"]),
    ("persistentData", &["this.app.persistentData"]),
    ("ReadStream", &["this.ReadStream"]),
    ("RSS", &["this.RSS"]),
    ("search", &["this.search"]),
    ("security", &["this.security"]),
    ("shareIdentity", &["this.shareIdentity"]),
    ("SOAP", &["this.SOAP", "this.Net.SOAP"]),
    ("Span", &[]),
    ("spell", &["this.spell", "spell"]),
    ("StreamDigest", &["this.StreamDigest"]),
    ("Subscriptions", &["this.Net.Subscriptions"]),
    ("Thermometer", &["this.app.thermometer"]),
    ("TTS", &["this.tts"]),
    ("util", &["this.util"]),
    ("viewState", &["this.viewState"]),
];

const BASIC_OBJECTS: &[&str] = &[
    "Annotation",
    "app",
    "Bookmark",
    "bookmarkRoot",
    "color",
    "Doc",
    "event",
    "Field",
    "search",
    "spell",
    "util",
];

impl InstanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [&'a str])>,
    {
        let mut table = Self::new();
        for (object, instances) in pairs {
            table.insert(object, instances.iter().map(|i| i.to_string()).collect());
        }
        table
    }

    /// Every scripting object of the full reader API surface.
    pub fn full() -> Self {
        Self::from_pairs(FULL_OBJECTS.iter().copied())
    }

    /// The core document, form and application objects only.
    pub fn basic() -> Self {
        Self::from_pairs(
            FULL_OBJECTS
                .iter()
                .copied()
                .filter(|(name, _)| BASIC_OBJECTS.contains(name)),
        )
    }

    /// Insert or replace an object's receivers, keeping its position.
    pub fn insert(&mut self, object: &str, instances: Vec<String>) {
        match self.entries.iter_mut().find(|(name, _)| name == object) {
            Some(entry) => entry.1 = instances,
            None => self.entries.push((object.to_string(), instances)),
        }
    }

    pub fn get(&self, object: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(name, _)| name == object)
            .map(|(_, instances)| instances.as_slice())
    }

    pub fn contains(&self, object: &str) -> bool {
        self.get(object).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, instances)| (name.as_str(), instances.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which catalog a generator is built over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineFlavor {
    Full,
    Basic,
}

impl EngineFlavor {
    pub fn instance_table(&self) -> InstanceTable {
        match self {
            EngineFlavor::Full => InstanceTable::full(),
            EngineFlavor::Basic => InstanceTable::basic(),
        }
    }
}

/// Probabilities steering relation-aware generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelationPolicy {
    /// Emit the first call alone
    pub single_statement: f64,

    /// Emit a short loop of hook statements instead (taken after `single_statement`)
    pub loop_statement: f64,

    /// Follow the weak relation table when choosing the second call
    pub weak_preference: f64,

    /// Attempt symbolic wiring for a pair
    pub symbolic_attempt: f64,

    /// Wrap a parameter of the first call in a coercion hook object
    pub simple_hook: f64,

    /// Pass the first call's parameters through a getter hook object
    /// (taken after `simple_hook`)
    pub complex_hook: f64,

    /// Reroll a picked key that is on the limit list
    pub limited_reroll: f64,

    /// Copies of an ordinary key in the selection pool; limited keys get one
    pub general_key_weight: usize,
}

impl Default for RelationPolicy {
    fn default() -> Self {
        Self {
            single_statement: 0.5,
            loop_statement: 0.05,
            weak_preference: 0.9,
            symbolic_attempt: 0.9,
            simple_hook: 0.4,
            complex_hook: 0.4,
            limited_reroll: 0.8,
            general_key_weight: 5,
        }
    }
}

/// Run-level settings of a code generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Seed for the generator's RNG; entropy when `None`
    pub seed: Option<u64>,

    pub policy: RelationPolicy,

    pub solver_budget: SolverBudget,

    /// Consecutive discarded iterations before generation gives up
    pub max_consecutive_failures: usize,

    /// Chance a normalized string or number is replaced by an adversarial one
    pub counterfactual_probability: f64,

    /// Number of annotation and field captures in the prelude
    pub prelude_captures: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: None,
            policy: RelationPolicy::default(),
            solver_budget: SolverBudget::default(),
            max_consecutive_failures: 10_000,
            counterfactual_probability: DEFAULT_COUNTERFACTUAL_PROBABILITY,
            prelude_captures: 10,
        }
    }
}

impl GeneratorConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_solver_timeout(mut self, timeout: Duration) -> Self {
        self.solver_budget.timeout = timeout;
        self
    }
}
