//! Test-case assembly and output.
//!
//! A [`FuzzSession`] holds one generator per engine flavor and writes
//! numbered `<index>.js` scripts into an output directory. Each script is
//! the generated statement list between a fixed prologue and epilogue; the
//! flavor of each case is drawn with [`SessionConfig::basic_ratio`].

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::catalog::CatalogError;
use crate::codegen::{CodeGenerator, GenerationError, GenerationStats};
use crate::config::{EngineFlavor, GeneratorConfig};
use crate::relations::RelationConfig;

/// First line of every test case.
pub const TEST_CASE_PROLOGUE: &str = "try{spell.available}catch(e){};";
/// Last line of every test case.
pub const TEST_CASE_EPILOGUE: &str = "closeDoc(1);";

pub const TEST_CASE_EXTENSION: &str = "js";
pub const VALID_SWEEP_FILE: &str = "sweep_valid.js";
pub const FULL_SWEEP_FILE: &str = "sweep_all.js";

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl SessionError {
    fn io(path: &Path, source: io::Error) -> Self {
        SessionError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Settings for a batch of test cases.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Root of the API catalog
    pub base_dir: PathBuf,

    /// Directory holding blocklist, limitlist and relation files
    pub config_dir: PathBuf,

    /// Where test cases are written
    pub out_dir: PathBuf,

    /// Number of test cases to write
    pub cases: usize,

    /// Generated statements per test case, prelude excluded
    pub statements: usize,

    pub weak_relation: bool,

    pub symbolic_relation: bool,

    /// Chance a case uses the basic engine instead of the full one
    pub basic_ratio: f64,

    /// Settings shared by both generators; their seeds are derived from
    /// this seed when present
    pub generator: GeneratorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("param_grammar"),
            config_dir: PathBuf::from("config"),
            out_dir: PathBuf::from("test"),
            cases: 30_000,
            statements: 2048,
            weak_relation: false,
            symbolic_relation: false,
            basic_ratio: 0.2,
            generator: GeneratorConfig::default(),
        }
    }
}

/// One assembled test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub index: usize,
    pub flavor: EngineFlavor,
    pub statements: Vec<String>,
}

impl TestCase {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.index, TEST_CASE_EXTENSION)
    }

    pub fn render(&self) -> String {
        render_test_case(&self.statements)
    }
}

/// Script text: prologue, one statement per line, epilogue.
pub fn render_test_case(statements: &[String]) -> String {
    let mut out = String::from(TEST_CASE_PROLOGUE);
    out.push('\n');
    out.push_str(&statements.join("\n"));
    out.push('\n');
    out.push_str(TEST_CASE_EPILOGUE);
    out.push('\n');
    out
}

/// What a session run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub written: usize,
    pub failed: usize,
    pub full_cases: usize,
    pub basic_cases: usize,
    pub full_stats: GenerationStats,
    pub basic_stats: GenerationStats,
}

/// Writes test cases into one directory.
#[derive(Debug, Clone)]
pub struct TestCaseWriter {
    out_dir: PathBuf,
}

impl TestCaseWriter {
    /// Create the directory if needed and check that it is writable.
    pub fn new<P: AsRef<Path>>(out_dir: P) -> SessionResult<Self> {
        let out_dir = out_dir.as_ref().to_path_buf();
        if !out_dir.exists() {
            fs::create_dir_all(&out_dir).map_err(|e| SessionError::io(&out_dir, e))?;
        }

        let marker = out_dir.join(".write_test");
        File::create(&marker)
            .and_then(|_| fs::remove_file(&marker))
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => {
                    SessionError::PermissionDenied(format!("Cannot write to directory: {}", out_dir.display()))
                }
                _ => SessionError::io(&marker, e),
            })?;

        Ok(Self { out_dir })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Write `contents` to `<out_dir>/<name>` through a temporary file.
    pub fn write_file(&self, name: &str, contents: &str) -> SessionResult<PathBuf> {
        let path = self.out_dir.join(name);
        let temp_path = path.with_extension("tmp");
        {
            let file = File::create(&temp_path).map_err(|e| SessionError::io(&temp_path, e))?;
            let mut writer = BufWriter::new(file);
            writer
                .write_all(contents.as_bytes())
                .and_then(|_| writer.flush())
                .map_err(|e| SessionError::io(&temp_path, e))?;
        }
        fs::rename(&temp_path, &path).map_err(|e| SessionError::io(&path, e))?;
        Ok(path)
    }

    pub fn write_case(&self, case: &TestCase) -> SessionResult<PathBuf> {
        self.write_file(&case.file_name(), &case.render())
    }
}

/// A batch of test cases drawn from a full and a basic generator.
#[derive(Debug)]
pub struct FuzzSession {
    config: SessionConfig,
    full: CodeGenerator,
    basic: CodeGenerator,
    flavors: WeightedIndex<f64>,
    rng: ChaCha8Rng,
    next_index: usize,
}

fn flavor_weights(basic_ratio: f64) -> SessionResult<WeightedIndex<f64>> {
    if !(0.0..=1.0).contains(&basic_ratio) {
        return Err(SessionError::InvalidConfig(format!(
            "basic ratio must be within [0, 1], got {}",
            basic_ratio
        )));
    }
    WeightedIndex::new([1.0 - basic_ratio, basic_ratio])
        .map_err(|e| SessionError::InvalidConfig(format!("basic ratio {}: {}", basic_ratio, e)))
}

impl FuzzSession {
    /// Load relations and both catalogs.
    pub fn load(config: SessionConfig) -> SessionResult<Self> {
        let relations = RelationConfig::load(&config.config_dir)?;
        let mut rng = session_rng(config.generator.seed);
        let full_config = child_config(&config.generator, &mut rng);
        let basic_config = child_config(&config.generator, &mut rng);

        let full = CodeGenerator::load(
            &config.base_dir,
            &EngineFlavor::Full.instance_table(),
            relations.clone(),
            full_config,
        )?;
        let basic = CodeGenerator::load(
            &config.base_dir,
            &EngineFlavor::Basic.instance_table(),
            relations,
            basic_config,
        )?;
        Self::from_generators(config, full, basic, rng)
    }

    /// Assemble a session from already built generators.
    pub fn from_generators(
        config: SessionConfig,
        full: CodeGenerator,
        basic: CodeGenerator,
        rng: ChaCha8Rng,
    ) -> SessionResult<Self> {
        let flavors = flavor_weights(config.basic_ratio)?;
        Ok(Self {
            config,
            full,
            basic,
            flavors,
            rng,
            next_index: 0,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn generator(&self, flavor: EngineFlavor) -> &CodeGenerator {
        match flavor {
            EngineFlavor::Full => &self.full,
            EngineFlavor::Basic => &self.basic,
        }
    }

    fn generator_mut(&mut self, flavor: EngineFlavor) -> &mut CodeGenerator {
        match flavor {
            EngineFlavor::Full => &mut self.full,
            EngineFlavor::Basic => &mut self.basic,
        }
    }

    /// Build the next numbered test case. The index advances even when
    /// generation fails.
    pub fn next_case(&mut self) -> SessionResult<TestCase> {
        let flavor = match self.flavors.sample(&mut self.rng) {
            0 => EngineFlavor::Full,
            _ => EngineFlavor::Basic,
        };
        let index = self.next_index;
        self.next_index += 1;

        let (count, weak, symbolic) = (
            self.config.statements,
            self.config.weak_relation,
            self.config.symbolic_relation,
        );
        let statements = self
            .generator_mut(flavor)
            .generate_statements_with_relation(count, weak, symbolic)?;
        Ok(TestCase {
            index,
            flavor,
            statements,
        })
    }

    /// Write `config.cases` test cases. Generation failures are logged and
    /// counted; I/O failures end the run.
    pub fn run(&mut self) -> SessionResult<SessionSummary> {
        let writer = TestCaseWriter::new(&self.config.out_dir)?;
        let mut summary = SessionSummary::default();

        for _ in 0..self.config.cases {
            match self.next_case() {
                Ok(case) => {
                    let path = writer.write_case(&case)?;
                    debug!("generated {}", path.display());
                    match case.flavor {
                        EngineFlavor::Full => summary.full_cases += 1,
                        EngineFlavor::Basic => summary.basic_cases += 1,
                    }
                    summary.written += 1;
                }
                Err(SessionError::Generation(e)) => {
                    warn!("test case {} failed: {}", self.next_index - 1, e);
                    summary.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        summary.full_stats = self.full.stats().clone();
        summary.basic_stats = self.basic.stats().clone();
        info!(
            "wrote {} test cases to {} ({} failed)",
            summary.written,
            writer.out_dir().display(),
            summary.failed
        );
        Ok(summary)
    }

    /// Write one call per valid API and repeated calls per API, from the
    /// full engine, as two scripts.
    pub fn sweep(&mut self) -> SessionResult<Vec<PathBuf>> {
        let writer = TestCaseWriter::new(&self.config.out_dir)?;
        self.full.reset_instances();
        let mut valid = self.full.prelude().to_vec();
        valid.extend(self.full.generate_all_valid_api_statements());
        let mut all = self.full.prelude().to_vec();
        all.extend(self.full.generate_all_api_statements());
        Ok(vec![
            writer.write_file(VALID_SWEEP_FILE, &render_test_case(&valid))?,
            writer.write_file(FULL_SWEEP_FILE, &render_test_case(&all))?,
        ])
    }
}

fn session_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

fn child_config(base: &GeneratorConfig, rng: &mut ChaCha8Rng) -> GeneratorConfig {
    let mut config = base.clone();
    if base.seed.is_some() {
        config.seed = Some(rng.gen());
    }
    config
}
