//! Per-language build and run recipes.

use std::collections::BTreeMap;
use std::path::Path;

use coderoom_protocol::Language;

use super::process::ProcessSpec;

const SOURCE: &str = "{source}";
const BINARY: &str = "{binary}";
const DIR: &str = "{dir}";

/// How an interpreter receives the program text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceVia {
    /// Substituted for `{source}` in the argument list.
    Argument,
    Stdin,
}

/// A program plus arguments that may contain `{source}`, `{binary}` and
/// `{dir}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn render(&self, paths: &WorkPaths<'_>) -> ProcessSpec {
        ProcessSpec::new(paths.substitute(&self.program))
            .args(self.args.iter().map(|a| paths.substitute(a)))
            .cwd(paths.dir)
    }
}

/// Locations inside one request's work directory.
#[derive(Debug, Clone, Copy)]
pub struct WorkPaths<'a> {
    pub dir: &'a Path,
    pub source: &'a Path,
    pub binary: &'a Path,
}

impl WorkPaths<'_> {
    fn substitute(&self, raw: &str) -> String {
        raw.replace(DIR, &self.dir.to_string_lossy())
            .replace(SOURCE, &self.source.to_string_lossy())
            .replace(BINARY, &self.binary.to_string_lossy())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pipeline {
    Interpret {
        program: String,
        args: Vec<String>,
        source_via: SourceVia,
    },
    CompileThenRun {
        /// File name the source is written to inside the work directory.
        source_file: String,
        compile: CommandTemplate,
        run: CommandTemplate,
    },
}

impl Pipeline {
    pub fn interpret(program: &str, args: &[&str], source_via: SourceVia) -> Self {
        Pipeline::Interpret {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            source_via,
        }
    }

    pub fn compile_then_run(
        source_file: &str,
        compile: CommandTemplate,
        run: CommandTemplate,
    ) -> Self {
        Pipeline::CompileThenRun {
            source_file: source_file.to_string(),
            compile,
            run,
        }
    }

    /// Built-in recipe for `language`, or `None` if it cannot be run.
    pub fn default_for(language: Language) -> Option<Self> {
        let native = |source_file: &str, compiler: &str, args: &[&str]| {
            Pipeline::compile_then_run(
                source_file,
                CommandTemplate::new(compiler, args),
                CommandTemplate::new(BINARY, &[]),
            )
        };
        let pipeline = match language {
            Language::Javascript => Self::interpret("node", &["-e", SOURCE], SourceVia::Argument),
            Language::Typescript => {
                Self::interpret("ts-node", &["-e", SOURCE], SourceVia::Argument)
            }
            Language::Python => Self::interpret("python3", &["-"], SourceVia::Stdin),
            Language::Php => Self::interpret("php", &["-r", SOURCE], SourceVia::Argument),
            Language::Ruby => Self::interpret("ruby", &["-e", SOURCE], SourceVia::Argument),
            Language::Shell => Self::interpret("bash", &["-c", SOURCE], SourceVia::Argument),
            Language::Java => Self::compile_then_run(
                "Main.java",
                CommandTemplate::new("javac", &["-d", DIR, SOURCE]),
                CommandTemplate::new("java", &["-cp", DIR, "Main"]),
            ),
            Language::Cpp => native("main.cpp", "g++", &["-x", "c++", "-o", BINARY, SOURCE]),
            Language::C => native("main.c", "gcc", &["-x", "c", "-o", BINARY, SOURCE]),
            Language::Go => native("main.go", "go", &["build", "-o", BINARY, SOURCE]),
            Language::Rust => native("main.rs", "rustc", &["-o", BINARY, SOURCE]),
            Language::Html
            | Language::Css
            | Language::Json
            | Language::Markdown
            | Language::Yaml
            | Language::Xml => return None,
        };
        Some(pipeline)
    }

    /// Replace the interpreter, or the compiler for compiled languages.
    pub fn with_program(mut self, new_program: impl Into<String>) -> Self {
        match &mut self {
            Pipeline::Interpret { program, .. } => *program = new_program.into(),
            Pipeline::CompileThenRun { compile, .. } => compile.program = new_program.into(),
        }
        self
    }

    pub(crate) fn interpret_spec(
        program: &str,
        args: &[String],
        source_via: SourceVia,
        source: &str,
    ) -> ProcessSpec {
        let spec = ProcessSpec::new(program);
        match source_via {
            SourceVia::Argument => spec.args(args.iter().map(|a| a.replace(SOURCE, source))),
            SourceVia::Stdin => spec.args(args.iter().cloned()).stdin(source),
        }
    }

    pub(crate) fn compile_spec(compile: &CommandTemplate, paths: &WorkPaths<'_>) -> ProcessSpec {
        compile.render(paths)
    }

    pub(crate) fn run_spec(run: &CommandTemplate, paths: &WorkPaths<'_>) -> ProcessSpec {
        run.render(paths)
    }
}

/// The pipeline used for each runnable language.
#[derive(Debug, Clone)]
pub struct Toolchains {
    pipelines: BTreeMap<Language, Pipeline>,
}

impl Default for Toolchains {
    fn default() -> Self {
        let pipelines = Language::executable()
            .filter_map(|lang| Pipeline::default_for(lang).map(|p| (lang, p)))
            .collect();
        Self { pipelines }
    }
}

impl Toolchains {
    pub fn empty() -> Self {
        Self {
            pipelines: BTreeMap::new(),
        }
    }

    pub fn get(&self, language: Language) -> Option<&Pipeline> {
        self.pipelines.get(&language)
    }

    pub fn set(&mut self, language: Language, pipeline: Pipeline) {
        self.pipelines.insert(language, pipeline);
    }

    /// Swap the program for `language`. Returns `false` if it has no pipeline.
    pub fn override_program(&mut self, language: Language, program: impl Into<String>) -> bool {
        match self.pipelines.remove(&language) {
            Some(pipeline) => {
                self.pipelines
                    .insert(language, pipeline.with_program(program));
                true
            }
            None => false,
        }
    }

    /// Runnable languages in catalog order.
    pub fn languages(&self) -> impl Iterator<Item = Language> + '_ {
        self.pipelines.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn every_executable_language_has_a_default() {
        for lang in Language::ALL {
            assert_eq!(
                Pipeline::default_for(lang).is_some(),
                lang.is_executable(),
                "{lang}"
            );
        }
        assert_eq!(
            Toolchains::default().languages().count(),
            Language::executable().count()
        );
    }

    #[test]
    fn argument_sources_are_substituted_verbatim() {
        let Some(Pipeline::Interpret {
            program,
            args,
            source_via,
        }) = Pipeline::default_for(Language::Javascript)
        else {
            panic!("javascript should interpret");
        };
        let spec = Pipeline::interpret_spec(&program, &args, source_via, "console.log('{x}')");
        assert_eq!(spec.program, "node");
        assert_eq!(spec.args, vec!["-e", "console.log('{x}')"]);
        assert!(spec.stdin.is_none());
    }

    #[test]
    fn python_reads_from_stdin() {
        let Some(Pipeline::Interpret {
            program,
            args,
            source_via,
        }) = Pipeline::default_for(Language::Python)
        else {
            panic!("python should interpret");
        };
        let spec = Pipeline::interpret_spec(&program, &args, source_via, "print(1)");
        assert_eq!(spec.args, vec!["-"]);
        assert_eq!(spec.stdin.as_deref(), Some("print(1)"));
    }

    #[test]
    fn compile_templates_render_work_paths() {
        let dir = PathBuf::from("/scratch/coderoom-abc");
        let source = dir.join("Main.java");
        let binary = dir.join("program");
        let paths = WorkPaths {
            dir: &dir,
            source: &source,
            binary: &binary,
        };
        let Some(Pipeline::CompileThenRun { compile, run, .. }) =
            Pipeline::default_for(Language::Java)
        else {
            panic!("java should compile");
        };

        let compile = Pipeline::compile_spec(&compile, &paths);
        assert_eq!(
            compile.args,
            vec!["-d", "/scratch/coderoom-abc", "/scratch/coderoom-abc/Main.java"]
        );
        assert_eq!(compile.cwd.as_deref(), Some(dir.as_path()));

        let run = Pipeline::run_spec(&run, &paths);
        assert_eq!(run.program, "java");
        assert_eq!(run.args, vec!["-cp", "/scratch/coderoom-abc", "Main"]);
    }

    #[test]
    fn native_binaries_run_directly() {
        let dir = PathBuf::from("/w");
        let source = dir.join("main.c");
        let binary = dir.join("program");
        let paths = WorkPaths {
            dir: &dir,
            source: &source,
            binary: &binary,
        };
        let Some(Pipeline::CompileThenRun { run, .. }) = Pipeline::default_for(Language::C) else {
            panic!("c should compile");
        };
        assert_eq!(Pipeline::run_spec(&run, &paths).program, "/w/program");
    }

    #[test]
    fn override_replaces_interpreter_or_compiler() {
        let mut toolchains = Toolchains::default();
        assert!(toolchains.override_program(Language::Python, "/opt/python/bin/python3"));
        assert!(toolchains.override_program(Language::Cpp, "clang++"));
        assert!(!toolchains.override_program(Language::Html, "tidy"));

        assert!(matches!(
            toolchains.get(Language::Python),
            Some(Pipeline::Interpret { program, .. }) if program == "/opt/python/bin/python3"
        ));
        assert!(matches!(
            toolchains.get(Language::Cpp),
            Some(Pipeline::CompileThenRun { compile, .. }) if compile.program == "clang++"
        ));
    }
}
