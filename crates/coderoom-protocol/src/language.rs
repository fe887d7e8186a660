use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a language is executed, if at all.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    /// Source is handed straight to an interpreter.
    Interpret,
    /// Source is compiled to a temporary binary which is then executed.
    CompileThenRun,
    /// Editable but not runnable (markup, data formats).
    NotExecutable,
}

/// The closed set of languages the editor knows about.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Javascript,
    Typescript,
    Python,
    Java,
    Cpp,
    C,
    Go,
    Rust,
    Php,
    Ruby,
    Shell,
    Html,
    Css,
    Json,
    Markdown,
    Yaml,
    Xml,
}

impl Language {
    pub const ALL: [Language; 17] = [
        Language::Javascript,
        Language::Typescript,
        Language::Python,
        Language::Java,
        Language::Cpp,
        Language::C,
        Language::Go,
        Language::Rust,
        Language::Php,
        Language::Ruby,
        Language::Shell,
        Language::Html,
        Language::Css,
        Language::Json,
        Language::Markdown,
        Language::Yaml,
        Language::Xml,
    ];

    /// Wire identifier, e.g. `"javascript"`.
    pub fn id(self) -> &'static str {
        match self {
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Php => "php",
            Language::Ruby => "ruby",
            Language::Shell => "shell",
            Language::Html => "html",
            Language::Css => "css",
            Language::Json => "json",
            Language::Markdown => "markdown",
            Language::Yaml => "yaml",
            Language::Xml => "xml",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Language::Javascript => "JavaScript",
            Language::Typescript => "TypeScript",
            Language::Python => "Python",
            Language::Java => "Java",
            Language::Cpp => "C++",
            Language::C => "C",
            Language::Go => "Go",
            Language::Rust => "Rust",
            Language::Php => "PHP",
            Language::Ruby => "Ruby",
            Language::Shell => "Shell",
            Language::Html => "HTML",
            Language::Css => "CSS",
            Language::Json => "JSON",
            Language::Markdown => "Markdown",
            Language::Yaml => "YAML",
            Language::Xml => "XML",
        }
    }

    /// Recognized source file extensions, without the leading dot.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Language::Javascript => &["js", "jsx"],
            Language::Typescript => &["ts", "tsx"],
            Language::Python => &["py"],
            Language::Java => &["java"],
            Language::Cpp => &["cpp", "cc", "cxx"],
            Language::C => &["c"],
            Language::Go => &["go"],
            Language::Rust => &["rs"],
            Language::Php => &["php"],
            Language::Ruby => &["rb"],
            Language::Shell => &["sh", "bash"],
            Language::Html => &["html", "htm"],
            Language::Css => &["css"],
            Language::Json => &["json"],
            Language::Markdown => &["md"],
            Language::Yaml => &["yml", "yaml"],
            Language::Xml => &["xml"],
        }
    }

    pub fn execution_kind(self) -> ExecutionKind {
        match self {
            Language::Javascript
            | Language::Typescript
            | Language::Python
            | Language::Php
            | Language::Ruby
            | Language::Shell => ExecutionKind::Interpret,
            Language::Java | Language::Cpp | Language::C | Language::Go | Language::Rust => {
                ExecutionKind::CompileThenRun
            }
            Language::Html
            | Language::Css
            | Language::Json
            | Language::Markdown
            | Language::Yaml
            | Language::Xml => ExecutionKind::NotExecutable,
        }
    }

    pub fn is_executable(self) -> bool {
        self.execution_kind() != ExecutionKind::NotExecutable
    }

    /// Languages that can be run, in catalog order.
    pub fn executable() -> impl Iterator<Item = Language> {
        Self::ALL.into_iter().filter(|l| l.is_executable())
    }

    /// Look up a language by file extension (case-insensitive, leading dot allowed).
    pub fn from_extension(ext: &str) -> Option<Language> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|lang| lang.extensions().contains(&ext.as_str()))
    }

    /// Look up a language from a file name such as `src/main.rs`.
    pub fn from_file_name(name: &str) -> Option<Language> {
        let (_, ext) = name.rsplit_once('.')?;
        Self::from_extension(ext)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLanguage(pub String);

impl fmt::Display for UnknownLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown language: {}", self.0)
    }
}

impl std::error::Error for UnknownLanguage {}

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|lang| lang.id() == wanted)
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_parse_back() {
        for lang in Language::ALL {
            assert_eq!(lang.id().parse::<Language>(), Ok(lang));
        }
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn serde_uses_wire_ids() {
        let json = serde_json::to_string(&Language::Cpp).expect("encode json");
        assert_eq!(json, "\"cpp\"");
        let parsed: Language = serde_json::from_str("\"javascript\"").expect("parse json");
        assert_eq!(parsed, Language::Javascript);
    }

    #[test]
    fn extension_lookup() {
        assert_eq!(Language::from_extension("RS"), Some(Language::Rust));
        assert_eq!(Language::from_extension(".cxx"), Some(Language::Cpp));
        assert_eq!(Language::from_extension("yml"), Some(Language::Yaml));
        assert_eq!(Language::from_extension("txt"), None);
        assert_eq!(Language::from_file_name("src/app.tsx"), Some(Language::Typescript));
        assert_eq!(Language::from_file_name("Makefile"), None);
    }

    #[test]
    fn markup_is_not_executable() {
        assert!(!Language::Html.is_executable());
        assert!(Language::Shell.is_executable());
        assert_eq!(Language::executable().count(), 11);
    }
}
