//! Scripted program description
//!
//! Defines the data structures for deserializing YAML programs run by the
//! scripted host. A program is a list of statements, each tagged with the
//! source line it pretends to live on.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};

/// A complete program loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct Program {
    /// Name of the program
    pub name: String,
    /// Optional description of what the program exercises
    pub description: Option<String>,
    /// Path reported as the main script
    pub script: PathBuf,
    /// Text served by the `source` command instead of reading `script`
    pub source: Option<String>,
    /// Initial global variables
    #[serde(default)]
    pub globals: serde_yaml::Mapping,
    /// User-defined functions
    #[serde(default)]
    pub functions: Vec<FunctionDef>,
    /// Statements of the auto-execute thread
    pub main: Vec<Statement>,
}

/// A user-defined function
#[derive(Deserialize, Debug)]
pub struct FunctionDef {
    pub name: String,
    /// Parameter names, bound positionally
    #[serde(default)]
    pub params: Vec<String>,
    /// Static variables and their initial values
    #[serde(default)]
    pub statics: serde_yaml::Mapping,
    pub body: Vec<Statement>,
}

/// One statement
#[derive(Deserialize, Debug)]
pub struct Statement {
    /// Source line number (1-based)
    pub line: u32,
    #[serde(flatten)]
    pub action: Action,
    /// Only execute when this expression is truthy
    pub when: Option<String>,
}

/// What a statement does
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Assign a variable from an expression or a literal YAML value
    Set {
        name: String,
        expr: Option<String>,
        value: Option<serde_yaml::Value>,
    },
    /// Call a user-defined function
    Call {
        function: String,
        #[serde(default)]
        args: Vec<String>,
        /// Variable receiving the return value
        result: Option<String>,
    },
    /// Write the value of an expression to stdout (or stderr)
    Print {
        expr: String,
        #[serde(default)]
        stderr: bool,
    },
    /// Throw the value of an expression
    Throw { expr: String },
    /// Return from the current function
    Return { expr: Option<String> },
    /// Do nothing
    Nop,
}

impl Program {
    /// Load a program from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn function(&self, name: &str) -> Option<(usize, &FunctionDef)> {
        self.functions
            .iter()
            .enumerate()
            .find(|(_, f)| f.name.eq_ignore_ascii_case(name))
    }

    /// Every line that has a statement
    pub fn executable_lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.main
            .iter()
            .chain(self.functions.iter().flat_map(|f| f.body.iter()))
            .map(|stmt| stmt.line)
    }
}
