//! Command lines with `{placeholder}` substitution.
//!
//! A template is split into words with shell-like quoting first (single
//! quotes, double quotes, backslash escapes) and placeholders are substituted
//! per word afterwards, so a substituted path containing spaces stays one
//! argument. `{{` and `}}` produce literal braces.
//!
//! ```
//! use methseg_core::{CommandTemplate, TemplateVars};
//! use std::path::Path;
//!
//! let template: CommandTemplate = "seg -i {input} -n {chunk}".parse().unwrap();
//! let vars = TemplateVars {
//!     input: Some(Path::new("my data.m5")),
//!     chunk: Some(3),
//!     ..TemplateVars::default()
//! };
//! let cmd = template.render(&vars).unwrap();
//! assert_eq!(cmd.args, ["-i", "my data.m5", "-n", "3"]);
//! ```

use crate::{Error, Result};
use core::{fmt, str::FromStr};
use std::ffi::{OsStr, OsString};
use std::path::Path;

/// Values that can be substituted into a [`CommandTemplate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Placeholder {
    Input,
    Output,
    Chromosome,
    ChunkSize,
    Chunk,
    ReadGroup,
}

impl Placeholder {
    pub const ALL: [Placeholder; 6] = [
        Placeholder::Input,
        Placeholder::Output,
        Placeholder::Chromosome,
        Placeholder::ChunkSize,
        Placeholder::Chunk,
        Placeholder::ReadGroup,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Placeholder::Input => "input",
            Placeholder::Output => "output",
            Placeholder::Chromosome => "chromosome",
            Placeholder::ChunkSize => "chunk_size",
            Placeholder::Chunk => "chunk",
            Placeholder::ReadGroup => "read_group",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.name())
    }
}

/// Values available while rendering. Unset fields cannot be referenced.
#[derive(Clone, Debug, Default)]
pub struct TemplateVars<'a> {
    pub input: Option<&'a Path>,
    pub output: Option<&'a Path>,
    pub chromosome: Option<&'a str>,
    pub chunk_size: Option<u64>,
    pub chunk: Option<usize>,
    pub read_group: Option<&'a str>,
}

impl TemplateVars<'_> {
    fn value(&self, placeholder: Placeholder) -> Option<OsString> {
        match placeholder {
            Placeholder::Input => self.input.map(|p| p.as_os_str().to_owned()),
            Placeholder::Output => self.output.map(|p| p.as_os_str().to_owned()),
            Placeholder::Chromosome => self.chromosome.map(OsString::from),
            Placeholder::ChunkSize => self.chunk_size.map(|v| v.to_string().into()),
            Placeholder::Chunk => self.chunk.map(|v| v.to_string().into()),
            Placeholder::ReadGroup => self.read_group.map(OsString::from),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Var(Placeholder),
}

/// A parsed command line template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
    words: Vec<Vec<Piece>>,
}

impl CommandTemplate {
    /// Returns `true` if any word references `placeholder`.
    pub fn uses(&self, placeholder: Placeholder) -> bool {
        self.words
            .iter()
            .flatten()
            .any(|piece| *piece == Piece::Var(placeholder))
    }

    /// Fails unless every placeholder in `required` is referenced.
    pub fn require(&self, required: &[Placeholder]) -> Result<()> {
        match required.iter().find(|p| !self.uses(**p)) {
            Some(missing) => Err(invalid(format!(
                "`{}` must reference {missing}",
                self.source
            ))),
            None => Ok(()),
        }
    }

    /// Fails if any placeholder outside `allowed` is referenced.
    pub fn restrict(&self, allowed: &[Placeholder]) -> Result<()> {
        match Placeholder::ALL
            .into_iter()
            .find(|p| !allowed.contains(p) && self.uses(*p))
        {
            Some(extra) => Err(invalid(format!(
                "`{}` cannot reference {extra} here",
                self.source
            ))),
            None => Ok(()),
        }
    }

    /// Substitutes `vars` into every word.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTemplate`] if a referenced placeholder has no
    /// value in `vars`.
    pub fn render(&self, vars: &TemplateVars<'_>) -> Result<RenderedCommand> {
        let mut words = self
            .words
            .iter()
            .map(|word| self.render_word(word, vars));

        let program = words
            .next()
            .unwrap_or_else(|| Err(invalid("empty command".to_string())))?;
        let args = words.collect::<Result<Vec<_>>>()?;

        Ok(RenderedCommand { program, args })
    }

    fn render_word(&self, word: &[Piece], vars: &TemplateVars<'_>) -> Result<OsString> {
        let lookup = |placeholder: Placeholder| {
            vars.value(placeholder).ok_or_else(|| {
                invalid(format!("no value for {placeholder} in `{}`", self.source))
            })
        };

        // A lone placeholder keeps the value's exact bytes.
        if let [Piece::Var(placeholder)] = word {
            return lookup(*placeholder);
        }

        let mut rendered = String::new();
        for piece in word {
            match piece {
                Piece::Literal(text) => rendered.push_str(text),
                Piece::Var(placeholder) => {
                    rendered.push_str(&lookup(*placeholder)?.to_string_lossy());
                }
            }
        }
        Ok(rendered.into())
    }
}

impl FromStr for CommandTemplate {
    type Err = Error;

    fn from_str(source: &str) -> Result<Self> {
        let words = split_words(source)?
            .iter()
            .map(|word| parse_word(word))
            .collect::<Result<Vec<_>>>()?;

        if words.is_empty() {
            return Err(invalid("command must not be empty".to_string()));
        }

        Ok(Self {
            source: source.trim().to_string(),
            words,
        })
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// A fully substituted command, ready to spawn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl RenderedCommand {
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Appends extra arguments verbatim.
    pub fn extend_args<I, S>(&mut self, extra: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(extra.into_iter().map(Into::into));
    }
}

impl fmt::Display for RenderedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

fn invalid(reason: String) -> Error {
    Error::InvalidTemplate { reason }
}

fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => return Err(invalid(format!("unterminated `'` in `{line}`"))),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => word.push(c),
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => {
                                return Err(invalid(format!("unterminated `\"` in `{line}`")));
                            }
                        },
                        Some(c) => word.push(c),
                        None => return Err(invalid(format!("unterminated `\"` in `{line}`"))),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => word.push(c),
                    None => return Err(invalid(format!("trailing `\\` in `{line}`"))),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(core::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }

    if in_word {
        words.push(word);
    }
    Ok(words)
}

fn parse_word(word: &str) -> Result<Vec<Piece>> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = word.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(invalid(format!("unclosed `{{` in `{word}`"))),
                    }
                }
                let placeholder = Placeholder::from_name(&name)
                    .ok_or_else(|| invalid(format!("unknown placeholder `{{{name}}}`")))?;
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(core::mem::take(&mut literal)));
                }
                pieces.push(Piece::Var(placeholder));
            }
            '}' => return Err(invalid(format!("unmatched `}}` in `{word}`"))),
            c => literal.push(c),
        }
    }

    if !literal.is_empty() || pieces.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}
