//! Trigger-result based event selection.
//!
//! Each configured spec is a boolean expression over trigger path names,
//! for example `p_photon AND NOT p_veto` or `(HLT_Ele* OR HLT_Photon*):HLT`.
//! Path names may use `*` and `?` wildcards; a wildcard term accepts when any
//! matching path passed. The optional `:PROCESS` suffix names the process
//! whose trigger results are inspected and defaults to the output stage's own
//! process. An event is written when any spec accepts it.

use crate::error::ConfigurationError;
use crate::selector::glob_to_regex;
use common::config::SelectEventsConfig;
use common::model::TriggerResults;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Content hash identifying an event-selection configuration
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorConfigId(String);

impl SelectorConfigId {
    pub(crate) fn of(config: &SelectEventsConfig) -> Self {
        let canonical = serde_json::to_vec(config).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        SelectorConfigId(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SelectorConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
enum Expr {
    /// Index into the spec's pattern list
    Path(usize),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Not,
    And,
    Or,
    Name(String),
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            }
            c if is_name_char(c) => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_name_char(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(match word.as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    _ => Token::Name(word),
                });
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '*' || c == '?'
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    patterns: Vec<(String, Regex)>,
}

impl Parser {
    fn parse(tokens: Vec<Token>) -> Result<(Expr, Vec<(String, Regex)>), String> {
        let mut parser = Parser {
            tokens,
            pos: 0,
            patterns: Vec::new(),
        };
        let expr = parser.or_expr()?;
        if let Some(token) = parser.tokens.get(parser.pos) {
            return Err(format!("unexpected {token:?} after expression"));
        }
        Ok((expr, parser.patterns))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Not) => Ok(Expr::Not(Box::new(self.unary()?))),
            Some(Token::Open) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(Token::Name(name)) => {
                let regex = glob_to_regex(&name).map_err(|e| e.to_string())?;
                self.patterns.push((name, regex));
                Ok(Expr::Path(self.patterns.len() - 1))
            }
            Some(other) => Err(format!("unexpected {other:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// Path indices of one spec, valid for one process and path-name list
#[derive(Debug, Clone)]
struct Resolution {
    process: String,
    path_names: Vec<String>,
    matches: Vec<Vec<usize>>,
}

#[derive(Debug, Clone)]
struct SelectionSpec {
    text: String,
    process: String,
    expr: Expr,
    patterns: Vec<(String, Regex)>,
    resolution: Option<Resolution>,
}

impl SelectionSpec {
    fn parse(text: &str, default_process: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidSelectEvents {
            spec: text.to_string(),
            reason,
        };

        let (body, process) = match text.rsplit_once(':') {
            Some((body, process)) => {
                let process = process.trim();
                if process.is_empty() || !process.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(invalid(format!("invalid process name '{process}'")));
                }
                (body, process.to_string())
            }
            None => (text, default_process.to_string()),
        };

        let tokens = tokenize(body).map_err(&invalid)?;
        if tokens.is_empty() {
            return Err(invalid("empty expression".to_string()));
        }
        let (expr, patterns) = Parser::parse(tokens).map_err(&invalid)?;

        Ok(Self {
            text: text.to_string(),
            process,
            expr,
            patterns,
            resolution: None,
        })
    }

    fn covers(&self, results: &TriggerResults) -> bool {
        self.patterns
            .iter()
            .all(|(_, regex)| results.path_names.iter().any(|p| regex.is_match(p)))
    }

    /// Pick the trigger results this spec reads: the named process, otherwise
    /// the one process whose results contain every referenced path.
    fn locate<'a>(
        &self,
        all: &'a BTreeMap<String, TriggerResults>,
    ) -> Result<&'a TriggerResults, ConfigurationError> {
        if let Some(results) = all.get(&self.process) {
            return Ok(results);
        }

        let candidates: Vec<&TriggerResults> = all.values().filter(|r| self.covers(r)).collect();
        match candidates.as_slice() {
            [only] => {
                log::debug!(
                    "event selection '{}' falls back to trigger results of process {}",
                    self.text,
                    only.process_name
                );
                Ok(only)
            }
            [] => Err(ConfigurationError::MissingTriggerResults {
                spec: self.text.clone(),
                process: self.process.clone(),
            }),
            several => Err(ConfigurationError::AmbiguousTriggerResults {
                spec: self.text.clone(),
                candidates: several.iter().map(|r| r.process_name.clone()).collect(),
            }),
        }
    }

    fn resolve(&mut self, results: &TriggerResults) -> Result<(), ConfigurationError> {
        let cached = self.resolution.as_ref().is_some_and(|resolution| {
            resolution.process == results.process_name
                && resolution.path_names == results.path_names
        });
        if cached {
            return Ok(());
        }

        let mut matches = Vec::with_capacity(self.patterns.len());
        for (name, regex) in &self.patterns {
            let indices: Vec<usize> = results
                .path_names
                .iter()
                .enumerate()
                .filter(|(_, p)| regex.is_match(p))
                .map(|(i, _)| i)
                .collect();
            if indices.is_empty() {
                return Err(ConfigurationError::UnknownPath {
                    spec: self.text.clone(),
                    path: name.clone(),
                    process: results.process_name.clone(),
                });
            }
            matches.push(indices);
        }

        self.resolution = Some(Resolution {
            process: results.process_name.clone(),
            path_names: results.path_names.clone(),
            matches,
        });
        Ok(())
    }

    fn evaluate(&self, results: &TriggerResults) -> bool {
        let Some(resolution) = &self.resolution else {
            return false;
        };
        eval(&self.expr, &resolution.matches, results)
    }
}

fn eval(expr: &Expr, matches: &[Vec<usize>], results: &TriggerResults) -> bool {
    match expr {
        Expr::Path(i) => matches[*i].iter().any(|&j| results.accepted(j)),
        Expr::Not(inner) => !eval(inner, matches, results),
        Expr::And(lhs, rhs) => eval(lhs, matches, results) && eval(rhs, matches, results),
        Expr::Or(lhs, rhs) => eval(lhs, matches, results) || eval(rhs, matches, results),
    }
}

/// Decides per event whether an output stage writes it
#[derive(Debug, Clone)]
pub struct EventSelector {
    specs: Vec<SelectionSpec>,
    want_all_events: bool,
    config_id: SelectorConfigId,
}

impl EventSelector {
    /// Parse every spec up front; a malformed spec fails here.
    pub fn new(
        config: &SelectEventsConfig,
        default_process: &str,
    ) -> Result<Self, ConfigurationError> {
        let specs = config
            .select_events
            .iter()
            .map(|s| SelectionSpec::parse(s, default_process))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            want_all_events: config.process_all || specs.is_empty(),
            specs,
            config_id: SelectorConfigId::of(config),
        })
    }

    pub fn want_all_events(&self) -> bool {
        self.want_all_events
    }

    pub fn selector_config(&self) -> &SelectorConfigId {
        &self.config_id
    }

    /// Accept or reject one event given the trigger results of every process.
    ///
    /// In want-all mode the trigger results are not looked at. Otherwise every
    /// spec is resolved before any is evaluated, so a broken spec fails on the
    /// first event even when an earlier spec accepts it.
    pub fn want_event(
        &mut self,
        trigger_results: &BTreeMap<String, TriggerResults>,
    ) -> Result<bool, ConfigurationError> {
        if self.want_all_events {
            return Ok(true);
        }

        let mut located = Vec::with_capacity(self.specs.len());
        for spec in &mut self.specs {
            let results = spec.locate(trigger_results)?;
            spec.resolve(results)?;
            located.push(results);
        }

        Ok(self
            .specs
            .iter()
            .zip(located)
            .any(|(spec, results)| spec.evaluate(results)))
    }
}
