//! Sentence templates → [`SentenceGraph`].
//!
//! Template text is ini-like, one sentence per line:
//!
//! ```text
//! [SetLight]
//! turn (on | off){state} the (kitchen | bedroom){name} light
//! set [the] brightness to $rhasspy/number{brightness}
//! open the $door
//!
//! # comments and blank lines are skipped
//! ```
//!
//! - `(a | b)` alternatives, `[words]` optional
//! - `{tag}` after a word or group captures it as slot `tag`
//! - `$list` draws the slot value from a named list (`$list{tag}` to rename
//!   the slot). Lists must be supplied with the training request, except the
//!   built-in `rhasspy/*` sources. A list may be tagged as `($list){tag}` but
//!   cannot share a tagged group with other words.

use std::collections::{BTreeMap, BTreeSet};

use crate::dataset::normalize_entity_name;
use crate::error::{NluError, NluResult};

use super::{NodeId, OutputLabel, SentenceGraph};

/// Produces the sentence graph a training request is compiled from.
pub trait GraphBuilder: Send + Sync {
    fn build(
        &self,
        sentences_by_intent: &BTreeMap<String, String>,
        slots_by_name: &BTreeMap<String, BTreeSet<String>>,
    ) -> NluResult<SentenceGraph>;
}

/// Parsed template expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Word(String),
    Seq(Vec<Expr>),
    Alt(Vec<Expr>),
    Optional(Box<Expr>),
    /// `$name`
    ListRef(String),
    /// `expr{tag}`
    Tagged { expr: Box<Expr>, tag: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    List(String),
    Tag(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Pipe,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(w) => format!("word '{w}'"),
            Token::List(l) => format!("'${l}'"),
            Token::Tag(t) => format!("'{{{t}}}'"),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::LBracket => "'['".into(),
            Token::RBracket => "']'".into(),
            Token::Pipe => "'|'".into(),
        }
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '|' | '$')
}

#[derive(Debug, Clone)]
struct Sentence {
    line: usize,
    expr: Expr,
}

/// Default [`GraphBuilder`] for the template syntax above.
#[derive(Debug, Clone, Default)]
pub struct TemplateGrammar;

impl TemplateGrammar {
    pub fn new() -> Self {
        Self
    }

    /// Parse a single sentence template.
    pub fn parse_sentence(line: &str) -> Result<Expr, String> {
        let tokens = Self::tokenize(line)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_alternation()?;
        if let Some(tok) = parser.peek() {
            return Err(format!("Unexpected {}", tok.describe()));
        }
        Ok(expr)
    }

    fn tokenize(line: &str) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        let mut chars = line.chars().peekable();

        while let Some(&c) = chars.peek() {
            match c {
                c if c.is_whitespace() => {
                    chars.next();
                }
                '(' | ')' | '[' | ']' | '|' => {
                    chars.next();
                    tokens.push(match c {
                        '(' => Token::LParen,
                        ')' => Token::RParen,
                        '[' => Token::LBracket,
                        ']' => Token::RBracket,
                        _ => Token::Pipe,
                    });
                }
                '{' => {
                    chars.next();
                    let mut tag = String::new();
                    let mut closed = false;
                    for ch in chars.by_ref() {
                        if ch == '}' {
                            closed = true;
                            break;
                        }
                        tag.push(ch);
                    }
                    if !closed {
                        return Err("Unterminated slot tag '{'".into());
                    }
                    let tag = tag.trim();
                    if tag.is_empty() {
                        return Err("Empty slot tag".into());
                    }
                    tokens.push(Token::Tag(tag.to_string()));
                }
                '}' => return Err("Unexpected '}'".into()),
                '$' => {
                    chars.next();
                    let mut name = String::new();
                    while let Some(&ch) = chars.peek() {
                        if is_delimiter(ch) {
                            break;
                        }
                        name.push(ch);
                        chars.next();
                    }
                    if name.is_empty() {
                        return Err("Missing list name after '$'".into());
                    }
                    tokens.push(Token::List(name));
                }
                _ => {
                    let mut word = String::new();
                    while let Some(&ch) = chars.peek() {
                        if is_delimiter(ch) {
                            break;
                        }
                        word.push(ch);
                        chars.next();
                    }
                    tokens.push(Token::Word(word));
                }
            }
        }

        Ok(tokens)
    }

    /// Split template blocks into per-intent sentences, in first-seen order.
    ///
    /// Blocks are numbered as one concatenated file (each followed by a blank
    /// line) so error lines match what the user would see joined together.
    fn parse_blocks(
        sentences_by_intent: &BTreeMap<String, String>,
    ) -> NluResult<Vec<(String, Vec<Sentence>)>> {
        let mut intents: Vec<(String, Vec<Sentence>)> = Vec::new();
        let mut line_offset = 0;

        for (key, block) in sentences_by_intent {
            let mut current = key.clone();
            let mut block_lines = 0;

            for (idx, raw) in block.lines().enumerate() {
                block_lines = idx + 1;
                let line = line_offset + idx + 1;
                let trimmed = raw.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }

                if let Some(header) = section_header(trimmed) {
                    if header.is_empty() {
                        return Err(NluError::Grammar {
                            line,
                            message: "Empty intent name".into(),
                        });
                    }
                    current = header.to_string();
                    continue;
                }

                let expr = Self::parse_sentence(trimmed)
                    .map_err(|message| NluError::Grammar { line, message })?;

                let sentence = Sentence { line, expr };
                match intents.iter_mut().find(|(name, _)| *name == current) {
                    Some((_, sentences)) => sentences.push(sentence),
                    None => intents.push((current.clone(), vec![sentence])),
                }
            }

            line_offset += block_lines + 1;
        }

        Ok(intents)
    }
}

/// `[Name]` on a line of its own.
fn section_header(line: &str) -> Option<&str> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    if inner.is_empty() {
        return Some(inner);
    }
    if inner.contains(|c: char| is_delimiter(c) || c == '}') {
        return None;
    }
    Some(inner)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_alternation(&mut self) -> Result<Expr, String> {
        let mut options = vec![self.parse_sequence()?];
        while self.eat(&Token::Pipe) {
            options.push(self.parse_sequence()?);
        }
        if options.len() == 1 {
            Ok(options.remove(0))
        } else {
            Ok(Expr::Alt(options))
        }
    }

    fn parse_sequence(&mut self) -> Result<Expr, String> {
        let mut items = Vec::new();
        while let Some(tok) = self.peek() {
            if matches!(tok, Token::Pipe | Token::RParen | Token::RBracket) {
                break;
            }
            items.push(self.parse_item()?);
        }
        Ok(Expr::Seq(items))
    }

    fn parse_item(&mut self) -> Result<Expr, String> {
        let atom = match self.next() {
            Some(Token::Word(w)) => Expr::Word(w),
            Some(Token::List(l)) => Expr::ListRef(l),
            Some(Token::LParen) => {
                let inner = self.parse_alternation()?;
                if !self.eat(&Token::RParen) {
                    return Err("Unclosed '('".into());
                }
                inner
            }
            Some(Token::LBracket) => {
                let inner = self.parse_alternation()?;
                if !self.eat(&Token::RBracket) {
                    return Err("Unclosed '['".into());
                }
                Expr::Optional(Box::new(inner))
            }
            Some(Token::Tag(t)) => {
                return Err(format!("Slot tag '{{{t}}}' must follow a word or group"))
            }
            Some(tok) => return Err(format!("Unexpected {}", tok.describe())),
            None => return Err("Unexpected end of sentence".into()),
        };

        if let Some(Token::Tag(tag)) = self.peek().cloned() {
            self.pos += 1;
            return Ok(Expr::Tagged {
                expr: Box::new(atom),
                tag,
            });
        }
        Ok(atom)
    }
}

/// Rejects nested tags, lists inside tagged groups and lists that were not
/// supplied. `in_slot` carries the enclosing tag.
fn check_expr(
    expr: &Expr,
    in_slot: Option<&str>,
    lists: &BTreeSet<String>,
) -> Result<(), String> {
    match expr {
        Expr::Word(_) => Ok(()),
        Expr::Seq(items) | Expr::Alt(items) => items
            .iter()
            .try_for_each(|item| check_expr(item, in_slot, lists)),
        Expr::Optional(inner) => check_expr(inner, in_slot, lists),
        Expr::ListRef(name) => match in_slot {
            Some(tag) => Err(format!(
                "Slot list '${}' cannot be part of tagged group '{{{tag}}}'",
                list_name(name)
            )),
            None => check_list(name, lists),
        },
        Expr::Tagged { expr, tag } => {
            if in_slot.is_some() {
                return Err(format!("Nested slot tag '{{{tag}}}'"));
            }
            match single_list_ref(expr) {
                Some(name) => check_list(name, lists),
                None => check_expr(expr, Some(tag), lists),
            }
        }
    }
}

fn check_list(raw: &str, lists: &BTreeSet<String>) -> Result<(), String> {
    let name = list_name(raw);
    if !is_builtin_list(&name) && !lists.contains(&name) {
        return Err(format!("Unknown slot list '${name}'"));
    }
    Ok(())
}

/// `$name`, possibly wrapped in single-item groups like `($name)`.
fn single_list_ref(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::ListRef(name) => Some(name),
        Expr::Seq(items) | Expr::Alt(items) if items.len() == 1 => single_list_ref(&items[0]),
        _ => None,
    }
}

fn list_name(raw: &str) -> String {
    normalize_entity_name(&format!("${raw}"))
}

fn is_builtin_list(name: &str) -> bool {
    name.starts_with("rhasspy/")
}

struct Emitter {
    graph: SentenceGraph,
}

impl Emitter {
    fn emit(&mut self, expr: &Expr, from: NodeId, to: NodeId) {
        match expr {
            Expr::Word(w) => {
                self.graph.add_edge(from, to, Some(w), None);
            }
            Expr::Seq(items) => {
                if items.is_empty() {
                    self.graph.add_edge(from, to, None, None);
                    return;
                }
                let mut current = from;
                for (i, item) in items.iter().enumerate() {
                    let next = if i + 1 == items.len() {
                        to
                    } else {
                        self.graph.add_node()
                    };
                    self.emit(item, current, next);
                    current = next;
                }
            }
            Expr::Alt(options) => {
                for option in options {
                    self.emit(option, from, to);
                }
            }
            Expr::Optional(inner) => {
                self.emit(inner, from, to);
                self.graph.add_edge(from, to, None, None);
            }
            Expr::ListRef(name) => {
                let name = list_name(name);
                self.emit_slot(&name, expr, from, to);
            }
            Expr::Tagged { expr, tag } => self.emit_slot(tag, expr, from, to),
        }
    }

    fn emit_slot(&mut self, tag: &str, inner: &Expr, from: NodeId, to: NodeId) {
        let begin = self.graph.add_node();
        let end = self.graph.add_node();
        self.graph
            .add_edge(from, begin, None, Some(OutputLabel::SlotBegin(tag.to_string())));
        match single_list_ref(inner) {
            Some(name) => {
                self.graph.add_edge(
                    begin,
                    end,
                    None,
                    Some(OutputLabel::EntitySource(list_name(name))),
                );
            }
            None => self.emit(inner, begin, end),
        }
        self.graph
            .add_edge(end, to, None, Some(OutputLabel::SlotEnd(tag.to_string())));
    }
}

impl GraphBuilder for TemplateGrammar {
    fn build(
        &self,
        sentences_by_intent: &BTreeMap<String, String>,
        slots_by_name: &BTreeMap<String, BTreeSet<String>>,
    ) -> NluResult<SentenceGraph> {
        let intents = Self::parse_blocks(sentences_by_intent)?;
        let lists: BTreeSet<String> = slots_by_name
            .keys()
            .map(|k| normalize_entity_name(k))
            .collect();

        for (_, sentences) in &intents {
            for sentence in sentences {
                check_expr(&sentence.expr, None, &lists).map_err(|message| {
                    NluError::Grammar {
                        line: sentence.line,
                        message,
                    }
                })?;
            }
        }

        let mut emitter = Emitter {
            graph: SentenceGraph::new(),
        };
        let start = emitter.graph.add_node();
        let end = emitter.graph.add_node();
        emitter.graph.set_start(start);
        emitter.graph.set_end(end);

        for (intent, sentences) in &intents {
            let root = emitter.graph.add_node();
            emitter.graph.add_edge(
                start,
                root,
                None,
                Some(OutputLabel::IntentRoot(intent.clone())),
            );
            for sentence in sentences {
                emitter.emit(&sentence.expr, root, end);
            }
        }

        Ok(emitter.graph)
    }
}
