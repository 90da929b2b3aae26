//! The graph description parser.
//!
//! Turns compositor description text into [`CompositorGraph`]s. The format is block
//! structured:
//!
//! ```text
//! compositor main {
//!     texture sceneColor target_size RGBA16F;
//!     rwtexture depthDown target_size_div 2 R32F;
//!     texture gbuffer target_size RGBA8:albedo RGBA16F:normals;   // MRT group
//!
//!     pass opaque {
//!         target sceneColor;
//!         material scene_opaque;
//!         input shadow.map;
//!     }
//!     task ssao(compute_shader) {
//!         input depthDown(read);
//!         target aoTex(compute_shader);
//!         entry main_cs;
//!         after opaque;
//!         sync aoDone signal;
//!     }
//!     ref shadow(sceneColor);
//!     import postfx.lut;
//! }
//! ```
//!
//! Parsing is deliberately permissive: unknown format and sizing tokens degrade to
//! sentinel values with a warning and surface later as visibly wrong textures, instead
//! of failing the whole description. Only violations of the block grammar itself are
//! hard errors.

use std::collections::HashMap;

use anyhow::Result;

use crate::core::error::Error;
use crate::graph::pass::{PassDescriptor, PassKind, PassSlot, SlotFlags, SyncMarker, SyncOp};
use crate::graph::texture::{SizeRule, TextureDescriptor, TextureFormat};
use crate::graph::{CompositorGraph, ImportDirective};
use crate::sync::domain::QueueKind;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TokenKind {
    Word,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Semi,
    Comma,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    line: usize,
}

fn parse_error(line: usize, message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::from(Error::ParseError {
        line,
        message: message.into(),
    })
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '$')
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1usize;
    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            line += 1;
                            break;
                        }
                    }
                } else {
                    return Err(parse_error(line, "unexpected `/`"));
                }
            }
            '{' | '}' | '(' | ')' | ';' | ',' => {
                let kind = match c {
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    ';' => TokenKind::Semi,
                    _ => TokenKind::Comma,
                };
                tokens.push(Token {
                    kind,
                    text: c.to_string(),
                    line,
                });
                chars.next();
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_word_char(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token {
                    kind: TokenKind::Word,
                    text: word,
                    line,
                });
            }
            c => return Err(parse_error(line, format!("unexpected character `{}`", c))),
        }
    }
    Ok(tokens)
}

/// Positional parameter substitution and scope bookkeeping for `ref` inclusion.
#[derive(Debug, Default, Clone)]
pub struct SubstitutionContext {
    /// Positional arguments, substituted for `$0`, `$1`, ... in the included block.
    pub params: Vec<String>,
    stack: Vec<String>,
}

impl SubstitutionContext {
    /// Context for a top-level graph: no parameters, no enclosing scope.
    pub fn root() -> Self {
        Self::default()
    }

    /// Context carrying positional parameters.
    pub fn with_params(params: Vec<String>) -> Self {
        SubstitutionContext {
            params,
            stack: Vec::new(),
        }
    }

    fn substitute(&self, word: &str) -> String {
        if !word.starts_with('$') {
            return word.to_owned();
        }
        let digits: String = word[1..].chars().take_while(|c| c.is_ascii_digit()).collect();
        let Ok(index) = digits.parse::<usize>() else {
            return word.to_owned();
        };
        match self.params.get(index) {
            Some(param) => format!("{}{}", param, &word[1 + digits.len()..]),
            None => {
                warn!("No argument bound to parameter `${}`", index);
                word.to_owned()
            }
        }
    }
}

/// Holds the tokenized source of every named compositor block, so `ref` and `import`
/// directives can resolve across files.
#[derive(Debug, Default)]
pub struct GraphLibrary {
    sources: HashMap<String, Vec<Token>>,
}

impl GraphLibrary {
    /// Create an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every `compositor <name> { ... }` block in `text`. Returns the names
    /// registered, in file order. A block redefines any earlier block of the same name,
    /// which is what hot-reload wants.
    pub fn parse_file(&mut self, text: &str) -> Result<Vec<String>> {
        let tokens = tokenize(text)?;
        let mut names = Vec::new();
        let mut pos = 0usize;
        while pos < tokens.len() {
            let tok = &tokens[pos];
            if tok.kind != TokenKind::Word || tok.text != "compositor" {
                return Err(parse_error(tok.line, "expected `compositor`"));
            }
            let name = tokens
                .get(pos + 1)
                .filter(|t| t.kind == TokenKind::Word)
                .ok_or_else(|| parse_error(tok.line, "expected compositor name"))?
                .text
                .clone();
            let open = tokens
                .get(pos + 2)
                .filter(|t| t.kind == TokenKind::LBrace)
                .ok_or_else(|| parse_error(tok.line, "expected `{`"))?;
            let body_start = pos + 3;
            let mut depth = 1usize;
            let mut end = body_start;
            while end < tokens.len() && depth > 0 {
                match tokens[end].kind {
                    TokenKind::LBrace => depth += 1,
                    TokenKind::RBrace => depth -= 1,
                    _ => {}
                }
                end += 1;
            }
            if depth > 0 {
                return Err(parse_error(open.line, "unclosed compositor block"));
            }
            self.sources
                .insert(name.clone(), tokens[body_start..end - 1].to_vec());
            names.push(name);
            pos = end;
        }
        Ok(names)
    }

    /// Build the in-memory graph for a registered compositor block.
    pub fn build_graph(&self, name: &str, ctx: SubstitutionContext) -> Result<CompositorGraph> {
        if ctx.stack.iter().any(|n| n == name) {
            return Err(Error::GraphHasCycle.into());
        }
        let tokens = self
            .sources
            .get(name)
            .ok_or_else(|| Error::GraphNotFound(name.to_owned()))?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            library: self,
            ctx,
        };
        parser.ctx.stack.push(name.to_owned());
        parser.parse_block(name)
    }

    /// Names of every registered compositor block.
    pub fn graph_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

/// Parse a standalone description containing one or more compositor blocks and build
/// the first one. Convenience wrapper over [`GraphLibrary`] for single-file use.
pub fn parse(source: &str, ctx: SubstitutionContext) -> Result<CompositorGraph> {
    let mut library = GraphLibrary::new();
    let names = library.parse_file(source)?;
    let first = names
        .first()
        .ok_or_else(|| parse_error(1, "no compositor block in source"))?;
    library.build_graph(first, ctx)
}

struct Parser<'lib> {
    tokens: &'lib [Token],
    pos: usize,
    library: &'lib GraphLibrary,
    ctx: SubstitutionContext,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn line(&self) -> usize {
        self.peek().map(|t| t.line).unwrap_or_else(|| {
            self.tokens.last().map(|t| t.line).unwrap_or(1)
        })
    }

    fn next(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<&Token> {
        let line = self.line();
        match self.next() {
            Some(tok) if tok.kind == kind => Ok(tok),
            Some(tok) => Err(parse_error(tok.line, format!("expected {}", what))),
            None => Err(parse_error(line, format!("expected {}", what))),
        }
    }

    fn expect_word(&mut self, what: &str) -> Result<String> {
        let word = self.expect(TokenKind::Word, what)?.text.clone();
        Ok(self.ctx.substitute(&word))
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek().map(|t| t.kind) == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn at_word(&self) -> Option<&str> {
        self.peek()
            .filter(|t| t.kind == TokenKind::Word)
            .map(|t| t.text.as_str())
    }

    fn parse_block(&mut self, name: &str) -> Result<CompositorGraph> {
        let mut graph = CompositorGraph::new(name);
        while let Some(tok) = self.peek() {
            let line = tok.line;
            let keyword = tok.text.clone();
            match keyword.as_str() {
                "texture" | "rwtexture" => self.parse_texture(&mut graph)?,
                "pass" => self.parse_pass(&mut graph)?,
                "task" => self.parse_task(&mut graph)?,
                "ref" => self.parse_ref(&mut graph)?,
                "import" => self.parse_import(&mut graph)?,
                other => {
                    return Err(parse_error(line, format!("unexpected `{}`", other)));
                }
            }
        }
        Ok(graph)
    }

    /// `texture <name> <sizing> <format...> [array N];`
    fn parse_texture(&mut self, graph: &mut CompositorGraph) -> Result<()> {
        let rw = self.expect_word("`texture` or `rwtexture`")? == "rwtexture";
        let name = self.expect_word("texture name")?;
        let size = self.parse_sizing()?;

        let mut formats = Vec::new();
        let mut array_size = 1u32;
        while let Some(word) = self.at_word().map(str::to_owned) {
            if word == "array" {
                self.next();
                let count = self.expect_word("array size")?;
                array_size = count.parse().map_err(|_| {
                    parse_error(self.line(), format!("invalid array size `{}`", count))
                })?;
            } else {
                let word = self.expect_word("format token")?;
                formats.push(word);
            }
        }
        self.expect(TokenKind::Semi, "`;`")?;

        if formats.is_empty() {
            warn!("Texture `{}` declares no format, using unknown", name);
            formats.push(String::new());
        }

        let descriptor = |name: String, token: &str| {
            let format = TextureFormat::from_token(token);
            if format == TextureFormat::Unknown {
                warn!("Unknown format token `{}` on texture `{}`", token, name);
            }
            TextureDescriptor {
                array_size,
                unordered_access: rw,
                ..TextureDescriptor::new(name, size, format)
            }
        };

        if formats.len() == 1 {
            graph.add_texture(descriptor(name, &formats[0]));
        } else {
            // Multi-format declaration: split into an MRT group. Member names are
            // `base:index`, or `base:alias` when the format token carries one.
            let mut members = Vec::new();
            for (index, token) in formats.iter().enumerate() {
                let (format_token, alias) = match token.split_once(':') {
                    Some((f, a)) => (f, a.to_owned()),
                    None => (token.as_str(), index.to_string()),
                };
                let member = format!("{}:{}", name, alias);
                graph.add_texture(descriptor(member.clone(), format_token));
                members.push(member);
            }
            graph.add_mrt_group(name, members);
        }
        Ok(())
    }

    fn parse_sizing(&mut self) -> Result<SizeRule> {
        let token = self.expect_word("sizing token")?;
        if let Ok(width) = token.parse::<u32>() {
            let height = self.expect_word("height")?;
            let height = height.parse::<u32>().map_err(|_| {
                parse_error(self.line(), format!("invalid height `{}`", height))
            })?;
            return Ok(SizeRule::Fixed { width, height });
        }
        let rule = |target: bool, num: u32, div: u32| {
            if target {
                SizeRule::TargetScaled { num, div }
            } else {
                SizeRule::OutputScaled { num, div }
            }
        };
        let (base, suffix) = if let Some(rest) = token.strip_prefix("target_size") {
            (true, rest)
        } else if let Some(rest) = token.strip_prefix("output_size") {
            (false, rest)
        } else {
            warn!("Unknown sizing token `{}`", token);
            return Ok(SizeRule::Invalid);
        };
        match suffix {
            "" => Ok(rule(base, 1, 1)),
            "_div" => {
                let div = self.parse_scale_number()?;
                Ok(rule(base, div.1, div.0))
            }
            "_scaled" => {
                let num = self.parse_scale_number()?;
                Ok(rule(base, num.0, num.1))
            }
            _ => {
                warn!("Unknown sizing token `{}`", token);
                Ok(SizeRule::Invalid)
            }
        }
    }

    /// Scale factors may be integral (`target_size_div 2`) or fractional
    /// (`target_size_scaled 0.5`). Returned as a (num, div) pair.
    fn parse_scale_number(&mut self) -> Result<(u32, u32)> {
        let word = self.expect_word("scale factor")?;
        if let Ok(n) = word.parse::<u32>() {
            return Ok((n.max(1), 1));
        }
        if let Ok(f) = word.parse::<f32>() {
            if f > 0.0 {
                return Ok(((f * 1000.0).round() as u32, 1000));
            }
        }
        warn!("Invalid scale factor `{}`", word);
        Ok((1, 1))
    }

    /// `pass <name> { target ...; material ...; input ...; }`
    fn parse_pass(&mut self, graph: &mut CompositorGraph) -> Result<()> {
        self.next();
        let name = self.expect_word("pass name")?;
        let mut pass = PassDescriptor::material(name, "");
        self.expect(TokenKind::LBrace, "`{`")?;
        while !self.eat(TokenKind::RBrace) {
            self.parse_pass_statement(&mut pass)?;
        }
        graph.add_pass(pass);
        Ok(())
    }

    /// `task <name>(<flags>) { target ...; entry ...; after ...; input ...; }`
    fn parse_task(&mut self, graph: &mut CompositorGraph) -> Result<()> {
        self.next();
        let name = self.expect_word("task name")?;
        let flags = if self.peek().map(|t| t.kind) == Some(TokenKind::LParen) {
            self.parse_flags()?
        } else {
            SlotFlags::empty()
        };
        let mut pass = PassDescriptor::task(name, flags);
        self.expect(TokenKind::LBrace, "`{`")?;
        while !self.eat(TokenKind::RBrace) {
            self.parse_pass_statement(&mut pass)?;
        }
        graph.add_pass(pass);
        Ok(())
    }

    fn parse_pass_statement(&mut self, pass: &mut PassDescriptor) -> Result<()> {
        let line = self.line();
        let keyword = self.expect_word("pass statement")?;
        match keyword.as_str() {
            "target" | "input" => {
                let texture = self.expect_word("texture name")?;
                let flags = if self.peek().map(|t| t.kind) == Some(TokenKind::LParen) {
                    self.parse_flags()?
                } else {
                    SlotFlags::empty()
                };
                let slot = PassSlot::new(texture, flags);
                if keyword == "target" {
                    pass.targets.push(slot);
                } else {
                    pass.inputs.push(slot);
                }
            }
            "material" => {
                let material = self.expect_word("material name")?;
                pass.kind = PassKind::Material { material };
            }
            "entry" => {
                let entry = self.expect_word("entry name")?;
                if let PassKind::Task { entry: e, .. } = &mut pass.kind {
                    *e = Some(entry);
                } else {
                    return Err(parse_error(line, "`entry` is only valid in a task"));
                }
            }
            "after" => {
                pass.after = Some(self.expect_word("pass name")?);
            }
            "sync" => {
                let fence = self.expect_word("fence name")?;
                let op = match self.expect_word("`signal` or `wait`")?.as_str() {
                    "signal" => SyncOp::Signal,
                    "wait" => SyncOp::Wait,
                    other => {
                        return Err(parse_error(line, format!("expected `signal` or `wait`, got `{}`", other)));
                    }
                };
                let queue_word = self.at_word().map(str::to_owned);
                let queue = match queue_word.as_deref() {
                    Some("sync") => {
                        self.next();
                        QueueKind::Sync
                    }
                    Some("async") => {
                        self.next();
                        QueueKind::Async
                    }
                    _ => pass.declared_queue(),
                };
                pass.sync.push(SyncMarker { fence, op, queue });
            }
            other => {
                return Err(parse_error(line, format!("unexpected `{}` in pass", other)));
            }
        }
        self.expect(TokenKind::Semi, "`;`")?;
        Ok(())
    }

    fn parse_flags(&mut self) -> Result<SlotFlags> {
        self.expect(TokenKind::LParen, "`(`")?;
        let mut flags = SlotFlags::empty();
        loop {
            if self.eat(TokenKind::RParen) {
                break;
            }
            if self.eat(TokenKind::Comma) {
                continue;
            }
            let word = self.expect_word("flag token")?;
            match SlotFlags::from_token(&word) {
                Some(flag) => flags |= flag,
                // Permissive like formats: an unknown flag degrades to no flag.
                None => warn!("Unknown flag token `{}`", word),
            }
        }
        Ok(flags)
    }

    /// `ref <name>(<args>);` -- include a sub-graph under a private name scope.
    fn parse_ref(&mut self, graph: &mut CompositorGraph) -> Result<()> {
        self.next();
        let name = self.expect_word("ref name")?;
        let mut params = Vec::new();
        if self.eat(TokenKind::LParen) {
            loop {
                if self.eat(TokenKind::RParen) {
                    break;
                }
                if self.eat(TokenKind::Comma) {
                    continue;
                }
                params.push(self.expect_word("ref argument")?);
            }
        }
        self.expect(TokenKind::Semi, "`;`")?;

        let mut ctx = SubstitutionContext::with_params(params);
        ctx.stack = self.ctx.stack.clone();
        let child = self.library.build_graph(&name, ctx)?;
        graph.absorb(&name, child);
        Ok(())
    }

    /// `import <graph>.<texture>;` -- alias a texture published by another graph.
    fn parse_import(&mut self, graph: &mut CompositorGraph) -> Result<()> {
        let line = self.line();
        self.next();
        let name = self.expect_word("import name")?;
        let (source, texture) = name
            .split_once('.')
            .ok_or_else(|| parse_error(line, "expected `<graph>.<texture>`"))?;
        graph.add_import(ImportDirective {
            graph: source.to_owned(),
            texture: texture.to_owned(),
            alias: name.clone(),
        });
        let mut descriptor = TextureDescriptor::new(
            name.clone(),
            SizeRule::Invalid,
            TextureFormat::Unknown,
        );
        descriptor.imported = true;
        graph.add_texture(descriptor);
        self.expect(TokenKind::Semi, "`;`")?;
        Ok(())
    }
}
