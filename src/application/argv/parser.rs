//! Command line parser - tokenizes chat commands and resolves them against a signature

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::domain::{lossless_number, ArgValue, TypeRegistry, ValueType};
use crate::application::errors::{ArgvError, CommandError, SlotKind};

const LEFT_QUOTES: [char; 4] = ['"', '\'', '“', '‘'];
const RIGHT_QUOTES: [char; 4] = ['"', '\'', '”', '’'];

static BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>|\[[^\]]+\]").unwrap());
static TYPE_ANNOTATION: Lazy<Regex> = Lazy::new(|| Regex::new(r":[\w-]+([>\]])").unwrap());

/// One word of a command line, with quoted spans merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Text as typed, quotes included
    pub raw: String,
    /// Text with the enclosing quotes removed
    pub content: String,
    pub quoted: bool,
}

impl Token {
    fn plain(word: &str) -> Self {
        Self {
            raw: word.to_string(),
            content: word.to_string(),
            quoted: false,
        }
    }

    fn quoted(raw: String, closed: bool) -> Self {
        let mut chars = raw.chars();
        chars.next();
        if closed {
            chars.next_back();
        }
        Self {
            content: chars.as_str().to_string(),
            raw,
            quoted: true,
        }
    }
}

fn closing_quote(word: &str) -> Option<char> {
    let first = word.chars().next()?;
    LEFT_QUOTES
        .iter()
        .position(|q| *q == first)
        .map(|i| RIGHT_QUOTES[i])
}

fn closes(word: &str, quote: char) -> bool {
    word.ends_with(quote)
}

/// Split a line on whitespace, merging quoted runs into single tokens.
/// An unterminated quote absorbs the rest of the line.
pub fn tokenize(line: &str) -> Vec<Token> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let mut tokens = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let word = words[i];
        let Some(quote) = closing_quote(word) else {
            tokens.push(Token::plain(word));
            i += 1;
            continue;
        };
        // a lone quote character opens a span, it cannot close itself
        if word.chars().count() > 1 && closes(word, quote) {
            tokens.push(Token::quoted(word.to_string(), true));
            i += 1;
            continue;
        }
        let end = words[i + 1..]
            .iter()
            .position(|w| closes(w, quote))
            .map(|offset| i + 1 + offset);
        match end {
            Some(end) => {
                tokens.push(Token::quoted(words[i..=end].join(" "), true));
                i = end + 1;
            }
            None => {
                tokens.push(Token::quoted(words[i..].join(" "), false));
                i = words.len();
            }
        }
    }
    tokens
}

/// A declared argument or option value slot
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub ty: Option<ValueType>,
    pub required: bool,
    pub variadic: bool,
    pub default: Option<ArgValue>,
}

impl Declaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: None,
            required: false,
            variadic: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_type(mut self, ty: ValueType) -> Self {
        self.ty = Some(ty);
        self
    }

    pub fn with_default(mut self, value: ArgValue) -> Self {
        self.default = Some(value);
        self
    }
}

/// Parsed bracket signature
#[derive(Debug, Clone, Default)]
pub struct DeclarationList {
    pub decls: Vec<Declaration>,
    /// Signature with type annotations removed, for help output
    pub stripped: String,
}

/// Scan `<required>` and `[optional]` groups out of a declaration string.
pub fn parse_signature(source: &str) -> Result<DeclarationList, CommandError> {
    let mut decls: Vec<Declaration> = Vec::new();
    for cap in BRACKET.find_iter(source) {
        let group = cap.as_str();
        let required = group.starts_with('<');
        let mut raw_name = &group[1..group.len() - 1];
        let mut variadic = false;
        if let Some(rest) = raw_name.strip_prefix("...") {
            raw_name = rest;
            variadic = true;
        }
        if let Some(prev) = decls.last() {
            if prev.variadic {
                return Err(CommandError::Declaration(format!(
                    "variadic slot '{}' must be the last one in '{}'",
                    prev.name, source
                )));
            }
        }
        let (name, ty) = match raw_name.split_once(':') {
            Some((name, ty)) => (name.trim(), Some(ValueType::named(ty.trim()))),
            None => (raw_name.trim(), None),
        };
        decls.push(Declaration {
            name: name.to_string(),
            ty,
            required,
            variadic,
            default: None,
        });
    }
    let stripped = TYPE_ANNOTATION
        .replace_all(source, "$1")
        .trim_end()
        .to_string();
    Ok(DeclarationList { decls, stripped })
}

/// A declared `--option`
#[derive(Debug, Clone)]
pub struct OptionDeclaration {
    /// Key the resolved value is stored under
    pub key: String,
    pub long: String,
    pub short: Option<char>,
    pub value: Declaration,
    pub hidden: bool,
    pub description: Option<String>,
}

impl OptionDeclaration {
    /// Parse a declaration like `-l, --level <level:integer>`.
    /// Without a bracket group the option is a boolean flag.
    pub fn parse(key: impl Into<String>, source: &str) -> Result<Self, CommandError> {
        let key = key.into();
        let head = source.split(['<', '[']).next().unwrap_or_default();
        let mut long = None;
        let mut short = None;
        for part in head.split([',', ' ']).filter(|p| !p.is_empty()) {
            if let Some(name) = part.strip_prefix("--") {
                long = Some(name.to_string());
            } else if let Some(name) = part.strip_prefix('-') {
                let mut chars = name.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => short = Some(c),
                    _ => long = Some(name.to_string()),
                }
            }
        }
        let signature = parse_signature(source)?;
        let value = match signature.decls.into_iter().next() {
            Some(mut decl) => {
                decl.name = key.clone();
                decl.required = false;
                decl
            }
            None => Declaration::new(key.clone()).with_type(ValueType::named("boolean")),
        };
        Ok(Self {
            long: long.unwrap_or_else(|| key.clone()),
            key,
            short,
            value,
            hidden: false,
            description: None,
        })
    }

    pub fn is_flag(&self) -> bool {
        self.value
            .ty
            .as_ref()
            .map(|t| t.is_named("boolean"))
            .unwrap_or(false)
    }
}

/// Coerce one raw token for a slot.
pub fn resolve_value(
    source: &str,
    kind: SlotKind,
    decl: &Declaration,
    registry: &TypeRegistry,
) -> Result<ArgValue, ArgvError> {
    let implicit = source.is_empty();
    if implicit {
        if let Some(default) = &decl.default {
            return Ok(default.clone());
        }
        if decl.required {
            return Err(ArgvError::MissingRequiredArgument {
                kind,
                name: decl.name.clone(),
            });
        }
    }

    if let Some(transform) = decl.ty.as_ref().and_then(|t| registry.transform_for(t)) {
        return transform(source).map_err(|message| ArgvError::InvalidValue {
            kind,
            name: decl.name.clone(),
            message: if message.is_empty() {
                "check-syntax".to_string()
            } else {
                message
            },
            input: source.to_string(),
        });
    }

    if implicit {
        return Ok(ArgValue::Bool(true));
    }
    Ok(lossless_number(source).unwrap_or_else(|| ArgValue::Text(source.to_string())))
}

/// A parsed command line
#[derive(Debug, Clone, Default)]
pub struct Action {
    /// First word of the line
    pub name: String,
    /// Remaining words, quote-merged
    pub tokens: Vec<Token>,
    /// The original, unparsed line
    pub source: String,
    /// Resolved arguments in declaration order
    pub args: Vec<(String, ArgValue)>,
    /// Resolved options by key
    pub options: BTreeMap<String, ArgValue>,
    /// Words left over after every declared argument was filled
    pub rest: Vec<String>,
    /// First parse error, if any
    pub error: Option<ArgvError>,
}

impl Action {
    /// Tokenize a line without resolving it against a signature
    pub fn parse(source: &str) -> Self {
        let mut tokens = tokenize(source);
        let name = if tokens.is_empty() {
            String::new()
        } else {
            tokens.remove(0).content
        };
        Self {
            name,
            tokens,
            source: source.to_string(),
            ..Default::default()
        }
    }

    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn option(&self, key: &str) -> Option<&ArgValue> {
        self.options.get(key)
    }

    /// Boolean options are `false` when absent
    pub fn flag(&self, key: &str) -> bool {
        self.options
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn record_error(&mut self, error: ArgvError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Resolve the tokens against declared arguments and options.
    /// Errors are recorded on the action; resolution continues past them.
    pub fn resolve(
        &mut self,
        args: &[Declaration],
        options: &[OptionDeclaration],
        registry: &TypeRegistry,
        strict: bool,
    ) {
        let greedy_index = args.iter().position(|d| {
            d.ty.as_ref()
                .map(|t| registry.is_greedy(t))
                .unwrap_or(false)
        });

        let tokens = std::mem::take(&mut self.tokens);
        let mut positionals: Vec<String> = Vec::new();
        let mut remainder: Option<String> = None;
        let mut i = 0;
        while i < tokens.len() {
            if Some(positionals.len()) == greedy_index {
                let rest: Vec<&str> = tokens[i..].iter().map(|t| t.raw.as_str()).collect();
                remainder = Some(rest.join(" "));
                break;
            }
            let token = &tokens[i];
            i += 1;
            if token.quoted || !is_option_token(&token.content) {
                positionals.push(token.content.clone());
                continue;
            }

            let (flag, inline) = match token.content.split_once('=') {
                Some((flag, value)) => (flag, Some(value.to_string())),
                None => (token.content.as_str(), None),
            };
            let (decl, negated) = match find_option(options, flag) {
                Some(found) => found,
                None => {
                    if strict {
                        self.record_error(ArgvError::UnknownOption(flag.to_string()));
                    }
                    continue;
                }
            };
            if negated || (decl.is_flag() && inline.is_none()) {
                self.options.insert(decl.key.clone(), ArgValue::Bool(!negated));
                continue;
            }
            let value = match inline {
                Some(value) => value,
                None if !decl.is_flag()
                    && tokens
                        .get(i)
                        .map(|t| t.quoted || !is_option_token(&t.content))
                        .unwrap_or(false) =>
                {
                    i += 1;
                    tokens[i - 1].content.clone()
                }
                None => String::new(),
            };
            match resolve_value(&value, SlotKind::Option, &decl.value, registry) {
                Ok(v) => {
                    self.options.insert(decl.key.clone(), v);
                }
                Err(e) => self.record_error(e),
            }
        }

        for (idx, decl) in args.iter().enumerate() {
            if decl.variadic {
                let values: Vec<&String> = positionals.iter().skip(idx).collect();
                if values.is_empty() {
                    match (&decl.default, decl.required) {
                        (Some(default), _) => self.args.push((decl.name.clone(), default.clone())),
                        (None, true) => self.record_error(ArgvError::MissingRequiredArgument {
                            kind: SlotKind::Argument,
                            name: decl.name.clone(),
                        }),
                        (None, false) => {}
                    }
                    continue;
                }
                let mut resolved = Vec::with_capacity(values.len());
                for raw in values {
                    match resolve_value(raw, SlotKind::Argument, decl, registry) {
                        Ok(v) => resolved.push(v),
                        Err(e) => self.record_error(e),
                    }
                }
                self.args.push((decl.name.clone(), ArgValue::List(resolved)));
                continue;
            }

            let raw = if Some(idx) == greedy_index {
                remainder.take().unwrap_or_default()
            } else {
                positionals.get(idx).cloned().unwrap_or_default()
            };
            if raw.is_empty() && !decl.required && decl.default.is_none() {
                continue;
            }
            match resolve_value(&raw, SlotKind::Argument, decl, registry) {
                Ok(v) => self.args.push((decl.name.clone(), v)),
                Err(e) => self.record_error(e),
            }
        }

        let consumed = if args.iter().any(|d| d.variadic) {
            positionals.len()
        } else {
            args.len().min(positionals.len())
        };
        self.rest = positionals.split_off(consumed);

        for decl in options {
            if self.options.contains_key(&decl.key) {
                continue;
            }
            if let Some(default) = &decl.value.default {
                self.options.insert(decl.key.clone(), default.clone());
            }
        }
        self.tokens = tokens;
    }
}

fn is_option_token(content: &str) -> bool {
    content.len() > 1 && content.starts_with('-') && content.parse::<f64>().is_err()
}

fn find_option<'a>(
    options: &'a [OptionDeclaration],
    flag: &str,
) -> Option<(&'a OptionDeclaration, bool)> {
    if let Some(long) = flag.strip_prefix("--") {
        if let Some(decl) = options.iter().find(|o| o.long == long) {
            return Some((decl, false));
        }
        if let Some(positive) = long.strip_prefix("no-") {
            return options
                .iter()
                .find(|o| o.long == positive && o.is_flag())
                .map(|o| (o, true));
        }
        return None;
    }
    let short = flag.strip_prefix('-')?;
    let mut chars = short.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => options
            .iter()
            .find(|o| o.short == Some(c))
            .map(|o| (o, false)),
        _ => options.iter().find(|o| o.long == short).map(|o| (o, false)),
    }
}
