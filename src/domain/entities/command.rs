use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use regex_lite::Regex;

use crate::application::argv::{
    parse_signature, Action, ArgValue, Declaration, OptionDeclaration, TypeRegistry,
};
use crate::application::errors::CommandError;
use crate::application::messaging::Session;

pub type CommandFuture = Pin<Box<dyn Future<Output = Result<Option<String>, CommandError>> + Send>>;

/// Command handler function type. `Ok(Some(text))` is sent back as a reply.
pub type CommandHandler = Arc<dyn Fn(Action, Session) -> CommandFuture + Send + Sync>;

/// Handle that keeps the code behind a registration loaded while the registration is alive
pub type KeepAlive = Arc<dyn Any + Send + Sync>;

/// Alternative trigger for a command
#[derive(Debug, Clone)]
pub enum Shortcut {
    /// Matches when the first word equals this string
    Literal(String),
    /// Matches when the pattern is found in the original line
    Pattern(Regex),
}

impl Shortcut {
    pub fn matches(&self, name: &str, source: &str) -> bool {
        match self {
            Shortcut::Literal(literal) => literal == name,
            Shortcut::Pattern(re) => re.is_match(source),
        }
    }
}

/// Represents a declared bot command
#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub description: Option<String>,
    pub aliases: Vec<String>,
    pub shortcuts: Vec<Shortcut>,
    pub args: Vec<Declaration>,
    pub options: Vec<OptionDeclaration>,
    /// Declaration with type annotations stripped
    pub usage: String,
    /// Reject unknown options
    pub strict: bool,
    /// Plugin that registered the command
    pub owner: Option<String>,
    handler: Option<CommandHandler>,
    // last field: dropped after every closure above
    keep_alive: Option<KeepAlive>,
}

impl Command {
    /// Build a command from a declaration like `remind <when:date> <message:text>`
    pub fn new(declaration: &str) -> Result<Self, CommandError> {
        let declaration = declaration.trim();
        let (name, signature) = match declaration.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest),
            None => (declaration, ""),
        };
        if name.is_empty() || name.starts_with(['<', '[']) {
            return Err(CommandError::Declaration(format!(
                "missing command name in '{}'",
                declaration
            )));
        }
        let signature = parse_signature(signature)?;
        let usage = format!("{} {}", name, signature.stripped).trim_end().to_string();
        Ok(Self {
            name: name.to_string(),
            description: None,
            aliases: Vec::new(),
            shortcuts: Vec::new(),
            args: signature.decls,
            options: Vec::new(),
            usage,
            strict: false,
            owner: None,
            handler: None,
            keep_alive: None,
        })
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_shortcut(mut self, shortcut: Shortcut) -> Self {
        self.shortcuts.push(shortcut);
        self
    }

    /// Declare an option, e.g. `option("level", "-l, --level <lvl:integer>")`
    pub fn option(mut self, key: impl Into<String>, declaration: &str) -> Result<Self, CommandError> {
        self.options.push(OptionDeclaration::parse(key, declaration)?);
        Ok(self)
    }

    /// Declare an option with a default used when it is absent from the line
    pub fn option_with_default(
        mut self,
        key: impl Into<String>,
        declaration: &str,
        default: ArgValue,
    ) -> Result<Self, CommandError> {
        let mut option = OptionDeclaration::parse(key, declaration)?;
        option.value.default = Some(default);
        self.options.push(option);
        Ok(self)
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Action, Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<String>, CommandError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |action, session| Box::pin(handler(action, session))));
        self
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn matches_alias(&self, name: &str) -> bool {
        self.aliases.iter().any(|a| a == name)
    }

    pub fn matches_shortcut(&self, name: &str, source: &str) -> bool {
        self.shortcuts.iter().any(|s| s.matches(name, source))
    }

    /// Tokenize `source` and resolve it against this command's signature
    pub fn parse(&self, source: &str, registry: &TypeRegistry) -> Action {
        let mut action = Action::parse(source);
        action.resolve(&self.args, &self.options, registry, self.strict);
        action
    }

    pub async fn execute(&self, action: Action, session: Session) -> Result<Option<String>, CommandError> {
        match &self.handler {
            Some(handler) => handler(action, session).await,
            None => Ok(Some(format!("Command {} not implemented", self.name))),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("shortcuts", &self.shortcuts)
            .field("usage", &self.usage)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Command table, kept in registration order
#[derive(Default)]
pub struct CommandTable {
    commands: Vec<Command>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command. A command with the same name is replaced in place.
    pub fn register(&mut self, command: Command) {
        match self.commands.iter_mut().find(|c| c.name == command.name) {
            Some(existing) => *existing = command,
            None => self.commands.push(command),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Exact name first, then aliases, then the first matching shortcut.
    /// `source` is the original line, used for pattern shortcuts.
    pub fn find(&self, name: &str, source: &str) -> Option<&Command> {
        self.commands
            .iter()
            .find(|c| c.matches_name(name))
            .or_else(|| self.commands.iter().find(|c| c.matches_alias(name)))
            .or_else(|| self.commands.iter().find(|c| c.matches_shortcut(name, source)))
    }

    pub fn remove(&mut self, name: &str) -> Option<Command> {
        let idx = self.commands.iter().position(|c| c.name == name)?;
        Some(self.commands.remove(idx))
    }

    /// Drop every command registered by `owner`, returning their names
    pub fn remove_owner(&mut self, owner: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.commands.retain(|c| {
            if c.owner.as_deref() == Some(owner) {
                removed.push(c.name.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn all(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
