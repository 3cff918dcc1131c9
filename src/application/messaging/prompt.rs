//! Prompt options - what to ask, how to check the answer

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex_lite::Regex;

/// Answer check. `Err` carries a message replied instead of the default one.
pub type ValidateFn = Arc<dyn Fn(&str) -> Result<bool, String> + Send + Sync>;

#[derive(Clone)]
pub enum Validate {
    Pattern(Regex),
    Function(ValidateFn),
}

impl Validate {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&str) -> Result<bool, String> + Send + Sync + 'static,
    {
        Validate::Function(Arc::new(f))
    }

    pub(crate) fn check(&self, answer: &str) -> Result<bool, String> {
        match self {
            Validate::Pattern(pattern) => Ok(pattern.is_match(answer)),
            Validate::Function(f) => f(answer),
        }
    }
}

impl fmt::Debug for Validate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validate::Pattern(pattern) => write!(f, "Pattern({})", pattern.as_str()),
            Validate::Function(_) => f.write_str("Function"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind {
    Text,
    /// Pick one choice by number or by value
    Select(Vec<String>),
    /// Pick any number of choices, separated by whitespace or commas
    MultipleSelect(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptAnswer {
    Text(String),
    Choice(String),
    Choices(Vec<String>),
}

impl PromptAnswer {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PromptAnswer::Text(text) | PromptAnswer::Choice(text) => Some(text),
            PromptAnswer::Choices(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptOptions {
    /// Key of the answer in `Session::prompt_all`
    pub name: String,
    pub message: String,
    pub kind: PromptKind,
    pub validate: Option<Validate>,
    pub error_message: String,
    /// Total wait across every attempt; falls back to the dispatcher default
    pub timeout: Option<Duration>,
}

impl PromptOptions {
    pub fn text(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            kind: PromptKind::Text,
            validate: None,
            error_message: "invalid answer, try again".to_string(),
            timeout: None,
        }
    }

    pub fn select<I, S>(name: impl Into<String>, message: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: PromptKind::Select(choices.into_iter().map(Into::into).collect()),
            ..Self::text(name, message)
        }
    }

    pub fn multiple_select<I, S>(
        name: impl Into<String>,
        message: impl Into<String>,
        choices: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: PromptKind::MultipleSelect(choices.into_iter().map(Into::into).collect()),
            ..Self::text(name, message)
        }
    }

    pub fn validate(mut self, validate: Validate) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Question text, choices numbered from 1
    pub(crate) fn question(&self) -> String {
        match &self.kind {
            PromptKind::Text => self.message.clone(),
            PromptKind::Select(choices) | PromptKind::MultipleSelect(choices) => {
                let mut lines = vec![self.message.clone()];
                lines.extend(
                    choices
                        .iter()
                        .enumerate()
                        .map(|(i, choice)| format!("{}. {}", i + 1, choice)),
                );
                lines.join("\n")
            }
        }
    }

    /// Check one reply. `Err` holds the message to send back before waiting again.
    pub(crate) fn accept(&self, answer: &str) -> Result<PromptAnswer, String> {
        let answer = answer.trim();
        if let Some(validate) = &self.validate {
            match validate.check(answer) {
                Ok(true) => {}
                Ok(false) => return Err(self.error_message.clone()),
                Err(message) => return Err(message),
            }
        }
        match &self.kind {
            PromptKind::Text => Ok(PromptAnswer::Text(answer.to_string())),
            PromptKind::Select(choices) => pick(choices, answer)
                .map(PromptAnswer::Choice)
                .ok_or_else(|| self.error_message.clone()),
            PromptKind::MultipleSelect(choices) => {
                let picked: Option<Vec<String>> = answer
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|part| !part.is_empty())
                    .map(|part| pick(choices, part))
                    .collect();
                match picked {
                    Some(picked) if !picked.is_empty() => Ok(PromptAnswer::Choices(picked)),
                    _ => Err(self.error_message.clone()),
                }
            }
        }
    }
}

fn pick(choices: &[String], answer: &str) -> Option<String> {
    if let Ok(index) = answer.parse::<usize>() {
        return index.checked_sub(1).and_then(|i| choices.get(i)).cloned();
    }
    choices.iter().find(|choice| choice.as_str() == answer).cloned()
}
