//! Rule language for ingestion-time filtering.
//!
//! A rule is a boolean expression over article fields, for example:
//! `title contains "ad" and not (feed equals "Sponsored")`. Expressions
//! are parsed into an immutable AST when the rule is created; evaluation
//! is a pure recursive walk that treats absent fields as empty strings.

use regex::Regex;

use crate::core::storage::models::{ArticleRecord, FilterRuleRecord};
use crate::core::storage::repository::{Repository, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum RuleSyntaxError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),
    #[error("unknown field `{0}`, expected title/content/summary/feed/tags")]
    UnknownField(String),
    #[error("unknown operator `{0}`, expected contains/equals/matches")]
    UnknownOperator(String),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Content,
    Summary,
    Feed,
    Tags,
}

#[derive(Debug, Clone)]
pub enum Comparison {
    Contains(String),
    Equals(String),
    Matches(Regex),
}

#[derive(Debug, Clone)]
pub enum RuleExpr {
    And(Box<RuleExpr>, Box<RuleExpr>),
    Or(Box<RuleExpr>, Box<RuleExpr>),
    Not(Box<RuleExpr>),
    Predicate { field: Field, comparison: Comparison },
}

/// The article attributes a rule can see. Built identically at ingestion
/// time and when scanning the stored corpus, so previews agree with what
/// future ingestion would do.
#[derive(Debug, Clone, Default)]
pub struct ArticleView {
    pub title: String,
    pub content: String,
    pub summary: String,
    pub feed: String,
    pub tags: Vec<String>,
}

impl ArticleView {
    pub fn from_record(record: &ArticleRecord, feed_title: &str) -> Self {
        Self {
            title: record.title.clone(),
            content: record
                .content
                .clone()
                .or_else(|| record.extracted_content.clone())
                .unwrap_or_default(),
            summary: record.summary.clone().unwrap_or_default(),
            feed: feed_title.to_string(),
            tags: record.tag_list(),
        }
    }
}

pub fn parse_rule(expression: &str) -> Result<RuleExpr, RuleSyntaxError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, index: 0 };
    let expr = parser.parse_or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(RuleSyntaxError::UnexpectedToken(token.text())),
    }
}

/// Pure and total: returns a boolean for any article, never errors.
pub fn evaluate(expr: &RuleExpr, article: &ArticleView) -> bool {
    match expr {
        RuleExpr::And(left, right) => evaluate(left, article) && evaluate(right, article),
        RuleExpr::Or(left, right) => evaluate(left, article) || evaluate(right, article),
        RuleExpr::Not(inner) => !evaluate(inner, article),
        RuleExpr::Predicate { field, comparison } => match field {
            Field::Tags => {
                let tags = &article.tags;
                match comparison {
                    Comparison::Contains(needle) => tags
                        .iter()
                        .any(|tag| tag.to_lowercase().contains(&needle.to_lowercase())),
                    Comparison::Equals(expected) => {
                        tags.iter().any(|tag| tag.eq_ignore_ascii_case(expected))
                    }
                    Comparison::Matches(pattern) => tags.iter().any(|tag| pattern.is_match(tag)),
                }
            }
            _ => {
                let value = match field {
                    Field::Title => article.title.as_str(),
                    Field::Content => article.content.as_str(),
                    Field::Summary => article.summary.as_str(),
                    Field::Feed => article.feed.as_str(),
                    Field::Tags => unreachable!(),
                };
                match comparison {
                    Comparison::Contains(needle) => {
                        value.to_lowercase().contains(&needle.to_lowercase())
                    }
                    Comparison::Equals(expected) => value.eq_ignore_ascii_case(expected),
                    Comparison::Matches(pattern) => pattern.is_match(value),
                }
            }
        },
    }
}

/// Parses every enabled stored rule, dropping rows that no longer parse
/// (they were validated at creation, so this only guards schema drift).
pub async fn load_enabled_rules(
    repository: &Repository,
) -> Result<Vec<(FilterRuleRecord, RuleExpr)>, StorageError> {
    let rows = repository.list_rules(true).await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| match parse_rule(&row.expression) {
            Ok(expr) => Some((row, expr)),
            Err(error) => {
                tracing::warn!(rule = %row.name, %error, "skipping unparsable stored rule");
                None
            }
        })
        .collect())
}

pub async fn count_matching(
    repository: &Repository,
    expr: &RuleExpr,
    scan_limit: i64,
) -> Result<usize, StorageError> {
    Ok(matching_articles(repository, expr, scan_limit)
        .await?
        .len())
}

pub async fn recent_matching(
    repository: &Repository,
    expr: &RuleExpr,
    limit: usize,
) -> Result<Vec<ArticleRecord>, StorageError> {
    let mut matches = matching_articles(repository, expr, 1000).await?;
    matches.truncate(limit);
    Ok(matches)
}

async fn matching_articles(
    repository: &Repository,
    expr: &RuleExpr,
    scan_limit: i64,
) -> Result<Vec<ArticleRecord>, StorageError> {
    let titles = repository.feed_titles().await?;
    let articles = repository.recent_articles(scan_limit).await?;
    Ok(articles
        .into_iter()
        .filter(|record| {
            let feed_title = titles
                .get(&record.feed_id)
                .map(String::as_str)
                .unwrap_or_default();
            evaluate(expr, &ArticleView::from_record(record, feed_title))
        })
        .collect())
}

// ---- lexer / parser ----

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Str(String),
    LParen,
    RParen,
}

impl Token {
    fn text(&self) -> String {
        match self {
            Token::Word(word) => word.clone(),
            Token::Str(text) => format!("\"{text}\""),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
        }
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>, RuleSyntaxError> {
    let mut tokens = Vec::new();
    let mut chars = expression.chars().peekable();
    while let Some(&ch) = chars.peek() {
        match ch {
            ch if ch.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        // Only the quote and the backslash itself are escapes;
                        // anything else keeps its backslash so regex patterns
                        // pass through unchanged.
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => text.push(escaped),
                            Some(other) => {
                                text.push('\\');
                                text.push(other);
                            }
                            None => return Err(RuleSyntaxError::UnterminatedString),
                        },
                        Some(other) => text.push(other),
                        None => return Err(RuleSyntaxError::UnterminatedString),
                    }
                }
                tokens.push(Token::Str(text));
            }
            ch if ch.is_alphanumeric() || ch == '_' => {
                let mut word = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            other => return Err(RuleSyntaxError::UnexpectedToken(other.to_string())),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn parse_or(&mut self) -> Result<RuleExpr, RuleSyntaxError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.next();
            let right = self.parse_and()?;
            left = RuleExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<RuleExpr, RuleSyntaxError> {
        let mut left = self.parse_not()?;
        while self.peek_keyword("and") {
            self.next();
            let right = self.parse_not()?;
            left = RuleExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<RuleExpr, RuleSyntaxError> {
        if self.peek_keyword("not") {
            self.next();
            let inner = self.parse_not()?;
            return Ok(RuleExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<RuleExpr, RuleSyntaxError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(token) => Err(RuleSyntaxError::UnexpectedToken(token.text())),
                    None => Err(RuleSyntaxError::UnexpectedEnd),
                }
            }
            Some(Token::Word(word)) => self.parse_predicate(&word),
            Some(token) => Err(RuleSyntaxError::UnexpectedToken(token.text())),
            None => Err(RuleSyntaxError::UnexpectedEnd),
        }
    }

    fn parse_predicate(&mut self, field_word: &str) -> Result<RuleExpr, RuleSyntaxError> {
        let field = match field_word.to_lowercase().as_str() {
            "title" => Field::Title,
            "content" => Field::Content,
            "summary" => Field::Summary,
            "feed" => Field::Feed,
            "tags" => Field::Tags,
            other => return Err(RuleSyntaxError::UnknownField(other.to_string())),
        };
        let operator = match self.next() {
            Some(Token::Word(word)) => word,
            Some(token) => return Err(RuleSyntaxError::UnexpectedToken(token.text())),
            None => return Err(RuleSyntaxError::UnexpectedEnd),
        };
        let value = match self.next() {
            Some(Token::Str(text)) => text,
            Some(token) => return Err(RuleSyntaxError::UnexpectedToken(token.text())),
            None => return Err(RuleSyntaxError::UnexpectedEnd),
        };
        let comparison = match operator.to_lowercase().as_str() {
            "contains" => Comparison::Contains(value),
            "equals" => Comparison::Equals(value),
            "matches" => Comparison::Matches(Regex::new(&value)?),
            other => return Err(RuleSyntaxError::UnknownOperator(other.to_string())),
        };
        Ok(RuleExpr::Predicate { field, comparison })
    }
}
