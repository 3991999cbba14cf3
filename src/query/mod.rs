//! Query compiler for the repoindex DSL.
//!
//! Translates the small query DSL into parameterized SQL for execution
//! against the store. User-supplied literals are always bind parameters;
//! they never appear in the SQL text.
//!
//! DSL grammar:
//!
//! ```text
//! query      := predicate? order_clause? limit_clause?
//! predicate  := or_expr
//! or_expr    := and_expr ('or' and_expr)*
//! and_expr   := unary ('and' unary)*
//! unary      := 'not' unary | atom
//! atom       := comparison | call | view_ref | '(' predicate ')' | bool_field
//! comparison := field op value
//! op         := '==' | '=' | '!=' | '>' | '<' | '>=' | '<=' | '~='
//!             | 'contains' | 'in' | 'like'
//! call       := name '(' (arg (',' arg)*)? ')'
//! arg        := value | name '=' value
//! view_ref   := '@' ident
//! order      := 'order' 'by' field ('asc'|'desc')? (',' ...)*
//! limit      := 'limit' integer
//! ```
//!
//! Examples:
//!
//! ```text
//! language == 'Python'
//! language == 'Python' and stars > 10
//! is_clean and not archived
//! has_event('commit', since='30d')
//! @python-active and is_clean
//! language == 'Python' order by stars desc limit 10
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rusqlite::types::{ToSqlOutput, Value as SqlValue};
use rusqlite::ToSql;

use crate::error::QueryCompileError;

/// A literal value bound into the compiled SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Text(String),
    Int(i64),
    Real(f64),
    Bool(bool),
    Null,
}

impl ToSql for QueryValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            QueryValue::Text(s) => ToSqlOutput::Owned(SqlValue::Text(s.clone())),
            QueryValue::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            QueryValue::Real(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            QueryValue::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            QueryValue::Null => ToSqlOutput::Owned(SqlValue::Null),
        })
    }
}

impl std::fmt::Display for QueryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryValue::Text(s) => write!(f, "{s}"),
            QueryValue::Int(i) => write!(f, "{i}"),
            QueryValue::Real(r) => write!(f, "{r}"),
            QueryValue::Bool(b) => write!(f, "{b}"),
            QueryValue::Null => write!(f, "null"),
        }
    }
}

/// Result of compiling a DSL query to SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<QueryValue>,
    /// Parsed order fields with their direction, pre-mapping
    pub order_by: Option<Vec<(String, String)>>,
    pub limit: Option<u32>,
}

type CompileResult<T> = std::result::Result<T, QueryCompileError>;

/// Intermediate compilation output, before SQL assembly.
#[derive(Debug, Default)]
struct QueryParts {
    predicate: Option<String>,
    order_by: Option<Vec<(String, String)>>,
    limit: Option<u32>,
    params: Vec<QueryValue>,
}

/// Map a DSL field name to its schema column. Hosted-provider short forms
/// resolve to their `github_`-prefixed columns; unknown fields pass through
/// unchanged and are treated as text columns.
pub fn map_field(field: &str) -> &str {
    match field {
        // Local fields
        "name" | "path" | "language" | "branch" | "owner" | "description" => field,

        // Git status (local)
        "is_clean" => "is_clean",
        "clean" => "is_clean",
        "uncommitted" | "uncommitted_changes" => "uncommitted_changes",
        "ahead" | "behind" | "has_upstream" => field,

        // Local flags
        "has_readme" | "has_license" | "has_ci" => field,

        // Citation detection and metadata
        "has_citation" | "citation_file" => field,
        "citation_doi" => "citation_doi",
        "doi" => "citation_doi",
        "citation_title" | "citation_authors" | "citation_version" => field,
        "citation_repository" | "citation_license" => field,

        // License (local detection)
        "license" | "license_key" => "license_key",

        // Local scan timestamp
        "scanned" | "scanned_at" => "scanned_at",

        // GitHub fields with explicit prefix
        "github_stars" | "github_forks" | "github_watchers" | "github_open_issues"
        | "github_is_fork" | "github_is_archived" | "github_is_private"
        | "github_has_issues" | "github_has_wiki" | "github_has_pages" | "github_topics"
        | "github_updated_at" | "github_created_at" | "github_pushed_at" => field,

        // Convenience aliases onto the prefixed columns
        "stars" => "github_stars",
        "forks" => "github_forks",
        "watchers" => "github_watchers",
        "is_fork" => "github_is_fork",
        "is_archived" | "archived" => "github_is_archived",
        "is_private" | "private" => "github_is_private",
        "has_pages" => "github_has_pages",
        "updated" | "updated_at" => "github_updated_at",
        "created" | "created_at" => "github_created_at",
        "pushed" | "pushed_at" => "github_pushed_at",

        // Unknown: pass through as a column
        other => other,
    }
}

/// Fields that may stand alone as a predicate, lowering to `col = 1`.
fn is_boolean_field(field: &str) -> bool {
    matches!(
        field.to_lowercase().as_str(),
        "is_clean"
            | "clean"
            | "has_readme"
            | "has_license"
            | "has_ci"
            | "has_upstream"
            | "uncommitted_changes"
            | "uncommitted"
            | "has_citation"
            | "is_fork"
            | "is_archived"
            | "archived"
            | "is_private"
            | "private"
            | "has_pages"
            | "github_is_fork"
            | "github_is_archived"
            | "github_is_private"
            | "github_has_issues"
            | "github_has_wiki"
            | "github_has_pages"
    )
}

/// Parse a duration or timestamp spec into an absolute time.
///
/// Accepts `{N}{d,h,w,m,y}` relative forms (months as 30 days, years as
/// 365) and ISO dates/timestamps. Anything else falls back to a 30-day
/// window.
pub fn parse_since(spec: &str) -> DateTime<Utc> {
    let spec = spec.trim().trim_matches(|c| c == '\'' || c == '"');
    let now = Utc::now();

    if let Some(rest) = spec.strip_suffix('d') {
        if let Ok(days) = rest.parse::<i64>() {
            return now - Duration::days(days);
        }
    }
    if let Some(rest) = spec.strip_suffix('h') {
        if let Ok(hours) = rest.parse::<i64>() {
            return now - Duration::hours(hours);
        }
    }
    if let Some(rest) = spec.strip_suffix('w') {
        if let Ok(weeks) = rest.parse::<i64>() {
            return now - Duration::weeks(weeks);
        }
    }
    if let Some(rest) = spec.strip_suffix('m') {
        if let Ok(months) = rest.parse::<i64>() {
            return now - Duration::days(months * 30);
        }
    }
    if let Some(rest) = spec.strip_suffix('y') {
        if let Ok(years) = rest.parse::<i64>() {
            return now - Duration::days(years * 365);
        }
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(spec) {
        return ts.with_timezone(&Utc);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(spec, "%Y-%m-%dT%H:%M:%S") {
        return Utc.from_utc_datetime(&ts);
    }
    if let Ok(date) = NaiveDate::parse_from_str(spec, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Utc.from_utc_datetime(&midnight);
        }
    }

    now - Duration::days(crate::constants::FALLBACK_WINDOW_DAYS)
}

fn since_param(spec: &str) -> QueryValue {
    QueryValue::Text(parse_since(spec).to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(String),
    ViewRef(String),
    Op(String),
    LParen,
    RParen,
    Comma,
    Dot,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => s.clone(),
            Token::Str(s) => format!("'{s}'"),
            Token::Number(s) => s.clone(),
            Token::ViewRef(s) => format!("@{s}"),
            Token::Op(s) => s.clone(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
        }
    }
}

fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' if i + 1 < chars.len() && chars[i + 1].is_ascii_digit() => {
                // .5 style numbers
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(QueryCompileError::UnterminatedString);
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '@' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len()
                    && (chars[end].is_alphanumeric() || chars[end] == '_' || chars[end] == '-')
                {
                    end += 1;
                }
                if end == start {
                    return Err(QueryCompileError::UnexpectedToken {
                        position: i,
                        found: "@".into(),
                    });
                }
                tokens.push(Token::ViewRef(chars[start..end].iter().collect()));
                i = end;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut seen_dot = false;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || (chars[i] == '.' && !seen_dot))
                {
                    if chars[i] == '.' {
                        // a trailing dot belongs to a field path, not the number
                        if i + 1 >= chars.len() || !chars[i + 1].is_ascii_digit() {
                            break;
                        }
                        seen_dot = true;
                    }
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '<' | '>' | '=' | '!' | '~' => {
                // longest-match over operator characters; validity is
                // checked where the operator is applied
                let start = i;
                while i < chars.len() && matches!(chars[i], '<' | '>' | '=' | '!' | '~') {
                    i += 1;
                }
                tokens.push(Token::Op(chars[start..i].iter().collect()));
            }
            other => {
                return Err(QueryCompileError::UnexpectedToken {
                    position: i,
                    found: other.to_string(),
                })
            }
        }
    }

    Ok(tokens)
}

/// Compiles DSL queries to SQL.
///
/// ```
/// use repoindex::query::QueryCompiler;
///
/// let compiler = QueryCompiler::new();
/// let query = compiler.compile("language == 'Python' and stars > 10").unwrap();
/// assert_eq!(
///     query.sql,
///     "SELECT * FROM repos WHERE language = ? AND github_stars > ?"
/// );
/// ```
#[derive(Debug, Default)]
pub struct QueryCompiler {
    views: HashMap<String, String>,
}

impl QueryCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A compiler that can expand `@name` references against the given
    /// view name → query-string definitions.
    pub fn with_views(views: HashMap<String, String>) -> Self {
        Self { views }
    }

    pub fn compile(&self, input: &str) -> CompileResult<CompiledQuery> {
        let mut stack = Vec::new();
        self.compile_inner(input, &mut stack)
    }

    fn compile_inner(&self, input: &str, stack: &mut Vec<String>) -> CompileResult<CompiledQuery> {
        let parts = self.compile_parts(input, stack)?;

        let mut sql = String::from("SELECT * FROM repos");
        if let Some(where_clause) = &parts.predicate {
            sql.push_str(" WHERE ");
            sql.push_str(where_clause);
        }
        if let Some(order) = &parts.order_by {
            let rendered: Vec<String> = order
                .iter()
                .map(|(field, dir)| format!("{} {}", map_field(field), dir.to_uppercase()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&rendered.join(", "));
        }
        if let Some(n) = parts.limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        Ok(CompiledQuery {
            sql,
            params: parts.params,
            order_by: parts.order_by,
            limit: parts.limit,
        })
    }

    fn compile_parts(&self, input: &str, stack: &mut Vec<String>) -> CompileResult<QueryParts> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(QueryParts::default());
        }

        let tokens = tokenize(input)?;
        let mut parser = Parser {
            compiler: self,
            tokens,
            pos: 0,
            params: Vec::new(),
            stack,
        };

        let predicate = parser.parse_predicate_opt()?;
        let order_by = parser.parse_order_opt()?;
        let limit = parser.parse_limit_opt()?;
        parser.expect_end()?;

        Ok(QueryParts {
            predicate,
            order_by,
            limit,
            params: parser.params,
        })
    }

    /// Compile only the predicate of a view definition; its order/limit
    /// are stripped. Used for `@name` expansion.
    fn compile_view_predicate(
        &self,
        name: &str,
        stack: &mut Vec<String>,
    ) -> CompileResult<(String, Vec<QueryValue>)> {
        let definition = self
            .views
            .get(name)
            .ok_or_else(|| QueryCompileError::UnknownView(name.to_string()))?;

        if stack.iter().any(|seen| seen == name) {
            return Err(QueryCompileError::CyclicView(name.to_string()));
        }

        stack.push(name.to_string());
        let parts = self.compile_parts(definition, stack)?;
        stack.pop();

        Ok((parts.predicate.unwrap_or_else(|| "1=1".into()), parts.params))
    }
}

struct Parser<'a> {
    compiler: &'a QueryCompiler,
    tokens: Vec<Token>,
    pos: usize,
    params: Vec<QueryValue>,
    stack: &'a mut Vec<String>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(word))
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.peek_keyword(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self) -> QueryCompileError {
        match self.peek() {
            Some(token) => QueryCompileError::UnexpectedToken {
                position: self.pos,
                found: token.describe(),
            },
            None => QueryCompileError::IncompleteExpression("end of input".into()),
        }
    }

    fn expect_end(&self) -> CompileResult<()> {
        if self.pos < self.tokens.len() {
            Err(self.unexpected())
        } else {
            Ok(())
        }
    }

    fn parse_predicate_opt(&mut self) -> CompileResult<Option<String>> {
        if self.peek().is_none() || self.peek_keyword("order") || self.peek_keyword("limit") {
            return Ok(None);
        }
        Ok(Some(self.parse_or()?))
    }

    fn parse_or(&mut self) -> CompileResult<String> {
        let mut sql = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            sql = format!("{sql} OR {rhs}");
        }
        Ok(sql)
    }

    fn parse_and(&mut self) -> CompileResult<String> {
        let mut sql = self.parse_unary()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_unary()?;
            sql = format!("{sql} AND {rhs}");
        }
        Ok(sql)
    }

    fn parse_unary(&mut self) -> CompileResult<String> {
        if self.eat_keyword("not") {
            let inner = self.parse_unary()?;
            return Ok(format!("NOT ({inner})"));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> CompileResult<String> {
        match self.peek().cloned() {
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(format!("({inner})")),
                    _ => Err(QueryCompileError::IncompleteExpression(
                        "missing closing parenthesis".into(),
                    )),
                }
            }
            Some(Token::ViewRef(name)) => {
                self.advance();
                let (predicate, params) = self
                    .compiler
                    .compile_view_predicate(&name, self.stack)?;
                self.params.extend(params);
                Ok(format!("({predicate})"))
            }
            Some(Token::Ident(name)) => {
                if matches!(self.tokens.get(self.pos + 1), Some(Token::LParen)) {
                    return self.parse_call(&name);
                }
                self.parse_comparison_or_bool(&name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_field(&mut self, first: &str) -> String {
        self.advance(); // consume the first ident
        let mut field = first.to_string();
        while matches!(self.peek(), Some(Token::Dot)) {
            if let Some(Token::Ident(next)) = self.tokens.get(self.pos + 1).cloned() {
                self.pos += 2;
                field.push('.');
                field.push_str(&next);
            } else {
                break;
            }
        }
        field
    }

    fn parse_comparison_or_bool(&mut self, first: &str) -> CompileResult<String> {
        let field = self.parse_field(first);

        let operator = match self.peek().cloned() {
            Some(Token::Op(op)) => {
                self.advance();
                op
            }
            Some(Token::Ident(word))
                if ["in", "contains", "like"]
                    .iter()
                    .any(|k| word.eq_ignore_ascii_case(k)) =>
            {
                self.advance();
                word.to_lowercase()
            }
            _ => {
                // No operator: a bare boolean field lowers to `col = 1`
                if is_boolean_field(&field) {
                    return Ok(format!("{} = 1", map_field(&field)));
                }
                return Err(QueryCompileError::IncompleteExpression(field));
            }
        };

        let value = self.parse_value()?;
        self.compile_comparison(&field, &operator, value)
    }

    fn parse_value(&mut self) -> CompileResult<QueryValue> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(QueryValue::Text(s)),
            Some(Token::Number(n)) => {
                if n.contains('.') {
                    n.parse::<f64>().map(QueryValue::Real).map_err(|_| {
                        QueryCompileError::IncompleteExpression(n.clone())
                    })
                } else {
                    n.parse::<i64>().map(QueryValue::Int).map_err(|_| {
                        QueryCompileError::IncompleteExpression(n.clone())
                    })
                }
            }
            Some(Token::Ident(word)) => {
                let lower = word.to_lowercase();
                Ok(match lower.as_str() {
                    "true" => QueryValue::Bool(true),
                    "false" => QueryValue::Bool(false),
                    "null" | "none" => QueryValue::Null,
                    _ => QueryValue::Text(word),
                })
            }
            _ => Err(QueryCompileError::IncompleteExpression(
                "expected a value".into(),
            )),
        }
    }

    fn compile_comparison(
        &mut self,
        field: &str,
        operator: &str,
        value: QueryValue,
    ) -> CompileResult<String> {
        let col = map_field(field);

        match operator {
            "==" | "=" => {
                if value == QueryValue::Null {
                    Ok(format!("{col} IS NULL"))
                } else {
                    self.params.push(value);
                    Ok(format!("{col} = ?"))
                }
            }
            "!=" => {
                if value == QueryValue::Null {
                    Ok(format!("{col} IS NOT NULL"))
                } else {
                    self.params.push(value);
                    Ok(format!("{col} != ?"))
                }
            }
            ">" | "<" | ">=" | "<=" => {
                self.params.push(value);
                Ok(format!("{col} {operator} ?"))
            }
            "~=" | "like" | "contains" => {
                self.params.push(QueryValue::Text(format!("%{value}%")));
                Ok(format!("{col} LIKE ?"))
            }
            "in" => {
                let values: Vec<QueryValue> = match value {
                    QueryValue::Text(s) if s.contains(',') => s
                        .split(',')
                        .map(|v| QueryValue::Text(v.trim().to_string()))
                        .collect(),
                    other => vec![other],
                };
                let placeholders = vec!["?"; values.len()].join(",");
                self.params.extend(values);
                Ok(format!("{col} IN ({placeholders})"))
            }
            other => Err(QueryCompileError::UnknownOperator(other.to_string())),
        }
    }

    /// Parse `name(args)` and lower the call. A scalar-returning call
    /// (`event_count`) may be followed by a comparison operator.
    fn parse_call(&mut self, name: &str) -> CompileResult<String> {
        self.advance(); // name
        self.advance(); // '('

        let mut args: Vec<QueryValue> = Vec::new();
        let mut kwargs: HashMap<String, QueryValue> = HashMap::new();

        loop {
            match self.peek().cloned() {
                Some(Token::RParen) => {
                    self.advance();
                    break;
                }
                Some(Token::Comma) => {
                    self.advance();
                }
                Some(Token::Ident(key))
                    if matches!(self.tokens.get(self.pos + 1), Some(Token::Op(op)) if op == "=") =>
                {
                    self.pos += 2;
                    let value = self.parse_value()?;
                    kwargs.insert(key, value);
                }
                Some(_) => {
                    let value = self.parse_value()?;
                    args.push(value);
                }
                None => {
                    return Err(QueryCompileError::IncompleteExpression(format!(
                        "{name}( without closing parenthesis"
                    )))
                }
            }
        }

        let sql = self.compile_call(name, &args, &kwargs)?;

        // event_count(...) is a scalar; allow `event_count('commit') > 10`
        if name == "event_count" {
            if let Some(Token::Op(op)) = self.peek().cloned() {
                self.advance();
                let value = self.parse_value()?;
                if !matches!(op.as_str(), "==" | "=" | "!=" | ">" | "<" | ">=" | "<=") {
                    return Err(QueryCompileError::UnknownOperator(op));
                }
                let sql_op = if op == "==" { "=".to_string() } else { op };
                self.params.push(value);
                return Ok(format!("{sql} {sql_op} ?"));
            }
        }

        Ok(sql)
    }

    fn compile_call(
        &mut self,
        name: &str,
        args: &[QueryValue],
        kwargs: &HashMap<String, QueryValue>,
    ) -> CompileResult<String> {
        let arg_text = |value: &QueryValue| value.to_string();

        match name {
            "has_event" | "has_events" => {
                let event_type = args
                    .first()
                    .or_else(|| kwargs.get("type"))
                    .map(arg_text)
                    .unwrap_or_else(|| "commit".to_string());
                self.params.push(QueryValue::Text(event_type));

                let mut sql = String::from(
                    "EXISTS (SELECT 1 FROM events e WHERE e.repo_id = repos.id AND e.type = ?",
                );
                if let Some(since) = kwargs.get("since") {
                    sql.push_str(" AND e.timestamp >= ?");
                    self.params.push(since_param(&arg_text(since)));
                }
                sql.push(')');
                Ok(sql)
            }
            "event_count" => {
                let event_type = args
                    .first()
                    .or_else(|| kwargs.get("type"))
                    .map(arg_text)
                    .unwrap_or_else(|| "commit".to_string());
                self.params.push(QueryValue::Text(event_type));

                let mut sql = String::from(
                    "(SELECT COUNT(*) FROM events e WHERE e.repo_id = repos.id AND e.type = ?",
                );
                if let Some(since) = kwargs.get("since") {
                    sql.push_str(" AND e.timestamp >= ?");
                    self.params.push(since_param(&arg_text(since)));
                }
                sql.push(')');
                Ok(sql)
            }
            "tagged" | "has_tag" => {
                let pattern = args.first().map(arg_text).unwrap_or_default();
                if pattern.contains('*') || pattern.contains('%') {
                    self.params
                        .push(QueryValue::Text(pattern.replace('*', "%")));
                    Ok("EXISTS (SELECT 1 FROM tags t WHERE t.repo_id = repos.id AND t.tag LIKE ?)"
                        .into())
                } else {
                    self.params.push(QueryValue::Text(pattern));
                    Ok("EXISTS (SELECT 1 FROM tags t WHERE t.repo_id = repos.id AND t.tag = ?)"
                        .into())
                }
            }
            "updated_within" | "updated_since" | "github_updated_within"
            | "github_updated_since" => {
                let duration = args
                    .first()
                    .or_else(|| kwargs.get("duration"))
                    .map(arg_text)
                    .unwrap_or_else(|| "30d".to_string());
                self.params.push(since_param(&duration));
                Ok("github_updated_at >= ?".into())
            }
            "created_within" | "created_since" | "github_created_within"
            | "github_created_since" => {
                let duration = args
                    .first()
                    .or_else(|| kwargs.get("duration"))
                    .map(arg_text)
                    .unwrap_or_else(|| "30d".to_string());
                self.params.push(since_param(&duration));
                Ok("github_created_at >= ?".into())
            }
            "is_published" => {
                if let Some(registry) = args.first() {
                    self.params.push(registry.clone());
                    Ok("EXISTS (SELECT 1 FROM publications p WHERE p.repo_id = repos.id AND p.registry = ? AND p.published = 1)".into())
                } else {
                    Ok("EXISTS (SELECT 1 FROM publications p WHERE p.repo_id = repos.id AND p.published = 1)".into())
                }
            }
            "has_doi" => Ok(
                "((citation_doi IS NOT NULL AND citation_doi != '') OR EXISTS (SELECT 1 FROM publications p WHERE p.repo_id = repos.id AND p.doi IS NOT NULL AND p.doi != ''))"
                    .into(),
            ),
            other => Err(QueryCompileError::UnknownFunction(other.to_string())),
        }
    }

    fn parse_order_opt(&mut self) -> CompileResult<Option<Vec<(String, String)>>> {
        if !self.eat_keyword("order") {
            return Ok(None);
        }
        if !self.eat_keyword("by") {
            return Err(QueryCompileError::IncompleteExpression(
                "order without by".into(),
            ));
        }

        let mut order = Vec::new();
        loop {
            let field = match self.peek().cloned() {
                Some(Token::Ident(name)) if !name.eq_ignore_ascii_case("limit") => {
                    self.parse_field(&name)
                }
                _ => return Err(self.unexpected()),
            };

            let direction = if self.eat_keyword("desc") {
                "desc"
            } else {
                self.eat_keyword("asc");
                "asc"
            };
            order.push((field, direction.to_string()));

            if !matches!(self.peek(), Some(Token::Comma)) {
                break;
            }
            self.advance();
        }

        Ok(Some(order))
    }

    fn parse_limit_opt(&mut self) -> CompileResult<Option<u32>> {
        if !self.eat_keyword("limit") {
            return Ok(None);
        }
        match self.advance() {
            Some(Token::Number(n)) => n
                .parse::<u32>()
                .map(Some)
                .map_err(|_| QueryCompileError::IncompleteExpression(n)),
            _ => Err(QueryCompileError::IncompleteExpression(
                "limit without a number".into(),
            )),
        }
    }
}

/// Convenience function to compile a query with optional view definitions.
pub fn compile_query(
    input: &str,
    views: Option<HashMap<String, String>>,
) -> CompileResult<CompiledQuery> {
    match views {
        Some(v) => QueryCompiler::with_views(v).compile(input),
        None => QueryCompiler::new().compile(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_query() {
        let q = QueryCompiler::new().compile("").unwrap();
        assert_eq!(q.sql, "SELECT * FROM repos");
        assert!(q.params.is_empty());
        assert!(q.order_by.is_none());
        assert!(q.limit.is_none());
    }

    #[test]
    fn test_simple_comparison() {
        let q = QueryCompiler::new().compile("language == 'Python'").unwrap();
        assert_eq!(q.sql, "SELECT * FROM repos WHERE language = ?");
        assert_eq!(q.params, vec![QueryValue::Text("Python".into())]);
    }

    #[test]
    fn test_alias_maps_to_prefixed_column() {
        let q = QueryCompiler::new().compile("stars > 100").unwrap();
        assert_eq!(q.sql, "SELECT * FROM repos WHERE github_stars > ?");
        assert_eq!(q.params, vec![QueryValue::Int(100)]);
    }

    #[test]
    fn test_complex_predicate_with_order_and_limit() {
        let q = QueryCompiler::new()
            .compile("language == 'Python' and stars > 10 and has_event('commit', since='30d') order by stars desc limit 5")
            .unwrap();
        assert!(q.sql.contains("language = ?"));
        assert!(q.sql.contains("github_stars > ?"));
        assert!(q.sql.contains("EXISTS (SELECT 1 FROM events"));
        assert!(q.sql.contains("ORDER BY github_stars DESC"));
        assert!(q.sql.contains("LIMIT 5"));
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.params.len(), 4);
        assert_eq!(q.params[0], QueryValue::Text("Python".into()));
        assert_eq!(q.params[1], QueryValue::Int(10));
        assert_eq!(q.params[2], QueryValue::Text("commit".into()));
        assert!(matches!(&q.params[3], QueryValue::Text(ts) if ts.contains('T')));
    }

    #[test]
    fn test_literals_never_appear_in_sql() {
        let q = QueryCompiler::new()
            .compile("name == 'sneaky) OR 1=1 --' and stars > 987654")
            .unwrap();
        assert!(!q.sql.contains("sneaky"));
        assert!(!q.sql.contains("987654"));
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn test_null_handling() {
        let q = QueryCompiler::new().compile("license == null").unwrap();
        assert_eq!(q.sql, "SELECT * FROM repos WHERE license_key IS NULL");
        assert!(q.params.is_empty());

        let q = QueryCompiler::new().compile("remote_url != null").unwrap();
        assert_eq!(q.sql, "SELECT * FROM repos WHERE remote_url IS NOT NULL");
    }

    #[test]
    fn test_bare_boolean_and_not() {
        let q = QueryCompiler::new().compile("is_clean and not archived").unwrap();
        assert_eq!(
            q.sql,
            "SELECT * FROM repos WHERE is_clean = 1 AND NOT (github_is_archived = 1)"
        );
    }

    #[test]
    fn test_parentheses_and_or() {
        let q = QueryCompiler::new()
            .compile("(language == 'Rust' or language == 'Go') and is_clean")
            .unwrap();
        assert_eq!(
            q.sql,
            "SELECT * FROM repos WHERE (language = ? OR language = ?) AND is_clean = 1"
        );
    }

    #[test]
    fn test_contains_and_fuzzy() {
        let q = QueryCompiler::new().compile("name ~= 'index'").unwrap();
        assert_eq!(q.sql, "SELECT * FROM repos WHERE name LIKE ?");
        assert_eq!(q.params, vec![QueryValue::Text("%index%".into())]);

        let q = QueryCompiler::new().compile("description contains 'parser'").unwrap();
        assert_eq!(q.sql, "SELECT * FROM repos WHERE description LIKE ?");
    }

    #[test]
    fn test_in_operator_splits_comma_list() {
        let q = QueryCompiler::new()
            .compile("language in 'Python,Rust,Go'")
            .unwrap();
        assert_eq!(q.sql, "SELECT * FROM repos WHERE language IN (?,?,?)");
        assert_eq!(
            q.params,
            vec![
                QueryValue::Text("Python".into()),
                QueryValue::Text("Rust".into()),
                QueryValue::Text("Go".into()),
            ]
        );
    }

    #[test]
    fn test_event_count_comparison() {
        let q = QueryCompiler::new()
            .compile("event_count('commit', since='90d') > 10")
            .unwrap();
        assert!(q.sql.contains("(SELECT COUNT(*) FROM events e"));
        assert!(q.sql.ends_with("> ?"));
        assert_eq!(q.params.len(), 3);
        assert_eq!(q.params[2], QueryValue::Int(10));
    }

    #[test]
    fn test_tagged_wildcard() {
        let q = QueryCompiler::new().compile("tagged('work/*')").unwrap();
        assert!(q.sql.contains("t.tag LIKE ?"));
        assert_eq!(q.params, vec![QueryValue::Text("work/%".into())]);

        let q = QueryCompiler::new().compile("has_tag('rust')").unwrap();
        assert!(q.sql.contains("t.tag = ?"));
    }

    #[test]
    fn test_is_published() {
        let q = QueryCompiler::new().compile("is_published('pypi')").unwrap();
        assert!(q.sql.contains("p.registry = ?"));
        assert!(q.sql.contains("p.published = 1"));

        let q = QueryCompiler::new().compile("is_published()").unwrap();
        assert!(!q.sql.contains("registry = ?"));
    }

    #[test]
    fn test_has_doi_covers_both_sources() {
        let q = QueryCompiler::new().compile("has_doi()").unwrap();
        assert!(q.sql.contains("citation_doi IS NOT NULL AND citation_doi != ''"));
        assert!(q.sql.contains("p.doi IS NOT NULL AND p.doi != ''"));
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_unknown_function_is_an_error() {
        let err = QueryCompiler::new().compile("explode('now')").unwrap_err();
        assert_eq!(err, QueryCompileError::UnknownFunction("explode".into()));
    }

    #[test]
    fn test_unknown_operator_is_an_error() {
        let err = QueryCompiler::new().compile("stars >== 10").unwrap_err();
        assert!(matches!(err, QueryCompileError::UnknownOperator(_)));
    }

    #[test]
    fn test_unknown_field_passes_through() {
        let q = QueryCompiler::new().compile("custom_col == 'x'").unwrap();
        assert_eq!(q.sql, "SELECT * FROM repos WHERE custom_col = ?");
    }

    #[test]
    fn test_view_expansion() {
        let mut views = HashMap::new();
        views.insert(
            "python-active".to_string(),
            "language == 'Python' and has_event('commit', since='30d') order by stars desc limit 3"
                .to_string(),
        );
        let q = QueryCompiler::with_views(views)
            .compile("@python-active and is_clean")
            .unwrap();
        // the view's order/limit are stripped; only its predicate survives
        assert!(q.sql.contains("(language = ? AND EXISTS"));
        assert!(q.sql.ends_with("AND is_clean = 1"));
        assert_eq!(q.limit, None);
    }

    #[test]
    fn test_unknown_view_is_an_error() {
        let err = QueryCompiler::new().compile("@nope").unwrap_err();
        assert_eq!(err, QueryCompileError::UnknownView("nope".into()));
    }

    #[test]
    fn test_cyclic_view_is_rejected() {
        let mut views = HashMap::new();
        views.insert("a".to_string(), "@b".to_string());
        views.insert("b".to_string(), "@a".to_string());
        let err = QueryCompiler::with_views(views).compile("@a").unwrap_err();
        assert!(matches!(err, QueryCompileError::CyclicView(_)));
    }

    #[test]
    fn test_nested_view_expansion_terminates() {
        let mut views = HashMap::new();
        views.insert("base".to_string(), "language == 'Rust'".to_string());
        views.insert("derived".to_string(), "@base and stars > 5".to_string());
        let q = QueryCompiler::with_views(views).compile("@derived").unwrap();
        assert!(q.sql.contains("language = ?"));
        assert!(q.sql.contains("github_stars > ?"));
    }

    #[test]
    fn test_order_only_query() {
        let q = QueryCompiler::new().compile("order by name").unwrap();
        assert_eq!(q.sql, "SELECT * FROM repos ORDER BY name ASC");
    }

    #[test]
    fn test_multi_field_order() {
        let q = QueryCompiler::new()
            .compile("order by language asc, stars desc limit 20")
            .unwrap();
        assert_eq!(
            q.sql,
            "SELECT * FROM repos ORDER BY language ASC, github_stars DESC LIMIT 20"
        );
    }

    #[test]
    fn test_trailing_garbage_is_an_error() {
        assert!(QueryCompiler::new().compile("stars > 10 limit 5 nonsense").is_err());
    }

    #[test]
    fn test_unterminated_string() {
        let err = QueryCompiler::new().compile("name == 'oops").unwrap_err();
        assert_eq!(err, QueryCompileError::UnterminatedString);
    }

    #[test]
    fn test_parse_since_durations() {
        let now = Utc::now();
        let week = parse_since("7d");
        assert!((now - week - Duration::days(7)).num_seconds().abs() < 5);

        let hours = parse_since("24h");
        assert!((now - hours - Duration::hours(24)).num_seconds().abs() < 5);

        let months = parse_since("3m");
        assert!((now - months - Duration::days(90)).num_seconds().abs() < 5);

        let years = parse_since("1y");
        assert!((now - years - Duration::days(365)).num_seconds().abs() < 5);
    }

    #[test]
    fn test_parse_since_iso_and_fallback() {
        let date = parse_since("2024-06-01");
        assert_eq!(date.format("%Y-%m-%d").to_string(), "2024-06-01");

        // anything unparsable falls back to a 30-day window
        let fallback = parse_since("whenever");
        let now = Utc::now();
        assert!((now - fallback - Duration::days(30)).num_seconds().abs() < 5);
    }

    #[test]
    fn test_compile_twice_is_deterministic() {
        let compiler = QueryCompiler::new();
        let a = compiler.compile("language == 'Go' and stars > 3").unwrap();
        let b = compiler.compile("language == 'Go' and stars > 3").unwrap();
        assert_eq!(a.sql, b.sql);
        assert_eq!(a.params, b.params);
    }
}
