use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

/// Category of SQL operations permitted at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationTier {
    Query,
    Schema,
    Data,
    All,
}

impl OperationTier {
    fn allowed_keywords(&self) -> &'static [&'static str] {
        match self {
            OperationTier::Query => &["SELECT"],
            OperationTier::Schema => &["CREATE", "ALTER", "DROP", "TRUNCATE", "RENAME", "COMMENT"],
            OperationTier::Data => &["INSERT", "UPDATE", "DELETE"],
            OperationTier::All => &[],
        }
    }

    fn rejection_message(&self, keyword: &str) -> String {
        match self {
            OperationTier::Query => format!("Only SELECT statements are allowed, got {keyword}"),
            OperationTier::Schema => format!(
                "Only CREATE, ALTER, DROP, TRUNCATE, RENAME or COMMENT statements are allowed, got {keyword}"
            ),
            OperationTier::Data => {
                format!("Only INSERT, UPDATE or DELETE statements are allowed, got {keyword}")
            }
            OperationTier::All => format!("Statement {keyword} is not allowed"),
        }
    }
}

/// Verdict value: validation never raises, it always reports.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub message: String,
}

impl ValidationVerdict {
    fn valid() -> Self {
        Self {
            is_valid: true,
            message: "Valid query".to_string(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    #[default]
    MySql,
    Sqlite,
    Generic,
}

impl SqlDialect {
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "mysql" => SqlDialect::MySql,
            "sqlite" => SqlDialect::Sqlite,
            _ => SqlDialect::Generic,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SqlDialect::MySql => "MySQL",
            SqlDialect::Sqlite => "SQLite",
            SqlDialect::Generic => "SQL",
        }
    }

    fn parser_dialect(&self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::MySql => Box::new(MySqlDialect {}),
            SqlDialect::Sqlite => Box::new(SQLiteDialect {}),
            SqlDialect::Generic => Box::new(GenericDialect {}),
        }
    }
}

/// Fragments foreign to MySQL, each mapped to the dialect-correct
/// replacement. A deny-list, not a parser: fragments inside string literals
/// will be flagged too, an accepted limitation.
const MYSQL_FOREIGN_FRAGMENTS: &[(&str, &str)] = &[
    (
        "||",
        "MySQL does not use || for string concatenation; use CONCAT() instead",
    ),
    (
        "LIMIT ALL",
        "MySQL does not support LIMIT ALL; omit the LIMIT clause instead",
    ),
    (
        "NVL(",
        "MySQL does not provide NVL(); use IFNULL() or COALESCE() instead",
    ),
];

/// Stateless statement gate: one verdict per call, nothing is ever executed
/// here.
#[derive(Debug, Clone, Default)]
pub struct SqlValidator {
    dialect: SqlDialect,
}

impl SqlValidator {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    pub fn validate(&self, statement: &str, tier: OperationTier) -> ValidationVerdict {
        let dialect = self.dialect.parser_dialect();
        let parsed = match Parser::parse_sql(dialect.as_ref(), statement) {
            Ok(parsed) => parsed,
            Err(e) => return ValidationVerdict::invalid(format!("Validation error: {e}")),
        };

        if parsed.is_empty() {
            return ValidationVerdict::invalid("Empty or invalid SQL query");
        }
        if parsed.len() > 1 {
            return ValidationVerdict::invalid("Multiple SQL statements are not allowed");
        }

        let Some(keyword) = leading_keyword(statement) else {
            return ValidationVerdict::invalid("No valid SQL operation found");
        };

        let allowed = tier.allowed_keywords();
        if !allowed.is_empty() && !allowed.contains(&keyword.as_str()) {
            return ValidationVerdict::invalid(tier.rejection_message(&keyword));
        }

        ValidationVerdict::valid()
    }

    /// Deny-list pass for syntax foreign to the target dialect. Only MySQL
    /// carries a deny-list today; other dialects pass unconditionally.
    pub fn dialect_check(&self, statement: &str) -> ValidationVerdict {
        if self.dialect != SqlDialect::MySql {
            return ValidationVerdict::valid();
        }
        let upper = statement.to_uppercase();
        for (fragment, message) in MYSQL_FOREIGN_FRAGMENTS {
            if upper.contains(fragment) {
                return ValidationVerdict::invalid(*message);
            }
        }
        ValidationVerdict::valid()
    }
}

fn leading_keyword(statement: &str) -> Option<String> {
    let token: String = statement
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if token.is_empty() {
        None
    } else {
        Some(token.to_uppercase())
    }
}
