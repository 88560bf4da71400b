use sqlparser::ast::Statement;
use sqlparser::dialect::Dialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SqlError {
    #[error("SQL tokenize error: {0}")]
    Tokenize(String),

    #[error("Only SELECT statements are allowed against this database")]
    NotReadOnly,

    #[error("Empty query")]
    EmptyQuery,
}

/// Remove `--` and `/* */` comments, leaving string literals untouched
pub fn strip_comments(sql: &str, dialect: &dyn Dialect) -> Result<String, SqlError> {
    let tokens = Tokenizer::new(dialect, sql)
        .tokenize()
        .map_err(|e| SqlError::Tokenize(e.to_string()))?;

    let stripped: String = tokens
        .iter()
        .filter(|token| {
            !matches!(
                token,
                Token::Whitespace(Whitespace::SingleLineComment { .. })
                    | Token::Whitespace(Whitespace::MultiLineComment(_))
            )
        })
        .map(|token| token.to_string())
        .collect();
    Ok(stripped.trim().to_string())
}

const READ_ONLY_KEYWORDS: &[&str] = &["SELECT", "WITH", "EXPLAIN", "SHOW", "DESCRIBE", "VALUES"];

/// Leading keyword of every `;`-separated statement, upper-cased
///
/// A statement opening with anything but a word yields an empty string.
fn statement_keywords(sql: &str, dialect: &dyn Dialect) -> Option<Vec<String>> {
    let tokens = Tokenizer::new(dialect, sql).tokenize().ok()?;
    let keywords = tokens
        .split(|token| matches!(token, Token::SemiColon))
        .filter_map(|statement| {
            statement.iter().find_map(|token| match token {
                Token::Word(word) => Some(word.value.to_uppercase()),
                Token::Whitespace(_) | Token::LParen => None,
                _ => Some(String::new()),
            })
        })
        .collect();
    Some(keywords)
}

/// True when every statement only reads data
///
/// SQL the parser rejects is checked statement by statement on its leading
/// keyword, so dialect syntax outside the parser's grammar can still be
/// submitted. Untokenizable SQL is never read-only.
pub fn is_read_only(sql: &str, dialect: &dyn Dialect) -> bool {
    match Parser::parse_sql(dialect, sql) {
        Ok(statements) => {
            !statements.is_empty()
                && statements.iter().all(|statement| {
                    matches!(
                        statement,
                        Statement::Query(_)
                            | Statement::Explain { .. }
                            | Statement::ExplainTable { .. }
                            | Statement::ShowTables { .. }
                            | Statement::ShowColumns { .. }
                    )
                })
        }
        Err(_) => match statement_keywords(sql, dialect) {
            Some(keywords) => {
                !keywords.is_empty() && keywords.iter().all(|k| READ_ONLY_KEYWORDS.contains(&k.as_str()))
            }
            None => false,
        },
    }
}

/// Reject anything but read-only statements unless DML is allowed
pub fn check_statement(sql: &str, dialect: &dyn Dialect, allow_dml: bool) -> Result<(), SqlError> {
    if sql.trim().is_empty() {
        return Err(SqlError::EmptyQuery);
    }
    if allow_dml || is_read_only(sql, dialect) {
        Ok(())
    } else {
        Err(SqlError::NotReadOnly)
    }
}

/// Single-quoted SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::GenericDialect;

    #[test]
    fn test_strip_comments_keeps_literals() {
        let clean = "SELECT '/* val 1 */' as c1, '-- val 2' as c2 FROM tbl";
        let commented = format!("/* comment 1 */{}-- comment 2", clean);
        assert_eq!(strip_comments(&commented, &GenericDialect {}).unwrap(), clean);
    }

    #[test]
    fn test_read_only() {
        let dialect = GenericDialect {};
        assert!(is_read_only("SELECT 1", &dialect));
        assert!(is_read_only("WITH t AS (SELECT 1) SELECT * FROM t", &dialect));
        assert!(!is_read_only("DELETE FROM t", &dialect));
        assert!(!is_read_only("SELECT 1; DROP TABLE t", &dialect));
        assert!(!is_read_only("", &dialect));
    }

    #[test]
    fn test_check_statement() {
        let dialect = GenericDialect {};
        assert_eq!(
            check_statement("UPDATE t SET a = 1", &dialect, false),
            Err(SqlError::NotReadOnly)
        );
        assert!(check_statement("UPDATE t SET a = 1", &dialect, true).is_ok());
        assert_eq!(check_statement("  ", &dialect, true), Err(SqlError::EmptyQuery));
    }

    #[test]
    fn test_unparseable_sql_checks_every_statement() {
        let dialect = GenericDialect {};
        // the parser rejects these; only leading keywords are checked
        assert!(is_read_only("SELECT a FROM t )", &dialect));
        assert!(is_read_only("SELECT a FROM t ); (SELECT 1 ))", &dialect));
        assert!(!is_read_only("SELECT a FROM t ); DELETE FROM t WHERE )", &dialect));
        assert!(!is_read_only("SELECT 1 );\nDROP TABLE t )", &dialect));
        assert!(!is_read_only("SELECT 'unterminated", &dialect));
        assert_eq!(
            check_statement("SELECT 1 ); INSERT INTO t VALUES )", &dialect, false),
            Err(SqlError::NotReadOnly)
        );
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }
}
