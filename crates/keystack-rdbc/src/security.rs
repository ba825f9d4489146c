//! Guards for the raw SQL fragments the connector splices into statements.
//!
//! Table names, column names and index names are interpolated into DDL and
//! DML text, and `where`/`set` clauses are passed through verbatim. Values
//! always travel as bound parameters; these checks cover everything else.

use crate::error::Error;

/// Longest identifier accepted by [`validate_sql_identifier`].
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Longest clause accepted by [`validate_clause`].
pub const MAX_CLAUSE_LEN: usize = 4096;

/// Validate a SQL identifier (table, column or index name).
///
/// Accepts `^[A-Za-z_][A-Za-z0-9_]{0,254}$`, checked by character iteration.
///
/// # Examples
///
/// ```
/// use keystack_rdbc::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("KL_page_hits").is_ok());
/// assert!(validate_sql_identifier("_private").is_ok());
///
/// assert!(validate_sql_identifier("x; DROP TABLE users--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("9lives").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max {})",
            name.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    if let Some(c) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(Error::config(format!(
            "Invalid SQL identifier '{}': contains invalid character '{}'",
            name, c
        )));
    }

    Ok(())
}

/// Validate every identifier in a list.
pub fn validate_sql_identifiers<'a>(names: impl IntoIterator<Item = &'a str>) -> crate::Result<()> {
    names.into_iter().try_for_each(validate_sql_identifier)
}

/// Validate a `WHERE` or `SET` clause before it is spliced in verbatim.
///
/// Deny-list only: statement stacking (`;`), comments (`--`, `/* */`) and
/// backslash escapes are rejected. Clauses are expected to come from code,
/// with every value bound through a `?` placeholder.
///
/// # Examples
///
/// ```
/// use keystack_rdbc::security::validate_clause;
///
/// assert!(validate_clause("counter_key = ? AND counter_value = ?").is_ok());
/// assert!(validate_clause("1=1; DROP TABLE users").is_err());
/// assert!(validate_clause("1=1 -- bypass").is_err());
/// ```
pub fn validate_clause(clause: &str) -> crate::Result<()> {
    if clause.trim().is_empty() {
        return Err(Error::config("SQL clause cannot be empty"));
    }

    if clause.len() > MAX_CLAUSE_LEN {
        return Err(Error::config(format!(
            "SQL clause too long: {} chars (max {})",
            clause.len(),
            MAX_CLAUSE_LEN
        )));
    }

    for pattern in [";", "--", "/*", "*/", "\\"] {
        if clause.contains(pattern) {
            return Err(Error::config(format!(
                "SQL clause contains prohibited pattern '{}': {}",
                pattern, clause
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_sql_identifier("counters").is_ok());
        assert!(validate_sql_identifier("KL_hits").is_ok());
        assert!(validate_sql_identifier("a").is_ok());
        assert!(validate_sql_identifier(&"a".repeat(MAX_IDENTIFIER_LEN)).is_ok());
    }

    #[test]
    fn test_rejected_identifiers() {
        assert!(validate_sql_identifier(&"a".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
        assert!(validate_sql_identifier("0").is_err());
        assert!(validate_sql_identifier("x' OR '1'='1").is_err());
        assert!(validate_sql_identifier("schema.table").is_err());
        assert!(validate_sql_identifier("user name").is_err());
        assert!(validate_sql_identifier("tabl\u{0435}").is_err());
        assert!(validate_sql_identifier("x\0").is_err());
    }

    #[test]
    fn test_identifier_list() {
        assert!(validate_sql_identifiers(["a", "b_1"]).is_ok());
        assert!(validate_sql_identifiers(["a", "b-1"]).is_err());
    }

    #[test]
    fn test_clause_patterns() {
        assert!(validate_clause("expiry_at <= ? OR expiry_at > ?").is_ok());
        assert!(validate_clause("   ").is_err());
        assert!(validate_clause("a = 1 /* x */").is_err());
        assert!(validate_clause("a = '\\''").is_err());
        assert!(validate_clause(&"a".repeat(MAX_CLAUSE_LEN + 1)).is_err());
    }
}
