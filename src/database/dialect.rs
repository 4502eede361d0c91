/// SQL dialect translation
///
/// Queries are written once as canonical templates with PostgreSQL
/// syntax: positional `$N` markers and
/// `ON CONFLICT (…) DO UPDATE SET col=excluded.col` upserts. This
/// module rewrites a template into the syntax of the active back-end.
/// It is pure string work; no I/O happens here.
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// Tag of the active SQL back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
    Mysql,
    /// Unrecognized back-end; templates pass through unchanged.
    Other,
}

impl Dialect {
    /// Derive the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Self {
        match url.split(':').next().unwrap_or("") {
            "postgres" | "postgresql" => Dialect::Postgres,
            "sqlite" => Dialect::Sqlite,
            "mysql" | "mariadb" => Dialect::Mysql,
            _ => Dialect::Other,
        }
    }

    /// Render a canonical template for this back-end.
    pub fn rewrite<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        match self {
            Dialect::Postgres | Dialect::Other => Cow::Borrowed(sql),
            Dialect::Sqlite => Cow::Owned(rewrite_placeholders(sql)),
            Dialect::Mysql => {
                let sql = rewrite_placeholders(sql);
                let sql = translate_on_conflict(&sql);
                Cow::Owned(quote_reserved(&sql))
            }
        }
    }

    /// Whether array-valued parameters can be used at all.
    pub fn supports_array_params(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}

/// Rewrite `$N` positional markers to `?`, preserving argument order.
fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek().is_some_and(|n| n.is_ascii_digit()) {
            out.push('?');
            while chars.peek().is_some_and(|n| n.is_ascii_digit()) {
                chars.next();
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Backtick-quote the reserved column name `key`. Word boundaries keep
/// `key_id`, `sender_key` and friends untouched.
fn quote_reserved(sql: &str) -> String {
    static KEY_COLUMN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bkey\b").unwrap());
    KEY_COLUMN.replace_all(sql, "`key`").into_owned()
}

/// Translate a recognized `ON CONFLICT` clause into
/// `ON DUPLICATE KEY UPDATE`.
///
/// Three forms are recognized, matching the templates this crate
/// emits:
///   - `DO NOTHING` becomes an idempotent self-assignment of the first
///     conflict-target column.
///   - `DO UPDATE SET a=excluded.a, …` becomes `a=VALUES(a), …`.
///   - A trailing `WHERE excluded.ts > target.ts` guard is folded into
///     each assignment as `a=IF(VALUES(ts) > ts, VALUES(a), a)`.
fn translate_on_conflict(sql: &str) -> String {
    let Some(start) = sql.find("ON CONFLICT") else {
        return sql.to_string();
    };
    let head = &sql[..start];
    let rest = &sql[start..];

    let (target, after) = match rest.find('(').zip(rest.find(')')) {
        Some((open, close)) if open < close => (&rest[open + 1..close], &rest[close + 1..]),
        _ => return sql.to_string(),
    };
    let after = after.trim_start();

    if let Some(tail) = after.strip_prefix("DO NOTHING") {
        let first = target.split(',').next().unwrap_or(target).trim();
        return format!("{head}ON DUPLICATE KEY UPDATE {first}={first}{tail}");
    }

    let Some(body) = after.strip_prefix("DO UPDATE SET") else {
        return sql.to_string();
    };

    let (assignments, guard) = match body.find(" WHERE ") {
        Some(idx) => (&body[..idx], Some(&body[idx + " WHERE ".len()..])),
        None => (body, None),
    };

    // `WHERE excluded.<col> > <target table>.<col>` becomes a VALUES()
    // comparison usable inside the update list.
    let condition = guard.map(|g| {
        let mut parts = g.splitn(2, '>');
        let lhs = parts.next().unwrap_or("").trim();
        let rhs = parts.next().unwrap_or("").trim();
        let lhs = lhs.strip_prefix("excluded.").unwrap_or(lhs);
        let rhs = rhs.rsplit('.').next().unwrap_or(rhs);
        format!("VALUES({lhs}) > {rhs}")
    });

    let translated: Vec<String> = assignments
        .split(',')
        .map(|assignment| {
            let assignment = assignment.trim();
            let Some((col, value)) = assignment.split_once('=') else {
                return assignment.to_string();
            };
            let (col, value) = (col.trim(), value.trim());
            let value = match value.strip_prefix("excluded.") {
                Some(excluded) => format!("VALUES({excluded})"),
                None => value.to_string(),
            };
            match &condition {
                Some(cond) => format!("{col}=IF({cond}, {value}, {col})"),
                None => format!("{col}={value}"),
            }
        })
        .collect();

    format!("{head}ON DUPLICATE KEY UPDATE {}", translated.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_passthrough() {
        let sql = "INSERT INTO t (a, b) VALUES ($1, $2) ON CONFLICT (a) DO UPDATE SET b=excluded.b";
        assert_eq!(Dialect::Postgres.rewrite(sql), sql);
        assert_eq!(Dialect::Other.rewrite(sql), sql);
    }

    #[test]
    fn test_sqlite_placeholders() {
        assert_eq!(
            Dialect::Sqlite.rewrite("SELECT a FROM t WHERE b=$1 AND c=$2"),
            "SELECT a FROM t WHERE b=? AND c=?"
        );
        // Double-digit markers collapse to a single marker
        assert_eq!(Dialect::Sqlite.rewrite("VALUES ($9, $10, $11)"), "VALUES (?, ?, ?)");
    }

    #[test]
    fn test_mysql_upsert() {
        let sql = "INSERT INTO t (a, b) VALUES ($1, $2) \
                   ON CONFLICT (a) DO UPDATE SET b=excluded.b, c=excluded.c";
        assert_eq!(
            Dialect::Mysql.rewrite(sql),
            "INSERT INTO t (a, b) VALUES (?, ?) ON DUPLICATE KEY UPDATE b=VALUES(b), c=VALUES(c)"
        );
    }

    #[test]
    fn test_mysql_do_nothing() {
        let sql = "INSERT INTO t (a, b) VALUES ($1, $2) ON CONFLICT (a, b) DO NOTHING";
        assert_eq!(
            Dialect::Mysql.rewrite(sql),
            "INSERT INTO t (a, b) VALUES (?, ?) ON DUPLICATE KEY UPDATE a=a"
        );
    }

    #[test]
    fn test_mysql_guarded_upsert() {
        let sql = "INSERT INTO k (id, data, timestamp) VALUES ($1, $2, $3) \
                   ON CONFLICT (id) DO UPDATE \
                   SET data=excluded.data, timestamp=excluded.timestamp \
                   WHERE excluded.timestamp > k.timestamp";
        assert_eq!(
            Dialect::Mysql.rewrite(sql),
            "INSERT INTO k (id, data, timestamp) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE \
             data=IF(VALUES(timestamp) > timestamp, VALUES(data), data), \
             timestamp=IF(VALUES(timestamp) > timestamp, VALUES(timestamp), timestamp)"
        );
    }

    #[test]
    fn test_mysql_reserved_identifier() {
        assert_eq!(
            Dialect::Mysql.rewrite("SELECT key_id, key FROM pre_keys WHERE key_id=$1"),
            "SELECT key_id, `key` FROM pre_keys WHERE key_id=?"
        );
    }

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(Dialect::from_url("postgres://localhost/wa"), Dialect::Postgres);
        assert_eq!(Dialect::from_url("sqlite::memory:"), Dialect::Sqlite);
        assert_eq!(Dialect::from_url("mysql://localhost/wa"), Dialect::Mysql);
        assert_eq!(Dialect::from_url("mssql://localhost/wa"), Dialect::Other);
    }
}
