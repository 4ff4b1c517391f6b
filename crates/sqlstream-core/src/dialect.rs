//! Backend dialect tags

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// The SQL dialect spoken by a backend
///
/// The dialect decides quoting and comment rules for statement splitting,
/// whether `GO` batch separators apply, and which adapter builds connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    SqlServer,
    PostgreSql,
    MySql,
    Access,
}

impl Dialect {
    pub const ALL: [Dialect; 5] = [
        Dialect::Sqlite,
        Dialect::SqlServer,
        Dialect::PostgreSql,
        Dialect::MySql,
        Dialect::Access,
    ];

    /// Canonical lowercase identifier
    pub fn id(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::SqlServer => "sqlserver",
            Dialect::PostgreSql => "postgresql",
            Dialect::MySql => "mysql",
            Dialect::Access => "access",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "SQLite",
            Dialect::SqlServer => "SQL Server",
            Dialect::PostgreSql => "PostgreSQL",
            Dialect::MySql => "MySQL",
            Dialect::Access => "Microsoft Access",
        }
    }

    /// T-SQL dialects split scripts into `GO`-separated batches
    pub fn is_tsql(&self) -> bool {
        matches!(self, Dialect::SqlServer)
    }

    /// Whether `[identifier]` quoting is recognised
    pub fn uses_bracket_identifiers(&self) -> bool {
        matches!(self, Dialect::SqlServer | Dialect::Access)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Dialect {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "sqlserver" | "mssql" | "tsql" | "sql server" => Ok(Dialect::SqlServer),
            "postgresql" | "postgres" | "pg" => Ok(Dialect::PostgreSql),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "access" | "msaccess" => Ok(Dialect::Access),
            other => Err(EngineError::Configuration(format!(
                "unknown dialect '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("mssql".parse::<Dialect>().unwrap(), Dialect::SqlServer);
        assert_eq!("Postgres".parse::<Dialect>().unwrap(), Dialect::PostgreSql);
        assert_eq!(" sqlite3 ".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert_eq!("mariadb".parse::<Dialect>().unwrap(), Dialect::MySql);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_ids_round_trip() {
        for dialect in Dialect::ALL {
            assert_eq!(dialect.id().parse::<Dialect>().unwrap(), dialect);
        }
    }

    #[test]
    fn test_only_sqlserver_is_tsql() {
        let tsql: Vec<_> = Dialect::ALL.iter().filter(|d| d.is_tsql()).collect();
        assert_eq!(tsql, vec![&Dialect::SqlServer]);
    }
}
