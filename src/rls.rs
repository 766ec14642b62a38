//! Row-level-security policy SQL generation

use std::fmt;

/// Represents the SQL command type for an RLS policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlsCommand {
    All,
    Select,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for RlsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RlsCommand::All => write!(f, "ALL"),
            RlsCommand::Select => write!(f, "SELECT"),
            RlsCommand::Insert => write!(f, "INSERT"),
            RlsCommand::Update => write!(f, "UPDATE"),
            RlsCommand::Delete => write!(f, "DELETE"),
        }
    }
}

/// Represents the target role for an RLS policy.
/// Use `RlsRole::Custom("my_role".to_string())` for non-standard roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlsRole {
    Authenticated,
    Anon,
    ServiceRole,
    Public,
    Custom(String),
}

impl fmt::Display for RlsRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RlsRole::Authenticated => write!(f, "authenticated"),
            RlsRole::Anon => write!(f, "anon"),
            RlsRole::ServiceRole => write!(f, "service_role"),
            RlsRole::Public => write!(f, "public"),
            RlsRole::Custom(role) => write!(f, "{}", quote_ident(role)),
        }
    }
}

/// Represents a complete RLS policy definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RlsPolicy {
    /// Unique name for the policy (per table).
    pub name: String,
    /// The table this policy applies to.
    pub table: String,
    /// The schema the table resides in; `None` leaves the table unqualified.
    pub schema: Option<String>,
    /// The SQL command this policy restricts.
    pub command: RlsCommand,
    /// Role the policy applies to; `None` omits the `TO` clause (all roles).
    pub role: Option<RlsRole>,
    /// `USING` expression: which existing rows are visible or modifiable.
    pub using: Option<String>,
    /// `WITH CHECK` expression: which new rows may be written.
    pub check: Option<String>,
}

impl RlsPolicy {
    pub fn new(name: &str, table: &str, command: RlsCommand) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            schema: None,
            command,
            role: None,
            using: None,
            check: None,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    pub fn with_role(mut self, role: RlsRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_using(mut self, expr: &str) -> Self {
        self.using = Some(expr.to_string());
        self
    }

    pub fn with_check(mut self, expr: &str) -> Self {
        self.check = Some(expr.to_string());
        self
    }

    fn target(&self) -> String {
        qualified_table(&self.table, self.schema.as_deref())
    }

    /// Generates the `CREATE POLICY` SQL statement.
    pub fn create_policy_sql(&self) -> String {
        let mut sql = format!(
            "CREATE POLICY {}\n  ON {}\n  FOR {}",
            quote_ident(&self.name),
            self.target(),
            self.command
        );
        if let Some(role) = &self.role {
            sql.push_str(&format!("\n  TO {}", role));
        }
        if let Some(using) = &self.using {
            sql.push_str(&format!("\n  USING (\n{}\n  )", indent(using)));
        }
        if let Some(check) = &self.check {
            sql.push_str(&format!("\n  WITH CHECK (\n{}\n  )", indent(check)));
        }
        sql.push(';');
        sql
    }

    /// Generates the `DROP POLICY IF EXISTS` SQL statement.
    pub fn drop_policy_sql(&self) -> String {
        drop_policy_sql(&self.name, &self.table, self.schema.as_deref())
    }
}

/// `DROP POLICY IF EXISTS` for a policy known only by name.
pub fn drop_policy_sql(name: &str, table: &str, schema: Option<&str>) -> String {
    format!(
        "DROP POLICY IF EXISTS {} ON {};",
        quote_ident(name),
        qualified_table(table, schema)
    )
}

/// Generates the SQL statement to enable RLS on a table.
pub fn enable_rls_sql(table: &str, schema: Option<&str>) -> String {
    format!(
        "ALTER TABLE {} ENABLE ROW LEVEL SECURITY;",
        qualified_table(table, schema)
    )
}

/// Generates the SQL statement to disable RLS on a table.
pub fn disable_rls_sql(table: &str, schema: Option<&str>) -> String {
    format!(
        "ALTER TABLE {} DISABLE ROW LEVEL SECURITY;",
        qualified_table(table, schema)
    )
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn qualified_table(table: &str, schema: Option<&str>) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
        None => quote_ident(table),
    }
}

fn indent(expr: &str) -> String {
    expr.trim()
        .lines()
        .map(|line| format!("    {}", line.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
}
