//! Migrations shipped with the binary

use crate::endpoint::MIGRATION_RPC;
use crate::rls::{drop_policy_sql, enable_rls_sql, RlsCommand, RlsPolicy};
use crate::statement::Migration;

pub const OUTCOME_POLICIES: &str = "basic_auth_outcome_policies";
pub const INSTALL_RPC: &str = "install_execute_migration_sql";

const REASONS_TABLE: &str = "pipeline_outcome_reasons";
const HISTORY_TABLE: &str = "lead_outcome_history";

/// Tables touched by [`outcome_policies_migration`]
pub const OUTCOME_TABLES: [&str; 2] = [REASONS_TABLE, HISTORY_TABLE];

/// Policies this migration replaces.
const LEGACY_POLICIES: [(&str, &str); 4] = [
    ("Users can view outcome reasons for their tenant", REASONS_TABLE),
    ("Admins can manage outcome reasons for their tenant", REASONS_TABLE),
    ("Users can view outcome history for their tenant", HISTORY_TABLE),
    ("Users can create outcome history for their tenant", HISTORY_TABLE),
];

const SAME_TENANT: &str = "auth.uid() IS NOT NULL
AND tenant_id = (
  SELECT user_metadata->>'tenant_id'
  FROM auth.users
  WHERE id = auth.uid()
)";

fn same_tenant_with_role() -> String {
    format!(
        "{}
AND (
  SELECT user_metadata->>'role'
  FROM auth.users
  WHERE id = auth.uid()
) IN ('admin', 'super_admin', 'member')",
        SAME_TENANT
    )
}

/// Tenant-scoped policies for the outcome reason and outcome history tables.
pub fn outcome_policies() -> Vec<RlsPolicy> {
    vec![
        RlsPolicy::new("basic_auth_view_outcome_reasons", REASONS_TABLE, RlsCommand::Select)
            .with_using(SAME_TENANT),
        RlsPolicy::new("basic_auth_manage_outcome_reasons", REASONS_TABLE, RlsCommand::All)
            .with_using(&same_tenant_with_role()),
        RlsPolicy::new("basic_auth_view_outcome_history", HISTORY_TABLE, RlsCommand::Select)
            .with_using(SAME_TENANT),
        RlsPolicy::new("basic_auth_create_outcome_history", HISTORY_TABLE, RlsCommand::Insert)
            .with_check(&same_tenant_with_role()),
    ]
}

/// Replace the legacy outcome policies with the tenant-scoped ones.
///
/// Order: enable RLS, drop legacy policies, drop the new policies (so a
/// re-run starts clean), then create.
pub fn outcome_policies_migration() -> Migration {
    let policies = outcome_policies();
    let mut statements = vec![
        enable_rls_sql(REASONS_TABLE, None),
        enable_rls_sql(HISTORY_TABLE, None),
    ];
    statements.extend(
        LEGACY_POLICIES
            .iter()
            .map(|(name, table)| drop_policy_sql(name, table, None)),
    );
    statements.extend(policies.iter().map(RlsPolicy::drop_policy_sql));
    statements.extend(policies.iter().map(RlsPolicy::create_policy_sql));

    Migration::new(OUTCOME_POLICIES, statements)
}

/// Installs `public.execute_migration_sql(sql_query text)`, which executes
/// its argument and answers `{"success": true, "message": ..., "executed_at": ...}`.
pub fn install_rpc_migration() -> Migration {
    let function = format!(
        r#"CREATE OR REPLACE FUNCTION public.{rpc}(sql_query text)
RETURNS json
LANGUAGE plpgsql
SECURITY INVOKER
SET search_path = public, auth
AS $$
DECLARE
  result_message text;
BEGIN
  IF sql_query IS NULL OR trim(sql_query) = '' THEN
    RAISE EXCEPTION 'SQL query cannot be empty';
  END IF;

  BEGIN
    EXECUTE sql_query;
    result_message := 'SQL executed successfully';
  EXCEPTION
    WHEN OTHERS THEN
      RAISE EXCEPTION 'SQL failed: % (SQLSTATE: %)', SQLERRM, SQLSTATE;
  END;

  RETURN json_build_object(
    'success', true,
    'message', result_message,
    'executed_at', NOW()
  );
END;
$$;"#,
        rpc = MIGRATION_RPC
    );

    Migration::new(
        INSTALL_RPC,
        [
            function,
            format!("REVOKE EXECUTE ON FUNCTION public.{} FROM public;", MIGRATION_RPC),
            format!("REVOKE EXECUTE ON FUNCTION public.{} FROM anon;", MIGRATION_RPC),
            format!("GRANT EXECUTE ON FUNCTION public.{} TO service_role;", MIGRATION_RPC),
        ],
    )
}
