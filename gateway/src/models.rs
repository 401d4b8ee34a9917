//! Wire types exchanged with clients, executors, and admins, plus the
//! validation rules enforced before a command ever reaches the router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const FORBIDDEN_VERBS: &[&str] = &[
    "delete", "apply", "create", "patch", "edit", "replace", "scale",
];

pub const ALLOWED_COMMAND_TYPES: &[&str] = &[
    "get",
    "describe",
    "logs",
    "top",
    "events",
    "version",
    "api-resources",
    "api-versions",
    "explain",
];

/// Safe flags a client may pass through `extra_args`. `-o`/`--output` is
/// checked separately against `ALLOWED_OUTPUT_FORMATS`.
pub const ALLOWED_EXTRA_ARG_PREFIXES: &[&str] = &[
    "-o",
    "--output",
    "-l",
    "--selector",
    "--field-selector",
    "--show-labels",
    "--show-kind",
    "--no-headers",
    "-w",
    "--watch",
    "--sort-by",
    "-A",
    "--all-namespaces",
];

/// Flags whose value is a *separate* `extra_args` entry (`["-o", "yaml"]`,
/// the canonical kubectl-style form), not glued on with `=`.
pub const VALUE_TAKING_EXTRA_ARG_FLAGS: &[&str] = &[
    "-o",
    "--output",
    "-l",
    "--selector",
    "--field-selector",
    "--sort-by",
];

pub const ALLOWED_OUTPUT_FORMATS: &[&str] = &[
    "json",
    "yaml",
    "wide",
    "name",
    "custom-columns",
    "custom-columns-file",
    "go-template",
    "go-template-file",
    "jsonpath",
    "jsonpath-file",
];

pub const FORBIDDEN_EXTRA_ARG_PREFIXES: &[&str] = &[
    "--token",
    "--kubeconfig",
    "--server",
    "--insecure",
    "--username",
    "--password",
    "--client-certificate",
    "--as-group",
    "--as",
    "--certificate-authority",
    "-f",
    "--filename",
    "--recursive",
];

pub const MIN_REQUEST_TIMEOUT_SECONDS: u64 = 1;
pub const MAX_REQUEST_TIMEOUT_SECONDS: u64 = 60;
pub const MIN_COMMAND_TIMEOUT_SECONDS: u64 = 1;
pub const MAX_COMMAND_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_COMMAND_TIMEOUT_SECONDS: u64 = 10;

pub const MIN_SESSION_TTL_SECONDS: u64 = 60;
pub const MAX_SESSION_TTL_SECONDS: u64 = 3600;
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 300;

pub const MIN_ARGS: usize = 1;
pub const MAX_ARGS: usize = 20;

/// Validates a cluster id: lowercase alphanumeric with interior hyphens,
/// 1-100 characters.
pub fn validate_cluster_id(cluster_id: &str) -> Result<(), String> {
    if cluster_id.is_empty() || cluster_id.len() > 100 {
        return Err("cluster_id must be 1-100 characters".into());
    }
    let bytes = cluster_id.as_bytes();
    let valid = bytes.iter().enumerate().all(|(i, b)| match b {
        b'a'..=b'z' | b'0'..=b'9' => true,
        b'-' => i != 0 && i != bytes.len() - 1,
        _ => false,
    });
    if !valid {
        return Err(
            "cluster_id must be lowercase alphanumeric with interior hyphens only".into(),
        );
    }
    Ok(())
}

fn contains_forbidden_verb(s: &str) -> bool {
    let lower = s.to_lowercase();
    FORBIDDEN_VERBS.iter().any(|verb| lower.contains(verb))
}

pub fn validate_args(args: &[String]) -> Result<(), String> {
    if args.len() < MIN_ARGS || args.len() > MAX_ARGS {
        return Err(format!(
            "args must contain between {} and {} entries",
            MIN_ARGS, MAX_ARGS
        ));
    }
    for arg in args {
        if contains_forbidden_verb(arg) {
            return Err(format!("argument '{arg}' contains a forbidden verb"));
        }
    }
    Ok(())
}

pub fn validate_command_type(command_type: &str) -> Result<(), String> {
    if ALLOWED_COMMAND_TYPES.contains(&command_type) {
        Ok(())
    } else {
        Err(format!("unsupported command type '{command_type}'"))
    }
}

fn output_format_ok(flag_value: &str) -> bool {
    ALLOWED_OUTPUT_FORMATS
        .iter()
        .any(|fmt| flag_value == *fmt || flag_value.starts_with(&format!("{fmt}=")))
}

/// Walks `extra_args` the way the original does: a value-taking flag
/// (`-o`/`--output`/`-l`/`--selector`/`--field-selector`/`--sort-by`)
/// consumes the *next* array entry as its value (`["-o", "yaml"]`), which
/// is the canonical kubectl-style form. The `=`-joined form (`-o=yaml`) and
/// the glued form (`-ojson`) are accepted too, for callers that prefer them.
pub fn validate_extra_args(extra_args: &[String]) -> Result<(), String> {
    let mut i = 0;
    while i < extra_args.len() {
        let arg = &extra_args[i];

        if FORBIDDEN_EXTRA_ARG_PREFIXES.iter().any(|f| arg.starts_with(f)) {
            return Err(format!("flag '{arg}' is not permitted"));
        }

        let (flag, inline_value) = match arg.split_once('=') {
            Some((f, v)) => (f, Some(v)),
            None => (arg.as_str(), None),
        };
        let is_output_flag = flag == "-o" || flag == "--output";

        // `=`-joined form: `-o=json`, `--field-selector=foo`.
        if let Some(value) = inline_value {
            if is_output_flag {
                if !output_format_ok(value) {
                    return Err(format!("output format '{value}' is not permitted"));
                }
            } else if !ALLOWED_EXTRA_ARG_PREFIXES.contains(&flag) {
                return Err(format!("flag '{arg}' is not permitted"));
            }
            i += 1;
            continue;
        }

        // Separated form: the value (if any) is the next array entry.
        if VALUE_TAKING_EXTRA_ARG_FLAGS.contains(&flag) {
            let value = extra_args
                .get(i + 1)
                .ok_or_else(|| format!("flag '{arg}' requires a value"))?;
            if is_output_flag && !output_format_ok(value) {
                return Err(format!("output format '{value}' is not permitted"));
            }
            i += 2;
            continue;
        }

        if ALLOWED_EXTRA_ARG_PREFIXES.contains(&flag) {
            i += 1;
            continue;
        }

        // Glued form: `-ojson`.
        if flag.starts_with("-o") && flag.len() > 2 {
            let value = &flag[2..];
            if !output_format_ok(value) {
                return Err(format!("output format '{value}' is not permitted"));
            }
            i += 1;
            continue;
        }

        return Err(format!("flag '{arg}' is not permitted"));
    }
    Ok(())
}

/// Builds the full argument vector the executor will run:
/// `[verb, ...args, "-n", namespace?, ...extra_args?]`.
pub fn compose_args(
    command_type: &str,
    args: &[String],
    namespace: Option<&str>,
    extra_args: &[String],
) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len() + extra_args.len() + 3);
    out.push(command_type.to_string());
    out.extend(args.iter().cloned());
    if let Some(ns) = namespace {
        out.push("-n".to_string());
        out.push(ns.to_string());
    }
    out.extend(extra_args.iter().cloned());
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub cluster_id: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub cluster_id: String,
    pub user_id: String,
    pub correlation_id: Option<String>,
    pub service_identity: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub command_count: u64,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub session: Session,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub cluster_id: String,
    pub session_id: Option<Uuid>,
    pub command_type: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub namespace: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub command_id: Uuid,
    pub status: ExecutionStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub executed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub cluster_id: String,
    pub args: Vec<String>,
    pub timeout_seconds: u64,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_id: Uuid,
    pub status: ExecutionStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub executed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CapabilityMode {
    ReadOnly,
    ExtendedReadOnly,
    FullAccess,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityFeatures {
    pub exec: bool,
    pub port_forward: bool,
    pub proxy: bool,
    pub cp: bool,
}

impl CapabilityFeatures {
    pub fn from_mode(mode: CapabilityMode) -> Self {
        let extended = matches!(
            mode,
            CapabilityMode::ExtendedReadOnly | CapabilityMode::FullAccess
        );
        let full = matches!(mode, CapabilityMode::FullAccess);
        Self {
            exec: extended,
            port_forward: extended,
            proxy: full,
            cp: full,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub cluster_id: String,
    pub mode: CapabilityMode,
    #[serde(default)]
    pub allowed_verbs: Vec<String>,
    #[serde(default)]
    pub restricted_resources: Vec<String>,
    #[serde(default)]
    pub allowed_flags: Vec<String>,
    pub executor_version: Option<String>,
    pub executor_pod: Option<String>,
    pub reported_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub features: CapabilityFeatures,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportCapabilitiesRequest {
    pub cluster_id: String,
    pub mode: CapabilityMode,
    #[serde(default)]
    pub allowed_verbs: Vec<String>,
    #[serde(default)]
    pub restricted_resources: Vec<String>,
    #[serde(default)]
    pub allowed_flags: Vec<String>,
    pub executor_version: Option<String>,
    pub executor_pod: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutorTokenResponse {
    pub token: String,
    pub cluster_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStatusResponse {
    pub id: String,
    pub connected: bool,
    pub has_token: bool,
    pub capabilities: Option<CapabilityProfile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub id: String,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterListResponse {
    pub clusters: Vec<ClusterSummary>,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_forbidden_verb_as_substring() {
        let args = vec!["get".into(), "pods".into(), "delete".into()];
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn accepts_safe_args() {
        let args = vec!["pods".into()];
        assert!(validate_args(&args).is_ok());
    }

    #[test]
    fn rejects_oversized_args() {
        let args = vec!["pods".to_string(); MAX_ARGS + 1];
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn allows_output_json() {
        let extra = vec!["-o=json".to_string()];
        assert!(validate_extra_args(&extra).is_ok());
    }

    #[test]
    fn rejects_disallowed_output_format() {
        let extra = vec!["-o=table".to_string()];
        assert!(validate_extra_args(&extra).is_err());
    }

    #[test]
    fn rejects_kubeconfig_flag() {
        let extra = vec!["--kubeconfig=/tmp/kc".to_string()];
        assert!(validate_extra_args(&extra).is_err());
    }

    #[test]
    fn rejects_filename_shorthand() {
        let extra = vec!["-f=manifest.yaml".to_string()];
        assert!(validate_extra_args(&extra).is_err());
    }

    #[test]
    fn allows_selector_and_watch() {
        let extra = vec!["-l=app=foo".to_string(), "-w".to_string()];
        assert!(validate_extra_args(&extra).is_ok());
    }

    #[test]
    fn allows_separated_output_flag() {
        let extra = vec!["-o".to_string(), "yaml".to_string()];
        assert!(validate_extra_args(&extra).is_ok());
    }

    #[test]
    fn rejects_separated_output_flag_with_bad_format() {
        let extra = vec!["--output".to_string(), "table".to_string()];
        assert!(validate_extra_args(&extra).is_err());
    }

    #[test]
    fn rejects_output_flag_missing_value() {
        let extra = vec!["-o".to_string()];
        assert!(validate_extra_args(&extra).is_err());
    }

    #[test]
    fn allows_separated_selector_without_format_checks() {
        let extra = vec!["-l".to_string(), "app=foo".to_string()];
        assert!(validate_extra_args(&extra).is_ok());
    }

    #[test]
    fn allows_glued_output_flag() {
        let extra = vec!["-ojson".to_string()];
        assert!(validate_extra_args(&extra).is_ok());
    }

    #[test]
    fn allows_separated_sort_by_then_flag_only_entries() {
        let extra = vec![
            "--sort-by".to_string(),
            ".metadata.name".to_string(),
            "--show-labels".to_string(),
            "-A".to_string(),
        ];
        assert!(validate_extra_args(&extra).is_ok());
    }

    #[test]
    fn cluster_id_rejects_uppercase_and_leading_hyphen() {
        assert!(validate_cluster_id("Prod-1").is_err());
        assert!(validate_cluster_id("-prod").is_err());
        assert!(validate_cluster_id("prod-us-1").is_ok());
    }

    #[test]
    fn compose_args_orders_namespace_then_extra() {
        let out = compose_args(
            "get",
            &["pods".to_string()],
            Some("default"),
            &["-o=json".to_string()],
        );
        assert_eq!(out, vec!["get", "pods", "-n", "default", "-o=json"]);
    }

    #[test]
    fn features_derive_from_mode() {
        let ro = CapabilityFeatures::from_mode(CapabilityMode::ReadOnly);
        assert!(!ro.exec && !ro.port_forward && !ro.proxy && !ro.cp);

        let ext = CapabilityFeatures::from_mode(CapabilityMode::ExtendedReadOnly);
        assert!(ext.exec && ext.port_forward && !ext.proxy && !ext.cp);

        let full = CapabilityFeatures::from_mode(CapabilityMode::FullAccess);
        assert!(full.exec && full.port_forward && full.proxy && full.cp);
    }
}
