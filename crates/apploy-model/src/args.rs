//! Positional argument DSL shared by every buildable resource kind
//!
//! A resource is populated from a single space-separated string whose token
//! count must match its `args()` schema exactly. The sentinel `_` leaves the
//! field at that position untouched, so several invocations can edit the same
//! entity incrementally.
//!
//! Map-like fields (labels, selectors, data) use a two-level encoding:
//! `key:value;key2:value2`. Entries are merged into the existing map and a
//! later key overwrites an earlier one.

use std::collections::BTreeMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DslError;

/// Token that leaves a field unchanged
pub const SENTINEL: &str = "_";

/// Separator between entries of a map-encoded field
pub const ENTRY_SEPARATOR: char = ';';

/// Separator between key and value inside a map entry
pub const PAIR_SEPARATOR: char = ':';

/// Field identifiers shared by several resource kinds
pub mod fields {
    pub const LABELS: &str = "labels";
    pub const SELECTOR: &str = "selector";
    pub const NAMESPACE: &str = "namespace";
    pub const REPLICAS: &str = "replicas";
    pub const STRATEGY: &str = "strategy";
    pub const UPDATE_STRATEGY: &str = "updateStrategy";
    pub const POD_MANAGEMENT_POLICY: &str = "podManagementPolicy";
    pub const MIN_READY_SECONDS: &str = "minReadySeconds";
    pub const REVISION_HISTORY_LIMIT: &str = "revisionHistoryLimit";
    pub const PROGRESS_DEADLINE_SECONDS: &str = "progressDeadlineSeconds";
    pub const PARALLELISM: &str = "parallelism";
    pub const COMPLETIONS: &str = "completions";
    pub const BACKOFF_LIMIT: &str = "backoffLimit";
    pub const ACTIVE_DEADLINE_SECONDS: &str = "activeDeadlineSeconds";
    pub const COMPLETION_MODE: &str = "completionMode";
    pub const SCHEDULE: &str = "schedule";
    pub const CONCURRENCY_POLICY: &str = "concurrencyPolicy";
    pub const SUSPEND: &str = "suspend";
    pub const SUCCESSFUL_JOBS_HISTORY_LIMIT: &str = "successfulJobsHistoryLimit";
    pub const FAILED_JOBS_HISTORY_LIMIT: &str = "failedJobsHistoryLimit";
    pub const IMAGE: &str = "image";
    pub const PULL_POLICY: &str = "pullPolicy";
    pub const PORTS: &str = "ports";
    pub const ENV: &str = "env";
    pub const DATA: &str = "data";
    pub const TYPE: &str = "type";
    pub const STRING_DATA: &str = "stringData";
    pub const AUTOMOUNT_TOKEN: &str = "automountToken";
    pub const RULES: &str = "rules";
    pub const ROLE_KIND: &str = "roleKind";
    pub const ROLE_NAME: &str = "roleName";
    pub const SUBJECTS: &str = "subjects";
    pub const CLASS_NAME: &str = "className";
    pub const HOST: &str = "host";
    pub const PATHS: &str = "paths";
    pub const SERVICE_PORT: &str = "servicePort";
    pub const PATH_TYPE: &str = "pathType";
}

/// High-level operation a resource kind supports, used for session introspection
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Change the entity's labels
    Relabel,
    /// Change the pod selector
    Reselect,
    /// Change the replica count
    Scale,
    /// Change how new revisions roll out
    Rollout,
    /// Change when or how often a job runs
    Schedule,
    /// Change configuration payload (data, env, image, rules)
    Configure,
    /// Change how the entity is exposed on the network
    Expose,
    /// Change which role and subjects a binding ties together
    Bind,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Relabel => "relabel",
            Self::Reselect => "reselect",
            Self::Scale => "scale",
            Self::Rollout => "rollout",
            Self::Schedule => "schedule",
            Self::Configure => "configure",
            Self::Expose => "expose",
            Self::Bind => "bind",
        };
        f.write_str(s)
    }
}

/// Operation table returned by [`Buildable::available_operations`]
pub type OperationTable = BTreeMap<Operation, Vec<&'static str>>;

/// Capability set implemented by every resource kind the builder can populate.
///
/// Implementors provide `apply_args`; `parse_args` wraps it so that a failing
/// call never mutates the receiver.
pub trait Buildable: Clone {
    /// Resource kind discriminator (e.g. `statefulset`)
    fn type_name(&self) -> &'static str;

    /// Ordered positional schema
    fn args(&self) -> &'static [&'static str];

    /// Literal example matching [`Buildable::args`], quoted in error messages
    fn args_example(&self) -> &'static str;

    /// Fields touched by each supported high-level operation
    fn available_operations(&self) -> OperationTable;

    /// Apply split tokens to `self`. May leave `self` partially updated on
    /// error; callers go through [`Buildable::parse_args`].
    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError>;

    /// Parse a full argument string, all-or-nothing.
    fn parse_args(&mut self, input: &str) -> Result<(), DslError> {
        let args = Args::split(input, self.args(), self.args_example())?;
        let mut staged = self.clone();
        staged.apply_args(&args)?;
        *self = staged;
        Ok(())
    }
}

/// Tokens of one DSL invocation, bound to the schema they were checked against
#[derive(Debug)]
pub struct Args<'a> {
    tokens: Vec<&'a str>,
    schema: &'static [&'static str],
}

impl<'a> Args<'a> {
    /// Split `input` on single spaces and check the count against `schema`
    pub fn split(
        input: &'a str,
        schema: &'static [&'static str],
        example: &str,
    ) -> Result<Self, DslError> {
        let tokens: Vec<&str> = input.split(' ').collect();
        if tokens.len() != schema.len() {
            return Err(DslError::ArgCount {
                expected: schema.len(),
                got: tokens.len(),
                example: example.to_string(),
            });
        }
        Ok(Self { tokens, schema })
    }

    /// Field name at `index`
    pub fn field(&self, index: usize) -> &'static str {
        self.schema[index]
    }

    /// Raw token at `index`, or `None` for the sentinel
    pub fn get(&self, index: usize) -> Option<&'a str> {
        match self.tokens[index] {
            SENTINEL => None,
            token => Some(token),
        }
    }

    /// Parse the token at `index` with `FromStr` and assign it
    pub fn assign<T>(&self, index: usize, target: &mut T) -> Result<(), DslError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        if let Some(value) = self.parse(index)? {
            *target = value;
        }
        Ok(())
    }

    /// Like [`Args::assign`] but wraps the value in `Some`
    pub fn assign_opt<T>(&self, index: usize, target: &mut Option<T>) -> Result<(), DslError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        if let Some(value) = self.parse(index)? {
            *target = Some(value);
        }
        Ok(())
    }

    /// Assign a non-empty free-form string
    pub fn assign_string(&self, index: usize, target: &mut String) -> Result<(), DslError> {
        if let Some(token) = self.get(index) {
            *target = self.non_empty(index, token)?.to_string();
        }
        Ok(())
    }

    /// Assign a non-empty free-form string wrapped in `Some`
    pub fn assign_string_opt(
        &self,
        index: usize,
        target: &mut Option<String>,
    ) -> Result<(), DslError> {
        if let Some(token) = self.get(index) {
            *target = Some(self.non_empty(index, token)?.to_string());
        }
        Ok(())
    }

    /// Assign a non-negative base-10 integer
    pub fn assign_count<T>(&self, index: usize, target: &mut T) -> Result<(), DslError>
    where
        T: FromStr<Err = ParseIntError> + PartialOrd + Default,
    {
        if let Some(value) = self.count(index)? {
            *target = value;
        }
        Ok(())
    }

    /// Assign a non-negative base-10 integer wrapped in `Some`
    pub fn assign_count_opt<T>(&self, index: usize, target: &mut Option<T>) -> Result<(), DslError>
    where
        T: FromStr<Err = ParseIntError> + PartialOrd + Default,
    {
        if let Some(value) = self.count(index)? {
            *target = Some(value);
        }
        Ok(())
    }

    /// Merge `key:value;...` entries into `target`
    pub fn merge(
        &self,
        index: usize,
        target: &mut BTreeMap<String, String>,
    ) -> Result<(), DslError> {
        if let Some(token) = self.get(index) {
            target.extend(parse_pairs(self.field(index), token)?);
        }
        Ok(())
    }

    /// Merge `key:value;...` entries whose values are converted by `convert`
    pub fn merge_with<V>(
        &self,
        index: usize,
        target: &mut BTreeMap<String, V>,
        convert: impl Fn(&str) -> Result<V, String>,
    ) -> Result<(), DslError> {
        let Some(token) = self.get(index) else {
            return Ok(());
        };
        let field = self.field(index);
        let mut converted = Vec::new();
        for (key, raw) in parse_pairs(field, token)? {
            let value = convert(&raw).map_err(|reason| DslError::InvalidValue {
                field: field.to_string(),
                value: raw.clone(),
                reason,
            })?;
            converted.push((key, value));
        }
        target.extend(converted);
        Ok(())
    }

    fn parse<T>(&self, index: usize) -> Result<Option<T>, DslError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(token) = self.get(index) else {
            return Ok(None);
        };
        token
            .parse::<T>()
            .map(Some)
            .map_err(|e| DslError::InvalidValue {
                field: self.field(index).to_string(),
                value: token.to_string(),
                reason: e.to_string(),
            })
    }

    fn count<T>(&self, index: usize) -> Result<Option<T>, DslError>
    where
        T: FromStr<Err = ParseIntError> + PartialOrd + Default,
    {
        let Some(token) = self.get(index) else {
            return Ok(None);
        };
        let field = self.field(index);
        let value = token.parse::<T>().map_err(|_| DslError::InvalidInteger {
            field: field.to_string(),
            value: token.to_string(),
        })?;
        if value < T::default() {
            return Err(DslError::InvalidValue {
                field: field.to_string(),
                value: token.to_string(),
                reason: "must not be negative".to_string(),
            });
        }
        Ok(Some(value))
    }

    fn non_empty<'t>(&self, index: usize, token: &'t str) -> Result<&'t str, DslError> {
        if token.is_empty() {
            return Err(DslError::InvalidValue {
                field: self.field(index).to_string(),
                value: String::new(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(token)
    }
}

/// Decode `key:value;key2:value2` into ordered pairs.
///
/// Empty entries (e.g. a trailing `;`) are ignored, but at least one entry is
/// required and every entry needs a non-empty key. Values may contain `:`.
pub fn parse_pairs(field: &str, token: &str) -> Result<Vec<(String, String)>, DslError> {
    let invalid = || DslError::InvalidEncoding {
        field: field.to_string(),
        value: token.to_string(),
    };

    let mut pairs = Vec::new();
    for entry in token.split(ENTRY_SEPARATOR).filter(|e| !e.is_empty()) {
        let (key, value) = entry.split_once(PAIR_SEPARATOR).ok_or_else(invalid)?;
        if key.is_empty() {
            return Err(invalid());
        }
        pairs.push((key.to_string(), value.to_string()));
    }

    if pairs.is_empty() {
        return Err(invalid());
    }
    Ok(pairs)
}

/// Parse a TCP/UDP port number (1-65535)
pub fn parse_port(value: &str) -> Result<i32, String> {
    match value.parse::<i32>() {
        Ok(port) if (1..=65535).contains(&port) => Ok(port),
        Ok(_) => Err("port must be between 1 and 65535".to_string()),
        Err(_) => Err("port must be an integer".to_string()),
    }
}

/// Validate a DNS-1123 label (namespaces, resource names).
///
/// Lowercase alphanumerics and `-`, starting and ending with an alphanumeric,
/// at most 63 characters.
pub fn validate_dns_label(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("must not be empty".to_string());
    }
    if s.len() > 63 {
        return Err(format!("must be at most 63 characters: {}", s));
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "must be lowercase alphanumeric with hyphens: {}",
            s
        ));
    }
    if s.starts_with('-') || s.ends_with('-') {
        return Err(format!("must start and end with an alphanumeric: {}", s));
    }
    Ok(())
}

/// Namespace value accepted by the DSL
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace(pub String);

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_dns_label(s)?;
        Ok(Self(s.to_string()))
    }
}

/// Declares a closed set of DSL tokens as an enum.
///
/// Generates `serde`/`JsonSchema` derives that serialize to the exact token,
/// plus `as_str`, `Display`, `FromStr` and an `ALL` token list.
macro_rules! dsl_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $token:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            Debug,
            PartialEq,
            Eq,
            ::serde::Serialize,
            ::serde::Deserialize,
            ::schemars::JsonSchema,
        )]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $token)] $variant),+
        }

        impl $name {
            /// Every accepted token, in declaration order
            pub const ALL: &'static [&'static str] = &[$($token),+];

            /// DSL token for this value
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $token),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($token => Ok(Self::$variant),)+
                    _ => Err(format!("expected one of: {}", Self::ALL.join(", "))),
                }
            }
        }
    };
}

pub(crate) use dsl_enum;

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &[&str] = &["labels", "replicas", "limit"];

    mod splitting {
        use super::*;

        #[test]
        fn token_count_must_match_schema() {
            let err = Args::split("a:1 3", SCHEMA, "labels replicas limit").unwrap_err();
            assert_eq!(
                err,
                DslError::ArgCount {
                    expected: 3,
                    got: 2,
                    example: "labels replicas limit".to_string()
                }
            );
        }

        #[test]
        fn double_space_yields_an_extra_empty_token() {
            let err = Args::split("a:1  3 4", SCHEMA, "x").unwrap_err();
            assert!(matches!(err, DslError::ArgCount { got: 4, .. }));
        }

        #[test]
        fn sentinel_reads_as_none() {
            let args = Args::split("_ 3 _", SCHEMA, "x").unwrap();
            assert_eq!(args.get(0), None);
            assert_eq!(args.get(1), Some("3"));
            assert_eq!(args.field(2), "limit");
        }
    }

    mod pairs {
        use super::*;

        #[test]
        fn merge_is_last_write_wins() {
            let mut labels = BTreeMap::new();
            let first = Args::split("a:1;b:2 _ _", SCHEMA, "x").unwrap();
            first.merge(0, &mut labels).unwrap();
            let second = Args::split("a:3 _ _", SCHEMA, "x").unwrap();
            second.merge(0, &mut labels).unwrap();

            assert_eq!(
                labels,
                BTreeMap::from([
                    ("a".to_string(), "3".to_string()),
                    ("b".to_string(), "2".to_string()),
                ])
            );
        }

        #[test]
        fn merge_is_idempotent() {
            let mut labels = BTreeMap::new();
            let args = Args::split("a:1;b:2 _ _", SCHEMA, "x").unwrap();
            args.merge(0, &mut labels).unwrap();
            let once = labels.clone();
            args.merge(0, &mut labels).unwrap();
            assert_eq!(labels, once);
        }

        #[test]
        fn value_may_contain_separator() {
            let pairs = parse_pairs("env", "URL:http://db:5432").unwrap();
            assert_eq!(pairs, vec![("URL".to_string(), "http://db:5432".to_string())]);
        }

        #[test]
        fn trailing_separator_is_ignored() {
            let pairs = parse_pairs("labels", "a:1;").unwrap();
            assert_eq!(pairs.len(), 1);
        }

        #[test]
        fn missing_colon_is_rejected() {
            let err = parse_pairs("labels", "a:1;b").unwrap_err();
            assert!(matches!(err, DslError::InvalidEncoding { .. }));
        }

        #[test]
        fn empty_key_is_rejected() {
            assert!(parse_pairs("labels", ":value").is_err());
        }

        #[test]
        fn nothing_to_merge_is_rejected() {
            assert!(parse_pairs("labels", ";").is_err());
        }
    }

    mod integers {
        use super::*;

        #[test]
        fn negative_count_is_rejected() {
            let args = Args::split("_ -1 _", SCHEMA, "x").unwrap();
            let mut replicas = 1i32;
            let err = args.assign_count(1, &mut replicas).unwrap_err();
            assert!(matches!(err, DslError::InvalidValue { .. }));
            assert_eq!(replicas, 1);
        }

        #[test]
        fn garbage_is_an_integer_error() {
            let args = Args::split("_ three _", SCHEMA, "x").unwrap();
            let mut replicas = 1i32;
            let err = args.assign_count(1, &mut replicas).unwrap_err();
            assert_eq!(
                err,
                DslError::InvalidInteger {
                    field: "replicas".to_string(),
                    value: "three".to_string()
                }
            );
        }

        #[test]
        fn optional_stays_absent_on_sentinel() {
            let args = Args::split("_ _ _", SCHEMA, "x").unwrap();
            let mut limit: Option<i32> = None;
            args.assign_count_opt(2, &mut limit).unwrap();
            assert_eq!(limit, None);
        }
    }

    #[test]
    fn port_bounds() {
        assert_eq!(parse_port("8080"), Ok(8080));
        assert!(parse_port("0").is_err());
        assert!(parse_port("65536").is_err());
        assert!(parse_port("http").is_err());
    }

    #[test]
    fn dns_labels() {
        assert!(validate_dns_label("web-1").is_ok());
        assert!(validate_dns_label("Web").is_err());
        assert!(validate_dns_label("-web").is_err());
        assert!(validate_dns_label("").is_err());
        assert!(validate_dns_label(&"a".repeat(64)).is_err());
    }
}
