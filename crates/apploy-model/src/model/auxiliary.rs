//! Auxiliary resource kinds held in a `Common` group

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::args::{
    dsl_enum, fields, parse_port, validate_dns_label, Args, Buildable, Operation, OperationTable,
};
use crate::error::DslError;

use super::Base;

dsl_enum! {
    /// Secret type
    SecretType {
        Opaque => "Opaque",
        Tls => "kubernetes.io/tls",
        DockerConfigJson => "kubernetes.io/dockerconfigjson",
        BasicAuth => "kubernetes.io/basic-auth",
        SshAuth => "kubernetes.io/ssh-auth",
        ServiceAccountToken => "kubernetes.io/service-account-token",
    }
}

dsl_enum! {
    /// Service type
    ServiceType {
        ClusterIp => "ClusterIP",
        NodePort => "NodePort",
        LoadBalancer => "LoadBalancer",
        ExternalName => "ExternalName",
    }
}

dsl_enum! {
    /// Kind of role a RoleBinding refers to
    RoleKind {
        Role => "Role",
        ClusterRole => "ClusterRole",
    }
}

dsl_enum! {
    /// Ingress path match type
    PathType {
        Prefix => "Prefix",
        Exact => "Exact",
        ImplementationSpecific => "ImplementationSpecific",
    }
}

impl Default for SecretType {
    fn default() -> Self {
        Self::Opaque
    }
}

impl Default for ServiceType {
    fn default() -> Self {
        Self::ClusterIp
    }
}

impl Default for RoleKind {
    fn default() -> Self {
        Self::Role
    }
}

impl Default for PathType {
    fn default() -> Self {
        Self::Prefix
    }
}

const VERBS: &[&str] = &[
    "get",
    "list",
    "watch",
    "create",
    "update",
    "patch",
    "delete",
    "deletecollection",
    "*",
];

/// Decode `[group/]resource:verb,verb` rule values
fn parse_verbs(value: &str) -> Result<Vec<String>, String> {
    let verbs: Vec<String> = value
        .split(',')
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    if verbs.is_empty() {
        return Err("at least one verb is required".to_string());
    }
    if let Some(bad) = verbs.iter().find(|v| !VERBS.contains(&v.as_str())) {
        return Err(format!("unknown verb '{}', expected one of: {}", bad, VERBS.join(", ")));
    }
    Ok(verbs)
}

fn parse_subject_namespace(value: &str) -> Result<String, String> {
    validate_dns_label(value)?;
    Ok(value.to_string())
}

fn relabel() -> (Operation, Vec<&'static str>) {
    (Operation::Relabel, vec![fields::LABELS])
}

// =============================================================================
// ConfigMap / Secret
// =============================================================================

/// ConfigMap entity
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigMap {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl Buildable for ConfigMap {
    fn type_name(&self) -> &'static str {
        "configmap"
    }

    fn args(&self) -> &'static [&'static str] {
        &[fields::LABELS, fields::DATA]
    }

    fn args_example(&self) -> &'static str {
        "label1:value1;label2:value2 key1:value1;key2:value2"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([relabel(), (Operation::Configure, vec![fields::DATA])])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.merge(1, &mut self.data)?;
        Ok(())
    }
}

/// Secret entity; values are stored as plain `stringData`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Secret {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    #[serde(rename = "type")]
    pub secret_type: SecretType,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
}

impl Buildable for Secret {
    fn type_name(&self) -> &'static str {
        "secret"
    }

    fn args(&self) -> &'static [&'static str] {
        &[fields::LABELS, fields::TYPE, fields::STRING_DATA]
    }

    fn args_example(&self) -> &'static str {
        "label1:value1;label2:value2 Opaque key1:value1;key2:value2"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([
            relabel(),
            (Operation::Configure, vec![fields::TYPE, fields::STRING_DATA]),
        ])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.assign(1, &mut self.secret_type)?;
        args.merge(2, &mut self.string_data)?;
        Ok(())
    }
}

// =============================================================================
// Service / ServiceAccount
// =============================================================================

/// Service entity
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Service {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    /// Extra selector entries merged over the owning scope's pod labels
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    /// Named ports; target port equals the port
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, i32>,
}

impl Buildable for Service {
    fn type_name(&self) -> &'static str {
        "service"
    }

    fn args(&self) -> &'static [&'static str] {
        &[fields::LABELS, fields::SELECTOR, fields::TYPE, fields::PORTS]
    }

    fn args_example(&self) -> &'static str {
        "label1:value1;label2:value2 label1:value1 ClusterIP http:80;grpc:9090"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([
            relabel(),
            (Operation::Reselect, vec![fields::SELECTOR]),
            (Operation::Expose, vec![fields::TYPE, fields::PORTS]),
        ])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.merge(1, &mut self.selector)?;
        args.assign(2, &mut self.service_type)?;
        args.merge_with(3, &mut self.ports, parse_port)?;
        Ok(())
    }
}

/// ServiceAccount entity
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceAccount {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automount_token: Option<bool>,
}

impl Buildable for ServiceAccount {
    fn type_name(&self) -> &'static str {
        "serviceaccount"
    }

    fn args(&self) -> &'static [&'static str] {
        &[fields::LABELS, fields::AUTOMOUNT_TOKEN]
    }

    fn args_example(&self) -> &'static str {
        "label1:value1;label2:value2 false"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([
            relabel(),
            (Operation::Configure, vec![fields::AUTOMOUNT_TOKEN]),
        ])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.assign_opt(1, &mut self.automount_token)?;
        Ok(())
    }
}

// =============================================================================
// RBAC
// =============================================================================

/// Cluster-scoped role; rules map `[group/]resource` to verbs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterRole {
    #[serde(flatten)]
    pub base: Base,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub rules: BTreeMap<String, Vec<String>>,
}

const ROLE_EXAMPLE: &str = "label1:value1;label2:value2 pods:get,list;apps/deployments:get";

impl Buildable for ClusterRole {
    fn type_name(&self) -> &'static str {
        "clusterrole"
    }

    fn args(&self) -> &'static [&'static str] {
        &[fields::LABELS, fields::RULES]
    }

    fn args_example(&self) -> &'static str {
        ROLE_EXAMPLE
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([relabel(), (Operation::Configure, vec![fields::RULES])])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.merge_with(1, &mut self.rules, parse_verbs)?;
        Ok(())
    }
}

/// Namespaced role
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Role {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub rules: BTreeMap<String, Vec<String>>,
}

impl Buildable for Role {
    fn type_name(&self) -> &'static str {
        "role"
    }

    fn args(&self) -> &'static [&'static str] {
        &[fields::LABELS, fields::RULES]
    }

    fn args_example(&self) -> &'static str {
        ROLE_EXAMPLE
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([relabel(), (Operation::Configure, vec![fields::RULES])])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.merge_with(1, &mut self.rules, parse_verbs)?;
        Ok(())
    }
}

/// Binds a ClusterRole to ServiceAccounts (`name -> namespace`)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterRoleBinding {
    #[serde(flatten)]
    pub base: Base,
    pub role_name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub subjects: BTreeMap<String, String>,
}

impl Buildable for ClusterRoleBinding {
    fn type_name(&self) -> &'static str {
        "clusterrolebinding"
    }

    fn args(&self) -> &'static [&'static str] {
        &[fields::LABELS, fields::ROLE_NAME, fields::SUBJECTS]
    }

    fn args_example(&self) -> &'static str {
        "label1:value1;label2:value2 reader sa1:namespace1;sa2:namespace2"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([
            relabel(),
            (Operation::Bind, vec![fields::ROLE_NAME, fields::SUBJECTS]),
        ])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.assign_string(1, &mut self.role_name)?;
        args.merge_with(2, &mut self.subjects, parse_subject_namespace)?;
        Ok(())
    }
}

/// Binds a Role or ClusterRole to ServiceAccounts within a namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RoleBinding {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    pub role_kind: RoleKind,
    pub role_name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub subjects: BTreeMap<String, String>,
}

impl Buildable for RoleBinding {
    fn type_name(&self) -> &'static str {
        "rolebinding"
    }

    fn args(&self) -> &'static [&'static str] {
        &[
            fields::LABELS,
            fields::ROLE_KIND,
            fields::ROLE_NAME,
            fields::SUBJECTS,
        ]
    }

    fn args_example(&self) -> &'static str {
        "label1:value1;label2:value2 Role reader sa1:namespace1;sa2:namespace2"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([
            relabel(),
            (
                Operation::Bind,
                vec![fields::ROLE_KIND, fields::ROLE_NAME, fields::SUBJECTS],
            ),
        ])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.assign(1, &mut self.role_kind)?;
        args.assign_string(2, &mut self.role_name)?;
        args.merge_with(3, &mut self.subjects, parse_subject_namespace)?;
        Ok(())
    }
}

// =============================================================================
// Ingress
// =============================================================================

/// Single-host ingress routing paths to services
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Ingress {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// HTTP path to backend service name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub paths: BTreeMap<String, String>,
    pub service_port: i32,
    pub path_type: PathType,
}

impl Default for Ingress {
    fn default() -> Self {
        Self {
            base: Base::default(),
            default_namespace: None,
            class_name: None,
            host: None,
            paths: BTreeMap::new(),
            service_port: 80,
            path_type: PathType::default(),
        }
    }
}

/// Host token accepted by the DSL
#[derive(Clone, Debug, PartialEq, Eq)]
struct Host(String);

impl std::str::FromStr for Host {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let labels = s.strip_prefix("*.").unwrap_or(s);
        for label in labels.split('.') {
            validate_dns_label(label)?;
        }
        Ok(Self(s.to_string()))
    }
}

impl Buildable for Ingress {
    fn type_name(&self) -> &'static str {
        "ingress"
    }

    fn args(&self) -> &'static [&'static str] {
        &[
            fields::LABELS,
            fields::CLASS_NAME,
            fields::HOST,
            fields::PATHS,
            fields::SERVICE_PORT,
            fields::PATH_TYPE,
        ]
    }

    fn args_example(&self) -> &'static str {
        "label1:value1;label2:value2 nginx shop.example.com /:web;/api:api 80 Prefix"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([
            relabel(),
            (
                Operation::Expose,
                vec![
                    fields::CLASS_NAME,
                    fields::HOST,
                    fields::PATHS,
                    fields::SERVICE_PORT,
                    fields::PATH_TYPE,
                ],
            ),
        ])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.assign_string_opt(1, &mut self.class_name)?;
        let mut host: Option<Host> = None;
        args.assign_opt(2, &mut host)?;
        if let Some(token) = args.get(3) {
            if let Some(bad) = token
                .split(';')
                .filter(|e| !e.is_empty())
                .find(|e| !e.starts_with('/'))
            {
                return Err(DslError::InvalidValue {
                    field: fields::PATHS.to_string(),
                    value: bad.to_string(),
                    reason: "path must start with '/'".to_string(),
                });
            }
        }
        args.merge(3, &mut self.paths)?;
        let mut port = self.service_port;
        if let Some(token) = args.get(4) {
            port = parse_port(token).map_err(|reason| DslError::InvalidValue {
                field: fields::SERVICE_PORT.to_string(),
                value: token.to_string(),
                reason,
            })?;
        }
        self.service_port = port;
        args.assign(5, &mut self.path_type)?;
        if let Some(Host(h)) = host {
            self.host = Some(h);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Opaque", SecretType::Opaque)]
    #[case("kubernetes.io/tls", SecretType::Tls)]
    #[case("kubernetes.io/dockerconfigjson", SecretType::DockerConfigJson)]
    fn secret_type_tokens(#[case] token: &str, #[case] expected: SecretType) {
        let mut secret = Secret::default();
        secret.parse_args(&format!("_ {token} _")).unwrap();
        assert_eq!(secret.secret_type, expected);
    }

    #[rstest]
    #[case::unknown_verb("_ pods:get,destroy")]
    #[case::no_verbs("_ pods:")]
    #[case::missing_colon("_ pods")]
    fn invalid_rules_are_rejected(#[case] input: &str) {
        let mut role = Role::default();
        role.parse_args("_ pods:get").unwrap();
        let before = role.clone();
        assert!(role.parse_args(input).is_err());
        assert_eq!(role, before);
    }

    #[test]
    fn rules_merge_by_resource() {
        let mut role = ClusterRole::default();
        role.parse_args("_ pods:get,list;apps/deployments:watch").unwrap();
        role.parse_args("_ pods:*").unwrap();
        assert_eq!(role.rules["pods"], vec!["*".to_string()]);
        assert_eq!(role.rules["apps/deployments"], vec!["watch".to_string()]);
    }

    #[test]
    fn binding_subjects_need_valid_namespaces() {
        let mut binding = RoleBinding::default();
        binding
            .parse_args("_ ClusterRole view runner:ci;deployer:ci")
            .unwrap();
        assert_eq!(binding.role_kind, RoleKind::ClusterRole);
        assert_eq!(binding.role_name, "view");
        assert_eq!(binding.subjects.len(), 2);

        let err = binding.parse_args("_ _ _ runner:CI").unwrap_err();
        assert!(matches!(err, DslError::InvalidValue { ref field, .. } if field == "subjects"));
        assert_eq!(binding.subjects["runner"], "ci");
    }

    #[test]
    fn service_ports_and_type() {
        let mut svc = Service::default();
        svc.parse_args("_ _ NodePort http:8080").unwrap();
        assert_eq!(svc.service_type, ServiceType::NodePort);
        assert_eq!(svc.ports["http"], 8080);
        assert!(svc.parse_args("_ _ Headless _").is_err());
    }

    #[test]
    fn service_account_token_is_optional() {
        let mut sa = ServiceAccount::default();
        sa.parse_args("team:core _").unwrap();
        assert_eq!(sa.automount_token, None);
        sa.parse_args("_ false").unwrap();
        assert_eq!(sa.automount_token, Some(false));
    }

    mod ingress {
        use super::*;

        #[test]
        fn full_definition() {
            let mut ing = Ingress::default();
            ing.parse_args("_ nginx shop.example.com /:web;/api:api 8080 Exact")
                .unwrap();
            assert_eq!(ing.class_name.as_deref(), Some("nginx"));
            assert_eq!(ing.host.as_deref(), Some("shop.example.com"));
            assert_eq!(ing.paths["/api"], "api");
            assert_eq!(ing.service_port, 8080);
            assert_eq!(ing.path_type, PathType::Exact);
        }

        #[rstest]
        #[case::relative_path("_ _ _ api:api _ _")]
        #[case::bad_host("_ _ Shop.Example _ _ _")]
        #[case::bad_port("_ _ _ _ 0 _")]
        #[case::bad_path_type("_ _ _ _ _ Regex")]
        fn failures_do_not_mutate(#[case] input: &str) {
            let mut ing = Ingress::default();
            ing.parse_args("_ _ shop.example.com /:web _ _").unwrap();
            let before = ing.clone();
            assert!(ing.parse_args(input).is_err());
            assert_eq!(ing, before);
        }
    }
}
