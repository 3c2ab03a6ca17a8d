pub mod closure;

use regex_lite::Regex;
use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{Display, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::model::ParseError;
use log::{debug, error};
use toml::{map::Map, Table, Value};

/// The only descriptor api version this engine implements.
pub const SUPPORTED_API_VERSION: i64 = 1;

/// File name of the package descriptor, relative to the dependency root.
pub const MANIFEST_FILE: &str = "recipes.toml";

/// Opaque identifier of a logical project. Unique across a resolved closure.
#[derive(Clone, Hash, Deserialize, Serialize, Debug, PartialEq, Eq, Ord, PartialOrd)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(s: String) -> Self {
        ProjectId(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        ProjectId(s)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        ProjectId(s.to_string())
    }
}

#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize, Ord, PartialOrd)]
pub enum Protocol {
    #[serde(rename = "https")]
    Https,
    #[serde(rename = "ssh")]
    Ssh,
}

impl FromStr for Protocol {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.to_ascii_lowercase();
        match value.as_str() {
            "https" => Ok(Protocol::Https),
            "ssh" => Ok(Protocol::Ssh),
            _ => Err(ParseError::InvalidProtocol(value)),
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Protocol::Https => f.write_str("https"),
            Protocol::Ssh => f.write_str("ssh"),
        }
    }
}

/// Parsed repository location. The descriptor may spell the url with or without
/// a scheme; the scheme only selects the transport, it is not part of the
/// repository identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RepositoryUrl {
    pub host: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub protocol: Option<Protocol>,
}

impl RepositoryUrl {
    pub fn from_str_protocol(url: &str, protocol: Option<Protocol>) -> Result<Self, ParseError> {
        let re: Regex = Regex::new(
            r"^(?:(?P<scheme>[a-z][a-z+]*)://)?(?:git@)?(?P<host>[^/@:]+)[:/](?P<path>.+?)(?:\.git)?/?$",
        )
        .unwrap();
        let captures = re.captures(url);
        let captures = captures.as_ref();

        let scheme = captures
            .and_then(|c| c.name("scheme"))
            .map(|s| Protocol::from_str(s.as_str()))
            .transpose()?;

        let host = captures
            .and_then(|c| c.name("host"))
            .map(|s| s.as_str().to_string())
            .ok_or_else(|| ParseError::MissingUrlComponent("host".to_string(), url.to_string()))?;

        let path = captures
            .and_then(|c| c.name("path"))
            .map(|s| s.as_str().trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ParseError::MissingUrlComponent("path".to_string(), url.to_string()))?;

        // An explicit scheme in the url takes precedence over the protocol key.
        Ok(RepositoryUrl {
            host,
            path,
            protocol: scheme.or(protocol),
        })
    }

    /// Stable location of this repository inside the local cache.
    pub fn to_cache_path(&self) -> PathBuf {
        let mut result = PathBuf::new();
        result.push(&self.host);
        for segment in self.path.split('/') {
            result.push(segment);
        }
        result
    }

    pub fn to_git_url(&self, default_protocol: Protocol) -> String {
        match self.protocol.unwrap_or(default_protocol) {
            Protocol::Https => format!("https://{}/{}", self.host, self.path),
            Protocol::Ssh => format!("ssh://git@{}/{}.git", self.host, self.path),
        }
    }
}

impl FromStr for RepositoryUrl {
    type Err = ParseError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        Self::from_str_protocol(url, None)
    }
}

impl Display for RepositoryUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.host, self.path)
    }
}

/// A dependency is either pinned to a commit or floats with its branch.
/// Only a pinned revision is a stable input to resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum Revision {
    Pinned {
        revision: String,
    },
    #[default]
    Arbitrary,
}

impl Revision {
    pub fn pinned(revision: impl Into<String>) -> Revision {
        Revision::Pinned {
            revision: revision.into(),
        }
    }

    pub fn is_arbitrary(&self) -> bool {
        self == &Self::Arbitrary
    }
}

impl Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Revision::Pinned { revision } => f.write_str(revision),
            Revision::Arbitrary => f.write_char('*'),
        }
    }
}

impl Serialize for Revision {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Revision::Pinned { revision } => serializer.serialize_str(revision),
            Revision::Arbitrary => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for Revision {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RevisionVisitor;

        impl<'de> Visitor<'de> for RevisionVisitor {
            type Value = Revision;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Revision::Arbitrary)
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Revision::pinned(v))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Revision::pinned(v))
            }
        }

        deserializer.deserialize_any(RevisionVisitor)
    }
}

/// Revision plus the branch it was requested from. The branch is informational
/// whenever the revision is pinned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevisionSpecification {
    #[serde(skip_serializing_if = "Revision::is_arbitrary", default)]
    pub revision: Revision,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub branch: Option<String>,
}

impl Display for RevisionSpecification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevisionSpecification {
                revision,
                branch: None,
            } => write!(f, "{}", revision),
            RevisionSpecification {
                revision,
                branch: Some(branch),
            } => write!(f, "{}@{}", branch, revision),
        }
    }
}

/// One dependency edge of a package descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepSpec {
    pub project_id: ProjectId,
    pub url: RepositoryUrl,
    pub specification: RevisionSpecification,
    /// Roots the dependency at a subtree of the repository instead of its top
    /// level. Changes the fetch identity, not the conflict identity.
    pub path_override: Option<PathBuf>,
}

impl DepSpec {
    /// The fields that make two requests for the same project id compatible.
    /// Branch divergence is reconciled separately, see the conflict resolver.
    pub fn fetch_identity(&self) -> (&RepositoryUrl, &Revision, Option<&PathBuf>) {
        (
            &self.url,
            &self.specification.revision,
            self.path_override.as_ref(),
        )
    }
}

impl Display for DepSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.url, self.specification)?;
        if let Some(path_override) = &self.path_override {
            write!(f, " at /{}", path_override.display())?;
        }
        Ok(())
    }
}

/// A decoded package descriptor, root or dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub api_version: i64,
    /// Engine revision the package was rolled against. Not used in resolution.
    pub engine_revision: Option<String>,
    pub project_id: ProjectId,
    pub recipes_path: PathBuf,
    pub deps: Vec<DepSpec>,
}

impl Manifest {
    pub fn from_file(path: &Path) -> Result<Manifest, ParseError> {
        debug!(
            "Attempting to read descriptor from recipes file {}",
            path.display()
        );
        let contents = std::fs::read_to_string(path)?;

        let manifest = Manifest::from_toml_str(&contents);
        if let Err(err) = &manifest {
            error!("Could not build a valid descriptor from a recipes toml file due to err {err}")
        }
        manifest
    }

    pub fn from_toml_str(data: &str) -> Result<Manifest, ParseError> {
        let mut toml_value = toml::from_str::<Table>(data)?;

        let api_version = toml_value
            .remove("api_version")
            .ok_or_else(|| ParseError::MissingKey("api_version".to_string()))
            .and_then(|v| {
                v.as_integer().ok_or_else(|| ParseError::InvalidKey {
                    key: "api_version".to_string(),
                    reason: "expected an integer".to_string(),
                })
            })?;

        let engine_revision = toml_value
            .remove("engine_revision")
            .map(|v| v.try_into::<String>())
            .map_or(Ok(None), |v| v.map(Some))?;

        let project_id = toml_value
            .remove("project_id")
            .ok_or_else(|| ParseError::MissingKey("project_id".to_string()))
            .and_then(|v| v.try_into::<ProjectId>().map_err(|e| e.into()))?;

        let recipes_path = toml_value
            .remove("recipes_path")
            .ok_or_else(|| ParseError::MissingKey("recipes_path".to_string()))
            .and_then(|v| v.try_into::<PathBuf>().map_err(|e| e.into()))?;

        // Remaining top level tables are dependencies, in declaration order.
        // Declaration order is the tie break priority during resolution.
        let deps = toml_value
            .into_iter()
            .map(|(k, v)| parse_dep_spec(k, &v))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Manifest {
            api_version,
            engine_revision,
            project_id,
            recipes_path,
            deps,
        })
    }

    pub fn into_toml(self) -> Value {
        let mut root = Map::new();
        root.insert("api_version".to_string(), Value::Integer(self.api_version));
        if let Some(engine_revision) = self.engine_revision {
            root.insert(
                "engine_revision".to_string(),
                Value::String(engine_revision),
            );
        }
        root.insert(
            "project_id".to_string(),
            Value::String(self.project_id.to_string()),
        );
        root.insert(
            "recipes_path".to_string(),
            Value::String(self.recipes_path.to_string_lossy().into_owned()),
        );

        for dep in self.deps {
            let mut table = Map::new();
            table.insert("url".to_string(), Value::String(dep.url.to_string()));
            if let Some(protocol) = dep.url.protocol {
                table.insert("protocol".to_string(), Value::String(protocol.to_string()));
            }
            if let Some(branch) = dep.specification.branch {
                table.insert("branch".to_owned(), Value::String(branch));
            }
            if let Revision::Pinned { revision } = dep.specification.revision {
                table.insert("revision".to_owned(), Value::String(revision));
            }
            if let Some(path_override) = dep.path_override {
                table.insert(
                    "path_override".to_owned(),
                    Value::String(path_override.to_string_lossy().into_owned()),
                );
            }
            root.insert(dep.project_id.to_string(), Value::Table(table));
        }
        Value::Table(root)
    }
}

fn parse_dep_spec(name: String, value: &Value) -> Result<DepSpec, ParseError> {
    if value.as_table().is_none() {
        return Err(ParseError::InvalidKey {
            key: name,
            reason: "expected a dependency table".to_string(),
        });
    }

    let protocol = match value.get("protocol") {
        None => None,
        Some(toml) => Some(toml.clone().try_into::<Protocol>()?),
    };

    let project_id = ProjectId::new(name);

    let url = value
        .get("url")
        .ok_or_else(|| ParseError::MissingKey("url".to_string()))
        .and_then(|x| x.clone().try_into::<String>().map_err(|e| e.into()))
        .and_then(|url| RepositoryUrl::from_str_protocol(&url, protocol))?;

    let branch = value
        .get("branch")
        .map(|v| v.clone().try_into::<String>())
        .map_or(Ok(None), |v| v.map(Some))?;

    let revision = match value.get("revision") {
        Some(revision) => Revision::pinned(revision.clone().try_into::<String>()?),
        None => Revision::Arbitrary,
    };

    let path_override = value
        .get("path_override")
        .map(|v| v.clone().try_into::<PathBuf>())
        .map_or(Ok(None), |v| v.map(Some))?
        .map(|path| {
            if path.is_absolute() {
                Err(ParseError::AbsolutePathOverride(
                    path.to_string_lossy().into_owned(),
                ))
            } else {
                Ok(path)
            }
        })
        .transpose()?;

    Ok(DepSpec {
        project_id,
        url,
        specification: RevisionSpecification { revision, branch },
        path_override,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn load_valid_file_one_dep() {
        let str = r#"
            api_version = 1
            project_id = "tools"
            recipes_path = "recipes"
            [build]
                protocol = "https"
                url = "chromium.googlesource.com/chromium/build"
                branch = "main"
                revision = "3f655ab"
        "#;
        let expected = Manifest {
            api_version: 1,
            engine_revision: None,
            project_id: ProjectId::from("tools"),
            recipes_path: PathBuf::from("recipes"),
            deps: vec![DepSpec {
                project_id: ProjectId::from("build"),
                url: RepositoryUrl {
                    host: "chromium.googlesource.com".to_string(),
                    path: "chromium/build".to_string(),
                    protocol: Some(Protocol::Https),
                },
                specification: RevisionSpecification {
                    revision: Revision::pinned("3f655ab"),
                    branch: Some("main".to_string()),
                },
                path_override: None,
            }],
        };
        assert_eq!(Manifest::from_toml_str(str).unwrap(), expected);
    }

    #[test]
    fn load_valid_file_no_revision() {
        let str = r#"
            api_version = 1
            project_id = "tools"
            recipes_path = "recipes"

            [build]
            url = "example.com/org/build"
        "#;
        let manifest = Manifest::from_toml_str(str).unwrap();
        assert_eq!(
            manifest.deps[0].specification,
            RevisionSpecification {
                revision: Revision::Arbitrary,
                branch: None,
            }
        );
    }

    #[test]
    fn load_valid_file_path_override() {
        let str = r#"
            api_version = 1
            project_id = "tools"
            recipes_path = "recipes"

            [infra]
            url = "example.com/org/infra"
            revision = "0a1b2c3"
            path_override = "recipe_subtree"
        "#;
        let manifest = Manifest::from_toml_str(str).unwrap();
        assert_eq!(
            manifest.deps[0].path_override,
            Some(PathBuf::from("recipe_subtree"))
        );
    }

    #[test]
    fn load_invalid_absolute_path_override() {
        let str = r#"
            api_version = 1
            project_id = "tools"
            recipes_path = "recipes"

            [infra]
            url = "example.com/org/infra"
            revision = "0a1b2c3"
            path_override = "/recipe_subtree"
        "#;
        assert!(matches!(
            Manifest::from_toml_str(str),
            Err(ParseError::AbsolutePathOverride(_))
        ));
    }

    #[test]
    fn load_file_preserves_declaration_order() {
        let str = r#"
            api_version = 1
            project_id = "tools"
            recipes_path = "recipes"

            [zebra]
            url = "example.com/org/zebra"
            revision = "1"
            [aardvark]
            url = "example.com/org/aardvark"
            revision = "2"
        "#;
        let manifest = Manifest::from_toml_str(str).unwrap();
        let order: Vec<&str> = manifest
            .deps
            .iter()
            .map(|d| d.project_id.as_str())
            .collect();
        assert_eq!(order, vec!["zebra", "aardvark"]);
    }

    #[test]
    fn load_file_missing_api_version() {
        let str = r#"
            project_id = "tools"
            recipes_path = "recipes"
        "#;
        assert!(matches!(
            Manifest::from_toml_str(str),
            Err(ParseError::MissingKey(key)) if key == "api_version"
        ));
    }

    #[test]
    fn load_file_missing_project_id() {
        let str = r#"
            api_version = 1
            recipes_path = "recipes"
        "#;
        assert!(matches!(
            Manifest::from_toml_str(str),
            Err(ParseError::MissingKey(key)) if key == "project_id"
        ));
    }

    #[test]
    fn load_file_missing_recipes_path() {
        let str = r#"
            api_version = 1
            project_id = "tools"
        "#;
        assert!(matches!(
            Manifest::from_toml_str(str),
            Err(ParseError::MissingKey(key)) if key == "recipes_path"
        ));
    }

    #[test]
    fn load_file_missing_dep_url() {
        let str = r#"
            api_version = 1
            project_id = "tools"
            recipes_path = "recipes"

            [build]
            revision = "3f655ab"
        "#;
        assert!(matches!(
            Manifest::from_toml_str(str),
            Err(ParseError::MissingKey(key)) if key == "url"
        ));
    }

    #[test]
    fn load_invalid_protocol() {
        let str = r#"
            api_version = 1
            project_id = "tools"
            recipes_path = "recipes"

            [build]
            protocol = "ftp"
            url = "example.com/org/build"
        "#;
        assert!(Manifest::from_toml_str(str).is_err());
    }

    #[test]
    fn into_toml_round_trip() {
        let str = r#"
            api_version = 1
            project_id = "tools"
            recipes_path = "recipes"

            [build]
            url = "example.com/org/build"
            branch = "main"
            revision = "3f655ab"
        "#;
        let manifest = Manifest::from_toml_str(str).unwrap();
        let reparsed =
            Manifest::from_toml_str(&toml::to_string_pretty(&manifest.clone().into_toml()).unwrap())
                .unwrap();
        assert_eq!(reparsed, manifest);
    }

    #[test]
    fn build_url_bare() {
        let url = RepositoryUrl::from_str("example.com/org/repo").unwrap();
        assert_eq!(
            url,
            RepositoryUrl {
                host: "example.com".to_owned(),
                path: "org/repo".to_owned(),
                protocol: None,
            }
        );
    }

    #[test]
    fn build_url_with_scheme() {
        let url = RepositoryUrl::from_str("https://example.com/org/repo").unwrap();
        assert_eq!(url.protocol, Some(Protocol::Https));
        assert_eq!(url.to_string(), "example.com/org/repo");
    }

    #[test]
    fn build_url_scp_like() {
        let url = RepositoryUrl::from_str("git@example.com:org/repo.git").unwrap();
        assert_eq!(
            url,
            RepositoryUrl {
                host: "example.com".to_owned(),
                path: "org/repo".to_owned(),
                protocol: None,
            }
        );
    }

    #[test]
    fn build_url_nested_path() {
        let url = RepositoryUrl::from_str("chromium.googlesource.com/chromium/tools/depot_tools/")
            .unwrap();
        assert_eq!(url.path, "chromium/tools/depot_tools");
        assert_eq!(
            url.to_cache_path(),
            PathBuf::from("chromium.googlesource.com/chromium/tools/depot_tools")
        );
    }

    #[test]
    fn build_url_missing_path() {
        assert!(matches!(
            RepositoryUrl::from_str("example.com"),
            Err(ParseError::MissingUrlComponent(_, _))
        ));
    }

    #[test]
    fn git_url_protocol_selection() {
        let url = RepositoryUrl::from_str("example.com/org/repo").unwrap();
        assert_eq!(
            url.to_git_url(Protocol::Https),
            "https://example.com/org/repo"
        );
        assert_eq!(
            url.to_git_url(Protocol::Ssh),
            "ssh://git@example.com/org/repo.git"
        );

        let ssh_url = RepositoryUrl::from_str_protocol("example.com/org/repo", Some(Protocol::Ssh))
            .unwrap();
        assert_eq!(
            ssh_url.to_git_url(Protocol::Https),
            "ssh://git@example.com/org/repo.git"
        );
    }
}
