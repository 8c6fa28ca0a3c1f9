//! Wire DTOs for the build server REST API.
//!
//! # Design
//! Inbound shapes (`BuildDetails`, `BuildListResult`) default every field so
//! a sparse response such as `{"id": 42}` decodes cleanly. Outbound shapes
//! (`BuildRequest`, `StopRequest`) use `Option` with `skip_serializing_if` so
//! fields the caller never supplied are absent from the JSON rather than
//! sent as empty strings.
//!
//! The server models booleans in request bodies as the strings `"true"` and
//! `"false"`; `personal` and `readdIntoQueue` keep that shape.

use serde::{Deserialize, Serialize};

use crate::error::{BuildServerError, Result};

/// Reference to a build pipeline definition ("build type" on the server).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildTypeRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
}

impl BuildTypeRef {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildComment {
    pub text: String,
}

/// One build parameter override.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildProperty {
    pub name: String,
    pub value: String,
}

impl BuildProperty {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PropertySet {
    #[serde(skip_serializing_if = "is_zero")]
    pub count: u32,
    pub property: Vec<BuildProperty>,
}

impl PropertySet {
    pub fn from_properties(property: Vec<BuildProperty>) -> Self {
        Self {
            count: property.len() as u32,
            property,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.property.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.property
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// A reference to another build: `(pipeline id, build id)`.
///
/// Used for both snapshot and artifact dependencies; which one it is depends
/// on the field of `BuildRequest` it is placed in.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DependencyRef {
    pub id: u64,
    pub build_type_id: String,
}

impl DependencyRef {
    pub fn new(build_type_id: impl Into<String>, id: u64) -> Self {
        Self {
            id,
            build_type_id: build_type_id.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DependencySet {
    #[serde(skip_serializing_if = "is_zero")]
    pub count: u32,
    pub build: Vec<DependencyRef>,
}

impl DependencySet {
    pub fn from_refs(build: Vec<DependencyRef>) -> Self {
        Self {
            count: build.len() as u32,
            build,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.build.is_empty()
    }
}

/// Outbound payload for `POST /app/rest/buildQueue`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub build_type: BuildTypeRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<BuildComment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<PropertySet>,
    pub personal: String,
    #[serde(
        rename = "snapshot-dependencies",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub snapshot_dependencies: Option<DependencySet>,
    #[serde(
        rename = "artifact-dependencies",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub artifact_dependencies: Option<DependencySet>,
}

/// Inbound description of one build.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildDetails {
    pub id: u64,
    pub build_type_id: String,
    pub number: String,
    pub status: String,
    pub state: String,
    pub branch_name: String,
    pub web_url: String,
    pub status_text: String,
    pub comment: BuildComment,
    pub build_type: BuildTypeRef,
    pub properties: PropertySet,
    #[serde(rename = "snapshot-dependencies")]
    pub snapshot_dependencies: DependencySet,
    #[serde(rename = "artifact-dependencies")]
    pub artifact_dependencies: DependencySet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage_complete: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_date: Option<String>,
}

/// Inbound page of builds from `GET /app/rest/builds`.
///
/// `builds` keeps the server's order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildListResult {
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_href: Option<String>,
    #[serde(rename = "build")]
    pub builds: Vec<BuildDetails>,
}

/// Outbound payload for cancelling a queued build or stopping a running one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub readd_into_queue: String,
}

impl StopRequest {
    pub fn new(comment: Option<&str>, readd_into_queue: bool) -> Self {
        Self {
            comment: comment.map(str::to_string),
            readd_into_queue: wire_bool(readd_into_queue),
        }
    }

    /// Cancel/stop without putting the build back into the queue.
    pub fn cancel(comment: Option<&str>) -> Self {
        Self::new(comment, false)
    }
}

/// Caller-side description of a build to enqueue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewBuild {
    pub pipeline_id: String,
    pub branch: Option<String>,
    pub comment: Option<String>,
    pub properties: Vec<BuildProperty>,
    pub snapshot_dependencies: Vec<DependencyRef>,
    pub artifact_dependencies: Vec<DependencyRef>,
}

impl NewBuild {
    pub fn new(pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            ..Self::default()
        }
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(BuildProperty::new(name, value));
        self
    }

    pub fn properties(mut self, properties: Vec<BuildProperty>) -> Self {
        self.properties = properties;
        self
    }

    pub fn snapshot_dependencies(mut self, deps: Vec<DependencyRef>) -> Self {
        self.snapshot_dependencies = deps;
        self
    }

    pub fn artifact_dependencies(mut self, deps: Vec<DependencyRef>) -> Self {
        self.artifact_dependencies = deps;
        self
    }

    /// Validate the input and shape it into the wire payload.
    ///
    /// Automated triggers are never personal builds, so `personal` is always
    /// `"false"`.
    pub fn to_request(&self) -> Result<BuildRequest> {
        if self.pipeline_id.trim().is_empty() {
            return Err(BuildServerError::invalid_argument(
                "pipeline id must not be empty",
            ));
        }
        for property in &self.properties {
            if property.name.is_empty() {
                return Err(BuildServerError::invalid_argument(
                    "property name must not be empty",
                ));
            }
            if property.name.contains('=') {
                return Err(BuildServerError::invalid_argument(format!(
                    "property name {:?} must not contain '='",
                    property.name
                )));
            }
        }
        for dep in self
            .snapshot_dependencies
            .iter()
            .chain(&self.artifact_dependencies)
        {
            if dep.build_type_id.is_empty() {
                return Err(BuildServerError::invalid_argument(
                    "dependency pipeline id must not be empty",
                ));
            }
        }

        Ok(BuildRequest {
            build_type: BuildTypeRef::with_id(self.pipeline_id.clone()),
            branch_name: self.branch.clone(),
            comment: self.comment.clone().map(|text| BuildComment { text }),
            properties: non_empty(PropertySet::from_properties(self.properties.clone())),
            personal: wire_bool(false),
            snapshot_dependencies: non_empty_deps(self.snapshot_dependencies.clone()),
            artifact_dependencies: non_empty_deps(self.artifact_dependencies.clone()),
        })
    }
}

/// Downloaded artifact content, untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

fn wire_bool(value: bool) -> String {
    let text = if value { "true" } else { "false" };
    text.to_string()
}

fn non_empty(set: PropertySet) -> Option<PropertySet> {
    (!set.is_empty()).then_some(set)
}

fn non_empty_deps(refs: Vec<DependencyRef>) -> Option<DependencySet> {
    (!refs.is_empty()).then(|| DependencySet::from_refs(refs))
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_details_tolerates_sparse_body() {
        let details: BuildDetails = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(
            details,
            BuildDetails {
                id: 42,
                ..BuildDetails::default()
            }
        );
    }

    #[test]
    fn build_details_reads_dependencies() {
        let details: BuildDetails = serde_json::from_str(
            r#"{
                "id": 7,
                "buildTypeId": "App_Build",
                "state": "finished",
                "status": "SUCCESS",
                "comment": {"text": "nightly"},
                "properties": {"count": 1, "property": [{"name": "ENV", "value": "prod"}]},
                "snapshot-dependencies": {"count": 1, "build": [{"id": 3, "buildTypeId": "Lib_Build"}]}
            }"#,
        )
        .unwrap();
        assert_eq!(details.comment.text, "nightly");
        assert_eq!(details.properties.get("ENV"), Some("prod"));
        assert_eq!(
            details.snapshot_dependencies.build,
            vec![DependencyRef::new("Lib_Build", 3)]
        );
        assert!(details.artifact_dependencies.is_empty());
    }

    #[test]
    fn build_request_omits_unsupplied_fields() {
        let request = NewBuild::new("App_Build").to_request().unwrap();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"buildType": {"id": "App_Build"}, "personal": "false"})
        );
    }

    #[test]
    fn build_request_keeps_dependency_kinds_apart() {
        let request = NewBuild::new("App_Build")
            .snapshot_dependencies(vec![DependencyRef::new("Lib_Build", 11)])
            .artifact_dependencies(vec![DependencyRef::new("Assets_Build", 12)])
            .to_request()
            .unwrap();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json["snapshot-dependencies"],
            serde_json::json!({"count": 1, "build": [{"id": 11, "buildTypeId": "Lib_Build"}]})
        );
        assert_eq!(
            json["artifact-dependencies"],
            serde_json::json!({"count": 1, "build": [{"id": 12, "buildTypeId": "Assets_Build"}]})
        );
    }

    #[test]
    fn property_name_with_equals_is_rejected() {
        let err = NewBuild::new("App_Build")
            .property("A=B", "c")
            .to_request()
            .unwrap_err();
        assert!(matches!(err, BuildServerError::InvalidArgument(_)));
    }

    #[test]
    fn empty_pipeline_is_rejected() {
        let err = NewBuild::new("  ").to_request().unwrap_err();
        assert!(matches!(err, BuildServerError::InvalidArgument(_)));
    }

    #[test]
    fn stop_request_uses_string_booleans() {
        let json = serde_json::to_value(StopRequest::cancel(Some("no longer needed"))).unwrap();
        assert_eq!(json["readdIntoQueue"], serde_json::json!("false"));
        assert_eq!(json["comment"], "no longer needed");

        let json = serde_json::to_value(StopRequest::new(None, true)).unwrap();
        assert_eq!(json, serde_json::json!({"readdIntoQueue": "true"}));
    }

    #[test]
    fn build_list_result_keeps_server_order() {
        let list: BuildListResult = serde_json::from_str(
            r#"{"count": 2, "nextHref": "/app/rest/builds?locator=start:2", "build": [{"id": 9}, {"id": 4}]}"#,
        )
        .unwrap();
        let ids: Vec<u64> = list.builds.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![9, 4]);
        assert_eq!(list.count, 2);
        assert!(list.next_href.is_some());
    }
}
