//! Runtime-facing process specification.
//!
//! Translates an [`ExecRequest`] into the `process` document an OCI runtime
//! accepts for `exec --process`. Sections the caller left out stay out of
//! the document instead of being filled with zero values.

use execshim_shared::errors::{ShimError, ShimResult};
use execshim_shared::ExecRequest;
use oci_spec::runtime::{
    LinuxCapabilities, LinuxCapabilitiesBuilder, PosixRlimit, PosixRlimitBuilder, User,
    UserBuilder,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Working directory used when the request does not name one.
const DEFAULT_CWD: &str = "/";

/// OCI `process` object for an exec'd process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    pub terminal: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,

    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    pub cwd: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<LinuxCapabilities>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rlimits: Option<Vec<PosixRlimit>>,

    #[serde(default)]
    pub no_new_privileges: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apparmor_profile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selinux_label: Option<String>,
}

/// Build the runtime process spec for an exec request.
///
/// Deterministic: the same request always yields the same spec. Errors only
/// surface from the OCI builders themselves.
pub fn process_from_request(req: &ExecRequest) -> ShimResult<ProcessSpec> {
    let cwd = if req.cwd.is_empty() {
        DEFAULT_CWD.to_string()
    } else {
        req.cwd.clone()
    };

    Ok(ProcessSpec {
        terminal: req.terminal,
        user: build_user(req)?,
        args: req.args.clone(),
        env: req.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
        cwd,
        capabilities: build_capabilities(req)?,
        rlimits: build_rlimits(req)?,
        no_new_privileges: req.no_new_privileges,
        apparmor_profile: non_empty(&req.apparmor_profile),
        selinux_label: non_empty(&req.selinux_label),
    })
}

fn build_user(req: &ExecRequest) -> ShimResult<Option<User>> {
    let Some(user) = &req.user else {
        return Ok(None);
    };

    let mut builder = UserBuilder::default().uid(user.uid).gid(user.gid);
    if !user.additional_gids.is_empty() {
        builder = builder.additional_gids(user.additional_gids.clone());
    }

    builder
        .build()
        .map(Some)
        .map_err(|e| ShimError::Setup(format!("Failed to build user spec: {}", e)))
}

/// Requested capabilities become the bounding, effective and permitted sets.
/// Inheritable and ambient sets are always empty.
fn build_capabilities(req: &ExecRequest) -> ShimResult<Option<LinuxCapabilities>> {
    let Some(requested) = &req.capabilities else {
        return Ok(None);
    };
    let caps: HashSet<_> = requested.iter().copied().collect();

    LinuxCapabilitiesBuilder::default()
        .bounding(caps.clone())
        .effective(caps.clone())
        .permitted(caps)
        .inheritable(HashSet::new())
        .ambient(HashSet::new())
        .build()
        .map(Some)
        .map_err(|e| ShimError::Setup(format!("Failed to build capabilities: {}", e)))
}

fn build_rlimits(req: &ExecRequest) -> ShimResult<Option<Vec<PosixRlimit>>> {
    if req.rlimits.is_empty() {
        return Ok(None);
    }

    req.rlimits
        .iter()
        .map(|limit| {
            PosixRlimitBuilder::default()
                .typ(limit.typ)
                .soft(limit.soft)
                .hard(limit.hard)
                .build()
                .map_err(|e| {
                    ShimError::Setup(format!("Failed to build rlimit {:?}: {}", limit.typ, e))
                })
        })
        .collect::<ShimResult<Vec<_>>>()
        .map(Some)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use execshim_shared::{Rlimit, User as RequestUser};
    use oci_spec::runtime::{Capability, PosixRlimitType};

    #[test]
    fn test_absent_sections_are_not_materialized() {
        let spec = process_from_request(&ExecRequest::new(["/bin/true"])).unwrap();

        assert!(spec.user.is_none());
        assert!(spec.rlimits.is_none());
        assert!(spec.capabilities.is_none());
        assert_eq!(spec.cwd, "/");

        let json = serde_json::to_value(&spec).unwrap();
        let object = json.as_object().unwrap();
        assert!(!object.contains_key("user"));
        assert!(!object.contains_key("rlimits"));
        assert!(!object.contains_key("capabilities"));
        assert!(!object.contains_key("apparmorProfile"));
        assert_eq!(json["args"][0], "/bin/true");
    }

    #[test]
    fn test_full_request_translation() {
        let mut req = ExecRequest::new(["sh", "-c", "id"]);
        req.terminal = true;
        req.cwd = "/srv".to_string();
        req.env.insert("B".to_string(), "2".to_string());
        req.env.insert("A".to_string(), "1".to_string());
        req.user = Some(RequestUser {
            uid: 1000,
            gid: 100,
            additional_gids: vec![27, 44],
        });
        req.rlimits = vec![Rlimit {
            typ: PosixRlimitType::RlimitNofile,
            soft: 1024,
            hard: 4096,
        }];
        req.capabilities = Some(vec![Capability::Chown, Capability::NetBindService]);
        req.no_new_privileges = true;
        req.apparmor_profile = "docker-default".to_string();

        let spec = process_from_request(&req).unwrap();

        assert!(spec.terminal);
        assert_eq!(spec.cwd, "/srv");
        assert_eq!(spec.env, vec!["A=1".to_string(), "B=2".to_string()]);

        let user = spec.user.as_ref().unwrap();
        assert_eq!(user.uid(), 1000);
        assert_eq!(user.gid(), 100);
        assert_eq!(user.additional_gids().as_deref(), Some(&[27u32, 44][..]));

        let rlimits = spec.rlimits.as_ref().unwrap();
        assert_eq!(rlimits.len(), 1);
        assert_eq!(rlimits[0].soft(), 1024);
        assert_eq!(rlimits[0].hard(), 4096);

        let caps = spec.capabilities.as_ref().unwrap();
        assert!(caps.bounding().as_ref().unwrap().contains(&Capability::Chown));
        assert!(caps.ambient().as_ref().unwrap().is_empty());

        assert!(spec.no_new_privileges);
        assert_eq!(spec.apparmor_profile.as_deref(), Some("docker-default"));
        assert!(spec.selinux_label.is_none());
    }

    #[test]
    fn test_translation_is_deterministic() {
        let mut req = ExecRequest::new(["env"]);
        for i in 0..16 {
            req.env.insert(format!("K{}", i), i.to_string());
        }
        assert_eq!(
            process_from_request(&req).unwrap(),
            process_from_request(&req).unwrap()
        );
    }

    #[test]
    fn test_root_user_is_explicit_when_requested() {
        let mut req = ExecRequest::new(["id"]);
        req.user = Some(RequestUser {
            uid: 0,
            gid: 0,
            additional_gids: vec![],
        });
        let spec = process_from_request(&req).unwrap();
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["user"]["uid"], 0);
        assert_eq!(json["user"]["gid"], 0);
    }
}
