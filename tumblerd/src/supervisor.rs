//! Launching the mint as a set of mutually distrusting principals.
//!
//! Every process gets its own UID; every resource directory gets its own
//! GID. Ownership of a directory means `rwx`, a grant means `r-x`, and
//! everyone else sees nothing. The RPC sockets themselves are
//! world-writable; the traversal bits on `rpc/<Service>/` are the access
//! control. Children are spawned with the no-privileges GID first, then
//! their grant groups, then their UID, so no transient identity along the
//! way carries anything extra.

use crate::dirs::Dirs;
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// A user we promise will never own anything.
pub const NO_PRIVS: u32 = 999_999;

const BASE_UID: u32 = 1_000_000_000;
const BASE_GID: u32 = 2_000_000_000;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct Principal {
    pub name: &'static str,
    /// Arguments to this binary, after the global flags.
    pub subcommand: Vec<String>,
    /// Relative paths of the resources this principal may traverse.
    pub grants: Vec<String>,
    /// Whether the principal serves an RPC socket the launcher must wait
    /// for before starting dependents.
    pub rpc: bool,
}

#[derive(Clone, Debug)]
pub struct Resource {
    pub path: String,
    pub owner: Option<&'static str>,
}

#[derive(Debug)]
pub struct Plan {
    root: PathBuf,
    global_args: Vec<String>,
    principals: Vec<Principal>,
    resources: Vec<Resource>,
}

fn rpc_service(
    principals: &mut Vec<Principal>,
    resources: &mut Vec<Resource>,
    name: &'static str,
    grants: Vec<&str>,
) {
    resources.push(Resource {
        path: format!("rpc/{}", name),
        owner: Some(name),
    });
    principals.push(Principal {
        name,
        subcommand: vec!["serve".to_owned(), name.to_owned()],
        grants: grants.into_iter().map(str::to_owned).collect(),
        rpc: true,
    });
}

/// The full process and resource table, in launch order. Declared in RPC
/// dependency order: a service only ever calls sockets that appear before
/// it.
pub fn plan(dirs: &Dirs, network: &str, esplora_url: &str) -> Plan {
    let mut principals = Vec::new();
    let mut resources = Vec::new();

    rpc_service(
        &mut principals,
        &mut resources,
        "SellerDB",
        vec!["data/seller_database"],
    );
    rpc_service(
        &mut principals,
        &mut resources,
        "Sign",
        vec!["data/signing_private_key"],
    );
    rpc_service(&mut principals, &mut resources, "Check", vec!["rpc/SellerDB"]);
    rpc_service(
        &mut principals,
        &mut resources,
        "IssueProtobond",
        vec!["rpc/SellerDB", "rpc/Check", "rpc/Sign"],
    );
    rpc_service(
        &mut principals,
        &mut resources,
        "GenQuote",
        vec!["rpc/SellerDB", "data/collector_master_public_key"],
    );
    principals.push(Principal {
        name: "Seller",
        subcommand: vec!["seller-http".to_owned()],
        grants: vec!["rpc/GenQuote".to_owned(), "rpc/IssueProtobond".to_owned()],
        rpc: false,
    });

    rpc_service(
        &mut principals,
        &mut resources,
        "RedeemerDB",
        vec!["data/redeemer_database"],
    );
    rpc_service(
        &mut principals,
        &mut resources,
        "BondRedeemer",
        vec!["rpc/RedeemerDB", "data/signing_public_key", "data/oaep_key"],
    );
    principals.push(Principal {
        name: "Redeemer",
        subcommand: vec!["redeemer-http".to_owned()],
        grants: vec!["rpc/BondRedeemer".to_owned()],
        rpc: false,
    });
    principals.push(Principal {
        name: "Dispenser",
        subcommand: vec!["dispenser".to_owned()],
        grants: vec![
            "rpc/RedeemerDB".to_owned(),
            "data/dispenser_private_key".to_owned(),
        ],
        rpc: false,
    });
    principals.push(Principal {
        name: "Collector",
        subcommand: vec!["collector".to_owned()],
        grants: vec![
            "rpc/SellerDB".to_owned(),
            "data/collector_master_private_key".to_owned(),
            "data/mixin_address".to_owned(),
        ],
        rpc: false,
    });

    for path in &[
        "data/seller_database",
        "data/redeemer_database",
        "data/signing_private_key",
        "data/signing_public_key",
        "data/oaep_key",
        "data/collector_master_public_key",
        "data/collector_master_private_key",
        "data/dispenser_private_key",
        "data/mixin_address",
    ] {
        let owner = match *path {
            "data/seller_database" => Some("SellerDB"),
            "data/redeemer_database" => Some("RedeemerDB"),
            _ => None,
        };
        resources.push(Resource {
            path: (*path).to_owned(),
            owner,
        });
    }

    Plan {
        root: dirs.root().to_owned(),
        global_args: vec![
            "--root".to_owned(),
            dirs.root().display().to_string(),
            "--network".to_owned(),
            network.to_owned(),
            "--esplora-url".to_owned(),
            esplora_url.to_owned(),
        ],
        principals,
        resources,
    }
}

impl Plan {
    pub fn principals(&self) -> &[Principal] {
        &self.principals
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn uid(&self, name: &str) -> Option<u32> {
        self.principals
            .iter()
            .position(|p| p.name == name)
            .and_then(|i| u32::try_from(i).ok())
            .map(|i| BASE_UID + 1 + i)
    }

    pub fn gid(&self, path: &str) -> Option<u32> {
        self.resources
            .iter()
            .position(|r| r.path == path)
            .and_then(|i| u32::try_from(i).ok())
            .map(|i| BASE_GID + 1 + i)
    }

    fn resource_uid(&self, resource: &Resource) -> u32 {
        resource.owner.and_then(|o| self.uid(o)).unwrap_or(0)
    }

    /// The UID/GID assignment, in the same shape the operator sees it.
    pub fn format_tables(&self) -> String {
        let mut lines = vec!["# Processes".to_owned()];
        for principal in &self.principals {
            let gids: Vec<String> = principal
                .grants
                .iter()
                .filter_map(|g| self.gid(g))
                .map(|g| g.to_string())
                .collect();
            lines.push(format!(
                "{}: UID={} GIDs=[{}]",
                principal.name,
                self.uid(principal.name).unwrap_or(0),
                gids.join(", ")
            ));
        }
        lines.push("# Resources".to_owned());
        for resource in &self.resources {
            lines.push(format!(
                "{}: UID={} GID={}",
                resource.path,
                self.resource_uid(resource),
                self.gid(&resource.path).unwrap_or(0)
            ));
        }

        lines.join("\n")
    }

    /// Create the resource directories, pin down their ownership and
    /// modes, then spawn every principal under its own identity.
    ///
    /// Needs to run as root; everything it spawns does not.
    pub fn launch(&self) -> Result<()> {
        for resource in &self.resources {
            let path = self.root.join(&resource.path);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("could not create {}", path.display()))?;
        }

        for resource in &self.resources {
            let dir = self.root.join(&resource.path);
            let uid = self.resource_uid(resource);
            let gid = self
                .gid(&resource.path)
                .context("resource without a GID")?;

            std::os::unix::fs::chown(&dir, Some(uid), Some(gid))?;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o750))?;

            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                std::os::unix::fs::chown(entry.path(), Some(uid), Some(gid))?;
                let mode = if entry.file_type()?.is_dir() { 0o750 } else { 0o640 };
                std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(mode))?;
            }
        }

        let exe = std::env::current_exe().context("cannot locate own binary")?;
        let mut children = Vec::new();

        for principal in &self.principals {
            let uid = self
                .uid(principal.name)
                .context("principal without a UID")?;
            let gids: Vec<u32> = principal
                .grants
                .iter()
                .map(|g| {
                    self.gid(g)
                        .with_context(|| format!("unknown grant {} for {}", g, principal.name))
                })
                .collect::<Result<_>>()?;

            let sock = self
                .root
                .join("rpc")
                .join(principal.name)
                .join("sock");
            if principal.rpc && sock.exists() {
                std::fs::remove_file(&sock)?;
            }

            tracing::info!(name = principal.name, uid, "spawning");

            let mut command = std::process::Command::new(&exe);
            command
                .args(&self.global_args)
                .args(&principal.subcommand)
                .env_clear()
                .env("HOME", "/nonexistent")
                .env("RUST_LOG", std::env::var("RUST_LOG").unwrap_or_default());
            command.gid(NO_PRIVS).groups(&gids).uid(uid);

            let child = command
                .spawn()
                .with_context(|| format!("failed to spawn {}", principal.name))?;
            children.push(child);

            // Dependents connect at startup; do not race them against the
            // socket they need.
            if principal.rpc {
                let deadline = Instant::now() + SOCKET_TIMEOUT;
                while !sock.exists() {
                    if Instant::now() >= deadline {
                        bail!("{} never opened its socket", principal.name);
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }

        for mut child in children {
            let status = child.wait()?;
            tracing::info!(%status, "child exited");
        }

        Ok(())
    }
}

/// Sanity checks over the access table itself, usable without root.
pub fn verify_plan(plan: &Plan) -> Result<()> {
    let mut seen = HashMap::new();
    for principal in plan.principals() {
        if seen.insert(principal.name, ()).is_some() {
            bail!("duplicate principal {}", principal.name);
        }
        for grant in &principal.grants {
            if plan.gid(grant).is_none() {
                bail!("{} is granted unknown resource {}", principal.name, grant);
            }
        }
    }

    Ok(())
}
