use std::{collections::BTreeMap, fs, path::Path};

use crate::{error::Error, model::Role};

const INVENTORY_CONST: [&str; 8] = [
    "\n[etcd:children]",
    "kube-master",
    "\n[k8s-cluster:children]",
    "kube-node",
    "kube-master",
    "\n[k8s-cluster:vars]",
    "ansible_become=true",
    "ansible_ssh_common_args=\"-o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no\"",
];

/// Renders the Ansible inventory from VM name to address mappings.
/// Hosts are grouped by the role prefix of their names.
pub fn render(hosts: &BTreeMap<String, String>) -> String {
    let mut lines: Vec<String> = hosts
        .iter()
        .map(|(name, ip)| format!("{name}    ansible_ssh_host={ip}"))
        .collect();

    for (group, role) in [("kube-master", Role::Master), ("kube-node", Role::Worker)] {
        lines.push(format!("\n[{group}]"));
        lines.extend(
            hosts
                .keys()
                .filter(|name| name.starts_with(role.as_str()))
                .cloned(),
        );
    }

    lines.extend(INVENTORY_CONST.iter().map(|line| line.to_string()));
    lines.join("\n")
}

/// Replaces whatever inventory was at `path`.
pub fn write(path: &Path, inventory: &str) -> Result<(), Error> {
    fs::write(path, inventory)?;
    tracing::debug!("Created inventory file {}:\n{inventory}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("master-0-demo".to_string(), "10.0.0.5".to_string()),
            ("worker-0-demo".to_string(), "10.0.0.6".to_string()),
        ])
    }

    #[test]
    fn hosts_are_grouped_by_role() {
        let inventory = render(&hosts());
        let lines: Vec<&str> = inventory.lines().collect();

        assert_eq!(lines[0], "master-0-demo    ansible_ssh_host=10.0.0.5");
        assert_eq!(lines[1], "worker-0-demo    ansible_ssh_host=10.0.0.6");

        let master = lines.iter().position(|l| *l == "[kube-master]").unwrap();
        let node = lines.iter().position(|l| *l == "[kube-node]").unwrap();
        assert_eq!(&lines[master + 1..node - 1], &["master-0-demo"]);
        assert_eq!(lines[node + 1], "worker-0-demo");
        assert_eq!(lines[node + 2], "");
        assert_eq!(lines[node + 3], "[etcd:children]");
    }

    #[test]
    fn boilerplate_sections_close_the_document() {
        let inventory = render(&hosts());
        assert!(inventory.ends_with(
            "[k8s-cluster:vars]\nansible_become=true\nansible_ssh_common_args=\"-o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no\""
        ));
        assert!(inventory.contains("\n\n[k8s-cluster:children]\nkube-node\nkube-master\n"));
    }

    #[test]
    fn write_overwrites_previous_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory");
        fs::write(&path, "stale content that is much longer than the new one").unwrap();

        write(&path, "fresh").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "fresh");
    }
}
