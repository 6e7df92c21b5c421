//! Container definitions
//!
//! The long-running `etcd` service, plus the short-lived helpers that do
//! snapshot, checksum and restore work on each etcd host against the etcd
//! data volume mounted at the same path.

use crate::docker::{ContainerSpec, HelperSpec};
use crate::host::Host;

use super::cluster::EtcdSettings;

/// Long-running etcd container
pub const ETCD_CONTAINER: &str = "etcd";

/// Previous etcd container left behind by an interrupted upgrade
pub const OLD_ETCD_CONTAINER: &str = "old-etcd";

pub const SNAPSHOT_CONTAINER: &str = "etcd-snapshot-once";
pub const CHECKSUM_CONTAINER: &str = "etcd-checksum-checker";
pub const RESTORE_CONTAINER: &str = "etcd-restore";
pub const RESTORE_PREPARE_CONTAINER: &str = "etcd-restore-prepare";
pub const RESTORE_SWAP_CONTAINER: &str = "etcd-restore-swap";

/// etcd data volume on every host
pub const ETCD_DATA_DIR: &str = "/var/lib/etcd";

/// Default snapshot directory inside the data volume
pub const DEFAULT_SNAPSHOT_DIR: &str = "/var/lib/etcd/snapshots";

/// Node certificate directory on every host
pub const CERT_PATH_PREFIX: &str = "/etc/kubernetes/ssl";
pub const CA_CERT_NAME: &str = "kube-ca";
pub const ETCD_CERT_NAME: &str = "kube-etcd";

pub const INITIAL_CLUSTER_TOKEN: &str = "etcd-cluster-1";

const ETCDCTL: &str = "/usr/local/bin/etcdctl";

/// Scratch data dir a snapshot is restored into before the swap
const RESTORE_SCRATCH_DIR: &str = "/var/lib/etcd/restore";

pub fn snapshot_path(settings: &EtcdSettings, name: &str) -> String {
    format!("{}/{}", settings.snapshot_dir.trim_end_matches('/'), name)
}

fn cert_file(name: &str) -> String {
    format!("{CERT_PATH_PREFIX}/{name}.pem")
}

fn key_file(name: &str) -> String {
    format!("{CERT_PATH_PREFIX}/{name}-key.pem")
}

fn data_bind() -> String {
    format!("{ETCD_DATA_DIR}:{ETCD_DATA_DIR}")
}

/// Data volume bind, plus the snapshot dir when it lives elsewhere
fn volume_binds(settings: &EtcdSettings, read_only: bool) -> Vec<String> {
    let mode = if read_only { ":ro" } else { "" };
    let mut binds = vec![format!("{ETCD_DATA_DIR}:{ETCD_DATA_DIR}{mode}")];
    let dir = settings.snapshot_dir.trim_end_matches('/');
    if !dir.starts_with(ETCD_DATA_DIR) {
        binds.push(format!("{dir}:{dir}{mode}"));
    }
    binds
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// The `etcd` member for `host`, bootstrapping a new cluster from `initial_cluster`
pub fn etcd_service(host: &Host, settings: &EtcdSettings, initial_cluster: &str) -> ContainerSpec {
    let member = host.etcd_member_name();
    let client_url = host.etcd_client_url();
    let peer_url = host.etcd_peer_url();
    let ca = cert_file(CA_CERT_NAME);
    let cert = cert_file(ETCD_CERT_NAME);
    let key = key_file(ETCD_CERT_NAME);

    ContainerSpec {
        name: ETCD_CONTAINER.to_string(),
        image: settings.image.clone(),
        cmd: strings(&[
            "/usr/local/bin/etcd",
            "--name",
            &member,
            "--data-dir",
            ETCD_DATA_DIR,
            "--advertise-client-urls",
            &client_url,
            "--listen-client-urls",
            &client_url,
            "--initial-advertise-peer-urls",
            &peer_url,
            "--listen-peer-urls",
            &peer_url,
            "--initial-cluster",
            initial_cluster,
            "--initial-cluster-token",
            INITIAL_CLUSTER_TOKEN,
            "--initial-cluster-state",
            "new",
            "--client-cert-auth",
            "--trusted-ca-file",
            &ca,
            "--cert-file",
            &cert,
            "--key-file",
            &key,
            "--peer-client-cert-auth",
            "--peer-trusted-ca-file",
            &ca,
            "--peer-cert-file",
            &cert,
            "--peer-key-file",
            &key,
        ]),
        env: Vec::new(),
        binds: vec![
            data_bind(),
            format!("{CERT_PATH_PREFIX}:{CERT_PATH_PREFIX}:ro"),
        ],
        host_network: true,
    }
}

/// `etcdctl snapshot save` against the host's own client URL
pub fn snapshot_save(host: &Host, settings: &EtcdSettings, name: &str) -> HelperSpec {
    let endpoint = host.etcd_client_url();
    let cacert = cert_file(CA_CERT_NAME);
    let cert = cert_file(ETCD_CERT_NAME);
    let key = key_file(ETCD_CERT_NAME);
    let path = snapshot_path(settings, name);

    HelperSpec {
        name: SNAPSHOT_CONTAINER.to_string(),
        image: settings.image.clone(),
        cmd: strings(&[
            ETCDCTL,
            "--endpoints",
            &endpoint,
            "--cacert",
            &cacert,
            "--cert",
            &cert,
            "--key",
            &key,
            "snapshot",
            "save",
            &path,
        ]),
        env: vec!["ETCDCTL_API=3".to_string()],
        binds: {
            let mut binds = volume_binds(settings, false);
            binds.push(format!("{CERT_PATH_PREFIX}:{CERT_PATH_PREFIX}:ro"));
            binds
        },
        host_network: true,
    }
}

/// `sha256sum` of the snapshot file
pub fn checksum(settings: &EtcdSettings, name: &str) -> HelperSpec {
    HelperSpec {
        name: CHECKSUM_CONTAINER.to_string(),
        image: settings.helper_image.clone(),
        cmd: strings(&["sha256sum", &snapshot_path(settings, name)]),
        env: Vec::new(),
        binds: volume_binds(settings, true),
        host_network: false,
    }
}

/// Clear any scratch dir left by an earlier restore
pub fn restore_prepare(settings: &EtcdSettings) -> HelperSpec {
    HelperSpec {
        name: RESTORE_PREPARE_CONTAINER.to_string(),
        image: settings.helper_image.clone(),
        cmd: strings(&["rm", "-rf", RESTORE_SCRATCH_DIR]),
        env: Vec::new(),
        binds: vec![data_bind()],
        host_network: false,
    }
}

/// `etcdctl snapshot restore` into the scratch dir as this host's member
pub fn restore(
    host: &Host,
    settings: &EtcdSettings,
    name: &str,
    initial_cluster: &str,
) -> HelperSpec {
    let member = host.etcd_member_name();
    let peer_url = host.etcd_peer_url();
    let path = snapshot_path(settings, name);

    HelperSpec {
        name: RESTORE_CONTAINER.to_string(),
        image: settings.image.clone(),
        cmd: strings(&[
            ETCDCTL,
            "snapshot",
            "restore",
            &path,
            "--name",
            &member,
            "--data-dir",
            RESTORE_SCRATCH_DIR,
            "--initial-cluster",
            initial_cluster,
            "--initial-cluster-token",
            INITIAL_CLUSTER_TOKEN,
            "--initial-advertise-peer-urls",
            &peer_url,
        ]),
        env: vec!["ETCDCTL_API=3".to_string()],
        binds: volume_binds(settings, false),
        host_network: true,
    }
}

/// Replace the live member dir with the restored one
pub fn restore_swap(settings: &EtcdSettings) -> HelperSpec {
    let script = format!(
        "rm -rf {data}/member && mv {scratch}/member {data}/member && rm -rf {scratch}",
        data = ETCD_DATA_DIR,
        scratch = RESTORE_SCRATCH_DIR,
    );
    HelperSpec {
        name: RESTORE_SWAP_CONTAINER.to_string(),
        image: settings.helper_image.clone(),
        cmd: vec!["sh".to_string(), "-c".to_string(), script],
        env: Vec::new(),
        binds: vec![data_bind()],
        host_network: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        Host::new("203.0.113.1", "A").with_internal_address("10.0.0.1")
    }

    #[test]
    fn snapshot_save_targets_host_client_url() {
        let spec = snapshot_save(&host(), &EtcdSettings::default(), "pre-upgrade");
        assert_eq!(spec.name, SNAPSHOT_CONTAINER);
        assert!(spec.host_network);
        let cmd = spec.cmd.join(" ");
        assert!(cmd.contains("--endpoints https://10.0.0.1:2379"));
        assert!(cmd.contains("--cert /etc/kubernetes/ssl/kube-etcd.pem"));
        assert!(cmd.ends_with("snapshot save /var/lib/etcd/snapshots/pre-upgrade"));
        assert_eq!(spec.env, vec!["ETCDCTL_API=3"]);
    }

    #[test]
    fn checksum_reads_snapshot_read_only() {
        let spec = checksum(&EtcdSettings::default(), "pre-upgrade");
        assert_eq!(
            spec.cmd,
            vec!["sha256sum", "/var/lib/etcd/snapshots/pre-upgrade"]
        );
        assert_eq!(spec.binds, vec!["/var/lib/etcd:/var/lib/etcd:ro"]);
    }

    #[test]
    fn restore_carries_member_and_peer_list() {
        let peers = "etcd-A=https://10.0.0.1:2380,etcd-B=https://10.0.0.2:2380";
        let spec = restore(&host(), &EtcdSettings::default(), "pre-upgrade", peers);
        let cmd = spec.cmd.join(" ");
        assert!(cmd.contains("snapshot restore /var/lib/etcd/snapshots/pre-upgrade"));
        assert!(cmd.contains("--name etcd-A"));
        assert!(cmd.contains(&format!("--initial-cluster {peers}")));
        assert!(cmd.contains("--initial-advertise-peer-urls https://10.0.0.1:2380"));
    }

    #[test]
    fn etcd_service_serves_tls_on_internal_address() {
        let peers = "etcd-A=https://10.0.0.1:2380,etcd-B=https://10.0.0.2:2380";
        let spec = etcd_service(&host(), &EtcdSettings::default(), peers);
        assert_eq!(spec.name, ETCD_CONTAINER);
        assert_eq!(spec.image, crate::etcd::DEFAULT_ETCD_IMAGE);
        assert!(spec.host_network);

        let cmd = spec.cmd.join(" ");
        assert!(cmd.starts_with("/usr/local/bin/etcd --name etcd-A --data-dir /var/lib/etcd"));
        assert!(cmd.contains("--listen-client-urls https://10.0.0.1:2379"));
        assert!(cmd.contains("--initial-advertise-peer-urls https://10.0.0.1:2380"));
        assert!(cmd.contains(&format!("--initial-cluster {peers} ")));
        assert!(cmd.contains("--initial-cluster-token etcd-cluster-1"));
        assert!(cmd.contains("--peer-cert-file /etc/kubernetes/ssl/kube-etcd.pem"));
        assert!(cmd.contains("--key-file /etc/kubernetes/ssl/kube-etcd-key.pem"));
        assert_eq!(
            spec.binds,
            vec![
                "/var/lib/etcd:/var/lib/etcd",
                "/etc/kubernetes/ssl:/etc/kubernetes/ssl:ro"
            ]
        );
    }

    #[test]
    fn snapshot_dir_trailing_slash_is_ignored() {
        let settings = EtcdSettings {
            snapshot_dir: "/backups/".to_string(),
            ..EtcdSettings::default()
        };
        assert_eq!(snapshot_path(&settings, "nightly"), "/backups/nightly");
        assert_eq!(
            checksum(&settings, "nightly").binds,
            vec!["/var/lib/etcd:/var/lib/etcd:ro", "/backups:/backups:ro"]
        );
    }
}
